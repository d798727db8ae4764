//! # Feature tracking
//!
//! Sparse correspondences between consecutive frames. The default tracker detects Shi-Tomasi
//! corners in the previous frame and follows them into the current one with pyramidal
//! Lucas-Kanade optical flow.

use crate::config::TrackerConfig;
use crate::luma::Luma;
use crate::prelude::v1::*;
use nalgebra as na;
use std::hash::Hasher;

/// Pair of matching points in two frames.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Correspondence {
    /// Location in the previous frame.
    pub prev: na::Point2<f32>,
    /// Location in the current frame.
    pub curr: na::Point2<f32>,
    /// Match quality in `[0; 1]` range.
    pub confidence: f32,
}

impl Correspondence {
    pub fn new(prev: na::Point2<f32>, curr: na::Point2<f32>, confidence: f32) -> Self {
        Self {
            prev,
            curr,
            confidence,
        }
    }

    /// Displacement from the previous to the current location.
    pub fn motion(&self) -> na::Vector2<f32> {
        self.curr - self.prev
    }

    /// Move both points by `-origin`.
    pub fn relative_to(&self, origin: na::Vector2<f32>) -> Self {
        Self {
            prev: self.prev - origin,
            curr: self.curr - origin,
            ..*self
        }
    }
}

/// Outcome of a tracking step.
#[derive(Clone, Debug, PartialEq)]
pub enum Tracked {
    /// There was no previous frame to track from.
    ColdStart,
    Correspondences(Vec<Correspondence>),
}

/// Generic feature tracker.
pub trait FeatureTracker {
    /// Find correspondences between two frames.
    ///
    /// Returns [`Tracked::ColdStart`] if `previous` is `None`. Both frames must have the same
    /// dimensions. Every returned correspondence has at least the configured minimum confidence.
    ///
    /// # Arguments
    ///
    /// * `previous` - earlier frame, if there is one.
    /// * `current` - frame to track into.
    fn track(&mut self, previous: Option<&Frame>, current: &Frame) -> Result<Tracked>;

    /// Drop any per-stream state.
    fn reset(&mut self) {}
}

/// Mean absolute residual (in luma units, offset removed) that maps to zero confidence.
const RESIDUAL_SCALE: f32 = 0.25;

/// Smallest per-pixel eigenvalue of a trackable patch.
const MIN_EIGEN: f32 = 1e-6;

/// Smallest pyramid level dimension.
const MIN_LEVEL_DIM: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq)]
struct FrameKey {
    index: u64,
    dims: FrameDims,
    digest: u64,
}

impl FrameKey {
    fn of(frame: &Frame) -> Self {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        hasher.write(frame.as_bytes());
        Self {
            index: frame.index(),
            dims: frame.dims(),
            digest: hasher.finish(),
        }
    }
}

struct Prepared {
    key: FrameKey,
    pyramid: Vec<Luma>,
    corners: Vec<na::Point2<f32>>,
}

/// Shi-Tomasi corners tracked with pyramidal Lucas-Kanade.
///
/// The pyramid and corners of the current frame are kept for the next call, where that frame is
/// expected to come back as `previous`. The cache is keyed on frame contents, so results never
/// depend on it.
pub struct PyramidTracker {
    config: TrackerConfig,
    min_confidence: f32,
    cache: Option<Prepared>,
}

impl PyramidTracker {
    pub fn new(config: TrackerConfig, min_confidence: f32) -> Self {
        Self {
            config,
            min_confidence,
            cache: None,
        }
    }

    pub fn from_config(config: &StabilizerConfig) -> Self {
        Self::new(config.tracker, config.min_confidence)
    }

    fn prepare(&self, frame: &Frame, key: FrameKey) -> Prepared {
        let mut luma = frame.luma();

        if self.config.equalize {
            luma.equalize();
        }

        let corners = detect_corners(&luma, &self.config);
        let pyramid = luma.pyramid(self.config.pyramid_levels, MIN_LEVEL_DIM);

        Prepared {
            key,
            pyramid,
            corners,
        }
    }

    fn take_prepared(&mut self, frame: &Frame) -> Prepared {
        let key = FrameKey::of(frame);
        match self.cache.take() {
            Some(cached) if cached.key == key => cached,
            _ => self.prepare(frame, key),
        }
    }
}

impl Default for PyramidTracker {
    fn default() -> Self {
        Self::from_config(&StabilizerConfig::default())
    }
}

impl FeatureTracker for PyramidTracker {
    fn track(&mut self, previous: Option<&Frame>, current: &Frame) -> Result<Tracked> {
        let previous = match previous {
            Some(previous) => previous,
            None => {
                let key = FrameKey::of(current);
                self.cache = Some(self.prepare(current, key));
                return Ok(Tracked::ColdStart);
            }
        };

        if previous.dims() != current.dims() {
            return Err(ConfigurationError::DimensionMismatch {
                expected: previous.dims(),
                found: current.dims(),
            }
            .into());
        }

        let prev = self.take_prepared(previous);
        let curr = self.take_prepared(current);

        let (width, height) = (current.width() as f32, current.height() as f32);

        let correspondences = prev
            .corners
            .iter()
            .filter_map(|&corner| {
                track_point(&prev.pyramid, &curr.pyramid, corner, &self.config)
                    .map(|(p, residual)| {
                        let confidence = (1.0 - residual / RESIDUAL_SCALE).clamp(0.0, 1.0);
                        Correspondence::new(corner, p, confidence)
                    })
            })
            .filter(|c| {
                (0.0..=width - 1.0).contains(&c.curr.x) && (0.0..=height - 1.0).contains(&c.curr.y)
            })
            .filter(|c| c.confidence >= self.min_confidence)
            .collect::<Vec<_>>();

        log::trace!(
            "frame {}: {} of {} corners tracked",
            current.index(),
            correspondences.len(),
            prev.corners.len()
        );

        self.cache = Some(curr);

        Ok(Tracked::Correspondences(correspondences))
    }

    fn reset(&mut self) {
        self.cache = None;
    }
}

/// Detect up to `max_features` Shi-Tomasi corners.
///
/// Corners are returned strongest first, with ties broken by raster order.
pub fn detect_corners(luma: &Luma, config: &TrackerConfig) -> Vec<na::Point2<f32>> {
    let (width, height) = (luma.width(), luma.height());
    let margin = config.window_radius + 1;

    if width <= 2 * margin || height <= 2 * margin {
        return vec![];
    }

    let idx = |x: usize, y: usize| y * width + x;

    // Gradient products
    let mut products = vec![[0f32; 3]; width * height];
    for y in 0..height {
        for x in 0..width {
            let (xi, yi) = (x as isize, y as isize);
            let gx = (luma.get(xi + 1, yi) - luma.get(xi - 1, yi)) * 0.5;
            let gy = (luma.get(xi, yi + 1) - luma.get(xi, yi - 1)) * 0.5;
            products[idx(x, y)] = [gx * gx, gx * gy, gy * gy];
        }
    }

    // Minimum eigenvalue of the 3x3 structure tensor
    let mut response = vec![0f32; width * height];
    let mut max_response = 0f32;
    for y in margin..height - margin {
        for x in margin..width - margin {
            let mut t = [0f32; 3];
            for oy in y - 1..=y + 1 {
                for ox in x - 1..=x + 1 {
                    let p = products[idx(ox, oy)];
                    t[0] += p[0];
                    t[1] += p[1];
                    t[2] += p[2];
                }
            }
            let half_trace = (t[0] + t[2]) * 0.5;
            let half_diff = (t[0] - t[2]) * 0.5;
            let r = half_trace - (half_diff * half_diff + t[1] * t[1]).sqrt();
            response[idx(x, y)] = r;
            max_response = max_response.max(r);
        }
    }

    if max_response <= 0.0 {
        return vec![];
    }

    let threshold = max_response * config.quality_level;

    let mut candidates = vec![];
    for y in margin..height - margin {
        for x in margin..width - margin {
            let r = response[idx(x, y)];
            if r <= 0.0 || r < threshold {
                continue;
            }
            let is_max = (y - 1..=y + 1)
                .flat_map(|oy| (x - 1..=x + 1).map(move |ox| (ox, oy)))
                .all(|(ox, oy)| response[idx(ox, oy)] <= r);
            if is_max {
                candidates.push((r, x, y));
            }
        }
    }

    candidates.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then((a.2, a.1).cmp(&(b.2, b.1)))
    });

    // Enforce minimum distance with a bucket grid.
    let cell = config.min_distance.max(1.0);
    let grid_w = (width as f32 / cell).ceil() as usize + 1;
    let grid_h = (height as f32 / cell).ceil() as usize + 1;
    let mut grid: Vec<Vec<na::Point2<f32>>> = vec![vec![]; grid_w * grid_h];
    let min_dist_sq = config.min_distance * config.min_distance;

    let mut corners = vec![];

    for (_, x, y) in candidates {
        if corners.len() >= config.max_features {
            break;
        }

        let p = na::Point2::new(x as f32, y as f32);
        let (gx, gy) = ((p.x / cell) as usize, (p.y / cell) as usize);

        let crowded = (gy.saturating_sub(1)..=(gy + 1).min(grid_h - 1))
            .flat_map(|cy| (gx.saturating_sub(1)..=(gx + 1).min(grid_w - 1)).map(move |cx| (cx, cy)))
            .any(|(cx, cy)| {
                grid[cy * grid_w + cx]
                    .iter()
                    .any(|o| (o - p).norm_squared() < min_dist_sq)
            });

        if !crowded {
            grid[gy * grid_w + gx].push(p);
            corners.push(p);
        }
    }

    corners
}

/// Follow a single point from `prev` into `curr` through the pyramid.
///
/// Returns the tracked location and the mean absolute residual of the final patch, after
/// removing the mean brightness difference, or `None` if the patch is untextured at full
/// resolution.
fn track_point(
    prev: &[Luma],
    curr: &[Luma],
    point: na::Point2<f32>,
    config: &TrackerConfig,
) -> Option<(na::Point2<f32>, f32)> {
    let levels = std::cmp::min(prev.len(), curr.len());
    let r = config.window_radius as isize;
    let patch = (2 * r + 1) * (2 * r + 1);

    let mut flow = na::Vector2::<f32>::zeros();

    for level in (0..levels).rev() {
        let (prev, curr) = (&prev[level], &curr[level]);
        let scale = (1u32 << level) as f32;
        let p = point / scale;

        let mut template = Vec::with_capacity(patch as usize);
        let mut mean_gradient = (0.0, 0.0);

        for oy in -r..=r {
            for ox in -r..=r {
                let (x, y) = (p.x + ox as f32, p.y + oy as f32);
                let (gx, gy) = prev.gradient(x, y);
                mean_gradient.0 += gx;
                mean_gradient.1 += gy;
                template.push((x, y, prev.sample(x, y), gx, gy));
            }
        }

        // With zero-mean gradients, a brightness offset between the patches does not move the
        // solution.
        let (mx, my) = (
            mean_gradient.0 / patch as f32,
            mean_gradient.1 / patch as f32,
        );

        let mut g = na::Matrix2::<f32>::zeros();

        for (_, _, _, gx, gy) in &mut template {
            *gx -= mx;
            *gy -= my;
            g[(0, 0)] += *gx * *gx;
            g[(0, 1)] += *gx * *gy;
            g[(1, 1)] += *gy * *gy;
        }
        g[(1, 0)] = g[(0, 1)];

        let eigen = g.symmetric_eigenvalues().min() / patch as f32;
        let inv = if eigen < MIN_EIGEN {
            None
        } else {
            g.try_inverse()
        };

        match inv {
            Some(inv) => {
                for _ in 0..config.max_iterations {
                    let mut b = na::Vector2::<f32>::zeros();
                    for &(x, y, v, gx, gy) in &template {
                        let diff = v - curr.sample(x + flow.x, y + flow.y);
                        b.x += diff * gx;
                        b.y += diff * gy;
                    }

                    let delta = inv * b;
                    flow += delta;

                    if delta.norm() < config.epsilon {
                        break;
                    }
                }
            }
            // Coarse levels may be too blurry, keep the current guess.
            None if level > 0 => {}
            None => return None,
        }

        if level > 0 {
            flow *= 2.0;
        }
    }

    if !flow.iter().all(|v| v.is_finite()) {
        return None;
    }

    let (prev, curr) = (&prev[0], &curr[0]);

    let diffs = (-r..=r)
        .flat_map(|oy| (-r..=r).map(move |ox| (ox, oy)))
        .map(|(ox, oy)| {
            let (x, y) = (point.x + ox as f32, point.y + oy as f32);
            prev.sample(x, y) - curr.sample(x + flow.x, y + flow.y)
        })
        .collect::<Vec<_>>();

    let offset = diffs.iter().sum::<f32>() / patch as f32;
    let residual = diffs.iter().map(|d| (d - offset).abs()).sum::<f32>();

    Some((point + flow, residual / patch as f32))
}
