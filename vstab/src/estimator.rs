//! # Inter-frame motion estimation

use crate::config::RansacConfig;
use crate::prelude::v1::*;
use nalgebra as na;
use rand::{seq::SliceRandom, SeedableRng};

/// Generic inter-frame motion estimator.
pub trait MotionEstimator {
    /// Estimate the transform mapping previous frame points onto the current frame.
    ///
    /// Correspondences are expected in centered frame coordinates. Fails with
    /// [`Error::InsufficientMotionData`] when there are not enough reliable correspondences to
    /// fit a model.
    ///
    /// # Arguments
    ///
    /// * `correspondences` - matched points between the two frames.
    fn estimate(&mut self, correspondences: &[Correspondence]) -> Result<Transform>;

    /// Drop any per-stream state.
    fn reset(&mut self) {}
}

/// Singular weighted point spread, below which rotation and scale are not fitted.
const DEGENERATE_SPREAD: f32 = 1e-6;

/// Robust similarity fitting with RANSAC.
///
/// Minimal samples are drawn from a generator that is reseeded on every call, so the same
/// correspondences always produce the same transform. Hypotheses are ranked by inlier count,
/// and equal counts are resolved in favour of the smallest rotation and scale change. The winner
/// is then refitted with confidence-weighted least squares on its inliers.
#[derive(Clone, Debug)]
pub struct RansacEstimator {
    model: MotionModel,
    min_correspondences: usize,
    config: RansacConfig,
}

impl Default for RansacEstimator {
    fn default() -> Self {
        Self::from_config(&StabilizerConfig::default())
    }
}

impl RansacEstimator {
    pub fn from_config(config: &StabilizerConfig) -> Self {
        Self {
            model: config.motion_model,
            min_correspondences: config.min_correspondences,
            config: config.ransac,
        }
    }

    pub fn model(self, model: MotionModel) -> Self {
        Self { model, ..self }
    }

    pub fn min_correspondences(self, min_correspondences: usize) -> Self {
        Self {
            min_correspondences,
            ..self
        }
    }

    pub fn iterations(mut self, iterations: usize) -> Self {
        self.config.iterations = iterations;
        self
    }

    pub fn inlier_threshold(mut self, inlier_threshold: f32) -> Self {
        self.config.inlier_threshold = inlier_threshold;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    fn required(&self) -> usize {
        std::cmp::max(self.min_correspondences, self.model.min_samples())
    }

    fn inliers(&self, fit: &Transform, correspondences: &[Correspondence]) -> Vec<Correspondence> {
        correspondences
            .iter()
            .filter(|c| {
                (fit.transform_point(c.prev) - c.curr).norm() <= self.config.inlier_threshold
            })
            .copied()
            .collect()
    }
}

impl Properties for RansacEstimator {
    fn props_mut(&mut self) -> Vec<(&str, PropertyMut)> {
        vec![
            (
                "Ransac iters",
                PropertyMut::usize(&mut self.config.iterations, 1, 5000),
            ),
            (
                "Inlier threshold",
                PropertyMut::float(&mut self.config.inlier_threshold, 0.01, 50.0),
            ),
            (
                "Refine rounds",
                PropertyMut::usize(&mut self.config.refine_rounds, 0, 20),
            ),
            (
                "Min correspondences",
                PropertyMut::usize(&mut self.min_correspondences, 1, 1000),
            ),
        ]
    }
}

impl MotionEstimator for RansacEstimator {
    fn estimate(&mut self, correspondences: &[Correspondence]) -> Result<Transform> {
        let required = self.required();

        if correspondences.len() < required {
            return Err(Error::InsufficientMotionData {
                found: correspondences.len(),
                required,
            });
        }

        let rng = &mut rand::rngs::StdRng::seed_from_u64(self.config.seed);

        let mut best: Option<(Transform, usize)> = None;

        for _ in 0..self.config.iterations {
            let samples = correspondences
                .choose_multiple(rng, self.model.min_samples())
                .copied()
                .collect::<Vec<_>>();

            let fit = match fit_model(self.model, &samples) {
                Some(fit) => fit,
                None => continue,
            };

            let inliers = correspondences
                .iter()
                .filter(|c| {
                    (fit.transform_point(c.prev) - c.curr).norm() <= self.config.inlier_threshold
                })
                .count();

            let better = match best {
                None => true,
                Some((best_fit, best_inliers)) => {
                    inliers > best_inliers
                        || (inliers == best_inliers
                            && fit.motion_magnitude() < best_fit.motion_magnitude())
                }
            };

            if better {
                best = Some((fit, inliers));
            }
        }

        let (mut fit, _) = best.ok_or(Error::InsufficientMotionData {
            found: 0,
            required,
        })?;

        let mut inliers = self.inliers(&fit, correspondences);

        for _ in 0..self.config.refine_rounds {
            let refit = match fit_model(self.model, &inliers) {
                Some(refit) => refit,
                None => break,
            };

            let next = self.inliers(&refit, correspondences);

            if next.len() < inliers.len() {
                break;
            }

            let converged = next == inliers;
            fit = refit;
            inliers = next;

            if converged {
                break;
            }
        }

        if inliers.len() < required {
            return Err(Error::InsufficientMotionData {
                found: inliers.len(),
                required,
            });
        }

        log::trace!(
            "{} of {} correspondences agree on {:?}",
            inliers.len(),
            correspondences.len(),
            fit
        );

        Ok(fit)
    }
}

/// Fit a motion model to correspondences with weighted least squares.
///
/// Weights are the correspondence confidences. Rotation and scale fall back to the identity
/// when the points have no spread. Returns `None` if the fit is not a valid transform.
pub fn fit_model(model: MotionModel, correspondences: &[Correspondence]) -> Option<Transform> {
    if correspondences.is_empty() {
        return None;
    }

    let weight = |c: &Correspondence| c.confidence.max(f32::EPSILON);

    let total = correspondences.iter().map(weight).sum::<f32>();
    let (src_mean, dst_mean) = correspondences.iter().fold(
        (na::Vector2::zeros(), na::Vector2::zeros()),
        |(s, d), c| (s + c.prev.coords * weight(c), d + c.curr.coords * weight(c)),
    );
    let (src_mean, dst_mean): (na::Vector2<f32>, na::Vector2<f32>) =
        (src_mean / total, dst_mean / total);

    let (mut dot, mut cross, mut spread) = (0.0, 0.0, 0.0);

    for c in correspondences {
        let w = weight(c);
        let s = c.prev.coords - src_mean;
        let d = c.curr.coords - dst_mean;
        dot += w * (s.x * d.x + s.y * d.y);
        cross += w * (s.x * d.y - s.y * d.x);
        spread += w * (s.x * s.x + s.y * s.y);
    }

    let (angle, scale) = if model == MotionModel::Translation || spread / total < DEGENERATE_SPREAD
    {
        (0.0, 1.0)
    } else {
        let (a, b) = (dot / spread, cross / spread);
        match model {
            MotionModel::Similarity => (b.atan2(a), a.hypot(b)),
            _ => (b.atan2(a), 1.0),
        }
    };

    let linear = Transform::new(0.0, 0.0, angle, scale);
    let t = dst_mean - linear.transform_point(na::Point2::from(src_mean)).coords;

    let fit = Transform::new(t.x, t.y, angle, scale);

    if fit.is_valid() {
        Some(fit)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Vec<na::Point2<f32>> {
        (-4..=4)
            .flat_map(|y| (-5..=5).map(move |x| na::Point2::new(x as f32 * 15.0, y as f32 * 12.0)))
            .collect()
    }

    fn project(t: &Transform) -> Vec<Correspondence> {
        grid()
            .into_iter()
            .map(|p| Correspondence::new(p, t.transform_point(p), 1.0))
            .collect()
    }

    #[test]
    fn identical_points_give_identity() {
        let corr = project(&Transform::IDENTITY);
        let fit = RansacEstimator::default().estimate(&corr).unwrap();
        assert_eq!(fit, Transform::IDENTITY);
    }

    #[test]
    fn recovers_similarity() {
        let truth = Transform::new(4.5, -2.25, 0.04, 1.02);
        let fit = RansacEstimator::default().estimate(&project(&truth)).unwrap();
        assert!(fit.max_abs_diff(&truth) < 1e-3, "{:?}", fit);
    }

    #[test]
    fn rigid_model_keeps_scale() {
        let truth = Transform::new(1.0, 2.0, -0.03, 1.0);
        let fit = RansacEstimator::default()
            .model(MotionModel::Rigid)
            .estimate(&project(&truth))
            .unwrap();
        assert_eq!(fit.scale, 1.0);
        assert!(fit.max_abs_diff(&truth) < 1e-3, "{:?}", fit);
    }

    #[test]
    fn translation_model() {
        let truth = Transform::translation(-3.0, 7.5);
        let fit = RansacEstimator::default()
            .model(MotionModel::Translation)
            .estimate(&project(&truth))
            .unwrap();
        assert!(fit.max_abs_diff(&truth) < 1e-4, "{:?}", fit);
    }

    #[test]
    fn rejects_outliers() {
        let truth = Transform::new(2.0, 1.0, 0.02, 1.0);
        let mut corr = project(&truth);

        // Every third correspondence points somewhere unrelated.
        for (i, c) in corr.iter_mut().enumerate().filter(|(i, _)| i % 3 == 0) {
            c.curr += na::Vector2::new(25.0 + i as f32, -40.0);
        }

        let fit = RansacEstimator::default().estimate(&corr).unwrap();
        assert!(fit.max_abs_diff(&truth) < 1e-3, "{:?}", fit);
    }

    #[test]
    fn deterministic() {
        let truth = Transform::new(2.0, 1.0, 0.02, 1.0);
        let mut corr = project(&truth);
        for c in corr.iter_mut().step_by(4) {
            c.curr.x += 9.0;
        }

        let mut estimator = RansacEstimator::default();
        let a = estimator.estimate(&corr).unwrap();
        let b = estimator.estimate(&corr).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn insufficient_data() {
        let corr = project(&Transform::IDENTITY);

        assert_eq!(
            RansacEstimator::default().estimate(&corr[..3]),
            Err(Error::InsufficientMotionData {
                found: 3,
                required: 4
            })
        );

        assert!(matches!(
            RansacEstimator::default().estimate(&[]),
            Err(Error::InsufficientMotionData { found: 0, .. })
        ));
    }

    #[test]
    fn scattered_motion_is_insufficient() {
        // No two correspondences agree on any transform.
        let corr = grid()
            .into_iter()
            .take(6)
            .enumerate()
            .map(|(i, p)| {
                let off = na::Vector2::new((i * i) as f32 * 7.0, (i * 13 % 5) as f32 * 11.0);
                Correspondence::new(p, p + off, 1.0)
            })
            .collect::<Vec<_>>();

        let res = RansacEstimator::default()
            .model(MotionModel::Translation)
            .estimate(&corr);

        assert!(matches!(res, Err(Error::InsufficientMotionData { .. })));
    }

    #[test]
    fn prefers_smaller_motion_on_ties() {
        // Two clusters with equal support: a pure shift and a rotation.
        let shift = Transform::translation(1.0, 0.0);
        let turn = Transform::new(0.0, 0.0, 0.3, 1.0);

        let points = grid();
        let corr = points
            .iter()
            .take(10)
            .map(|&p| Correspondence::new(p, shift.transform_point(p), 1.0))
            .chain(
                points
                    .iter()
                    .skip(50)
                    .take(10)
                    .map(|&p| Correspondence::new(p, turn.transform_point(p), 1.0)),
            )
            .collect::<Vec<_>>();

        let fit = RansacEstimator::default().estimate(&corr).unwrap();
        assert!(fit.max_abs_diff(&shift) < 1e-3, "{:?}", fit);
    }

    #[test]
    fn weighted_fit_follows_confidence() {
        let p = na::Point2::new(0.0, 0.0);
        let corr = [
            Correspondence::new(p, na::Point2::new(1.0, 0.0), 0.75),
            Correspondence::new(p, na::Point2::new(3.0, 0.0), 0.25),
        ];
        let fit = fit_model(MotionModel::Translation, &corr).unwrap();
        assert!((fit.dx - 1.5).abs() < 1e-6);
    }
}
