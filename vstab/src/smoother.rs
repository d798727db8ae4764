//! # Trajectory smoothing
//!
//! Raw per-frame motion is accumulated into a camera trajectory, which is then low-pass filtered
//! over a bounded window of neighbouring frames. The difference between the smoothed and the raw
//! trajectory is the correction a frame needs to be warped by.

use crate::prelude::v1::*;

/// Filter of a window of cumulative transforms.
pub trait SmoothingFilter {
    /// Smooth the transform at `center` of the window.
    ///
    /// The window is symmetric around `center`, and may be as short as a single element at the
    /// start or the end of the stream.
    ///
    /// # Arguments
    ///
    /// * `window` - consecutive cumulative transforms, oldest first.
    /// * `center` - index of the transform being smoothed.
    fn smooth(&self, window: &[Transform], center: usize) -> Transform;
}

/// Componentwise weighted average.
///
/// Weights are taken from a kernel centered on the smoothed frame. Windows shorter than the
/// kernel use its central part, renormalised.
#[derive(Clone, Debug, PartialEq)]
pub struct WeightedAverage {
    kernel: Vec<f32>,
}

impl WeightedAverage {
    /// Create a filter from an odd-sized kernel.
    pub fn new(kernel: Vec<f32>) -> Result<Self> {
        if kernel.len() % 2 == 0 {
            return Err(Error::invalid_value(
                "smoothing_weights",
                format!("kernel must have an odd length, got {}", kernel.len()),
            ));
        }

        Ok(Self { kernel })
    }

    /// Uniform (box) filter of the given radius.
    pub fn uniform(radius: usize) -> Self {
        Self {
            kernel: vec![1.0; 2 * radius + 1],
        }
    }

    pub fn from_weights(weights: &SmoothingWeights, radius: usize) -> Result<Self> {
        weights.kernel(radius).and_then(Self::new)
    }

    pub fn kernel(&self) -> &[f32] {
        &self.kernel
    }
}

impl SmoothingFilter for WeightedAverage {
    fn smooth(&self, window: &[Transform], center: usize) -> Transform {
        let radius = (self.kernel.len() / 2) as isize;
        let base = window[center].params();

        let mut total = 0.0;
        let mut acc = [0f32; 4];

        for (i, t) in window.iter().enumerate() {
            let k = radius + i as isize - center as isize;
            let w = match usize::try_from(k).ok().and_then(|k| self.kernel.get(k)) {
                Some(w) => *w,
                None => continue,
            };

            total += w;
            for (a, (v, b)) in acc.iter_mut().zip(t.params().iter().zip(base)) {
                *a += w * (v - b);
            }
        }

        if total <= 0.0 {
            return window[center];
        }

        // Averaging deviations from the center keeps constant windows exact.
        let mut out = base;
        for (o, a) in out.iter_mut().zip(acc) {
            *o += a / total;
        }

        Transform::from_params(out)
    }
}

/// Camera path accumulated since the start of the stream.
///
/// The history grows by one entry per frame until the smoother is reset, so long-lived streams
/// should be reset at scene cuts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Trajectory {
    raw: Vec<Transform>,
    cumulative: Vec<Transform>,
    smoothed: Vec<Transform>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Per-frame motion, relative to the previous frame.
    pub fn raw(&self) -> &[Transform] {
        &self.raw
    }

    /// Motion of every frame relative to the first one.
    pub fn cumulative(&self) -> &[Transform] {
        &self.cumulative
    }

    /// Smoothed cumulative motion of the frames finalised so far.
    pub fn smoothed(&self) -> &[Transform] {
        &self.smoothed
    }

    fn push(&mut self, raw: Transform) {
        let cumulative = match self.cumulative.last() {
            Some(prev) => raw * *prev,
            None => raw,
        };
        self.raw.push(raw);
        self.cumulative.push(cumulative);
    }
}

/// Finalised trajectory sample of a single frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Smoothed {
    /// Position of the frame in the stream.
    pub index: u64,
    /// Cumulative raw motion.
    pub raw: Transform,
    /// Cumulative smoothed motion.
    pub smoothed: Transform,
}

impl Smoothed {
    /// Transform that moves the frame from its raw onto its smoothed position.
    pub fn correction(&self) -> Transform {
        self.smoothed * self.raw.inverse()
    }
}

/// Bounded-lag trajectory smoother.
///
/// A frame is finalised once `radius` newer frames have been pushed, or when the stream is
/// flushed. The window used for frame `i` spans `min(radius, i, last - i)` frames on either
/// side, so it shrinks symmetrically at both ends of the stream.
///
/// # Examples
///
/// ```
/// # use assert_approx_eq::assert_approx_eq;
/// use vstab::prelude::v1::*;
/// use vstab::smoother::{TrajectorySmoother, WeightedAverage};
///
/// let mut smoother = TrajectorySmoother::new(1, Box::new(WeightedAverage::uniform(1)));
///
/// assert_eq!(smoother.push(Transform::IDENTITY), None);
/// let first = smoother.push(Transform::translation(3.0, 0.0)).unwrap();
///
/// assert_eq!(first.index, 0);
/// assert_eq!(first.smoothed, Transform::IDENTITY);
///
/// let rest = smoother.flush();
/// assert_eq!(rest.len(), 1);
/// assert_approx_eq!(rest[0].smoothed.dx, 3.0f32);
/// ```
pub struct TrajectorySmoother {
    radius: usize,
    filter: Box<dyn SmoothingFilter + Send>,
    trajectory: Trajectory,
}

impl TrajectorySmoother {
    pub fn new(radius: usize, filter: Box<dyn SmoothingFilter + Send>) -> Self {
        Self {
            radius,
            filter,
            trajectory: Default::default(),
        }
    }

    /// Create a weighted average smoother.
    pub fn from_config(config: &StabilizerConfig) -> Result<Self> {
        let filter =
            WeightedAverage::from_weights(&config.smoothing_weights, config.smoothing_radius)?;
        Ok(Self::new(config.smoothing_radius, Box::new(filter)))
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    /// Replace the filter used for frames finalised from now on.
    pub fn set_filter(&mut self, filter: Box<dyn SmoothingFilter + Send>) {
        self.filter = filter;
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    /// Number of frames pushed but not yet finalised.
    pub fn pending(&self) -> usize {
        self.trajectory.len() - self.trajectory.smoothed.len()
    }

    /// Push motion of the next frame relative to the previous one.
    ///
    /// Returns the oldest pending frame if it now has a full window of history on both sides.
    pub fn push(&mut self, raw: Transform) -> Option<Smoothed> {
        self.trajectory.push(raw);

        let next = self.trajectory.smoothed.len();

        if self.trajectory.len() - 1 - next >= self.radius {
            Some(self.finalise(next))
        } else {
            None
        }
    }

    /// Finalise the oldest pending frame, using whatever history is available.
    pub fn flush_one(&mut self) -> Option<Smoothed> {
        let next = self.trajectory.smoothed.len();

        if next < self.trajectory.len() {
            Some(self.finalise(next))
        } else {
            None
        }
    }

    /// Finalise every pending frame.
    pub fn flush(&mut self) -> Vec<Smoothed> {
        std::iter::from_fn(|| self.flush_one()).collect()
    }

    /// Forget the trajectory.
    pub fn reset(&mut self) {
        self.trajectory = Default::default();
    }

    fn finalise(&mut self, i: usize) -> Smoothed {
        let last = self.trajectory.len() - 1;
        let half = self.radius.min(i).min(last - i);

        let window = &self.trajectory.cumulative[i - half..=i + half];
        let smoothed = self.filter.smooth(window, half);

        self.trajectory.smoothed.push(smoothed);

        Smoothed {
            index: i as u64,
            raw: self.trajectory.cumulative[i],
            smoothed,
        }
    }
}
