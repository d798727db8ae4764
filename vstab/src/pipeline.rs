//! # Stabilizer pipeline
//!
//! Glues the tracker, estimator, smoother and warper into a streaming state machine. Frames are
//! delayed by the smoothing radius: each frame is held in a bounded buffer until enough newer
//! frames have been seen to finalise its smoothed position.
//!
//! ```text
//! ColdStart -> Warming -> Steady -> Draining -> Done
//!        \________________________/
//!                    |
//!                 Halted (fatal error, until reset)
//! ```

use crate::prelude::v1::*;
use crate::ring::SeqRing;
use crate::smoother::{Smoothed, Trajectory, TrajectorySmoother};
use crate::warper::FrameWarper;
use nalgebra as na;

/// Lifecycle of a [`Stabilizer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub enum PipelineState {
    /// No frames processed yet.
    ColdStart,
    /// Buffering frames, no output yet.
    Warming,
    /// Every input frame yields one delayed output frame.
    Steady,
    /// End of stream seen, emitting the remaining buffered frames.
    Draining,
    /// Everything emitted, further calls produce nothing.
    Done,
    /// A fatal error occurred, every call fails until the pipeline is reset.
    Halted,
}

/// Counters of a stabilized stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct StabilizerStats {
    pub frames_in: u64,
    pub frames_out: u64,
    /// Frames whose motion could not be estimated and was assumed to be the identity.
    pub identity_fallbacks: u64,
}

/// Streaming video stabilizer.
///
/// # Examples
///
/// ```
/// use vstab::prelude::v1::*;
///
/// let config = StabilizerConfig::default().smoothing_radius(2);
/// let mut stabilizer = Stabilizer::new(config).unwrap();
///
/// let frame = Frame::from_fn(32, 32, 1, |x, y, _| (x * y) as u8).unwrap();
///
/// let mut out = vec![];
///
/// for _ in 0..4 {
///     out.extend(stabilizer.stabilize(Some(frame.clone())).unwrap());
/// }
///
/// out.extend(stabilizer.flush().unwrap());
///
/// assert_eq!(out.len(), 4);
/// assert_eq!(stabilizer.state(), PipelineState::Done);
/// assert_eq!(stabilizer.stabilize(None).unwrap(), None);
/// ```
pub struct Stabilizer {
    config: StabilizerConfig,
    tracker: Box<dyn FeatureTracker + Send>,
    estimator: Box<dyn MotionEstimator + Send>,
    smoother: TrajectorySmoother,
    warper: FrameWarper,
    buffer: SeqRing<Frame>,
    dims: Option<FrameDims>,
    state: PipelineState,
    stats: StabilizerStats,
}

impl Stabilizer {
    /// Create a stabilizer with the default strategies.
    ///
    /// Fails if the configuration does not validate.
    pub fn new(config: StabilizerConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            tracker: Box::new(PyramidTracker::from_config(&config)),
            estimator: Box::new(RansacEstimator::from_config(&config)),
            smoother: TrajectorySmoother::from_config(&config)?,
            warper: FrameWarper::from_config(&config),
            buffer: SeqRing::with_capacity(config.smoothing_radius),
            dims: None,
            state: PipelineState::ColdStart,
            stats: Default::default(),
            config,
        })
    }

    /// Replace the feature tracker.
    pub fn with_tracker(self, tracker: impl FeatureTracker + Send + 'static) -> Self {
        Self {
            tracker: Box::new(tracker),
            ..self
        }
    }

    /// Replace the motion estimator.
    pub fn with_estimator(self, estimator: impl MotionEstimator + Send + 'static) -> Self {
        Self {
            estimator: Box::new(estimator),
            ..self
        }
    }

    /// Replace the trajectory smoothing filter.
    ///
    /// The filter is applied over the configured smoothing radius. The trajectory is kept, so
    /// the filter may be swapped mid-stream, affecting only frames that are still buffered.
    pub fn with_filter(mut self, filter: impl SmoothingFilter + Send + 'static) -> Self {
        self.smoother.set_filter(Box::new(filter));
        self
    }

    pub fn config(&self) -> &StabilizerConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> StabilizerStats {
        self.stats
    }

    /// Number of frames held back, awaiting their smoothed position.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Camera trajectory of the current stream.
    pub fn trajectory(&self) -> &Trajectory {
        self.smoother.trajectory()
    }

    /// Dimensions of the output frames, once the first frame has been seen.
    pub fn output_dims(&self) -> Option<FrameDims> {
        self.dims.map(|dims| self.warper.output_dims(dims))
    }

    /// Feed the next frame, or `None` to signal the end of the stream.
    ///
    /// Returns the next stabilized frame, if one is ready. After the end of the stream, each
    /// call emits one of the remaining buffered frames, until the pipeline is done. Frames
    /// submitted while draining are ignored.
    ///
    /// Per-frame estimation failures are absorbed: such a frame is assumed not to have moved.
    /// Fatal errors, such as a change in frame dimensions, halt the pipeline until
    /// [`reset`](Self::reset) is called.
    pub fn stabilize(&mut self, frame: Option<Frame>) -> Result<Option<Frame>> {
        let ret = self.step(frame);

        if let Err(e) = &ret {
            if e.is_fatal() && self.state != PipelineState::Halted {
                log::error!("halting stabilizer: {}", e);
                self.set_state(PipelineState::Halted);
            }
        }

        ret
    }

    /// End the stream and return all remaining frames.
    pub fn flush(&mut self) -> Result<Vec<Frame>> {
        let mut out = vec![];
        while let Some(frame) = self.stabilize(None)? {
            out.push(frame);
        }
        Ok(out)
    }

    /// Drop all state and start a new stream.
    ///
    /// The trajectory history grows with every frame, so long-running streams should be reset
    /// at scene cuts.
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.estimator.reset();
        self.smoother.reset();
        self.buffer.clear();
        self.dims = None;
        self.stats = Default::default();
        self.set_state(PipelineState::ColdStart);
    }

    fn set_state(&mut self, state: PipelineState) {
        if self.state != state {
            log::debug!("{:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn step(&mut self, frame: Option<Frame>) -> Result<Option<Frame>> {
        match (self.state, frame) {
            (PipelineState::Halted, _) => Err(Error::Halted),
            (PipelineState::Done, _) => Ok(None),
            (PipelineState::Draining, frame) => {
                if let Some(frame) = frame {
                    log::warn!("ignoring frame {} submitted while draining", frame.index());
                }
                self.drain_one()
            }
            (PipelineState::ColdStart, None) => {
                self.set_state(PipelineState::Done);
                Ok(None)
            }
            (_, None) => {
                self.set_state(PipelineState::Draining);
                self.drain_one()
            }
            (_, Some(frame)) => self.push_frame(frame),
        }
    }

    fn push_frame(&mut self, frame: Frame) -> Result<Option<Frame>> {
        let seq = self.stats.frames_in;
        let frame = frame.with_index(seq);

        match self.dims {
            Some(expected) if expected != frame.dims() => {
                return Err(ConfigurationError::DimensionMismatch {
                    expected,
                    found: frame.dims(),
                }
                .into());
            }
            Some(_) => {}
            None => self.dims = Some(frame.dims()),
        }

        let raw = self.estimate_motion(&frame)?;

        self.stats.frames_in += 1;

        let out = match self.smoother.push(raw) {
            Some(smoothed) => Some(self.emit(smoothed)?),
            None => None,
        };

        self.buffer.push_back(seq, frame)?;

        self.set_state(if self.buffer.is_full() {
            PipelineState::Steady
        } else {
            PipelineState::Warming
        });

        Ok(out)
    }

    fn estimate_motion(&mut self, frame: &Frame) -> Result<Transform> {
        let correspondences = match self.tracker.track(self.buffer.back(), frame)? {
            Tracked::ColdStart => return Ok(Transform::IDENTITY),
            Tracked::Correspondences(c) => c,
        };

        let center = na::Vector2::new(frame.width() as f32, frame.height() as f32) * 0.5;
        let centered = correspondences
            .iter()
            .map(|c| c.relative_to(center))
            .collect::<Vec<_>>();

        match self.estimator.estimate(&centered) {
            Ok(raw) => Ok(raw),
            Err(e) if !e.is_fatal() => {
                log::warn!("frame {}: {}, assuming no motion", frame.index(), e);
                self.stats.identity_fallbacks += 1;
                Ok(Transform::IDENTITY)
            }
            Err(e) => Err(e),
        }
    }

    fn emit(&mut self, smoothed: Smoothed) -> Result<Frame> {
        let (seq, frame) = self.buffer.pop_front().ok_or_else(|| {
            Error::invariant(format!(
                "frame {} was finalised, but the buffer is empty",
                smoothed.index
            ))
        })?;

        if seq != smoothed.index {
            return Err(Error::invariant(format!(
                "frame {} was finalised, but frame {} is the oldest buffered",
                smoothed.index, seq
            )));
        }

        let out = self.warper.warp(&frame, &smoothed.correction())?;
        self.stats.frames_out += 1;

        log::trace!("emitting frame {}", seq);

        Ok(out)
    }

    fn drain_one(&mut self) -> Result<Option<Frame>> {
        let out = match self.smoother.flush_one() {
            Some(smoothed) => Some(self.emit(smoothed)?),
            None => None,
        };

        if self.buffer.is_empty() {
            if self.smoother.pending() != 0 {
                return Err(Error::invariant(format!(
                    "{} frames pending with an empty buffer",
                    self.smoother.pending()
                )));
            }
            self.set_state(PipelineState::Done);
        } else if out.is_none() {
            return Err(Error::invariant(format!(
                "{} buffered frames have no trajectory",
                self.buffer.len()
            )));
        }

        Ok(out)
    }
}
