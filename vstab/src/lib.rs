//! # Video Stabilization Library
//!
//! This library removes unwanted camera shake from a stream of frames in real time. Sparse
//! features are tracked between consecutive frames, inter-frame motion is robustly fitted to
//! them, the accumulated camera trajectory is smoothed over a bounded window, and every frame is
//! warped by the difference between its smoothed and raw position.
//!
//! The easiest way to use the library is to import its prelude:
//!
//! ```
//! use vstab::prelude::v1::*;
//! ```
//!
//! Then feed frames into a [`Stabilizer`](pipeline::Stabilizer), and `None` at the end of the
//! stream. Each of the stages is a trait, so that custom trackers, estimators and smoothing
//! filters can be swapped in.
//!
//! You may need [`nalgebra`](https://crates.io/crates/nalgebra) to make use of the functionality.

pub mod config;
pub mod error;
pub mod estimator;
pub mod frame;
pub mod luma;
pub mod pipeline;
pub mod properties;
pub mod ring;
pub mod smoother;
pub mod synthetic;
pub mod tracker;
pub mod transform;
pub mod warper;

pub mod prelude {
    pub mod v1 {
        pub use crate::{
            config::{
                BorderPolicy, Interpolation, MotionBounds, MotionModel, RansacConfig,
                SmoothingWeights, StabilizerConfig, TrackerConfig,
            },
            error::{ConfigurationError, Error, Result},
            estimator::{MotionEstimator, RansacEstimator},
            frame::{Frame, FrameDims, MAX_CHANNELS},
            pipeline::{PipelineState, Stabilizer, StabilizerStats},
            properties::{Properties, Property, PropertyMut},
            smoother::{SmoothingFilter, TrajectorySmoother, WeightedAverage},
            tracker::{Correspondence, FeatureTracker, PyramidTracker, Tracked},
            transform::Transform,
        };
    }
}
