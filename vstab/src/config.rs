//! # Stabilizer configuration
//!
//! Every setting is optional and defaulted. Configurations are plain values: build one with the
//! chained setters, then [`StabilizerConfig::validate`] it (the pipeline does so on
//! construction).

use crate::prelude::v1::*;
use std::str::FromStr;

/// How to fill the regions of a warped frame that fall outside of the source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum BorderPolicy {
    /// Repeat the nearest edge pixel.
    Replicate,
    /// Fill with zeroes.
    Black,
    /// Mirror the frame around its edge.
    Reflect,
    /// Mirror the frame around its edge pixel, without repeating it.
    #[cfg_attr(feature = "serde", serde(rename = "reflect-101"))]
    Reflect101,
    /// Tile the frame.
    Wrap,
    /// Output a fixed central sub-rectangle that stays valid for the configured
    /// maximum expected motion.
    CropToValid,
    /// Like [`CropToValid`](Self::CropToValid), but scale the valid rectangle back up to the
    /// input dimensions.
    CropAndZoom,
}

impl Default for BorderPolicy {
    fn default() -> Self {
        Self::Black
    }
}

impl FromStr for BorderPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "replicate" => Ok(Self::Replicate),
            "black" => Ok(Self::Black),
            "reflect" => Ok(Self::Reflect),
            "reflect-101" | "reflect_101" => Ok(Self::Reflect101),
            "wrap" => Ok(Self::Wrap),
            "crop-to-valid" | "crop" => Ok(Self::CropToValid),
            "crop-and-zoom" | "crop_n_zoom" => Ok(Self::CropAndZoom),
            _ => Err(Error::invalid_value(
                "border_policy",
                format!("unknown policy `{}`", s),
            )),
        }
    }
}

/// Resampling filter used by the warper.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum Interpolation {
    Nearest,
    Bilinear,
}

impl Default for Interpolation {
    fn default() -> Self {
        Self::Bilinear
    }
}

/// Geometric model fitted to the correspondences of each frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum MotionModel {
    /// Translation only.
    Translation,
    /// Translation and rotation.
    Rigid,
    /// Translation, rotation and uniform scale.
    Similarity,
}

impl Default for MotionModel {
    fn default() -> Self {
        Self::Similarity
    }
}

impl MotionModel {
    /// Number of correspondences needed to fit the model exactly.
    pub fn min_samples(&self) -> usize {
        match self {
            Self::Translation => 1,
            Self::Rigid | Self::Similarity => 2,
        }
    }
}

impl FromStr for MotionModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "translation" => Ok(Self::Translation),
            "rigid" => Ok(Self::Rigid),
            "similarity" => Ok(Self::Similarity),
            _ => Err(Error::invalid_value(
                "motion_model",
                format!("unknown model `{}`", s),
            )),
        }
    }
}

/// Weights of the trajectory smoothing window.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum SmoothingWeights {
    /// Box filter.
    Uniform,
    /// Gaussian bell with the given standard deviation, in frames.
    Gaussian { sigma: f32 },
    /// Explicit kernel of `2 * radius + 1` weights, oldest frame first.
    Custom(Vec<f32>),
}

impl Default for SmoothingWeights {
    fn default() -> Self {
        Self::Uniform
    }
}

impl SmoothingWeights {
    /// Expand the weights to a full kernel of `2 * radius + 1` entries.
    pub fn kernel(&self, radius: usize) -> Result<Vec<f32>> {
        let len = 2 * radius + 1;

        let kernel = match self {
            Self::Uniform => vec![1.0; len],
            Self::Gaussian { sigma } => {
                if !(sigma.is_finite() && *sigma > 0.0) {
                    return Err(Error::invalid_value(
                        "smoothing_weights",
                        "gaussian sigma must be positive",
                    ));
                }
                let denom = 2.0 * sigma * sigma;
                (0..len)
                    .map(|i| {
                        let d = i as f32 - radius as f32;
                        (-d * d / denom).exp()
                    })
                    .collect()
            }
            Self::Custom(weights) => {
                if weights.len() != len {
                    return Err(Error::invalid_value(
                        "smoothing_weights",
                        format!("expected {} weights, got {}", len, weights.len()),
                    ));
                }
                weights.clone()
            }
        };

        if kernel.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::invalid_value(
                "smoothing_weights",
                "weights must be finite and non-negative",
            ));
        }

        // The centre weight alone is used at the stream edges.
        if kernel[radius] <= 0.0 {
            return Err(Error::invalid_value(
                "smoothing_weights",
                "centre weight must be positive",
            ));
        }

        Ok(kernel)
    }
}

/// Largest correction the stream is expected to need.
///
/// Used to size the valid region of [`BorderPolicy::CropToValid`] and
/// [`BorderPolicy::CropAndZoom`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MotionBounds {
    /// Translation in pixels.
    pub max_translation: f32,
    /// Rotation in degrees.
    pub max_rotation: f32,
    /// Relative deviation of scale from 1.
    pub max_scale_deviation: f32,
}

impl Default for MotionBounds {
    fn default() -> Self {
        Self {
            max_translation: 16.0,
            max_rotation: 1.0,
            max_scale_deviation: 0.01,
        }
    }
}

/// Feature detection and tracking parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TrackerConfig {
    /// Maximum number of corners detected per frame.
    pub max_features: usize,
    /// Minimum corner response, relative to the strongest corner.
    pub quality_level: f32,
    /// Minimum distance between two detected corners, in pixels.
    pub min_distance: f32,
    /// Half-size of the tracked patch.
    pub window_radius: usize,
    /// Number of pyramid levels, including the full resolution one.
    pub pyramid_levels: usize,
    /// Lucas-Kanade iterations per pyramid level.
    pub max_iterations: usize,
    /// Stop iterating once the update is smaller than this, in pixels.
    pub epsilon: f32,
    /// Equalise the luma histogram before detection and tracking.
    pub equalize: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_features: 200,
            quality_level: 0.05,
            min_distance: 12.0,
            window_radius: 7,
            pyramid_levels: 3,
            max_iterations: 20,
            epsilon: 0.01,
            equalize: true,
        }
    }
}

/// Robust model fitting parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RansacConfig {
    /// Number of random minimal samples tried.
    pub iterations: usize,
    /// Largest reprojection error of an inlier, in pixels.
    pub inlier_threshold: f32,
    /// Least squares refits on the growing inlier set.
    pub refine_rounds: usize,
    /// Seed of the sampling generator.
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            iterations: 200,
            inlier_threshold: 1.5,
            refine_rounds: 3,
            seed: 0x5eed,
        }
    }
}

/// Complete stabilizer configuration.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StabilizerConfig {
    /// Frames of look-ahead and look-behind used by the smoother.
    pub smoothing_radius: usize,
    /// Lowest confidence of a correspondence that is still used.
    pub min_confidence: f32,
    /// Fewest correspondences a motion estimate may be fitted on.
    pub min_correspondences: usize,
    pub border_policy: BorderPolicy,
    pub smoothing_weights: SmoothingWeights,
    pub motion_model: MotionModel,
    pub interpolation: Interpolation,
    pub max_expected_motion: MotionBounds,
    pub tracker: TrackerConfig,
    pub ransac: RansacConfig,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            smoothing_radius: 15,
            min_confidence: 0.75,
            min_correspondences: 4,
            border_policy: Default::default(),
            smoothing_weights: Default::default(),
            motion_model: Default::default(),
            interpolation: Default::default(),
            max_expected_motion: Default::default(),
            tracker: Default::default(),
            ransac: Default::default(),
        }
    }
}

impl StabilizerConfig {
    pub fn smoothing_radius(self, smoothing_radius: usize) -> Self {
        Self {
            smoothing_radius,
            ..self
        }
    }

    pub fn min_confidence(self, min_confidence: f32) -> Self {
        Self {
            min_confidence,
            ..self
        }
    }

    pub fn min_correspondences(self, min_correspondences: usize) -> Self {
        Self {
            min_correspondences,
            ..self
        }
    }

    pub fn border_policy(self, border_policy: BorderPolicy) -> Self {
        Self {
            border_policy,
            ..self
        }
    }

    pub fn smoothing_weights(self, smoothing_weights: SmoothingWeights) -> Self {
        Self {
            smoothing_weights,
            ..self
        }
    }

    pub fn motion_model(self, motion_model: MotionModel) -> Self {
        Self {
            motion_model,
            ..self
        }
    }

    pub fn interpolation(self, interpolation: Interpolation) -> Self {
        Self {
            interpolation,
            ..self
        }
    }

    pub fn max_expected_motion(self, max_expected_motion: MotionBounds) -> Self {
        Self {
            max_expected_motion,
            ..self
        }
    }

    pub fn tracker(self, tracker: TrackerConfig) -> Self {
        Self { tracker, ..self }
    }

    pub fn ransac(self, ransac: RansacConfig) -> Self {
        Self { ransac, ..self }
    }

    /// Check every value for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.smoothing_radius == 0 {
            return Err(Error::invalid_value(
                "smoothing_radius",
                "must be greater than zero",
            ));
        }

        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(Error::invalid_value(
                "min_confidence",
                format!("{} is outside of [0; 1]", self.min_confidence),
            ));
        }

        if self.min_correspondences < self.motion_model.min_samples() {
            return Err(Error::invalid_value(
                "min_correspondences",
                format!(
                    "{:?} model needs at least {} correspondences",
                    self.motion_model,
                    self.motion_model.min_samples()
                ),
            ));
        }

        self.smoothing_weights.kernel(self.smoothing_radius)?;

        let bounds = &self.max_expected_motion;
        if [
            bounds.max_translation,
            bounds.max_rotation,
            bounds.max_scale_deviation,
        ]
        .iter()
        .any(|v| !v.is_finite() || *v < 0.0)
            || bounds.max_scale_deviation >= 1.0
        {
            return Err(Error::invalid_value(
                "max_expected_motion",
                "bounds must be non-negative, scale deviation below 1",
            ));
        }

        let tracker = &self.tracker;
        if tracker.max_features == 0 {
            return Err(Error::invalid_value("tracker.max_features", "must be positive"));
        }
        if !(tracker.quality_level > 0.0 && tracker.quality_level <= 1.0) {
            return Err(Error::invalid_value(
                "tracker.quality_level",
                "must be within (0; 1]",
            ));
        }
        if !(tracker.min_distance.is_finite() && tracker.min_distance >= 0.0) {
            return Err(Error::invalid_value(
                "tracker.min_distance",
                "must be non-negative",
            ));
        }
        if tracker.window_radius == 0 || tracker.pyramid_levels == 0 || tracker.max_iterations == 0
        {
            return Err(Error::invalid_value(
                "tracker",
                "window radius, pyramid levels and iterations must be positive",
            ));
        }

        if self.ransac.iterations == 0
            || !(self.ransac.inlier_threshold.is_finite() && self.ransac.inlier_threshold > 0.0)
        {
            return Err(Error::invalid_value(
                "ransac",
                "iterations and inlier threshold must be positive",
            ));
        }

        Ok(())
    }
}

impl Properties for StabilizerConfig {
    fn props_mut(&mut self) -> Vec<(&str, PropertyMut)> {
        vec![
            (
                "Smoothing radius",
                PropertyMut::usize(&mut self.smoothing_radius, 1, 120),
            ),
            (
                "Min confidence",
                PropertyMut::float(&mut self.min_confidence, 0.0, 1.0),
            ),
            (
                "Min correspondences",
                PropertyMut::usize(&mut self.min_correspondences, 1, 1000),
            ),
            (
                "Max features",
                PropertyMut::usize(&mut self.tracker.max_features, 1, 5000),
            ),
            (
                "Quality level",
                PropertyMut::float(&mut self.tracker.quality_level, 0.001, 1.0),
            ),
            (
                "Min distance",
                PropertyMut::float(&mut self.tracker.min_distance, 0.0, 200.0),
            ),
            (
                "Window radius",
                PropertyMut::usize(&mut self.tracker.window_radius, 1, 32),
            ),
            (
                "Pyramid levels",
                PropertyMut::usize(&mut self.tracker.pyramid_levels, 1, 8),
            ),
            (
                "Equalize contrast",
                PropertyMut::bool(&mut self.tracker.equalize),
            ),
            (
                "Ransac iters",
                PropertyMut::usize(&mut self.ransac.iterations, 1, 5000),
            ),
            (
                "Inlier threshold",
                PropertyMut::float(&mut self.ransac.inlier_threshold, 0.01, 50.0),
            ),
            (
                "Max translation",
                PropertyMut::float(&mut self.max_expected_motion.max_translation, 0.0, 500.0),
            ),
            (
                "Max rotation",
                PropertyMut::float(&mut self.max_expected_motion.max_rotation, 0.0, 45.0),
            ),
            (
                "Max scale deviation",
                PropertyMut::float(&mut self.max_expected_motion.max_scale_deviation, 0.0, 0.5),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = StabilizerConfig::default();
        assert_eq!(config.smoothing_radius, 15);
        assert_eq!(config.min_correspondences, 4);
        config.validate().unwrap();
    }

    #[test]
    fn zero_radius_is_rejected() {
        let err = StabilizerConfig::default()
            .smoothing_radius(0)
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::InvalidValue {
                field: "smoothing_radius",
                ..
            })
        ));
    }

    #[test]
    fn confidence_out_of_range() {
        assert!(StabilizerConfig::default()
            .min_confidence(1.5)
            .validate()
            .is_err());
        assert!(StabilizerConfig::default()
            .min_confidence(f32::NAN)
            .validate()
            .is_err());
    }

    #[test]
    fn custom_weights_must_match_radius() {
        let config = StabilizerConfig::default()
            .smoothing_radius(1)
            .smoothing_weights(SmoothingWeights::Custom(vec![1.0, 2.0]));
        assert!(config.validate().is_err());

        let config = config.smoothing_weights(SmoothingWeights::Custom(vec![1.0, 2.0, 1.0]));
        config.validate().unwrap();

        let config = config.smoothing_weights(SmoothingWeights::Custom(vec![1.0, 0.0, 1.0]));
        assert!(config.validate().is_err());
    }

    #[test]
    fn gaussian_kernel_is_symmetric() {
        let kernel = SmoothingWeights::Gaussian { sigma: 2.0 }.kernel(3).unwrap();
        assert_eq!(kernel.len(), 7);
        assert_eq!(kernel[3], 1.0);
        for i in 0..3 {
            assert_eq!(kernel[i], kernel[6 - i]);
            assert!(kernel[i] < kernel[i + 1]);
        }
    }

    #[test]
    fn parse_enums() {
        assert_eq!(
            "crop-to-valid".parse::<BorderPolicy>().unwrap(),
            BorderPolicy::CropToValid
        );
        assert_eq!(
            "reflect_101".parse::<BorderPolicy>().unwrap(),
            BorderPolicy::Reflect101
        );
        assert_eq!("wrap".parse::<BorderPolicy>().unwrap(), BorderPolicy::Wrap);
        assert_eq!(
            "crop-and-zoom".parse::<BorderPolicy>().unwrap(),
            BorderPolicy::CropAndZoom
        );
        assert_eq!("rigid".parse::<MotionModel>().unwrap(), MotionModel::Rigid);
        assert!("mirror".parse::<BorderPolicy>().is_err());
    }

    #[test]
    fn properties_update_config() {
        let mut config = StabilizerConfig::default();
        config.set_prop("Smoothing radius", "30").unwrap();
        config.set_prop("Equalize contrast", "false").unwrap();
        config.set_prop("Min confidence", "7").unwrap();

        assert_eq!(config.smoothing_radius, 30);
        assert!(!config.tracker.equalize);
        // Clamped to the property bounds
        assert_eq!(config.min_confidence, 1.0);
        assert!(config.set_prop("Unknown", "1").is_err());
    }
}
