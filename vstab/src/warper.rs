//! # Frame warping
//!
//! Resamples frames through their correction transform. Every output pixel is looked up at the
//! inverse corrected location of the source frame, so there are no holes in the output.

use crate::prelude::v1::*;
use nalgebra as na;

/// Corrections closer than this to the identity leave the frame untouched.
const IDENTITY_EPS: f32 = 1e-6;

/// Applies correction transforms to frames.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameWarper {
    policy: BorderPolicy,
    interpolation: Interpolation,
    bounds: MotionBounds,
}

impl Default for FrameWarper {
    fn default() -> Self {
        Self::from_config(&StabilizerConfig::default())
    }
}

impl FrameWarper {
    pub fn new(policy: BorderPolicy, interpolation: Interpolation, bounds: MotionBounds) -> Self {
        Self {
            policy,
            interpolation,
            bounds,
        }
    }

    pub fn from_config(config: &StabilizerConfig) -> Self {
        Self::new(
            config.border_policy,
            config.interpolation,
            config.max_expected_motion,
        )
    }

    pub fn policy(&self) -> BorderPolicy {
        self.policy
    }

    /// Width of the border cut off on every side by the cropping policies.
    ///
    /// The margin is the largest displacement any frame corner can undergo under a correction
    /// within the configured motion bounds. It is capped so that at least one pixel remains.
    pub fn crop_margin(&self, width: usize, height: usize) -> usize {
        if !matches!(
            self.policy,
            BorderPolicy::CropToValid | BorderPolicy::CropAndZoom
        ) {
            return 0;
        }

        let bounds = &self.bounds;
        let radius = (width as f32 * 0.5).hypot(height as f32 * 0.5);
        let half_angle = bounds.max_rotation.to_radians() * 0.5;
        let corner_shift = radius
            * (bounds.max_scale_deviation
                + 2.0 * (1.0 + bounds.max_scale_deviation) * half_angle.sin());

        let margin = (bounds.max_translation + corner_shift).ceil() as usize;

        margin.min((std::cmp::min(width, height) - 1) / 2)
    }

    /// Dimensions of the warped output of a frame.
    pub fn output_dims(&self, input: FrameDims) -> FrameDims {
        if self.policy != BorderPolicy::CropToValid {
            return input;
        }

        let margin = self.crop_margin(input.width, input.height);
        FrameDims {
            width: input.width - 2 * margin,
            height: input.height - 2 * margin,
            ..input
        }
    }

    /// Warp a frame by a correction transform.
    ///
    /// The correction is in centered frame coordinates, mapping raw frame content onto its
    /// stabilized position. The output keeps the index of the input frame.
    pub fn warp(&self, frame: &Frame, correction: &Transform) -> Result<Frame> {
        if !correction.is_valid() {
            return Err(Error::invariant(format!(
                "correction of frame {} is not a valid transform: {:?}",
                frame.index(),
                correction
            )));
        }

        let (width, height, channels) = (frame.width(), frame.height(), frame.channels());
        let margin = self.crop_margin(width, height);

        if correction.is_identity(IDENTITY_EPS) {
            match self.policy {
                _ if margin == 0 => return Ok(frame.clone()),
                BorderPolicy::CropToValid => return crop(frame, margin),
                _ => {}
            }
        }

        let out = self.output_dims(frame.dims());
        let inv = correction.inverse();
        let center = na::Vector2::new(width as f32, height as f32) * 0.5;
        let src = frame.as_bytes();

        // Location of an output column or row within the uncorrected frame.
        let zoom = self.policy == BorderPolicy::CropAndZoom && margin > 0;
        let source = |u: usize, len: usize| -> f32 {
            if zoom {
                let step = (len - 2 * margin) as f32 / len as f32;
                margin as f32 + (u as f32 + 0.5) * step - 0.5
            } else {
                (u + margin) as f32
            }
        };

        let mut data = Vec::with_capacity(out.width * out.height * channels);
        let mut px = [0f32; MAX_CHANNELS];

        for v in 0..out.height {
            for u in 0..out.width {
                let q = na::Point2::new(source(u, width), source(v, height)) - center;
                let p = inv.transform_point(q) + center;

                px.iter_mut().for_each(|c| *c = 0.0);

                let mut tap = |x: isize, y: isize, w: f32| {
                    if w == 0.0 {
                        return;
                    }
                    if let Some((x, y)) = self.resolve(x, y, width, height) {
                        let off = (y * width + x) * channels;
                        for (acc, s) in px.iter_mut().zip(&src[off..off + channels]) {
                            *acc += w * *s as f32;
                        }
                    }
                };

                match self.interpolation {
                    Interpolation::Nearest => {
                        tap(p.x.round() as isize, p.y.round() as isize, 1.0);
                    }
                    Interpolation::Bilinear => {
                        let (x0, y0) = (p.x.floor(), p.y.floor());
                        let (fx, fy) = (p.x - x0, p.y - y0);
                        let (x0, y0) = (x0 as isize, y0 as isize);
                        tap(x0, y0, (1.0 - fx) * (1.0 - fy));
                        tap(x0 + 1, y0, fx * (1.0 - fy));
                        tap(x0, y0 + 1, (1.0 - fx) * fy);
                        tap(x0 + 1, y0 + 1, fx * fy);
                    }
                }

                data.extend(
                    px[..channels]
                        .iter()
                        .map(|c| c.round().clamp(0.0, 255.0) as u8),
                );
            }
        }

        Ok(Frame::new(out.width, out.height, channels, data)?.with_index(frame.index()))
    }

    /// Map a source pixel coordinate onto the frame, according to the border policy.
    fn resolve(&self, x: isize, y: isize, width: usize, height: usize) -> Option<(usize, usize)> {
        let inside = |v: isize, n: usize| (0..n as isize).contains(&v);

        match self.policy {
            BorderPolicy::Black => {
                if inside(x, width) && inside(y, height) {
                    Some((x as usize, y as usize))
                } else {
                    None
                }
            }
            BorderPolicy::Replicate | BorderPolicy::CropToValid | BorderPolicy::CropAndZoom => {
                Some((
                    x.clamp(0, width as isize - 1) as usize,
                    y.clamp(0, height as isize - 1) as usize,
                ))
            }
            BorderPolicy::Reflect => Some((reflect(x, width), reflect(y, height))),
            BorderPolicy::Reflect101 => Some((reflect_101(x, width), reflect_101(y, height))),
            BorderPolicy::Wrap => Some((
                x.rem_euclid(width as isize) as usize,
                y.rem_euclid(height as isize) as usize,
            )),
        }
    }
}

/// Mirror a coordinate around the edges, repeating the edge sample (`cba|abc|cba`).
fn reflect(v: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let v = v.rem_euclid(period);
    if v < n as isize {
        v as usize
    } else {
        (period - 1 - v) as usize
    }
}

/// Mirror a coordinate around the edge samples, without repeating them (`dcb|abcd|cba`).
fn reflect_101(v: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let v = v.rem_euclid(period);
    if v < n as isize {
        v as usize
    } else {
        (period - v) as usize
    }
}

fn crop(frame: &Frame, margin: usize) -> Result<Frame> {
    let (width, height, channels) = (frame.width(), frame.height(), frame.channels());
    let (out_w, out_h) = (width - 2 * margin, height - 2 * margin);
    let row = out_w * channels;

    let data = (margin..margin + out_h)
        .flat_map(|y| {
            let off = (y * width + margin) * channels;
            frame.as_bytes()[off..off + row].iter().copied()
        })
        .collect();

    Ok(Frame::new(out_w, out_h, channels, data)?.with_index(frame.index()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_frame() -> Frame {
        Frame::from_fn(24, 16, 3, |x, y, c| (x * 10 + y * 3 + c) as u8).unwrap()
    }

    fn warper(policy: BorderPolicy) -> FrameWarper {
        FrameWarper::new(policy, Interpolation::Bilinear, MotionBounds::default())
    }

    #[test]
    fn identity_is_pixel_exact() {
        let frame = gradient_frame().with_index(7);
        for policy in [
            BorderPolicy::Black,
            BorderPolicy::Replicate,
            BorderPolicy::Reflect,
            BorderPolicy::Reflect101,
            BorderPolicy::Wrap,
        ] {
            let out = warper(policy).warp(&frame, &Transform::IDENTITY).unwrap();
            assert_eq!(out, frame);
        }
    }

    #[test]
    fn integer_shift_black() {
        let frame = gradient_frame();
        let out = warper(BorderPolicy::Black)
            .warp(&frame, &Transform::translation(3.0, 1.0))
            .unwrap();

        assert_eq!(out.dims(), frame.dims());

        for y in 0..16 {
            for x in 0..24 {
                if x < 3 || y < 1 {
                    assert_eq!(out.pixel(x, y), &[0, 0, 0]);
                } else {
                    assert_eq!(out.pixel(x, y), frame.pixel(x - 3, y - 1));
                }
            }
        }
    }

    #[test]
    fn integer_shift_replicate() {
        let frame = gradient_frame();
        let out = FrameWarper::new(
            BorderPolicy::Replicate,
            Interpolation::Nearest,
            MotionBounds::default(),
        )
        .warp(&frame, &Transform::translation(-2.0, 0.0))
        .unwrap();

        for y in 0..16 {
            assert_eq!(out.pixel(0, y), frame.pixel(2, y));
            assert_eq!(out.pixel(22, y), frame.pixel(23, y));
            assert_eq!(out.pixel(23, y), frame.pixel(23, y));
        }
    }

    #[test]
    fn integer_shift_reflect() {
        let frame = gradient_frame();
        let out = warper(BorderPolicy::Reflect)
            .warp(&frame, &Transform::translation(3.0, 0.0))
            .unwrap();

        for y in 0..16 {
            assert_eq!(out.pixel(0, y), frame.pixel(2, y));
            assert_eq!(out.pixel(1, y), frame.pixel(1, y));
            assert_eq!(out.pixel(2, y), frame.pixel(0, y));
            assert_eq!(out.pixel(3, y), frame.pixel(0, y));
        }
    }

    #[test]
    fn integer_shift_reflect_101() {
        let frame = gradient_frame();
        let out = warper(BorderPolicy::Reflect101)
            .warp(&frame, &Transform::translation(3.0, 0.0))
            .unwrap();

        for y in 0..16 {
            assert_eq!(out.pixel(0, y), frame.pixel(3, y));
            assert_eq!(out.pixel(1, y), frame.pixel(2, y));
            assert_eq!(out.pixel(2, y), frame.pixel(1, y));
            assert_eq!(out.pixel(3, y), frame.pixel(0, y));
        }
    }

    #[test]
    fn integer_shift_wrap() {
        let frame = gradient_frame();
        let out = warper(BorderPolicy::Wrap)
            .warp(&frame, &Transform::translation(3.0, -2.0))
            .unwrap();

        for y in 0..16 {
            for x in 0..24 {
                assert_eq!(out.pixel(x, y), frame.pixel((x + 21) % 24, (y + 2) % 16));
            }
        }
    }

    #[test]
    fn reflect_indices() {
        let mapped = (-4..8).map(|v| reflect(v, 3)).collect::<Vec<_>>();
        assert_eq!(mapped, vec![2, 2, 1, 0, 0, 1, 2, 2, 1, 0, 0, 1]);

        let mapped = (-4..8).map(|v| reflect_101(v, 3)).collect::<Vec<_>>();
        assert_eq!(mapped, vec![0, 1, 2, 1, 0, 1, 2, 1, 0, 1, 2, 1]);

        assert_eq!(reflect_101(-5, 1), 0);
    }

    #[test]
    fn crop_margin_covers_bounds() {
        let w = warper(BorderPolicy::CropToValid);
        let margin = w.crop_margin(160, 120);
        assert_eq!(margin, 19);
        assert_eq!(
            w.output_dims(FrameDims {
                width: 160,
                height: 120,
                channels: 3
            }),
            FrameDims {
                width: 122,
                height: 82,
                channels: 3
            }
        );

        // Extreme corrections must still sample inside the source.
        let bounds = MotionBounds::default();
        let (t, a, s) = (
            bounds.max_translation / 2f32.sqrt(),
            bounds.max_rotation.to_radians(),
            bounds.max_scale_deviation,
        );
        let center = na::Vector2::new(80.0, 60.0);

        for dir in [-1.0, 1.0] {
            for scale in [1.0 - s, 1.0 + s] {
                let correction = Transform::new(t * dir, -t * dir, a * dir, scale);
                let inv = correction.inverse();
                for (u, v) in [(0, 0), (121, 0), (0, 81), (121, 81)] {
                    let q = na::Point2::new((u + margin) as f32, (v + margin) as f32) - center;
                    let p = inv.transform_point(q) + center;
                    assert!((0.0..=159.0).contains(&p.x), "{}", p);
                    assert!((0.0..=119.0).contains(&p.y), "{}", p);
                }
            }
        }
    }

    #[test]
    fn crop_keeps_dimensions_consistent() {
        let frame = Frame::from_fn(160, 120, 1, |x, y, _| (x ^ y) as u8).unwrap();
        let w = warper(BorderPolicy::CropToValid);

        let a = w.warp(&frame, &Transform::IDENTITY).unwrap();
        let b = w.warp(&frame, &Transform::new(2.0, -1.0, 0.01, 1.0)).unwrap();

        assert_eq!(a.dims(), b.dims());
        assert_eq!(a.width(), 122);
        assert_eq!(a.pixel(0, 0), frame.pixel(19, 19));
    }

    #[test]
    fn crop_and_zoom_keeps_input_dimensions() {
        // Horizontal ramp, so that every sample reveals its source column.
        let frame = Frame::from_fn(160, 120, 1, |x, _, _| x as u8).unwrap();
        let w = warper(BorderPolicy::CropAndZoom);

        assert_eq!(w.crop_margin(160, 120), 19);
        assert_eq!(w.output_dims(frame.dims()), frame.dims());

        let still = w.warp(&frame, &Transform::IDENTITY).unwrap();
        assert_eq!(still.dims(), frame.dims());
        assert_ne!(still, frame);

        for y in [0, 60, 119] {
            // The valid columns 19..=140 are stretched over the full width.
            assert_eq!(still.pixel(0, y), &[19]);
            assert_eq!(still.pixel(159, y), &[140]);
            for x in 1..160 {
                assert!(still.pixel(x, y)[0] >= still.pixel(x - 1, y)[0]);
            }
        }

        let moved = w.warp(&frame, &Transform::translation(5.0, 0.0)).unwrap();
        assert_eq!(moved.dims(), frame.dims());
        assert_eq!(moved.pixel(0, 60), &[14]);
        assert_eq!(moved.pixel(159, 60), &[135]);
    }

    #[test]
    fn tiny_frames_keep_a_pixel() {
        let w = warper(BorderPolicy::CropToValid);
        assert_eq!(w.crop_margin(5, 40), 2);
        let frame = Frame::from_fn(5, 40, 1, |_, _, _| 1).unwrap();
        assert_eq!(w.warp(&frame, &Transform::IDENTITY).unwrap().width(), 1);
    }

    #[test]
    fn invalid_correction() {
        let frame = gradient_frame();
        let bad = Transform::new(f32::NAN, 0.0, 0.0, 1.0);
        assert!(matches!(
            warper(BorderPolicy::Black).warp(&frame, &bad),
            Err(Error::BufferInvariantViolation(_))
        ));
    }
}
