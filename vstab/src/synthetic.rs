//! # Synthetic scenes
//!
//! Procedural textures rendered through a known camera motion. Used to measure the stabilizer
//! against ground truth, where a real video stream has none.

use crate::prelude::v1::*;
use nalgebra as na;

/// Infinite, deterministic value-noise texture.
///
/// The texture is made of random intensities on a square lattice, blended with a smoothstep, plus
/// a coarser octave. It is aperiodic, so trackers cannot lock onto a wrong period.
#[derive(Clone, Copy, Debug)]
pub struct Scene {
    seed: u32,
    cell: f32,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new(0x0f95, 12.0)
    }
}

impl Scene {
    /// Create a new scene.
    ///
    /// # Arguments
    ///
    /// * `seed` - seed of the lattice values.
    /// * `cell` - lattice spacing of the fine octave, in pixels.
    pub fn new(seed: u32, cell: f32) -> Self {
        Self { seed, cell }
    }

    fn lattice(&self, x: i32, y: i32, octave: u32) -> f32 {
        let mut h = (x as u32)
            .wrapping_mul(0x8da6_b343)
            .wrapping_add((y as u32).wrapping_mul(0xd816_3841))
            .wrapping_add(self.seed.wrapping_add(octave).wrapping_mul(0xcb1a_b31f));
        h ^= h >> 15;
        h = h.wrapping_mul(0x2c1b_3c6d);
        h ^= h >> 12;
        h = h.wrapping_mul(0x297a_2d39);
        h ^= h >> 15;
        (h & 0xffff) as f32 / 65535.0
    }

    fn noise(&self, x: f32, y: f32, cell: f32, octave: u32) -> f32 {
        let (x, y) = (x / cell, y / cell);
        let (x0, y0) = (x.floor(), y.floor());
        let smooth = |t: f32| t * t * (3.0 - 2.0 * t);
        let (fx, fy) = (smooth(x - x0), smooth(y - y0));
        let (x0, y0) = (x0 as i32, y0 as i32);

        let a = self.lattice(x0, y0, octave);
        let b = self.lattice(x0 + 1, y0, octave);
        let c = self.lattice(x0, y0 + 1, octave);
        let d = self.lattice(x0 + 1, y0 + 1, octave);

        let top = a + (b - a) * fx;
        let bottom = c + (d - c) * fx;
        top + (bottom - top) * fy
    }

    /// Intensity of the scene at a point, in `[0; 1]` range.
    pub fn intensity(&self, p: na::Point2<f32>) -> f32 {
        0.7 * self.noise(p.x, p.y, self.cell, 0) + 0.3 * self.noise(p.x, p.y, self.cell * 4.0, 1)
    }

    /// Render the scene as seen through a camera.
    ///
    /// `camera` maps scene coordinates to centered frame coordinates. Every channel gets the same
    /// intensity, apart from a constant per-channel offset.
    pub fn render(
        &self,
        width: usize,
        height: usize,
        channels: usize,
        camera: &Transform,
    ) -> Result<Frame> {
        let inv = camera.inverse();
        let center = na::Vector2::new(width as f32, height as f32) * 0.5;

        let mut data = Vec::with_capacity(width * height * channels);

        for y in 0..height {
            for x in 0..width {
                let q = na::Point2::new(x as f32, y as f32) - center;
                let v = self.intensity(inv.transform_point(q));
                for c in 0..channels {
                    let v = v * 220.0 + 16.0 + c as f32 * 8.0;
                    data.push(v.round().clamp(0.0, 255.0) as u8);
                }
            }
        }

        Frame::new(width, height, channels, data)
    }
}

/// Camera path made of a slow pan with deterministic shake on top.
#[derive(Clone, Copy, Debug)]
pub struct ShakyPath {
    /// Pan velocity in pixels per frame.
    pub pan: na::Vector2<f32>,
    /// Peak translation of the shake, in pixels.
    pub jitter: f32,
    /// Peak rotation of the shake, in radians.
    pub jitter_angle: f32,
    pub seed: u64,
}

impl ShakyPath {
    /// Generate the ground-truth cameras for `frames` frames.
    pub fn cameras(&self, frames: usize) -> Vec<Transform> {
        use rand::{Rng, SeedableRng};

        let rng = &mut rand::rngs::StdRng::seed_from_u64(self.seed);

        (0..frames)
            .map(|i| {
                let pan = self.pan * i as f32;
                let jitter = |rng: &mut rand::rngs::StdRng, amp: f32| {
                    if amp > 0.0 {
                        rng.gen_range(-amp..=amp)
                    } else {
                        0.0
                    }
                };
                let dx = jitter(rng, self.jitter);
                let dy = jitter(rng, self.jitter);
                let angle = jitter(rng, self.jitter_angle);
                Transform::new(pan.x + dx, pan.y + dy, angle, 1.0)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_render() {
        let scene = Scene::default();
        let a = scene.render(32, 24, 3, &Transform::IDENTITY).unwrap();
        let b = scene.render(32, 24, 3, &Transform::IDENTITY).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.dims().channels, 3);
    }

    #[test]
    fn translation_shifts_content() {
        let scene = Scene::default();
        let a = scene.render(40, 30, 1, &Transform::IDENTITY).unwrap();
        let b = scene.render(40, 30, 1, &Transform::translation(3.0, 2.0)).unwrap();

        for y in 0..20 {
            for x in 0..30 {
                assert_eq!(a.pixel(x, y), b.pixel(x + 3, y + 2));
            }
        }
    }

    #[test]
    fn texture_has_contrast() {
        let frame = Scene::default()
            .render(64, 48, 1, &Transform::IDENTITY)
            .unwrap();
        let min = frame.as_bytes().iter().min().copied().unwrap_or_default();
        let max = frame.as_bytes().iter().max().copied().unwrap_or_default();
        assert!(max - min > 60, "{} {}", min, max);
    }

    #[test]
    fn path_is_seeded() {
        let path = ShakyPath {
            pan: na::Vector2::new(1.0, 0.0),
            jitter: 2.0,
            jitter_angle: 0.0,
            seed: 7,
        };

        let a = path.cameras(10);
        assert_eq!(a, path.cameras(10));
        for (i, c) in a.iter().enumerate() {
            assert!((c.dx - i as f32).abs() <= 2.0);
            assert_eq!(c.angle, 0.0);
        }
    }
}
