//! # Kalman trajectory smoother
//!
//! Every trajectory parameter is modelled as an independent constant velocity process. The
//! window is filtered forwards, and then smoothed backwards with the Rauch-Tung-Striebel pass,
//! so that the estimate at the center of the window uses both past and future measurements.

use nalgebra as na;
use vstab::prelude::v1::*;

/// Prior variance of the initial velocity, in squared units per frame.
const VELOCITY_VARIANCE: f64 = 1e2;

/// Constant velocity Kalman smoother.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KalmanFilter {
    /// Variance of the unmodelled acceleration, per frame.
    process_noise: f32,
    /// Variance of the measured trajectory.
    measurement_noise: f32,
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self {
            process_noise: 1e-5,
            measurement_noise: 1e-1,
        }
    }
}

impl Properties for KalmanFilter {
    fn props_mut(&mut self) -> Vec<(&str, PropertyMut)> {
        vec![
            (
                "Process noise",
                PropertyMut::float(&mut self.process_noise, 1e-9, 10.0),
            ),
            (
                "Measurement noise",
                PropertyMut::float(&mut self.measurement_noise, 1e-6, 100.0),
            ),
        ]
    }
}

impl KalmanFilter {
    pub fn process_noise(self, process_noise: f32) -> Self {
        Self {
            process_noise,
            ..self
        }
    }

    pub fn measurement_noise(self, measurement_noise: f32) -> Self {
        Self {
            measurement_noise,
            ..self
        }
    }

    /// Smooth a single series of measurements, returning the estimate at `center`.
    fn smooth_series(&self, z: &[f64], center: usize) -> f64 {
        let f = na::Matrix2::new(1.0, 1.0, 0.0, 1.0);
        let q = na::Matrix2::identity() * self.process_noise as f64;
        let r = self.measurement_noise as f64;

        let mut x = na::Vector2::new(z[0], 0.0);
        let mut p = na::Matrix2::new(r, 0.0, 0.0, VELOCITY_VARIANCE);

        let mut filtered = Vec::with_capacity(z.len());
        let mut predicted = Vec::with_capacity(z.len());

        for (i, &z) in z.iter().enumerate() {
            if i > 0 {
                x = f * x;
                p = f * p * f.transpose() + q;
            }

            predicted.push((x, p));

            let s = p[(0, 0)] + r;
            let k = p.column(0) / s;
            let kp = k * p.row(0);
            x += k * (z - x[0]);
            p -= kp;

            filtered.push((x, p));
        }

        let (mut xs, _) = filtered[z.len() - 1];

        for i in (center..z.len() - 1).rev() {
            let (xf, pf) = filtered[i];
            let (xp, pp) = predicted[i + 1];

            xs = match pp.try_inverse() {
                Some(inv) => xf + pf * f.transpose() * inv * (xs - xp),
                None => {
                    log::trace!("singular prediction covariance at {}", i);
                    xf
                }
            };
        }

        xs[0]
    }
}

impl SmoothingFilter for KalmanFilter {
    fn smooth(&self, window: &[Transform], center: usize) -> Transform {
        let mut out = [0f32; 4];

        for (i, o) in out.iter_mut().enumerate() {
            let series = window
                .iter()
                .map(|t| t.params()[i] as f64)
                .collect::<Vec<_>>();
            *o = self.smooth_series(&series, center) as f32;
        }

        let smoothed = Transform::from_params(out);

        if smoothed.is_valid() {
            smoothed
        } else {
            window[center]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    #[test]
    fn constant_window_is_kept() {
        let t = Transform::new(3.5, -1.25, 0.02, 1.01);
        let window = vec![t; 9];
        assert_eq!(KalmanFilter::default().smooth(&window, 4), t);
    }

    #[test]
    fn single_element_window() {
        let t = Transform::new(1.0, 2.0, 0.3, 0.9);
        assert_eq!(KalmanFilter::default().smooth(&[t], 0), t);
    }

    #[test]
    fn follows_linear_motion() {
        let window = (0..11)
            .map(|i| Transform::translation(i as f32 * 2.0, 0.0))
            .collect::<Vec<_>>();

        let smoothed = KalmanFilter::default().smooth(&window, 5);
        assert!((smoothed.dx - 10.0).abs() < 0.1, "{:?}", smoothed);
    }

    #[test]
    fn reduces_noise() {
        let rng = &mut rand::rngs::StdRng::seed_from_u64(11);
        let filter = KalmanFilter::default();

        let noisy = (0..200)
            .map(|i| Transform::translation(i as f32 * 0.5 + rng.gen_range(-2.0..=2.0), 0.0))
            .collect::<Vec<_>>();

        let radius = 10;
        let (mut raw_err, mut smooth_err) = (0.0, 0.0);

        for c in radius..noisy.len() - radius {
            let window = &noisy[c - radius..=c + radius];
            let truth = c as f32 * 0.5;
            raw_err += (noisy[c].dx - truth).abs();
            smooth_err += (filter.smooth(window, radius).dx - truth).abs();
        }

        assert!(smooth_err < 0.5 * raw_err, "{} {}", smooth_err, raw_err);
    }

    #[test]
    fn works_in_pipeline() {
        let config = StabilizerConfig::default().smoothing_radius(3);
        let mut stabilizer = Stabilizer::new(config)
            .unwrap()
            .with_filter(KalmanFilter::default());

        let frame = Frame::from_fn(32, 32, 1, |x, y, _| ((x * 7) ^ (y * 5)) as u8).unwrap();

        let mut out = vec![];
        for _ in 0..5 {
            out.extend(stabilizer.stabilize(Some(frame.clone())).unwrap());
        }
        out.extend(stabilizer.flush().unwrap());

        assert_eq!(out.len(), 5);
    }

    #[test]
    fn properties() {
        let mut filter = KalmanFilter::default();
        filter.set_prop("Measurement noise", "0.5").unwrap();
        assert_eq!(filter, KalmanFilter::default().measurement_noise(0.5));
    }
}
