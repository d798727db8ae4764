//! Benchmark smoothers against a synthetic ground truth

use anyhow::{anyhow, Result};
use kalman_smoother::KalmanFilter;
use rayon::prelude::*;
use serde::Serialize;
use std::path::Path;
use std::time::{Duration, Instant};
use vstab::prelude::v1::*;
use vstab::synthetic::{Scene, ShakyPath};

/// Names accepted by [`build_stabilizer`].
pub const SMOOTHERS: &[&str] = &["uniform", "gaussian", "kalman"];

/// Create a stabilizer with the named smoothing filter.
///
/// `uniform` uses the weights of the configuration as they are.
pub fn build_stabilizer(config: &StabilizerConfig, smoother: &str) -> Result<Stabilizer> {
    let stabilizer = Stabilizer::new(config.clone())?;
    let radius = config.smoothing_radius;

    Ok(match smoother {
        "uniform" => stabilizer,
        "gaussian" => {
            let weights = SmoothingWeights::Gaussian {
                sigma: (radius as f32 * 0.5).max(0.5),
            };
            stabilizer.with_filter(WeightedAverage::from_weights(&weights, radius)?)
        }
        "kalman" => stabilizer.with_filter(KalmanFilter::default()),
        _ => {
            return Err(anyhow!(
                "unknown smoother `{}`, expected one of {:?}",
                smoother,
                SMOOTHERS
            ))
        }
    })
}

#[derive(Clone, Copy, Debug)]
pub struct SyntheticSetup {
    pub width: usize,
    pub height: usize,
    pub frames: usize,
    pub path: ShakyPath,
}

/// Per-frame trajectory sample, as written to CSV.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct Row {
    frame: usize,
    truth_dx: f32,
    truth_dy: f32,
    truth_angle: f32,
    raw_dx: f32,
    raw_dy: f32,
    raw_angle: f32,
    smooth_dx: f32,
    smooth_dy: f32,
    smooth_angle: f32,
    shown_dx: f32,
    shown_dy: f32,
    shown_angle: f32,
}

pub struct Report {
    pub name: String,
    pub stats: StabilizerStats,
    pub elapsed: Duration,
    pub rows: Vec<Row>,
}

impl Report {
    /// Mean distance between the estimated and the true camera position.
    pub fn tracking_error(&self) -> f32 {
        mean(
            self.rows
                .iter()
                .map(|r| (r.raw_dx - r.truth_dx).hypot(r.raw_dy - r.truth_dy)),
        )
    }

    /// Shake of the input camera path.
    pub fn input_shake(&self) -> f32 {
        roughness(self.rows.iter().map(|r| (r.truth_dx, r.truth_dy)))
    }

    /// Shake left in the stabilized output.
    pub fn output_shake(&self) -> f32 {
        roughness(self.rows.iter().map(|r| (r.shown_dx, r.shown_dy)))
    }

    pub fn fps(&self) -> f32 {
        self.stats.frames_out as f32 / self.elapsed.as_secs_f32().max(f32::EPSILON)
    }

    pub fn write_csv(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let mut path = dir.to_path_buf();
        path.push(format!("{}.csv", self.name));
        let file = std::fs::File::create(path)?;
        let mut writer = csv::Writer::from_writer(file);
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn mean(values: impl Iterator<Item = f32>) -> f32 {
    let (sum, cnt) = values.fold((0.0, 0), |(s, c), v| (s + v, c + 1));
    if cnt == 0 {
        0.0
    } else {
        sum / cnt as f32
    }
}

/// Mean magnitude of the second difference of a path.
fn roughness(path: impl Iterator<Item = (f32, f32)>) -> f32 {
    let path = path.collect::<Vec<_>>();
    mean(path.windows(3).map(|w| {
        let ddx = w[0].0 - 2.0 * w[1].0 + w[2].0;
        let ddy = w[0].1 - 2.0 * w[1].1 + w[2].1;
        ddx.hypot(ddy)
    }))
}

/// Render the synthetic stream and run every smoother over it.
pub fn run_synthetic(
    setup: &SyntheticSetup,
    config: &StabilizerConfig,
    smoothers: &[&str],
) -> Result<Vec<Report>> {
    let cameras = setup.path.cameras(setup.frames);
    let scene = Scene::default();

    let frames = cameras
        .par_iter()
        .map(|camera| scene.render(setup.width, setup.height, 3, camera))
        .collect::<vstab::error::Result<Vec<_>>>()?;

    log::info!(
        "rendered {} {}x{} frames",
        frames.len(),
        setup.width,
        setup.height
    );

    smoothers
        .par_iter()
        .map(|name| {
            let mut stabilizer = build_stabilizer(config, name)?;

            let start = Instant::now();

            for frame in &frames {
                stabilizer.stabilize(Some(frame.clone()))?;
            }
            stabilizer.flush()?;

            let elapsed = start.elapsed();

            log::debug!("{}: {:?}", name, stabilizer.stats());

            let trajectory = stabilizer.trajectory();
            let origin = cameras.first().copied().unwrap_or_default().inverse();

            let rows = cameras
                .iter()
                .zip(trajectory.cumulative())
                .zip(trajectory.smoothed())
                .enumerate()
                .map(|(frame, ((camera, raw), smoothed))| {
                    let truth = *camera * origin;
                    let shown = *smoothed * raw.inverse() * truth;
                    Row {
                        frame,
                        truth_dx: truth.dx,
                        truth_dy: truth.dy,
                        truth_angle: truth.angle,
                        raw_dx: raw.dx,
                        raw_dy: raw.dy,
                        raw_angle: raw.angle,
                        smooth_dx: smoothed.dx,
                        smooth_dy: smoothed.dy,
                        smooth_angle: smoothed.angle,
                        shown_dx: shown.dx,
                        shown_dy: shown.dy,
                        shown_angle: shown.angle,
                    }
                })
                .collect();

            Ok(Report {
                name: name.to_string(),
                stats: stabilizer.stats(),
                elapsed,
                rows,
            })
        })
        .collect()
}
