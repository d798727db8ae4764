//! Stabilize raw video streams, and analyse smoothing accuracy on synthetic shake

use anyhow::{anyhow, Context, Result};
use clap::*;
use nalgebra as na;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use vstab::prelude::v1::*;
use vstab::synthetic::ShakyPath;

mod analysis;

use analysis::{build_stabilizer, run_synthetic, SyntheticSetup, SMOOTHERS};

fn config_args(cmd: Command<'_>) -> Command<'_> {
    cmd.arg(
        Arg::new("config")
            .long("config")
            .short('c')
            .takes_value(true)
            .help("JSON configuration file"),
    )
    .arg(
        Arg::new("radius")
            .long("radius")
            .short('r')
            .takes_value(true)
            .help("Smoothing radius in frames"),
    )
    .arg(
        Arg::new("border")
            .long("border")
            .short('b')
            .takes_value(true)
            .possible_values([
                "black",
                "replicate",
                "reflect",
                "reflect-101",
                "wrap",
                "crop-to-valid",
                "crop-and-zoom",
            ]),
    )
    .arg(
        Arg::new("model")
            .long("model")
            .short('m')
            .takes_value(true)
            .possible_values(["translation", "rigid", "similarity"]),
    )
    .arg(
        Arg::new("prop")
            .long("prop")
            .short('p')
            .takes_value(true)
            .multiple_occurrences(true)
            .help("Override a named property, as \"Name=value\""),
    )
}

fn load_config(matches: &ArgMatches) -> Result<StabilizerConfig> {
    let mut config: StabilizerConfig = match matches.value_of("config") {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening {}", path))?;
            serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("parsing {}", path))?
        }
        None => Default::default(),
    };

    if let Some(radius) = matches.value_of("radius") {
        config.smoothing_radius = radius.parse()?;
    }

    if let Some(border) = matches.value_of("border") {
        config.border_policy = border.parse()?;
    }

    if let Some(model) = matches.value_of("model") {
        config.motion_model = model.parse()?;
    }

    for prop in matches.values_of("prop").into_iter().flatten() {
        let (name, value) = prop
            .split_once('=')
            .ok_or_else(|| anyhow!("property `{}` is not in Name=value form", prop))?;
        config.set_prop(name.trim(), value)?;
    }

    config.validate()?;

    Ok(config)
}

fn main() -> Result<()> {
    env_logger::init();

    let matches = Command::new("stab-analyser")
        .version(crate_version!())
        .author(crate_authors!())
        .about(crate_description!())
        .subcommand_required(true)
        .subcommand(config_args(
            Command::new("raw")
                .about("Stabilize a stream of raw interleaved frames")
                .arg(
                    Arg::new("width")
                        .long("width")
                        .short('W')
                        .takes_value(true)
                        .required(true),
                )
                .arg(
                    Arg::new("height")
                        .long("height")
                        .short('H')
                        .takes_value(true)
                        .required(true),
                )
                .arg(
                    Arg::new("channels")
                        .long("channels")
                        .takes_value(true)
                        .default_value("3"),
                )
                .arg(
                    Arg::new("smoother")
                        .long("smoother")
                        .short('s')
                        .takes_value(true)
                        .possible_values(SMOOTHERS.iter().copied())
                        .default_value("uniform"),
                )
                .arg(
                    Arg::new("input")
                        .long("input")
                        .short('i')
                        .takes_value(true)
                        .default_value("-"),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .short('o')
                        .takes_value(true)
                        .default_value("-"),
                ),
        ))
        .subcommand(config_args(
            Command::new("synthetic")
                .about("Compare smoothers on a synthetic shaky camera path")
                .arg(
                    Arg::new("width")
                        .long("width")
                        .short('W')
                        .takes_value(true)
                        .default_value("320"),
                )
                .arg(
                    Arg::new("height")
                        .long("height")
                        .short('H')
                        .takes_value(true)
                        .default_value("240"),
                )
                .arg(
                    Arg::new("frames")
                        .long("frames")
                        .short('n')
                        .takes_value(true)
                        .default_value("120"),
                )
                .arg(
                    Arg::new("pan")
                        .long("pan")
                        .takes_value(true)
                        .default_value("1.0"),
                )
                .arg(
                    Arg::new("jitter")
                        .long("jitter")
                        .short('j')
                        .takes_value(true)
                        .default_value("3.0"),
                )
                .arg(
                    Arg::new("jitter-angle")
                        .long("jitter-angle")
                        .takes_value(true)
                        .default_value("0.5")
                        .help("Peak rotational shake in degrees"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .takes_value(true)
                        .default_value("1"),
                )
                .arg(
                    Arg::new("smoothers")
                        .long("smoothers")
                        .takes_value(true)
                        .multiple_values(true)
                        .use_value_delimiter(true)
                        .possible_values(SMOOTHERS.iter().copied())
                        .default_value("uniform,gaussian,kalman"),
                )
                .arg(
                    Arg::new("csv")
                        .long("csv")
                        .takes_value(true)
                        .help("Directory to write per-frame trajectories to"),
                ),
        ))
        .subcommand(config_args(
            Command::new("config").about("Print the effective configuration as JSON"),
        ))
        .get_matches();

    match matches.subcommand() {
        Some(("raw", matches)) => raw(matches),
        Some(("synthetic", matches)) => synthetic(matches),
        Some(("config", matches)) => {
            let mut config = load_config(matches)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            for (name, prop) in config.props() {
                log::info!("{}: {}", name, prop);
            }
            Ok(())
        }
        _ => Err(anyhow!("unknown subcommand")),
    }
}

fn value<T: std::str::FromStr>(matches: &ArgMatches, name: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    matches
        .value_of(name)
        .ok_or_else(|| anyhow!("missing `{}`", name))?
        .parse()
        .with_context(|| format!("invalid `{}`", name))
}

fn raw(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches)?;
    let width: usize = value(matches, "width")?;
    let height: usize = value(matches, "height")?;
    let channels: usize = value(matches, "channels")?;
    let smoother = matches.value_of("smoother").unwrap_or("uniform");

    let input: Box<dyn Read> = match matches.value_of("input") {
        Some("-") | None => Box::new(std::io::stdin()),
        Some(path) => Box::new(File::open(path).with_context(|| format!("opening {}", path))?),
    };

    let output: Box<dyn Write> = match matches.value_of("output") {
        Some("-") | None => Box::new(std::io::stdout()),
        Some(path) => Box::new(File::create(path).with_context(|| format!("creating {}", path))?),
    };

    let mut input = BufReader::new(input);
    let mut output = BufWriter::new(output);

    let mut stabilizer = build_stabilizer(&config, smoother)?;
    let mut buf = vec![0; width * height * channels];

    loop {
        let read = read_frame(&mut input, &mut buf)?;

        if read == 0 {
            break;
        } else if read < buf.len() {
            log::warn!(
                "discarding {} trailing bytes, short of a {}x{}x{} frame",
                read,
                width,
                height,
                channels
            );
            break;
        }

        let frame = Frame::new(width, height, channels, buf.clone())?;

        if let Some(out) = stabilizer.stabilize(Some(frame))? {
            output.write_all(out.as_bytes())?;
        }
    }

    for out in stabilizer.flush()? {
        output.write_all(out.as_bytes())?;
    }

    output.flush()?;

    let stats = stabilizer.stats();

    if let Some(dims) = stabilizer.output_dims() {
        log::info!("output frames are {}", dims);
    }

    log::info!(
        "{} frames in, {} out, {} without motion estimate",
        stats.frames_in,
        stats.frames_out,
        stats.identity_fallbacks
    );

    Ok(())
}

/// Fill `buf` from `input`, returning fewer bytes only at the end of the stream.
fn read_frame(input: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;

    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }

    Ok(filled)
}

fn synthetic(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches)?;

    let pan: f32 = value(matches, "pan")?;
    let jitter_angle: f32 = value(matches, "jitter-angle")?;

    let setup = SyntheticSetup {
        width: value(matches, "width")?,
        height: value(matches, "height")?,
        frames: value(matches, "frames")?,
        path: ShakyPath {
            pan: na::Vector2::new(pan, 0.0),
            jitter: value(matches, "jitter")?,
            jitter_angle: jitter_angle.to_radians(),
            seed: value(matches, "seed")?,
        },
    };

    let smoothers = matches
        .values_of("smoothers")
        .map(|v| v.collect::<Vec<_>>())
        .unwrap_or_else(|| SMOOTHERS.to_vec());

    let reports = run_synthetic(&setup, &config, &smoothers)?;

    println!(
        "{:<10} {:>12} {:>12} {:>12} {:>10} {:>8}",
        "smoother", "track err", "input shake", "output shake", "fallbacks", "fps"
    );

    for report in &reports {
        println!(
            "{:<10} {:>12.4} {:>12.4} {:>12.4} {:>10} {:>8.1}",
            report.name,
            report.tracking_error(),
            report.input_shake(),
            report.output_shake(),
            report.stats.identity_fallbacks,
            report.fps()
        );
    }

    if let Some(dir) = matches.value_of("csv") {
        for report in &reports {
            report.write_csv(Path::new(dir))?;
        }
        log::info!("wrote trajectories to {}", dir);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn partial_frames_are_reported() {
        let mut input = Cursor::new(vec![7u8; 10]);
        let mut buf = vec![0; 4];

        assert_eq!(read_frame(&mut input, &mut buf).unwrap(), 4);
        assert_eq!(read_frame(&mut input, &mut buf).unwrap(), 4);
        assert_eq!(read_frame(&mut input, &mut buf).unwrap(), 2);
        assert_eq!(read_frame(&mut input, &mut buf).unwrap(), 0);
    }

    #[test]
    fn reads_across_short_reads() {
        // Hands out one byte per read call.
        struct Trickle(Cursor<Vec<u8>>);

        impl Read for Trickle {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                let len = buf.len().min(1);
                self.0.read(&mut buf[..len])
            }
        }

        let mut input = Trickle(Cursor::new((0..6).collect()));
        let mut buf = vec![0; 6];

        assert_eq!(read_frame(&mut input, &mut buf).unwrap(), 6);
        assert_eq!(buf, (0..6).collect::<Vec<u8>>());
    }
}
