// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use clap::{App, Arg, ArgMatches};
use failure::{format_err, Error};
use image::pnm::PNMEncoder;
use image::pnm::{PNMSubtype, SampleEncoding};
use image::ColorType;
use num::Complex;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use mandelqueue::pool::MAX_THREADS;
use mandelqueue::render::Frame;
use mandelqueue::trace::init_tracing;
use mandelqueue::{
    BroadcastChannel, BroadcastRingQueue, OverrunPolicy, RenderConfig, Renderer, WorkerPool,
};

fn parse_pair<T>(s: &str, separator: char) -> Option<(T, T)>
where
    T: FromStr,
{
    match s.find(separator) {
        None => None,
        Some(index) => match (T::from_str(&s[..index]), T::from_str(&s[index + 1..])) {
            (Ok(l), Ok(r)) => Some((l, r)),
            _ => None,
        },
    }
}

fn parse_complex(s: &str) -> Option<Complex<f64>> {
    match parse_pair(s, ',') {
        Some((re, im)) => Some(Complex { re, im }),
        None => None,
    }
}

fn validate_pair<T: FromStr>(s: &str, separator: char, err: &str) -> Result<(), String> {
    match parse_pair::<T>(s, separator) {
        Some(_) => Ok(()),
        None => Err(err.to_string()),
    }
}

fn validate_range<T: FromStr + PartialOrd>(
    s: &str,
    low: T,
    high: T,
    isnotanumber_err: &str,
    isnotinrange_err: &str,
) -> Result<(), String> {
    match T::from_str(s) {
        Ok(i) => {
            if i >= low && i <= high {
                Ok(())
            } else {
                Err(isnotinrange_err.to_string())
            }
        }
        Err(_) => Err(isnotanumber_err.to_string()),
    }
}

const OUTPUT: &str = "output";
const SIZE: &str = "size";
const CENTER: &str = "center";
const WIDTH: &str = "width";
const THREADS: &str = "threads";
const PASSES: &str = "passes";
const ITERATIONS: &str = "iterations";
const BIN_WIDTH: &str = "bin-width";
const FRAMES: &str = "frames";
const OVERRUN: &str = "overrun";
const CLOSE_TIMEOUT: &str = "close-timeout";
const VERBOSE: &str = "verbose";

// Names of the stages that receive frames.
const WRITER: &str = "writer";
const PROGRESS: &str = "progress";

fn args<'a>(default_threads: &'a str) -> ArgMatches<'a> {
    App::new("mandel")
        .version("0.1.0")
        .author("Elf M. Sternberg <elf.sternberg@gmail.com>")
        .about("Progressive Mandelbrot renderer")
        .arg(
            Arg::with_name(OUTPUT)
                .required(true)
                .long(OUTPUT)
                .short("o")
                .takes_value(true)
                .help("Output file (binary PPM)"),
        )
        .arg(
            Arg::with_name(SIZE)
                .long(SIZE)
                .short("s")
                .takes_value(true)
                .default_value("800x800")
                .validator(|s| validate_pair::<usize>(&s, 'x', "Could not parse output image size"))
                .help("Size of output image"),
        )
        .arg(
            Arg::with_name(CENTER)
                .long(CENTER)
                .short("c")
                .takes_value(true)
                .allow_hyphen_values(true)
                .default_value("-0.85,0.0")
                .validator(|s| validate_pair::<f64>(&s, ',', "Could not parse center point"))
                .help("Point of the complex plane at the middle of the image"),
        )
        .arg(
            Arg::with_name(WIDTH)
                .long(WIDTH)
                .short("w")
                .takes_value(true)
                .default_value("2.8")
                .validator(|s| {
                    validate_range(
                        &s,
                        1e-12,
                        16.0,
                        "Could not parse view width",
                        "View width must be between 1e-12 and 16",
                    )
                })
                .help("Width of the view along the real axis"),
        )
        .arg(
            Arg::with_name(THREADS)
                .long(THREADS)
                .short("t")
                .takes_value(true)
                .default_value(default_threads)
                .validator(move |s| {
                    validate_range(
                        &s,
                        1,
                        MAX_THREADS,
                        "Could not parse thread count",
                        &format!("Thread count must be between 1 and {}", MAX_THREADS),
                    )
                })
                .help("Number of worker threads"),
        )
        .arg(
            Arg::with_name(PASSES)
                .long(PASSES)
                .short("p")
                .takes_value(true)
                .default_value("100")
                .validator(|s| {
                    validate_range(
                        &s,
                        1,
                        100_000,
                        "Could not parse pass count",
                        "Pass count must be between 1 and 100000",
                    )
                })
                .help("Most passes to make over the image"),
        )
        .arg(
            Arg::with_name(ITERATIONS)
                .long(ITERATIONS)
                .short("i")
                .takes_value(true)
                .default_value("64")
                .validator(|s| {
                    validate_range(
                        &s,
                        1,
                        100_000,
                        "Could not parse iteration count",
                        "Iteration count must be between 1 and 100000",
                    )
                })
                .help("Iterations per pixel per pass"),
        )
        .arg(
            Arg::with_name(BIN_WIDTH)
                .long(BIN_WIDTH)
                .short("b")
                .takes_value(true)
                .default_value("4")
                .validator(|s| {
                    validate_range(
                        &s,
                        1,
                        256,
                        "Could not parse bin width",
                        "Bin width must be between 1 and 256",
                    )
                })
                .help("Side of the square bins handed to workers"),
        )
        .arg(
            Arg::with_name(FRAMES)
                .long(FRAMES)
                .short("f")
                .takes_value(true)
                .default_value("16")
                .validator(|s| {
                    validate_range(
                        &s,
                        2,
                        4096,
                        "Could not parse frame ring size",
                        "Frame ring size must be between 2 and 4096",
                    )
                })
                .help("Slots in the frame broadcast ring"),
        )
        .arg(
            Arg::with_name(OVERRUN)
                .long(OVERRUN)
                .takes_value(true)
                .possible_values(&["fail", "block"])
                .default_value("fail")
                .help("What to do when a frame stage falls behind"),
        )
        .arg(
            Arg::with_name(CLOSE_TIMEOUT)
                .long(CLOSE_TIMEOUT)
                .takes_value(true)
                .default_value("1000")
                .validator(|s| {
                    validate_range(
                        &s,
                        0,
                        600_000,
                        "Could not parse close timeout",
                        "Close timeout must be between 0 and 600000 ms",
                    )
                })
                .help("Milliseconds to wait for frame stages to finish"),
        )
        .arg(
            Arg::with_name(VERBOSE)
                .short("v")
                .multiple(true)
                .help("More logging; repeat for more"),
        )
        .get_matches()
}

fn parsed<T: FromStr>(matches: &ArgMatches, name: &str) -> Result<T, Error> {
    matches
        .value_of(name)
        .and_then(|s| T::from_str(s).ok())
        .ok_or_else(|| format_err!("Could not parse --{}", name))
}

fn config_from(matches: &ArgMatches) -> Result<RenderConfig, Error> {
    let (width, height) = matches
        .value_of(SIZE)
        .and_then(|s| parse_pair::<usize>(s, 'x'))
        .ok_or_else(|| format_err!("Error parsing image dimensions"))?;
    let center = matches
        .value_of(CENTER)
        .and_then(parse_complex)
        .ok_or_else(|| format_err!("Error parsing center point"))?;
    let overrun = match matches.value_of(OVERRUN) {
        Some("block") => OverrunPolicy::Block,
        _ => OverrunPolicy::Fail,
    };

    let config = RenderConfig {
        width,
        height,
        center,
        real_width: parsed(matches, WIDTH)?,
        bin_width: parsed(matches, BIN_WIDTH)?,
        iterations_per_pass: parsed(matches, ITERATIONS)?,
        max_passes: parsed(matches, PASSES)?,
        threads: parsed(matches, THREADS)?,
        frame_capacity: parsed(matches, FRAMES)?,
        overrun,
        close_timeout: Duration::from_millis(parsed(matches, CLOSE_TIMEOUT)?),
        ..RenderConfig::default()
    };
    config.validate()?;
    Ok(config)
}

fn write_image(outfile: &str, frame: &Frame) -> Result<(), std::io::Error> {
    let output = File::create(Path::new(outfile))?;
    let mut encoder =
        PNMEncoder::new(output).with_subtype(PNMSubtype::Pixmap(SampleEncoding::Binary));
    encoder.encode(
        frame.rgb.as_slice(),
        frame.width as u32,
        frame.height as u32,
        ColorType::RGB(8),
    )?;
    Ok(())
}

/// Keeps the latest frame and writes it once the ring closes.
fn write_latest(frames: &BroadcastRingQueue<Frame>, outfile: &str) -> Result<usize, Error> {
    let id = frames
        .subscriber_id(WRITER)
        .ok_or_else(|| format_err!("no {} on the frame roster", WRITER))?;
    let mut latest = None;
    while let Some(frame) = frames.pop(id)? {
        latest = Some(frame);
    }
    let frame = latest.ok_or_else(|| format_err!("no frames were rendered"))?;
    write_image(outfile, &frame)?;
    tracing::info!(pass = frame.pass, file = outfile, "image written");
    Ok(frame.pass)
}

/// Logs every frame as it arrives.
fn report_progress(frames: &BroadcastRingQueue<Frame>) -> Result<usize, Error> {
    let id = frames
        .subscriber_id(PROGRESS)
        .ok_or_else(|| format_err!("no {} on the frame roster", PROGRESS))?;
    let mut seen = 0;
    while let Some(frame) = frames.pop(id)? {
        seen += 1;
        tracing::info!(
            pass = frame.pass,
            finished = frame.finished_bins,
            total = frame.total_bins,
            complete = frame.is_complete(),
            "frame"
        );
    }
    Ok(seen)
}

fn run(matches: &ArgMatches) -> Result<(), Error> {
    let config = config_from(matches)?;
    let outfile = matches
        .value_of(OUTPUT)
        .ok_or_else(|| format_err!("an output file is required"))?;
    let close_timeout = config.close_timeout;
    let frames = BroadcastRingQueue::with_policy(
        config.frame_capacity,
        vec![WRITER, PROGRESS],
        config.overrun,
    )?;
    let mut renderer = Renderer::new(config)?;

    let frames = &frames;
    let outcome = crossbeam::scope(|spawner| {
        let writer = spawner.spawn(move |_| write_latest(frames, outfile));
        let progress = spawner.spawn(move |_| report_progress(frames));

        let channel: &dyn BroadcastChannel<Frame> = frames;
        let rendered = renderer.render(Some(channel));
        // Close even if the render failed, so the stages exit.
        let closed = frames.close(close_timeout);

        let written = writer.join();
        let reported = progress.join();
        (rendered, closed, written, reported)
    });

    let (rendered, closed, written, reported) =
        outcome.map_err(|_| format_err!("a frame stage panicked"))?;
    let stats = rendered?;
    closed?;
    written.map_err(|_| format_err!("the writer panicked"))??;
    let seen = reported.map_err(|_| format_err!("the progress reporter panicked"))??;
    tracing::info!(passes = stats.pass, frames = seen, "done");
    Ok(())
}

fn main() {
    let default_threads = WorkerPool::default().threads().to_string();
    let matches = args(&default_threads);
    init_tracing(matches.occurrences_of(VERBOSE));

    if let Err(e) = run(&matches) {
        eprintln!("Render failure: {}", e);
        std::process::exit(1);
    }
}
