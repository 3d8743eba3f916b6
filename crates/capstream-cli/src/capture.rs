// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use crate::utils;
use capstream::session::Session;
use clap::Args as ClapArgs;
use nix::poll::PollFlags;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::os::fd::AsFd;
use std::sync::atomic::Ordering;
use std::time::Instant;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Camera device
    #[arg(short, long, default_value = "/dev/video0")]
    device: String,

    /// Resolution in WxH format
    #[arg(short, long, default_value = "1280x720")]
    size: String,

    /// Pixel format
    #[arg(short, long, default_value = "YUYV")]
    format: String,

    /// Target frame rate (device default when omitted)
    #[arg(short, long)]
    rate: Option<u32>,

    /// Number of frames (0=unlimited)
    #[arg(short = 'n', long, default_value = "0")]
    frames: u64,

    /// Number of driver buffers
    #[arg(short, long, default_value = "4")]
    buffers: u32,

    /// Write raw frames to this file
    #[arg(short, long)]
    output: Option<String>,
}

#[derive(Debug, Serialize)]
struct CaptureSummary {
    device: String,
    width: u32,
    height: u32,
    format: String,
    frames: u64,
    errors: u64,
    bytes: u64,
    seconds: f64,
    fps: f64,
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Capture parameters: {:?}", args);

    let (width, height) = utils::parse_resolution(&args.size)?;
    let fourcc = utils::parse_fourcc(&args.format)?;
    if args.buffers == 0 {
        return Err(CliError::InvalidArgs("buffer count must be positive".to_string()));
    }

    let term = utils::install_signal_handler()?;

    let mut builder = Session::builder()
        .with_device(&args.device)
        .with_resolution(width, height)
        .with_format(fourcc)
        .with_buffers(args.buffers);
    if let Some(fps) = args.rate {
        builder = builder.with_frame_rate(fps);
    }

    log::info!("Opening camera: {}", args.device);
    let mut session = builder.open()?;
    log::info!(
        "Capturing {}x{} {} at {:.2} fps",
        session.width(),
        session.height(),
        session.pixel_format(),
        session.frame_rate()
    );

    let mut output = match &args.output {
        Some(path) => Some(BufWriter::new(File::create(path).map_err(|e| {
            CliError::General(format!("Failed to create output file: {}", e))
        })?)),
        None => None,
    };

    let start_time = Instant::now();
    let mut frame_count = 0u64;
    let mut error_count = 0u64;
    let mut byte_count = 0u64;

    while utils::below_limit(frame_count, args.frames) && !term.load(Ordering::Relaxed) {
        let ready = utils::wait_ready(&[(session.device().as_fd(), PollFlags::POLLIN)])?;
        if ready.is_none() {
            continue;
        }

        let frame = session.read()?;
        log::info!(
            "Frame {} captured: {} bytes (sequence {})",
            frame_count,
            frame.bytes_used(),
            frame.sequence()
        );
        if frame.is_error() {
            error_count += 1;
        }
        if let Some(out) = output.as_mut() {
            out.write_all(frame.data())
                .map_err(|e| CliError::General(format!("Failed to write frame data: {}", e)))?;
        }
        byte_count += frame.data().len() as u64;
        frame.release()?;

        frame_count += 1;
    }

    if term.load(Ordering::Relaxed) {
        log::info!("Received Ctrl+C, stopping...");
    }

    if let Some(mut out) = output {
        out.flush()
            .map_err(|e| CliError::General(format!("Failed to flush output file: {}", e)))?;
    }
    session.stop()?;

    let elapsed = start_time.elapsed().as_secs_f64();
    let summary = CaptureSummary {
        device: args.device.clone(),
        width: session.width(),
        height: session.height(),
        format: session.pixel_format().to_string(),
        frames: frame_count,
        errors: error_count,
        bytes: byte_count,
        seconds: elapsed,
        fps: if elapsed > 0.0 {
            frame_count as f64 / elapsed
        } else {
            0.0
        },
    };

    if json {
        let json_str = serde_json::to_string_pretty(&summary)
            .map_err(|e| CliError::General(format!("Failed to serialize JSON: {}", e)))?;
        println!("{}", json_str);
    } else {
        log::info!(
            "Capture complete: {} frames ({} flagged) in {:.1}s ({:.1} fps)",
            summary.frames,
            summary.errors,
            summary.seconds,
            summary.fps
        );
        if let Some(path) = &args.output {
            log::info!("Output file: {} ({} bytes)", path, summary.bytes);
        }
    }

    Ok(())
}
