// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use crate::utils;
use capstream::device::Device;
use capstream::driver::Location;
use capstream::fourcc::FourCC;
use capstream::pool::{BufferPool, Protection};
use capstream::stream::Stream;
use capstream::v4l2::{BufferDirection, Capabilities, MemoryKind};
use capstream::{format, framerate};
use clap::Args as ClapArgs;
use nix::poll::PollFlags;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::os::fd::{AsFd, FromRawFd, RawFd};
use std::sync::atomic::Ordering;
use std::time::Instant;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Camera device
    input: String,

    /// Memory-to-memory encoder device
    m2m: String,

    /// Resolution in WxH format
    #[arg(short, long, default_value = "1280x720")]
    size: String,

    /// Pixel format shared by the camera and the encoder input
    #[arg(short, long, default_value = "M420")]
    format: String,

    /// Encoded format: h264, h265 or a FOURCC
    #[arg(short, long, default_value = "h264")]
    codec: String,

    /// Target frame rate of all three queues
    #[arg(short, long)]
    rate: Option<u32>,

    /// Number of encoded frames (0=unlimited)
    #[arg(short = 'n', long, default_value = "0")]
    frames: u64,

    /// Buffers per queue
    #[arg(short, long, default_value = "4")]
    buffers: u32,

    /// Write the bitstream to this file
    #[arg(short, long, conflicts_with = "fd")]
    output: Option<String>,

    /// Write the bitstream to an inherited file descriptor
    #[arg(long)]
    fd: Option<RawFd>,
}

#[derive(Debug, Serialize)]
struct EncodeSummary {
    input: String,
    encoder: String,
    codec: String,
    captured: u64,
    encoded: u64,
    bytes: u64,
    seconds: f64,
}

/// Map codec names to their FOURCC, anything else is taken literally
fn parse_codec(s: &str) -> Result<FourCC, CliError> {
    match s.to_lowercase().as_str() {
        "h264" => Ok(FourCC::H264),
        "h265" | "hevc" => Ok(FourCC::HEVC),
        _ => utils::parse_fourcc(s),
    }
}

fn open_sink(args: &Args) -> Result<Option<File>, CliError> {
    if let Some(path) = &args.output {
        let file = File::create(path)
            .map_err(|e| CliError::General(format!("Failed to create output file: {}", e)))?;
        return Ok(Some(file));
    }
    match args.fd {
        Some(fd) if fd < 0 => Err(CliError::InvalidArgs(format!(
            "Invalid output descriptor: {}",
            fd
        ))),
        // SAFETY: the descriptor was handed to this process for writing and
        // nothing else in the process owns it.
        Some(fd) => Ok(Some(unsafe { File::from_raw_fd(fd) })),
        None => Ok(None),
    }
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Encode parameters: {:?}", args);

    let (width, height) = utils::parse_resolution(&args.size)?;
    let fourcc = utils::parse_fourcc(&args.format)?;
    let codec = parse_codec(&args.codec)?;
    if args.buffers == 0 {
        return Err(CliError::InvalidArgs("buffer count must be positive".to_string()));
    }
    let count = args.buffers;

    let term = utils::install_signal_handler()?;

    let input = Device::open(
        &args.input,
        Capabilities::VIDEO_CAPTURE | Capabilities::STREAMING,
        Capabilities::VIDEO_M2M,
    )?;
    log::info!("Capture card: {}", input.card());

    let m2m = Device::open(
        &args.m2m,
        Capabilities::VIDEO_M2M | Capabilities::STREAMING,
        Capabilities::empty(),
    )?;
    log::info!("Encoding card: {}", m2m.card());

    format::configure(&input, BufferDirection::Capture, fourcc, width, height)?;
    format::configure(&m2m, BufferDirection::Output, fourcc, width, height)?;
    format::configure(&m2m, BufferDirection::Capture, codec, width, height)?;

    if let Some(fps) = args.rate {
        framerate::set(&input, BufferDirection::Capture, fps)?;
        framerate::set(&m2m, BufferDirection::Output, fps)?;
        framerate::set(&m2m, BufferDirection::Capture, fps)?;
    }
    log::info!(
        "Capture framerate: {:.2} FPS",
        framerate::get(&input, BufferDirection::Capture)
    );
    log::info!(
        "Encoding framerate: {:.2}/{:.2} FPS",
        framerate::get(&m2m, BufferDirection::Output),
        framerate::get(&m2m, BufferDirection::Capture)
    );

    let mut camera_pool =
        BufferPool::request(&input, BufferDirection::Capture, count, MemoryKind::Mmap)?;
    let feed_pool = BufferPool::request(&m2m, BufferDirection::Output, count, MemoryKind::DmaBuf)?;
    let mut encoded_pool =
        BufferPool::request(&m2m, BufferDirection::Capture, count, MemoryKind::Mmap)?;

    camera_pool.export(&input)?;
    encoded_pool.map(&m2m, Protection::Read)?;

    let handles: Vec<RawFd> = camera_pool
        .buffers()
        .iter()
        .map(|b| b.exported().map(|e| e.raw_fd()))
        .collect::<Option<_>>()
        .ok_or_else(|| CliError::General("camera buffers are not exported".to_string()))?;

    let mut camera = Stream::new(camera_pool);
    let mut feed = Stream::new(feed_pool);
    let mut encoded = Stream::new(encoded_pool);

    for index in 0..count {
        camera.enqueue(&input, index)?;
        encoded.enqueue(&m2m, index)?;
    }

    camera.stream_on(&input)?;
    feed.stream_on(&m2m)?;
    encoded.stream_on(&m2m)?;

    let mut sink = open_sink(&args)?;

    log::debug!("Begin processing...");
    let start_time = Instant::now();
    let mut captured = 0u64;
    let mut encoded_count = 0u64;
    let mut byte_count = 0u64;

    while utils::below_limit(encoded_count, args.frames) && !term.load(Ordering::Relaxed) {
        let want_frames = utils::below_limit(captured, args.frames);
        let mut fds = Vec::with_capacity(2);
        if want_frames {
            fds.push((input.as_fd(), PollFlags::POLLIN));
        }
        fds.push((m2m.as_fd(), PollFlags::POLLIN | PollFlags::POLLOUT));

        let revents = match utils::wait_ready(&fds)? {
            Some(revents) => revents,
            None => continue,
        };
        let m2m_events = revents[revents.len() - 1];

        if want_frames && revents[0].contains(PollFlags::POLLIN) {
            let done = camera.dequeue(&input)?;
            log::debug!("Frame {} captured: {} bytes", captured, done.bytes_used);
            let handle = handles[done.index as usize];
            feed.enqueue_with(&m2m, done.index, Location::DmaBuf(handle), done.bytes_used)?;
            captured += 1;
        }

        if m2m_events.contains(PollFlags::POLLOUT) {
            let done = feed.dequeue(&m2m)?;
            log::trace!("Encoder released camera buffer #{}", done.index);
            camera.enqueue(&input, done.index)?;
        }

        if m2m_events.contains(PollFlags::POLLIN) {
            let done = encoded.dequeue(&m2m)?;
            log::info!("Frame {} encoded: {} bytes", encoded_count, done.bytes_used);

            let data = encoded.data(done.index)?;
            let used = data.len().min(done.bytes_used as usize);
            if let Some(out) = sink.as_mut() {
                out.write_all(&data[..used])
                    .map_err(|e| CliError::General(format!("Failed to write bitstream: {}", e)))?;
            }
            byte_count += used as u64;

            encoded.enqueue(&m2m, done.index)?;
            encoded_count += 1;
        }
    }

    if term.load(Ordering::Relaxed) {
        log::info!("Received Ctrl+C, stopping...");
    }

    if let Some(mut out) = sink {
        out.flush()
            .map_err(|e| CliError::General(format!("Failed to flush output: {}", e)))?;
    }

    camera.stream_off(&input)?;
    feed.stream_off(&m2m)?;
    encoded.stream_off(&m2m)?;
    encoded.into_pool().release(&m2m)?;
    feed.into_pool().release(&m2m)?;
    camera.into_pool().release(&input)?;

    let summary = EncodeSummary {
        input: args.input.clone(),
        encoder: args.m2m.clone(),
        codec: codec.to_string(),
        captured,
        encoded: encoded_count,
        bytes: byte_count,
        seconds: start_time.elapsed().as_secs_f64(),
    };

    if json {
        let json_str = serde_json::to_string_pretty(&summary)
            .map_err(|e| CliError::General(format!("Failed to serialize JSON: {}", e)))?;
        println!("{}", json_str);
    } else {
        log::info!(
            "Encode complete: {} frames captured, {} encoded, {} bytes in {:.1}s",
            summary.captured,
            summary.encoded,
            summary.bytes,
            summary.seconds
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_codec() {
        assert_eq!(parse_codec("h264").unwrap(), FourCC::H264);
        assert_eq!(parse_codec("H264").unwrap(), FourCC::H264);
        assert_eq!(parse_codec("hevc").unwrap(), FourCC::HEVC);
        assert_eq!(parse_codec("h265").unwrap(), FourCC::HEVC);
        assert_eq!(parse_codec("VP80").unwrap(), FourCC(*b"VP80"));
        assert!(parse_codec("toolong").is_err());
    }
}
