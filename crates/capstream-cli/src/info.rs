// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use capstream::device::Device;
use capstream::v4l2::{BufferDirection, Capabilities};
use capstream::{diagnostics, format, framerate};
use clap::Args as ClapArgs;
use serde::Serialize;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Device node path
    #[arg(short, long, default_value = "/dev/video0")]
    device: String,
}

#[derive(Debug, Serialize)]
struct DeviceReport {
    device: String,
    card: String,
    driver: String,
    bus_info: String,
    version: String,
    kind: String,
    capabilities: Vec<String>,
    queues: Vec<QueueReport>,
}

#[derive(Debug, Serialize)]
struct QueueReport {
    direction: String,
    pixel_format: String,
    width: u32,
    height: u32,
    bytes_per_line: u32,
    size_image: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    frame_rate: Option<f64>,
    #[serde(skip)]
    details: String,
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Executing info command: {:?}", args);

    let device = Device::open(&args.device, Capabilities::empty(), Capabilities::empty())?;
    let caps = device.capabilities();

    let mut queues = Vec::new();
    for direction in queue_directions(caps) {
        match query_queue(&device, direction) {
            Ok(queue) => queues.push(queue),
            Err(e) => log::warn!("Cannot read {} format: {}", direction, e),
        }
    }

    let info = device.info();
    let report = DeviceReport {
        device: args.device.clone(),
        card: device.card().to_string(),
        driver: device.driver_name().to_string(),
        bus_info: device.bus_info().to_string(),
        version: kernel_version(info.version),
        kind: device.kind().to_string(),
        capabilities: caps.iter_names().map(|(name, _)| name.to_string()).collect(),
        queues,
    };

    if json {
        let json_str = serde_json::to_string_pretty(&report)
            .map_err(|e| CliError::General(format!("Failed to serialize JSON: {}", e)))?;
        println!("{}", json_str);
    } else {
        print_text_info(&report);
    }

    Ok(())
}

/// Single-plane video queues the node exposes
fn queue_directions(caps: Capabilities) -> Vec<BufferDirection> {
    let mut directions = Vec::new();
    if caps.intersects(Capabilities::VIDEO_CAPTURE | Capabilities::VIDEO_M2M) {
        directions.push(BufferDirection::Capture);
    }
    if caps.intersects(Capabilities::VIDEO_OUTPUT | Capabilities::VIDEO_M2M) {
        directions.push(BufferDirection::Output);
    }
    directions
}

fn query_queue(
    device: &Device,
    direction: BufferDirection,
) -> Result<QueueReport, capstream::Error> {
    let fmt = format::current(device, direction)?;
    let fps = framerate::get(device, direction);
    Ok(QueueReport {
        direction: direction.to_string(),
        pixel_format: fmt.pixel_format().unwrap_or_default().to_string(),
        width: fmt.width().unwrap_or(0),
        height: fmt.height().unwrap_or(0),
        bytes_per_line: fmt.bytes_per_line().unwrap_or(0),
        size_image: fmt.size_image().unwrap_or(0),
        frame_rate: if fps.is_nan() { None } else { Some(fps) },
        details: diagnostics::describe_format(&fmt),
    })
}

/// KERNEL_VERSION(a, b, c) as "a.b.c"
fn kernel_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        (version >> 16) & 0xff,
        (version >> 8) & 0xff,
        version & 0xff
    )
}

fn print_text_info(report: &DeviceReport) {
    println!("Device: {}", report.device);
    println!("  Card:     {}", report.card);
    println!("  Driver:   {} ({})", report.driver, report.version);
    println!("  Bus:      {}", report.bus_info);
    println!("  Kind:     {}", report.kind);
    println!("  Capabilities: {}", report.capabilities.join(" "));

    for queue in &report.queues {
        println!();
        println!("  {} queue:", queue.direction);
        for line in queue.details.lines() {
            println!("    {}", line);
        }
        match queue.frame_rate {
            Some(fps) => println!("    framerate: {:.2} fps", fps),
            None => println!("    framerate: unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_version() {
        assert_eq!(kernel_version(0x0006_0800), "6.8.0");
        assert_eq!(kernel_version(0x0005_0f2a), "5.15.42");
    }

    #[test]
    fn test_queue_directions() {
        assert_eq!(
            queue_directions(Capabilities::VIDEO_CAPTURE | Capabilities::STREAMING),
            vec![BufferDirection::Capture]
        );
        assert_eq!(
            queue_directions(Capabilities::VIDEO_M2M | Capabilities::STREAMING),
            vec![BufferDirection::Capture, BufferDirection::Output]
        );
        assert!(queue_directions(Capabilities::VIDEO_CAPTURE_MPLANE).is_empty());
    }
}
