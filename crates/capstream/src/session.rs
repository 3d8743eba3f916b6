// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Single-direction capture session
//!
//! [`Session`] runs the usual control flow for a camera in one call: open and
//! check the device, configure the format and frame rate, allocate and map a
//! pool, queue every buffer and start streaming. Frames are then read one at
//! a time; each [`Frame`] returns its buffer to the driver when released or
//! dropped.

use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use unix_ts::Timestamp;

use crate::device::Device;
use crate::driver::{DequeuedBuffer, Driver, V4l2Driver};
use crate::format::{self, Format};
use crate::fourcc::FourCC;
use crate::framerate;
use crate::pool::{BufferPool, Protection};
use crate::stream::Stream;
use crate::v4l2::{BufferDirection, BufferFlags, Capabilities, MemoryKind};
use crate::Error;

/// Parameters of a capture session
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    /// video device node
    device: PathBuf,

    /// requested frame width, the driver must accept it exactly
    width: u32,

    /// requested frame height, the driver must accept it exactly
    height: u32,

    /// requested pixel encoding
    format: FourCC,

    /// frames per second, None keeps the device default
    frame_rate: Option<u32>,

    /// number of driver buffers
    num_buffers: u32,
}

impl SessionBuilder {
    pub fn with_device(self, device: impl AsRef<Path>) -> SessionBuilder {
        SessionBuilder {
            device: device.as_ref().to_path_buf(),
            ..self
        }
    }

    pub fn with_resolution(self, width: u32, height: u32) -> SessionBuilder {
        SessionBuilder {
            width,
            height,
            ..self
        }
    }

    pub fn with_format(self, format: FourCC) -> SessionBuilder {
        SessionBuilder { format, ..self }
    }

    pub fn with_frame_rate(self, fps: u32) -> SessionBuilder {
        SessionBuilder {
            frame_rate: Some(fps),
            ..self
        }
    }

    pub fn with_buffers(self, num_buffers: u32) -> SessionBuilder {
        SessionBuilder {
            num_buffers,
            ..self
        }
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    /// Open the configured device node and start capturing
    pub fn open(self) -> Result<Session<V4l2Driver>, Error> {
        let device = Device::open(&self.device, Self::required(), Self::forbidden())?;
        self.start(device)
    }

    /// Start capturing on an already connected driver
    pub fn open_with<D: Driver>(self, driver: D) -> Result<Session<D>, Error> {
        let device = Device::with_driver(driver, Self::required(), Self::forbidden())?;
        self.start(device)
    }

    fn required() -> Capabilities {
        Capabilities::VIDEO_CAPTURE | Capabilities::STREAMING
    }

    // A memory-to-memory node also advertises capture, it is not a camera
    fn forbidden() -> Capabilities {
        Capabilities::VIDEO_M2M | Capabilities::VIDEO_M2M_MPLANE
    }

    fn start<D: Driver>(self, device: Device<D>) -> Result<Session<D>, Error> {
        let direction = BufferDirection::Capture;
        let format = format::configure(&device, direction, self.format, self.width, self.height)?;
        if let Some(fps) = self.frame_rate {
            framerate::set(&device, direction, fps)?;
        }

        let mut pool = BufferPool::request(&device, direction, self.num_buffers, MemoryKind::Mmap)?;
        pool.map(&device, Protection::Read)?;

        let mut stream = Stream::new(pool);
        for index in 0..stream.pool().count() {
            stream.enqueue(&device, index)?;
        }
        stream.stream_on(&device)?;

        debug!(
            "Session on {} started: {}x{} {}, {} buffers",
            device,
            self.width,
            self.height,
            self.format,
            self.num_buffers
        );
        Ok(Session {
            device,
            stream,
            format,
        })
    }
}

impl Default for SessionBuilder {
    fn default() -> SessionBuilder {
        SessionBuilder {
            device: PathBuf::from("/dev/video0"),
            width: 1280,
            height: 720,
            format: FourCC::YUYV,
            frame_rate: None,
            num_buffers: 4,
        }
    }
}

/// A running capture stream
#[derive(Debug)]
pub struct Session<D: Driver = V4l2Driver> {
    device: Device<D>,
    stream: Stream,
    format: Format,
}

impl Session<V4l2Driver> {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }
}

impl<D: Driver> Session<D> {
    /// Wait for the next frame
    pub fn read(&mut self) -> Result<Frame<'_, D>, Error> {
        let buffer = self.stream.dequeue(&self.device)?;
        if buffer.flags.contains(BufferFlags::ERROR) {
            warn!(
                "{} buffer #{} (sequence {}) flagged as corrupted",
                self.device, buffer.index, buffer.sequence
            );
        }
        Ok(Frame {
            session: self,
            buffer,
            released: false,
        })
    }

    /// Stop streaming; queued buffers are returned by the driver
    pub fn stop(&mut self) -> Result<(), Error> {
        if self.stream.is_streaming() {
            self.stream.stream_off(&self.device)?;
        }
        Ok(())
    }

    pub fn device(&self) -> &Device<D> {
        &self.device
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    /// Negotiated format, including stride and image size
    pub fn format(&self) -> &Format {
        &self.format
    }

    pub fn width(&self) -> u32 {
        self.format.width().unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.format.height().unwrap_or(0)
    }

    pub fn pixel_format(&self) -> FourCC {
        self.format.pixel_format().unwrap_or_default()
    }

    /// Current frame rate, `NaN` when the device cannot report it
    pub fn frame_rate(&self) -> f64 {
        framerate::get(&self.device, BufferDirection::Capture)
    }
}

impl<D: Driver> Drop for Session<D> {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!("Cannot stop {} stream: {}", self.device, err);
        }
    }
}

/// A captured frame, requeued when released or dropped
pub struct Frame<'s, D: Driver = V4l2Driver> {
    session: &'s mut Session<D>,
    buffer: DequeuedBuffer,
    released: bool,
}

impl<D: Driver> Frame<'_, D> {
    /// Frame payload, `bytes_used` bytes of the mapped buffer
    ///
    /// Empty when the driver completed the buffer without data.
    pub fn data(&self) -> &[u8] {
        match self.session.stream.data(self.buffer.index) {
            Ok(data) => &data[..data.len().min(self.buffer.bytes_used as usize)],
            Err(_) => &[],
        }
    }

    pub fn index(&self) -> u32 {
        self.buffer.index
    }

    pub fn sequence(&self) -> u32 {
        self.buffer.sequence
    }

    pub fn bytes_used(&self) -> u32 {
        self.buffer.bytes_used
    }

    pub fn flags(&self) -> BufferFlags {
        self.buffer.flags
    }

    /// Whether the driver flagged the data as possibly corrupted
    pub fn is_error(&self) -> bool {
        self.buffer.flags.contains(BufferFlags::ERROR)
    }

    pub fn width(&self) -> u32 {
        self.session.width()
    }

    pub fn height(&self) -> u32 {
        self.session.height()
    }

    pub fn format(&self) -> FourCC {
        self.session.pixel_format()
    }

    /// Driver timestamp of the frame
    pub fn timestamp(&self) -> Timestamp {
        let ts = self.buffer.timestamp;
        Timestamp::new(ts.as_secs() as i64, ts.subsec_nanos())
    }

    /// Everything the driver reported on dequeue
    pub fn buffer(&self) -> &DequeuedBuffer {
        &self.buffer
    }

    /// Hand the buffer back to the driver
    pub fn release(mut self) -> Result<(), Error> {
        self.released = true;
        self.session
            .stream
            .enqueue(&self.session.device, self.buffer.index)
    }
}

impl<D: Driver> Drop for Frame<'_, D> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self
            .session
            .stream
            .enqueue(&self.session.device, self.buffer.index)
        {
            warn!("Cannot requeue buffer #{}: {}", self.buffer.index, err);
        }
    }
}

impl<D: Driver> fmt::Display for Frame<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}x{} {} #{} seq:{} bytes:{}",
            self.width(),
            self.height(),
            self.format(),
            self.buffer.index,
            self.buffer.sequence,
            self.buffer.bytes_used
        )
    }
}
