// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Simulated V4L2 driver for integration tests
//!
//! Behaves like a single-queue capture driver built on videobuf2: buffers
//! live in an unlinked temporary file so the real `mmap()` path of the pool
//! is exercised, dequeue hands back queued buffers in FIFO order with a
//! pattern written into them, and the knobs in [`SimConfig`] make the driver
//! misbehave in the ways the negotiation code has to catch.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::fs::FileExt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use capstream::driver::{BufferInfo, DequeuedBuffer, DeviceInfo, Driver, Location, QueueRequest};
use capstream::format::{Format, FormatData};
use capstream::fourcc::FourCC;
use capstream::framerate::{Fraction, StreamParameters};
use capstream::v4l2::{BufferDirection, BufferFlags, Capabilities, Field, MemoryKind};
use nix::errno::Errno;

pub const PAGE: u32 = 4096;

/// Ways the simulated driver deviates from the request it is given
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub capabilities: Capabilities,
    /// Replace the requested frame size on S_FMT
    pub force_size: Option<(u32, u32)>,
    /// Replace the requested pixel encoding on S_FMT
    pub force_encoding: Option<FourCC>,
    /// Advertise V4L2_CAP_TIMEPERFRAME
    pub time_per_frame: bool,
    /// Store this interval instead of the requested one on S_PARM
    pub force_interval: Option<Fraction>,
    /// G_PARM fails with EIO
    pub fail_parameters: bool,
    /// Grant this many buffers instead of the requested count
    pub grant: Option<u32>,
    /// Fail EXPBUF for this index
    pub fail_export: Option<u32>,
    /// Fail QUERYBUF for this index
    pub fail_query: Option<u32>,
    /// Set V4L2_BUF_FLAG_ERROR on every dequeued buffer
    pub corrupt: bool,
    /// Report dequeued buffers this many slots past the completed one
    pub index_offset: u32,
    /// Complete buffers with bytesused = 0
    pub empty_payload: bool,
    /// Report a mmap offset off the page boundary for this index
    pub misalign: Option<u32>,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            capabilities: Capabilities::VIDEO_CAPTURE | Capabilities::STREAMING,
            force_size: None,
            force_encoding: None,
            time_per_frame: true,
            force_interval: None,
            fail_parameters: false,
            grant: None,
            fail_export: None,
            fail_query: None,
            corrupt: false,
            index_offset: 0,
            empty_payload: false,
            misalign: None,
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    formats: HashMap<BufferDirection, Format>,
    intervals: HashMap<BufferDirection, Fraction>,
    direction: Option<BufferDirection>,
    memory: Option<MemoryKind>,
    buffer_size: u32,
    allocated: u32,
    queued: VecDeque<u32>,
    streaming: bool,
    sequence: u32,
    /// Every REQBUFS count received, in order
    requests: Vec<u32>,
    stream_on_calls: u32,
}

/// In-process stand-in for a capture device node
#[derive(Debug)]
pub struct SimDriver {
    config: SimConfig,
    backing: File,
    state: Mutex<SimState>,
}

fn errno(err: Errno) -> io::Error {
    io::Error::from(err)
}

fn backing_file() -> File {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let path = std::env::temp_dir().join(format!(
        "capstream-sim-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(&path)
        .expect("create simulated buffer memory");
    std::fs::remove_file(&path).expect("unlink simulated buffer memory");
    file
}

impl SimDriver {
    pub fn new(config: SimConfig) -> Self {
        SimDriver {
            config,
            backing: backing_file(),
            state: Mutex::new(SimState::default()),
        }
    }

    pub fn capture() -> Self {
        Self::new(SimConfig::default())
    }

    /// Number of buffers the driver currently holds for the application
    pub fn allocated(&self) -> u32 {
        self.state.lock().unwrap().allocated
    }

    pub fn queued(&self) -> Vec<u32> {
        self.state.lock().unwrap().queued.iter().copied().collect()
    }

    pub fn requests(&self) -> Vec<u32> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn stream_on_calls(&self) -> u32 {
        self.state.lock().unwrap().stream_on_calls
    }

    pub fn is_streaming(&self) -> bool {
        self.state.lock().unwrap().streaming
    }

    pub fn buffer_size(&self) -> u32 {
        self.state.lock().unwrap().buffer_size
    }

    /// Byte pattern written into a buffer when it completes
    pub fn pattern(sequence: u32) -> u8 {
        (sequence % 251) as u8
    }

    fn negotiate(&self, request: &Format) -> io::Result<Format> {
        let data = match request.data() {
            FormatData::Pix(pix) => {
                let mut pix = *pix;
                if let Some((w, h)) = self.config.force_size {
                    pix.width = w;
                    pix.height = h;
                }
                if let Some(code) = self.config.force_encoding {
                    pix.pixel_format = code;
                }
                pix.field = Field::None;
                pix.bytes_per_line = pix.width * 2;
                pix.size_image = pix.bytes_per_line * pix.height;
                FormatData::Pix(pix)
            }
            _ => return Err(errno(Errno::EINVAL)),
        };
        Format::new(request.direction(), data).ok_or_else(|| errno(Errno::EINVAL))
    }
}

impl AsFd for SimDriver {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.backing.as_fd()
    }
}

impl Driver for SimDriver {
    fn query_capabilities(&self) -> io::Result<DeviceInfo> {
        Ok(DeviceInfo {
            driver: "capstream-sim".to_string(),
            card: "Simulated Camera".to_string(),
            bus_info: "platform:sim-0".to_string(),
            version: 0x0006_0800,
            capabilities: self.config.capabilities,
            device_caps: Capabilities::empty(),
        })
    }

    fn get_format(&self, direction: BufferDirection) -> io::Result<Format> {
        let state = self.state.lock().unwrap();
        match state.formats.get(&direction) {
            Some(format) => Ok(format.clone()),
            None => Format::video(direction, FourCC::YUYV, 1280, 720)
                .map_err(|_| errno(Errno::EINVAL)),
        }
    }

    fn set_format(&self, request: &Format) -> io::Result<Format> {
        let negotiated = self.negotiate(request)?;
        let mut state = self.state.lock().unwrap();
        if state.allocated > 0 {
            return Err(errno(Errno::EBUSY));
        }
        state
            .formats
            .insert(request.direction(), negotiated.clone());
        Ok(negotiated)
    }

    fn get_parameters(&self, direction: BufferDirection) -> io::Result<StreamParameters> {
        if self.config.fail_parameters {
            return Err(errno(Errno::EIO));
        }
        let state = self.state.lock().unwrap();
        Ok(StreamParameters {
            time_per_frame_supported: self.config.time_per_frame,
            time_per_frame: state
                .intervals
                .get(&direction)
                .copied()
                .unwrap_or(Fraction::per_second(30)),
            ..StreamParameters::empty(direction)
        })
    }

    fn set_parameters(&self, request: &StreamParameters) -> io::Result<StreamParameters> {
        let mut state = self.state.lock().unwrap();
        if self.config.time_per_frame {
            let interval = self.config.force_interval.unwrap_or(request.time_per_frame);
            state.intervals.insert(request.direction, interval);
        }
        drop(state);
        self.get_parameters(request.direction)
    }

    fn request_buffers(
        &self,
        direction: BufferDirection,
        memory: MemoryKind,
        count: u32,
    ) -> io::Result<u32> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(count);
        if state.streaming {
            return Err(errno(Errno::EBUSY));
        }
        if direction != BufferDirection::Capture {
            return Err(errno(Errno::EINVAL));
        }

        let granted = if count == 0 {
            0
        } else {
            self.config.grant.unwrap_or(count)
        };
        let size_image = state
            .formats
            .get(&direction)
            .and_then(Format::size_image)
            .unwrap_or(PAGE);
        let buffer_size = ((size_image + PAGE - 1) / PAGE).max(1) * PAGE;

        self.backing.set_len(u64::from(granted) * u64::from(buffer_size))?;
        state.direction = Some(direction);
        state.memory = Some(memory);
        state.buffer_size = buffer_size;
        state.allocated = granted;
        state.queued.clear();
        Ok(granted)
    }

    fn query_buffer(&self, direction: BufferDirection, index: u32) -> io::Result<BufferInfo> {
        let state = self.state.lock().unwrap();
        if Some(index) == self.config.fail_query
            || index >= state.allocated
            || state.direction != Some(direction)
        {
            return Err(errno(Errno::EINVAL));
        }
        let flags = if state.queued.contains(&index) {
            BufferFlags::QUEUED
        } else {
            BufferFlags::empty()
        };
        let mut offset = index * state.buffer_size;
        if Some(index) == self.config.misalign {
            offset += 1;
        }
        Ok(BufferInfo {
            index,
            direction,
            memory: state.memory.unwrap_or(MemoryKind::Mmap),
            length: state.buffer_size,
            offset,
            flags,
        })
    }

    fn export_buffer(&self, direction: BufferDirection, index: u32) -> io::Result<OwnedFd> {
        let state = self.state.lock().unwrap();
        if Some(index) == self.config.fail_export
            || index >= state.allocated
            || state.direction != Some(direction)
        {
            return Err(errno(Errno::EINVAL));
        }
        Ok(OwnedFd::from(self.backing.try_clone()?))
    }

    fn queue_buffer(&self, request: &QueueRequest) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if request.index >= state.allocated
            || state.direction != Some(request.direction)
            || state.memory != Some(request.memory())
            || state.queued.contains(&request.index)
        {
            return Err(errno(Errno::EINVAL));
        }
        if let Location::DmaBuf(fd) = request.location {
            if fd < 0 {
                return Err(errno(Errno::EBADF));
            }
        }
        state.queued.push_back(request.index);
        Ok(())
    }

    fn dequeue_buffer(
        &self,
        direction: BufferDirection,
        memory: MemoryKind,
    ) -> io::Result<DequeuedBuffer> {
        let mut state = self.state.lock().unwrap();
        if !state.streaming || state.direction != Some(direction) {
            return Err(errno(Errno::EINVAL));
        }
        // A real driver blocks here; nothing will ever complete
        let index = state.queued.pop_front().ok_or_else(|| errno(Errno::EAGAIN))?;

        let sequence = state.sequence;
        state.sequence += 1;
        let size = state.buffer_size;
        let offset = index * size;
        let fill = vec![Self::pattern(sequence); size as usize];
        self.backing.write_all_at(&fill, u64::from(offset))?;

        let mut flags = BufferFlags::DONE | BufferFlags::MAPPED;
        if self.config.corrupt {
            flags |= BufferFlags::ERROR;
        }
        Ok(DequeuedBuffer {
            index: index + self.config.index_offset,
            direction,
            memory,
            bytes_used: if self.config.empty_payload { 0 } else { size },
            flags,
            field: Field::None,
            timestamp: Duration::from_millis(33 * u64::from(sequence)),
            sequence,
            length: size,
            offset,
        })
    }

    fn stream_on(&self, direction: BufferDirection) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.allocated == 0 || state.direction != Some(direction) {
            return Err(errno(Errno::EINVAL));
        }
        state.stream_on_calls += 1;
        state.streaming = true;
        Ok(())
    }

    fn stream_off(&self, direction: BufferDirection) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.direction != Some(direction) {
            return Err(errno(Errno::EINVAL));
        }
        state.streaming = false;
        state.queued.clear();
        Ok(())
    }
}

/// Route library logs to the test harness
pub fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}
