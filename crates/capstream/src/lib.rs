// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! capstream - V4L2 streaming control for Rust
//!
//! A driver-facing control layer for memory-mapped video capture and output
//! devices. It negotiates device capabilities, pixel format and frame rate,
//! allocates buffer pools shared with the driver, and drives the
//! queue/dequeue ownership protocol while a stream is running.
//!
//! Every operation returns a typed [`Error`]; nothing in this crate retries,
//! degrades silently or terminates the process. The only tolerated failures
//! are frame-rate related: a device without frame interval support only logs
//! a warning, and a failed frame-rate read reports `NaN`.
//!
//! # Quick Start
//!
//! ## Capturing with a session
//!
//! ```no_run
//! use capstream::fourcc::FourCC;
//! use capstream::session::Session;
//!
//! let mut session = Session::builder()
//!     .with_device("/dev/video0")
//!     .with_resolution(640, 480)
//!     .with_format(FourCC::YUYV)
//!     .with_buffers(4)
//!     .open()?;
//!
//! let frame = session.read()?;
//! println!("frame #{}: {} bytes", frame.sequence(), frame.data().len());
//! frame.release()?;
//! # Ok::<(), capstream::Error>(())
//! ```
//!
//! ## Driving the protocol directly
//!
//! ```no_run
//! use capstream::device::Device;
//! use capstream::fourcc::FourCC;
//! use capstream::pool::{BufferPool, Protection};
//! use capstream::stream::Stream;
//! use capstream::v4l2::{BufferDirection, Capabilities, MemoryKind};
//! use capstream::{format, framerate};
//!
//! let device = Device::open(
//!     "/dev/video0",
//!     Capabilities::VIDEO_CAPTURE | Capabilities::STREAMING,
//!     Capabilities::VIDEO_M2M,
//! )?;
//! let dir = BufferDirection::Capture;
//! format::configure(&device, dir, FourCC::YUYV, 640, 480)?;
//! framerate::set(&device, dir, 30)?;
//!
//! let mut pool = BufferPool::request(&device, dir, 4, MemoryKind::Mmap)?;
//! pool.map(&device, Protection::Read)?;
//!
//! let mut stream = Stream::new(pool);
//! for index in 0..stream.pool().count() {
//!     stream.enqueue(&device, index)?;
//! }
//! stream.stream_on(&device)?;
//!
//! let done = stream.dequeue(&device)?;
//! let bytes = stream.data(done.index)?;
//! println!("{} bytes captured", bytes.len().min(done.bytes_used as usize));
//! stream.enqueue(&device, done.index)?;
//! # Ok::<(), capstream::Error>(())
//! ```
//!
//! # Buffer Ownership
//!
//! Each buffer of a pool is in exactly one [`BufferState`](pool::BufferState):
//!
//! | State | Owner | Reached by |
//! |-------|-------|------------|
//! | `Free` | Application | Allocation, `stream_off` |
//! | `Queued` | Driver | `enqueue` |
//! | `Ready` | Application | `dequeue` |
//!
//! Mapped memory is only reachable while a buffer is not queued.

use std::{error, fmt, io, path::PathBuf};

use crate::fourcc::FourCC;
use crate::framerate::Fraction;
use crate::pool::BufferState;
use crate::v4l2::{BufferDirection, Capabilities, MemoryKind};

/// Error type for capstream operations
#[derive(Debug)]
pub enum Error {
    /// The device node could not be opened
    Open { path: PathBuf, source: io::Error },

    /// The path exists but is not a character device
    NotCharDevice(PathBuf),

    /// `VIDIOC_QUERYCAP` failed
    QueryCapabilities { device: String, source: io::Error },

    /// A required capability is absent or a forbidden one is present
    CapabilityMismatch {
        device: String,
        missing: Capabilities,
        forbidden: Capabilities,
    },

    /// `VIDIOC_G_FMT` failed
    GetFormat {
        direction: BufferDirection,
        source: io::Error,
    },

    /// `VIDIOC_S_FMT` was rejected by the driver
    SetFormat {
        direction: BufferDirection,
        source: io::Error,
    },

    /// The driver accepted the format but changed the frame size
    SizeMismatch {
        direction: BufferDirection,
        requested: (u32, u32),
        negotiated: (u32, u32),
    },

    /// The driver accepted the format but changed the pixel encoding
    EncodingMismatch {
        direction: BufferDirection,
        requested: FourCC,
        negotiated: FourCC,
    },

    /// `VIDIOC_G_PARM` failed
    GetParameters {
        direction: BufferDirection,
        source: io::Error,
    },

    /// `VIDIOC_S_PARM` was rejected by the driver
    SetParameters {
        direction: BufferDirection,
        source: io::Error,
    },

    /// The confirmed frame interval differs from the requested one
    FrameRateRejected {
        direction: BufferDirection,
        requested: Fraction,
        confirmed: Fraction,
    },

    /// A frame rate of zero was requested
    InvalidFrameRate(u32),

    /// `VIDIOC_REQBUFS` failed
    RequestBuffers {
        direction: BufferDirection,
        source: io::Error,
    },

    /// The driver granted no buffers at all
    NoBuffers { direction: BufferDirection },

    /// The driver granted a different number of buffers than requested
    CountMismatch {
        direction: BufferDirection,
        requested: u32,
        granted: u32,
    },

    /// A pool of zero buffers was requested
    InvalidBufferCount(u32),

    /// `VIDIOC_QUERYBUF` failed
    QueryBuffer {
        direction: BufferDirection,
        index: u32,
        source: io::Error,
    },

    /// `mmap()` of a driver buffer failed
    MapBuffer {
        direction: BufferDirection,
        index: u32,
        source: io::Error,
    },

    /// `VIDIOC_EXPBUF` failed
    ExportBuffer {
        direction: BufferDirection,
        index: u32,
        source: io::Error,
    },

    /// `VIDIOC_QBUF` was rejected by the driver
    Enqueue {
        direction: BufferDirection,
        index: u32,
        source: io::Error,
    },

    /// `VIDIOC_DQBUF` failed
    Dequeue {
        direction: BufferDirection,
        source: io::Error,
    },

    /// `VIDIOC_STREAMON` failed
    StreamOn {
        direction: BufferDirection,
        source: io::Error,
    },

    /// `VIDIOC_STREAMOFF` failed
    StreamOff {
        direction: BufferDirection,
        source: io::Error,
    },

    /// A buffer index outside the pool
    IndexOutOfRange { index: u32, count: u32 },

    /// The buffer is not in a state that allows the operation
    InvalidState {
        index: u32,
        state: BufferState,
        operation: &'static str,
    },

    /// The operation has no meaning for this buffer direction
    UnsupportedDirection {
        direction: BufferDirection,
        operation: &'static str,
    },

    /// The operation has no meaning for this memory kind
    UnsupportedMemory {
        memory: MemoryKind,
        operation: &'static str,
    },
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A system call failed; the error carries the errno
    Io,
    /// The driver reported success with values that contradict the request
    Protocol,
    /// The device does not offer what the caller needs
    Capability,
    /// The caller broke a precondition of the operation
    Precondition,
}

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Open { .. }
            | Error::QueryCapabilities { .. }
            | Error::GetFormat { .. }
            | Error::SetFormat { .. }
            | Error::GetParameters { .. }
            | Error::SetParameters { .. }
            | Error::RequestBuffers { .. }
            | Error::QueryBuffer { .. }
            | Error::MapBuffer { .. }
            | Error::ExportBuffer { .. }
            | Error::Enqueue { .. }
            | Error::Dequeue { .. }
            | Error::StreamOn { .. }
            | Error::StreamOff { .. } => ErrorKind::Io,

            Error::SizeMismatch { .. }
            | Error::EncodingMismatch { .. }
            | Error::FrameRateRejected { .. }
            | Error::NoBuffers { .. }
            | Error::CountMismatch { .. } => ErrorKind::Protocol,

            Error::NotCharDevice(_)
            | Error::CapabilityMismatch { .. }
            | Error::UnsupportedDirection { .. }
            | Error::UnsupportedMemory { .. } => ErrorKind::Capability,

            Error::InvalidFrameRate(_)
            | Error::InvalidBufferCount(_)
            | Error::IndexOutOfRange { .. }
            | Error::InvalidState { .. } => ErrorKind::Precondition,
        }
    }

    /// The underlying I/O error, if the failure came from a system call
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            Error::Open { source, .. }
            | Error::QueryCapabilities { source, .. }
            | Error::GetFormat { source, .. }
            | Error::SetFormat { source, .. }
            | Error::GetParameters { source, .. }
            | Error::SetParameters { source, .. }
            | Error::RequestBuffers { source, .. }
            | Error::QueryBuffer { source, .. }
            | Error::MapBuffer { source, .. }
            | Error::ExportBuffer { source, .. }
            | Error::Enqueue { source, .. }
            | Error::Dequeue { source, .. }
            | Error::StreamOn { source, .. }
            | Error::StreamOff { source, .. } => Some(source),
            _ => None,
        }
    }

    /// The errno of the failed system call, if any
    pub fn raw_os_error(&self) -> Option<i32> {
        self.io_error().and_then(io::Error::raw_os_error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Open { path, source } => {
                write!(f, "cannot open {}: {}", path.display(), source)
            }
            Error::NotCharDevice(path) => {
                write!(f, "{} is not a character device", path.display())
            }
            Error::QueryCapabilities { device, source } => {
                write!(f, "cannot query capabilities of {}: {}", device, source)
            }
            Error::CapabilityMismatch {
                device,
                missing,
                forbidden,
            } => {
                write!(f, "device {} capability mismatch", device)?;
                if !missing.is_empty() {
                    write!(f, ", missing required: {}", missing)?;
                }
                if !forbidden.is_empty() {
                    write!(f, ", has unsupported: {}", forbidden)?;
                }
                Ok(())
            }
            Error::GetFormat { direction, source } => {
                write!(f, "cannot get {} format: {}", direction, source)
            }
            Error::SetFormat { direction, source } => {
                write!(f, "cannot set {} format: {}", direction, source)
            }
            Error::SizeMismatch {
                direction,
                requested,
                negotiated,
            } => write!(
                f,
                "cannot set requested {} size {}x{}, driver chose {}x{}",
                direction, requested.0, requested.1, negotiated.0, negotiated.1
            ),
            Error::EncodingMismatch {
                direction,
                requested,
                negotiated,
            } => write!(
                f,
                "cannot set requested {} pixel format {}, driver chose {}",
                direction, requested, negotiated
            ),
            Error::GetParameters { direction, source } => {
                write!(f, "cannot get {} streaming parameters: {}", direction, source)
            }
            Error::SetParameters { direction, source } => {
                write!(f, "cannot set {} streaming parameters: {}", direction, source)
            }
            Error::FrameRateRejected {
                direction,
                requested,
                confirmed,
            } => write!(
                f,
                "{} failed to set requested frame interval {}, driver reports {}",
                direction, requested, confirmed
            ),
            Error::InvalidFrameRate(fps) => write!(f, "invalid frame rate: {} fps", fps),
            Error::RequestBuffers { direction, source } => {
                write!(f, "cannot request {} buffers: {}", direction, source)
            }
            Error::NoBuffers { direction } => {
                write!(f, "device gives zero {} buffers", direction)
            }
            Error::CountMismatch {
                direction,
                requested,
                granted,
            } => write!(
                f,
                "device gives {} {} buffers, but {} is requested",
                granted, direction, requested
            ),
            Error::InvalidBufferCount(count) => {
                write!(f, "invalid buffer count: {}", count)
            }
            Error::QueryBuffer {
                direction,
                index,
                source,
            } => write!(f, "cannot query {} buffer #{}: {}", direction, index, source),
            Error::MapBuffer {
                direction,
                index,
                source,
            } => write!(f, "cannot mmap {} buffer #{}: {}", direction, index, source),
            Error::ExportBuffer {
                direction,
                index,
                source,
            } => write!(f, "cannot export {} buffer #{}: {}", direction, index, source),
            Error::Enqueue {
                direction,
                index,
                source,
            } => write!(f, "cannot enqueue {} buffer #{}: {}", direction, index, source),
            Error::Dequeue { direction, source } => {
                write!(f, "cannot dequeue {} buffer: {}", direction, source)
            }
            Error::StreamOn { direction, source } => {
                write!(f, "failed to start {} stream: {}", direction, source)
            }
            Error::StreamOff { direction, source } => {
                write!(f, "failed to stop {} stream: {}", direction, source)
            }
            Error::IndexOutOfRange { index, count } => {
                write!(f, "buffer index {} out of range (pool of {})", index, count)
            }
            Error::InvalidState {
                index,
                state,
                operation,
            } => write!(f, "cannot {} buffer #{} while {}", operation, index, state),
            Error::UnsupportedDirection {
                direction,
                operation,
            } => write!(f, "cannot {} on {} buffers", operation, direction),
            Error::UnsupportedMemory { memory, operation } => {
                write!(f, "cannot {} {} buffers", operation, memory)
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.io_error()
            .map(|err| err as &(dyn error::Error + 'static))
    }
}

/// The fourcc module provides portable handling of fourcc codes.
pub mod fourcc;

/// The v4l2 module provides the typed kernel enumerations and capability flags.
pub mod v4l2;

/// The driver module provides the control-request transport.
pub mod driver;

/// The device module provides the open device handle.
pub mod device;

/// The format module negotiates pixel format and frame size.
pub mod format;

/// The framerate module negotiates the frame interval.
pub mod framerate;

/// The pool module allocates and maps driver buffers.
pub mod pool;

/// The stream module drives the buffer ownership protocol.
pub mod stream;

/// The session module runs the whole capture control flow.
pub mod session;

/// The diagnostics module renders kernel records for logs.
pub mod diagnostics;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        let err = Error::NoBuffers {
            direction: BufferDirection::Capture,
        };
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.to_string(), "device gives zero vid-cap buffers");

        let err = Error::Dequeue {
            direction: BufferDirection::Capture,
            source: io::Error::from_raw_os_error(5),
        };
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.raw_os_error(), Some(5));
        assert!(error::Error::source(&err).is_some());
    }

    #[test]
    fn test_capability_mismatch_display() {
        let err = Error::CapabilityMismatch {
            device: "/dev/video9".to_string(),
            missing: Capabilities::STREAMING,
            forbidden: Capabilities::empty(),
        };
        assert_eq!(err.kind(), ErrorKind::Capability);
        assert_eq!(
            err.to_string(),
            "device /dev/video9 capability mismatch, missing required: 0x04000000 (STREAMING)"
        );
    }

    #[test]
    fn test_system_call_errors_carry_context() {
        let err = Error::Enqueue {
            direction: BufferDirection::Output,
            index: 3,
            source: io::Error::from_raw_os_error(22),
        };
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.raw_os_error(), Some(22));
        assert!(err.to_string().starts_with("cannot enqueue vid-out buffer #3: "));

        let source = error::Error::source(&err).unwrap();
        let io_err = source.downcast_ref::<io::Error>().unwrap();
        assert_eq!(io_err.raw_os_error(), Some(22));

        // Precondition failures have no system call behind them
        let err = Error::IndexOutOfRange { index: 4, count: 4 };
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert!(err.io_error().is_none());
        assert!(error::Error::source(&err).is_none());
    }
}
