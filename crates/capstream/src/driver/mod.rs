// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Control-request transport
//!
//! The [`Driver`] trait is the seam between the protocol logic and the
//! kernel. Each method maps to one V4L2 request. Requests are passed as
//! immutable values and the driver's answer comes back as a separate value,
//! so callers can compare what they asked for with what they got instead of
//! relying on in-place mutation of a shared record.
//!
//! [`V4l2Driver`] implements the trait on top of a real device node. Any other
//! implementation (a simulated device in tests, a remote proxy) only has to
//! honour the same request/response contract.

use std::io;
use std::os::fd::{AsFd, OwnedFd, RawFd};
use std::time::Duration;

use crate::format::Format;
use crate::framerate::StreamParameters;
use crate::v4l2::{BufferDirection, BufferFlags, Capabilities, Field, MemoryKind};

mod kernel;

pub use kernel::V4l2Driver;

/// Identity and capabilities reported by `VIDIOC_QUERYCAP`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Kernel driver name (e.g. "uvcvideo")
    pub driver: String,
    /// Device display name
    pub card: String,
    /// Bus location (e.g. "usb-0000:00:14.0-1")
    pub bus_info: String,
    /// Driver version, `KERNEL_VERSION` encoded
    pub version: u32,
    /// Capabilities of the physical device as a whole
    pub capabilities: Capabilities,
    /// Capabilities of this device node, valid when `DEVICE_CAPS` is set
    pub device_caps: Capabilities,
}

impl DeviceInfo {
    /// Capabilities that apply to the opened node
    ///
    /// Drivers that expose several nodes for one device report per-node
    /// capabilities in `device_caps` and flag that with `DEVICE_CAPS`.
    pub fn node_capabilities(&self) -> Capabilities {
        if self.capabilities.contains(Capabilities::DEVICE_CAPS) {
            self.device_caps
        } else {
            self.capabilities
        }
    }
}

/// Per-buffer information reported by `VIDIOC_QUERYBUF`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub index: u32,
    pub direction: BufferDirection,
    pub memory: MemoryKind,
    /// Size of the buffer in bytes
    pub length: u32,
    /// Offset to pass to `mmap()` for MMAP buffers
    pub offset: u32,
    pub flags: BufferFlags,
}

/// Where the storage of a buffer being queued lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Driver-allocated memory, identified by the buffer index alone
    Mmap,
    /// Application memory at `address`
    UserPtr { address: usize, length: u32 },
    /// A DMA-BUF descriptor exported by another device
    DmaBuf(RawFd),
}

impl Location {
    /// Memory kind implied by this location
    pub fn memory(&self) -> MemoryKind {
        match self {
            Location::Mmap => MemoryKind::Mmap,
            Location::UserPtr { .. } => MemoryKind::UserPtr,
            Location::DmaBuf(_) => MemoryKind::DmaBuf,
        }
    }
}

/// A buffer handed to the driver with `VIDIOC_QBUF`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueRequest {
    pub direction: BufferDirection,
    pub index: u32,
    pub location: Location,
    /// Payload size, meaningful for output queues
    pub bytes_used: u32,
}

impl QueueRequest {
    pub fn memory(&self) -> MemoryKind {
        self.location.memory()
    }
}

/// A completed buffer returned by `VIDIOC_DQBUF`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    pub index: u32,
    pub direction: BufferDirection,
    pub memory: MemoryKind,
    /// Bytes of valid payload
    pub bytes_used: u32,
    pub flags: BufferFlags,
    pub field: Field,
    /// Capture (or presentation) time, usually on the monotonic clock
    pub timestamp: Duration,
    /// Frame counter maintained by the driver
    pub sequence: u32,
    /// Size of the buffer in bytes
    pub length: u32,
    /// `mmap()` offset, zero for non-MMAP buffers
    pub offset: u32,
}

/// Control-request transport to a V4L2 device
///
/// Every method is a synchronous request that either succeeds with the
/// driver-authoritative answer or fails with the system error code.
pub trait Driver: AsFd {
    /// `VIDIOC_QUERYCAP`
    fn query_capabilities(&self) -> io::Result<DeviceInfo>;

    /// `VIDIOC_G_FMT`
    fn get_format(&self, direction: BufferDirection) -> io::Result<Format>;

    /// `VIDIOC_S_FMT`, returns the format the driver settled on
    fn set_format(&self, request: &Format) -> io::Result<Format>;

    /// `VIDIOC_G_PARM`
    fn get_parameters(&self, direction: BufferDirection) -> io::Result<StreamParameters>;

    /// `VIDIOC_S_PARM`, returns the parameters the driver settled on
    fn set_parameters(&self, request: &StreamParameters) -> io::Result<StreamParameters>;

    /// `VIDIOC_REQBUFS`, returns the number of buffers granted
    ///
    /// A count of zero releases every buffer of the queue.
    fn request_buffers(
        &self,
        direction: BufferDirection,
        memory: MemoryKind,
        count: u32,
    ) -> io::Result<u32>;

    /// `VIDIOC_QUERYBUF`
    fn query_buffer(&self, direction: BufferDirection, index: u32) -> io::Result<BufferInfo>;

    /// `VIDIOC_EXPBUF`, the returned descriptor is owned by the caller
    fn export_buffer(&self, direction: BufferDirection, index: u32) -> io::Result<OwnedFd>;

    /// `VIDIOC_QBUF`
    fn queue_buffer(&self, request: &QueueRequest) -> io::Result<()>;

    /// `VIDIOC_DQBUF`, blocks until a buffer completes
    fn dequeue_buffer(
        &self,
        direction: BufferDirection,
        memory: MemoryKind,
    ) -> io::Result<DequeuedBuffer>;

    /// `VIDIOC_STREAMON`
    fn stream_on(&self, direction: BufferDirection) -> io::Result<()>;

    /// `VIDIOC_STREAMOFF`
    fn stream_off(&self, direction: BufferDirection) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_capabilities_prefers_device_caps() {
        let mut info = DeviceInfo {
            driver: "vivid".to_string(),
            card: "vivid".to_string(),
            bus_info: "platform:vivid-000".to_string(),
            version: 0,
            capabilities: Capabilities::VIDEO_CAPTURE
                | Capabilities::VIDEO_OUTPUT
                | Capabilities::STREAMING,
            device_caps: Capabilities::VIDEO_CAPTURE | Capabilities::STREAMING,
        };
        assert!(info
            .node_capabilities()
            .contains(Capabilities::VIDEO_OUTPUT));

        info.capabilities |= Capabilities::DEVICE_CAPS;
        assert!(!info
            .node_capabilities()
            .contains(Capabilities::VIDEO_OUTPUT));
    }
}
