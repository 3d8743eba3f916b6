// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! V4L2 enumerations and capability flags
//!
//! This module defines the typed counterparts of the raw kernel enums:
//!
//! - [`BufferDirection`] - Which queue a buffer or format belongs to
//! - [`MemoryKind`] - How a buffer's storage is provided (MMAP, USERPTR, DMABUF)
//! - [`Field`] - Interlacing field order
//! - [`Capabilities`] - Device capability bitset reported by `VIDIOC_QUERYCAP`

use std::fmt;

use crate::diagnostics;
use bitflags::bitflags;
use capstream_sys as ffi;

/// V4L2 buffer type
///
/// Selects the queue a request addresses and, for formats and streaming
/// parameters, which sub-record of the kernel union is meaningful.
///
/// # Example
///
/// ```
/// use capstream::v4l2::BufferDirection;
///
/// let dir = BufferDirection::from_raw(1).unwrap();
/// assert_eq!(dir, BufferDirection::Capture);
/// assert_eq!(dir.to_string(), "vid-cap");
/// assert!(!dir.is_output());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BufferDirection {
    /// Single-planar video capture
    Capture = ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE,
    /// Single-planar video output
    Output = ffi::V4L2_BUF_TYPE_VIDEO_OUTPUT,
    /// Video overlay
    Overlay = ffi::V4L2_BUF_TYPE_VIDEO_OVERLAY,
    /// Raw VBI capture
    VbiCapture = ffi::V4L2_BUF_TYPE_VBI_CAPTURE,
    /// Raw VBI output
    VbiOutput = ffi::V4L2_BUF_TYPE_VBI_OUTPUT,
    /// Sliced VBI capture
    SlicedVbiCapture = ffi::V4L2_BUF_TYPE_SLICED_VBI_CAPTURE,
    /// Sliced VBI output
    SlicedVbiOutput = ffi::V4L2_BUF_TYPE_SLICED_VBI_OUTPUT,
    /// Video output overlay
    OutputOverlay = ffi::V4L2_BUF_TYPE_VIDEO_OUTPUT_OVERLAY,
    /// Multi-planar video capture
    CaptureMplane = ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE,
    /// Multi-planar video output
    OutputMplane = ffi::V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE,
    /// Software defined radio capture
    SdrCapture = ffi::V4L2_BUF_TYPE_SDR_CAPTURE,
    /// Software defined radio output
    SdrOutput = ffi::V4L2_BUF_TYPE_SDR_OUTPUT,
    /// Metadata capture
    MetaCapture = ffi::V4L2_BUF_TYPE_META_CAPTURE,
    /// Metadata output
    MetaOutput = ffi::V4L2_BUF_TYPE_META_OUTPUT,
}

impl BufferDirection {
    /// Convert from the raw `enum v4l2_buf_type` value
    ///
    /// Returns `None` for values the kernel ABI does not define.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE => Some(BufferDirection::Capture),
            ffi::V4L2_BUF_TYPE_VIDEO_OUTPUT => Some(BufferDirection::Output),
            ffi::V4L2_BUF_TYPE_VIDEO_OVERLAY => Some(BufferDirection::Overlay),
            ffi::V4L2_BUF_TYPE_VBI_CAPTURE => Some(BufferDirection::VbiCapture),
            ffi::V4L2_BUF_TYPE_VBI_OUTPUT => Some(BufferDirection::VbiOutput),
            ffi::V4L2_BUF_TYPE_SLICED_VBI_CAPTURE => Some(BufferDirection::SlicedVbiCapture),
            ffi::V4L2_BUF_TYPE_SLICED_VBI_OUTPUT => Some(BufferDirection::SlicedVbiOutput),
            ffi::V4L2_BUF_TYPE_VIDEO_OUTPUT_OVERLAY => Some(BufferDirection::OutputOverlay),
            ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE => Some(BufferDirection::CaptureMplane),
            ffi::V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE => Some(BufferDirection::OutputMplane),
            ffi::V4L2_BUF_TYPE_SDR_CAPTURE => Some(BufferDirection::SdrCapture),
            ffi::V4L2_BUF_TYPE_SDR_OUTPUT => Some(BufferDirection::SdrOutput),
            ffi::V4L2_BUF_TYPE_META_CAPTURE => Some(BufferDirection::MetaCapture),
            ffi::V4L2_BUF_TYPE_META_OUTPUT => Some(BufferDirection::MetaOutput),
            _ => None,
        }
    }

    /// Raw `enum v4l2_buf_type` value
    pub fn as_raw(self) -> u32 {
        self as u32
    }

    /// Whether the application produces data on this queue
    ///
    /// Matches the kernel's `V4L2_TYPE_IS_OUTPUT()`, which also counts the
    /// video overlay queue as an output.
    pub fn is_output(self) -> bool {
        matches!(
            self,
            BufferDirection::Output
                | BufferDirection::OutputMplane
                | BufferDirection::Overlay
                | BufferDirection::OutputOverlay
                | BufferDirection::VbiOutput
                | BufferDirection::SlicedVbiOutput
                | BufferDirection::SdrOutput
                | BufferDirection::MetaOutput
        )
    }

    /// Whether buffers on this queue use the multi-planar API
    pub fn is_multiplanar(self) -> bool {
        matches!(
            self,
            BufferDirection::CaptureMplane | BufferDirection::OutputMplane
        )
    }

    /// Whether this queue carries video frames with a pixel format
    pub fn is_video(self) -> bool {
        matches!(
            self,
            BufferDirection::Capture
                | BufferDirection::Output
                | BufferDirection::CaptureMplane
                | BufferDirection::OutputMplane
        )
    }

    /// Short name as used by v4l2-ctl ("vid-cap", "vid-out-mplane", ...)
    pub fn name(self) -> &'static str {
        diagnostics::type_name(self.as_raw())
    }
}

impl fmt::Display for BufferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// V4L2 buffer memory kind
///
/// | Kind | Storage owner | Application access |
/// |------|---------------|--------------------|
/// | [`MemoryKind::Mmap`] | Driver | `mmap()` or `VIDIOC_EXPBUF` |
/// | [`MemoryKind::UserPtr`] | Application | Pointer passed on queue |
/// | [`MemoryKind::Overlay`] | Overlay surface | None |
/// | [`MemoryKind::DmaBuf`] | Another device | DMA-BUF fd passed on queue |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MemoryKind {
    /// Driver-allocated, memory-mapped buffers
    Mmap = ffi::V4L2_MEMORY_MMAP,
    /// Application-allocated buffers passed by pointer
    UserPtr = ffi::V4L2_MEMORY_USERPTR,
    /// Video overlay surface
    Overlay = ffi::V4L2_MEMORY_OVERLAY,
    /// Imported DMA buffer file descriptors
    DmaBuf = ffi::V4L2_MEMORY_DMABUF,
}

impl MemoryKind {
    /// Convert from the raw `enum v4l2_memory` value
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            ffi::V4L2_MEMORY_MMAP => Some(MemoryKind::Mmap),
            ffi::V4L2_MEMORY_USERPTR => Some(MemoryKind::UserPtr),
            ffi::V4L2_MEMORY_OVERLAY => Some(MemoryKind::Overlay),
            ffi::V4L2_MEMORY_DMABUF => Some(MemoryKind::DmaBuf),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(diagnostics::memory_name(self.as_raw()))
    }
}

/// Field order of a video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum Field {
    /// Driver chooses
    #[default]
    Any = ffi::V4L2_FIELD_ANY,
    /// Progressive
    None = ffi::V4L2_FIELD_NONE,
    Top = ffi::V4L2_FIELD_TOP,
    Bottom = ffi::V4L2_FIELD_BOTTOM,
    Interlaced = ffi::V4L2_FIELD_INTERLACED,
    SeqTb = ffi::V4L2_FIELD_SEQ_TB,
    SeqBt = ffi::V4L2_FIELD_SEQ_BT,
    Alternate = ffi::V4L2_FIELD_ALTERNATE,
    InterlacedTb = ffi::V4L2_FIELD_INTERLACED_TB,
    InterlacedBt = ffi::V4L2_FIELD_INTERLACED_BT,
}

impl Field {
    /// Convert from the raw `enum v4l2_field` value
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            ffi::V4L2_FIELD_ANY => Some(Field::Any),
            ffi::V4L2_FIELD_NONE => Some(Field::None),
            ffi::V4L2_FIELD_TOP => Some(Field::Top),
            ffi::V4L2_FIELD_BOTTOM => Some(Field::Bottom),
            ffi::V4L2_FIELD_INTERLACED => Some(Field::Interlaced),
            ffi::V4L2_FIELD_SEQ_TB => Some(Field::SeqTb),
            ffi::V4L2_FIELD_SEQ_BT => Some(Field::SeqBt),
            ffi::V4L2_FIELD_ALTERNATE => Some(Field::Alternate),
            ffi::V4L2_FIELD_INTERLACED_TB => Some(Field::InterlacedTb),
            ffi::V4L2_FIELD_INTERLACED_BT => Some(Field::InterlacedBt),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(diagnostics::field_name(self.as_raw()))
    }
}

bitflags! {
    /// Device capability bitset reported by `VIDIOC_QUERYCAP`
    ///
    /// Used by [`Device::open`](crate::device::Device::open) to require or
    /// forbid features before a device is accepted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        const VIDEO_CAPTURE = ffi::V4L2_CAP_VIDEO_CAPTURE;
        const VIDEO_OUTPUT = ffi::V4L2_CAP_VIDEO_OUTPUT;
        const VIDEO_OVERLAY = ffi::V4L2_CAP_VIDEO_OVERLAY;
        const VBI_CAPTURE = ffi::V4L2_CAP_VBI_CAPTURE;
        const VBI_OUTPUT = ffi::V4L2_CAP_VBI_OUTPUT;
        const SLICED_VBI_CAPTURE = ffi::V4L2_CAP_SLICED_VBI_CAPTURE;
        const SLICED_VBI_OUTPUT = ffi::V4L2_CAP_SLICED_VBI_OUTPUT;
        const RDS_CAPTURE = ffi::V4L2_CAP_RDS_CAPTURE;
        const VIDEO_OUTPUT_OVERLAY = ffi::V4L2_CAP_VIDEO_OUTPUT_OVERLAY;
        const HW_FREQ_SEEK = ffi::V4L2_CAP_HW_FREQ_SEEK;
        const RDS_OUTPUT = ffi::V4L2_CAP_RDS_OUTPUT;
        const VIDEO_CAPTURE_MPLANE = ffi::V4L2_CAP_VIDEO_CAPTURE_MPLANE;
        const VIDEO_OUTPUT_MPLANE = ffi::V4L2_CAP_VIDEO_OUTPUT_MPLANE;
        const VIDEO_M2M_MPLANE = ffi::V4L2_CAP_VIDEO_M2M_MPLANE;
        const VIDEO_M2M = ffi::V4L2_CAP_VIDEO_M2M;
        const TUNER = ffi::V4L2_CAP_TUNER;
        const AUDIO = ffi::V4L2_CAP_AUDIO;
        const RADIO = ffi::V4L2_CAP_RADIO;
        const MODULATOR = ffi::V4L2_CAP_MODULATOR;
        const SDR_CAPTURE = ffi::V4L2_CAP_SDR_CAPTURE;
        const EXT_PIX_FORMAT = ffi::V4L2_CAP_EXT_PIX_FORMAT;
        const SDR_OUTPUT = ffi::V4L2_CAP_SDR_OUTPUT;
        const META_CAPTURE = ffi::V4L2_CAP_META_CAPTURE;
        const READWRITE = ffi::V4L2_CAP_READWRITE;
        const STREAMING = ffi::V4L2_CAP_STREAMING;
        const META_OUTPUT = ffi::V4L2_CAP_META_OUTPUT;
        const TOUCH = ffi::V4L2_CAP_TOUCH;
        const IO_MC = ffi::V4L2_CAP_IO_MC;
        const DEVICE_CAPS = ffi::V4L2_CAP_DEVICE_CAPS;

        // Bits added by newer kernels are kept rather than dropped
        const _ = !0;
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.bits())?;
        let mut names = self.iter_names().map(|(name, _)| name).peekable();
        if names.peek().is_some() {
            f.write_str(" (")?;
            for (i, name) in names.enumerate() {
                if i > 0 {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

bitflags! {
    /// Per-buffer flags reported on dequeue
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferFlags: u32 {
        const MAPPED = ffi::V4L2_BUF_FLAG_MAPPED;
        const QUEUED = ffi::V4L2_BUF_FLAG_QUEUED;
        const DONE = ffi::V4L2_BUF_FLAG_DONE;
        const KEYFRAME = ffi::V4L2_BUF_FLAG_KEYFRAME;
        const PFRAME = ffi::V4L2_BUF_FLAG_PFRAME;
        const BFRAME = ffi::V4L2_BUF_FLAG_BFRAME;
        /// Data may be corrupted, the buffer is still returned
        const ERROR = ffi::V4L2_BUF_FLAG_ERROR;
        const TIMECODE = ffi::V4L2_BUF_FLAG_TIMECODE;
        const PREPARED = ffi::V4L2_BUF_FLAG_PREPARED;
        /// Last buffer produced before the driver stopped
        const LAST = ffi::V4L2_BUF_FLAG_LAST;

        const _ = !0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_round_trip_raw() {
        for raw in 1..=14 {
            let dir = BufferDirection::from_raw(raw).unwrap();
            assert_eq!(dir.as_raw(), raw);
        }
        assert_eq!(BufferDirection::from_raw(0), None);
        assert_eq!(BufferDirection::from_raw(15), None);
    }

    #[test]
    fn test_direction_classification() {
        assert!(BufferDirection::Output.is_output());
        assert!(BufferDirection::Overlay.is_output());
        assert!(!BufferDirection::CaptureMplane.is_output());
        assert!(BufferDirection::CaptureMplane.is_multiplanar());
        assert!(!BufferDirection::Capture.is_multiplanar());
        assert!(BufferDirection::OutputMplane.is_video());
        assert!(!BufferDirection::VbiCapture.is_video());
    }

    #[test]
    fn test_names() {
        assert_eq!(BufferDirection::CaptureMplane.to_string(), "vid-cap-mplane");
        assert_eq!(MemoryKind::DmaBuf.to_string(), "dmabuf");
        assert_eq!(Field::InterlacedBt.to_string(), "interlaced-bt");
    }

    #[test]
    fn test_capabilities_display() {
        let caps = Capabilities::VIDEO_CAPTURE | Capabilities::STREAMING;
        assert_eq!(
            caps.to_string(),
            "0x04000001 (VIDEO_CAPTURE | STREAMING)"
        );
        assert_eq!(Capabilities::empty().to_string(), "0x00000000");
    }

    #[test]
    fn test_capabilities_keep_unknown_bits() {
        let caps = Capabilities::from_bits_retain(0x4000_0001);
        assert_eq!(caps.bits(), 0x4000_0001);
        assert!(caps.contains(Capabilities::VIDEO_CAPTURE));
    }
}
