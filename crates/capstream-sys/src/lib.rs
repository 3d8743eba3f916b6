// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Raw V4L2 kernel ABI used by capstream.
//!
//! The records mirror `linux/videodev2.h` for the 64-bit Linux ABI. Only the
//! requests the capstream core issues are declared. Every ioctl entry point is
//! generated with the `nix` ioctl macros and is `unsafe`: callers must pass a
//! valid descriptor of a V4L2 device node and a pointer to a properly
//! initialised record.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(clippy::missing_safety_doc)]

use std::os::raw::{c_int, c_ulong, c_void};

// Re-export nix for callers that need errno handling
pub use nix;

pub const VIDEO_MAX_PLANES: usize = 8;

// Device capabilities (struct v4l2_capability)
pub const V4L2_CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;
pub const V4L2_CAP_VIDEO_OUTPUT: u32 = 0x0000_0002;
pub const V4L2_CAP_VIDEO_OVERLAY: u32 = 0x0000_0004;
pub const V4L2_CAP_VBI_CAPTURE: u32 = 0x0000_0010;
pub const V4L2_CAP_VBI_OUTPUT: u32 = 0x0000_0020;
pub const V4L2_CAP_SLICED_VBI_CAPTURE: u32 = 0x0000_0040;
pub const V4L2_CAP_SLICED_VBI_OUTPUT: u32 = 0x0000_0080;
pub const V4L2_CAP_RDS_CAPTURE: u32 = 0x0000_0100;
pub const V4L2_CAP_VIDEO_OUTPUT_OVERLAY: u32 = 0x0000_0200;
pub const V4L2_CAP_HW_FREQ_SEEK: u32 = 0x0000_0400;
pub const V4L2_CAP_RDS_OUTPUT: u32 = 0x0000_0800;
pub const V4L2_CAP_VIDEO_CAPTURE_MPLANE: u32 = 0x0000_1000;
pub const V4L2_CAP_VIDEO_OUTPUT_MPLANE: u32 = 0x0000_2000;
pub const V4L2_CAP_VIDEO_M2M_MPLANE: u32 = 0x0000_4000;
pub const V4L2_CAP_VIDEO_M2M: u32 = 0x0000_8000;
pub const V4L2_CAP_TUNER: u32 = 0x0001_0000;
pub const V4L2_CAP_AUDIO: u32 = 0x0002_0000;
pub const V4L2_CAP_RADIO: u32 = 0x0004_0000;
pub const V4L2_CAP_MODULATOR: u32 = 0x0008_0000;
pub const V4L2_CAP_SDR_CAPTURE: u32 = 0x0010_0000;
pub const V4L2_CAP_EXT_PIX_FORMAT: u32 = 0x0020_0000;
pub const V4L2_CAP_SDR_OUTPUT: u32 = 0x0040_0000;
pub const V4L2_CAP_META_CAPTURE: u32 = 0x0080_0000;
pub const V4L2_CAP_READWRITE: u32 = 0x0100_0000;
pub const V4L2_CAP_STREAMING: u32 = 0x0400_0000;
pub const V4L2_CAP_META_OUTPUT: u32 = 0x0800_0000;
pub const V4L2_CAP_TOUCH: u32 = 0x1000_0000;
pub const V4L2_CAP_IO_MC: u32 = 0x2000_0000;
pub const V4L2_CAP_DEVICE_CAPS: u32 = 0x8000_0000;

// enum v4l2_buf_type
pub const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
pub const V4L2_BUF_TYPE_VIDEO_OUTPUT: u32 = 2;
pub const V4L2_BUF_TYPE_VIDEO_OVERLAY: u32 = 3;
pub const V4L2_BUF_TYPE_VBI_CAPTURE: u32 = 4;
pub const V4L2_BUF_TYPE_VBI_OUTPUT: u32 = 5;
pub const V4L2_BUF_TYPE_SLICED_VBI_CAPTURE: u32 = 6;
pub const V4L2_BUF_TYPE_SLICED_VBI_OUTPUT: u32 = 7;
pub const V4L2_BUF_TYPE_VIDEO_OUTPUT_OVERLAY: u32 = 8;
pub const V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE: u32 = 9;
pub const V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE: u32 = 10;
pub const V4L2_BUF_TYPE_SDR_CAPTURE: u32 = 11;
pub const V4L2_BUF_TYPE_SDR_OUTPUT: u32 = 12;
pub const V4L2_BUF_TYPE_META_CAPTURE: u32 = 13;
pub const V4L2_BUF_TYPE_META_OUTPUT: u32 = 14;

// enum v4l2_memory
pub const V4L2_MEMORY_MMAP: u32 = 1;
pub const V4L2_MEMORY_USERPTR: u32 = 2;
pub const V4L2_MEMORY_OVERLAY: u32 = 3;
pub const V4L2_MEMORY_DMABUF: u32 = 4;

// enum v4l2_field
pub const V4L2_FIELD_ANY: u32 = 0;
pub const V4L2_FIELD_NONE: u32 = 1;
pub const V4L2_FIELD_TOP: u32 = 2;
pub const V4L2_FIELD_BOTTOM: u32 = 3;
pub const V4L2_FIELD_INTERLACED: u32 = 4;
pub const V4L2_FIELD_SEQ_TB: u32 = 5;
pub const V4L2_FIELD_SEQ_BT: u32 = 6;
pub const V4L2_FIELD_ALTERNATE: u32 = 7;
pub const V4L2_FIELD_INTERLACED_TB: u32 = 8;
pub const V4L2_FIELD_INTERLACED_BT: u32 = 9;

// Streaming parameter capability/mode flags
pub const V4L2_CAP_TIMEPERFRAME: u32 = 0x1000;
pub const V4L2_MODE_HIGHQUALITY: u32 = 0x0001;

// Buffer flags (struct v4l2_buffer)
pub const V4L2_BUF_FLAG_MAPPED: u32 = 0x0000_0001;
pub const V4L2_BUF_FLAG_QUEUED: u32 = 0x0000_0002;
pub const V4L2_BUF_FLAG_DONE: u32 = 0x0000_0004;
pub const V4L2_BUF_FLAG_KEYFRAME: u32 = 0x0000_0008;
pub const V4L2_BUF_FLAG_PFRAME: u32 = 0x0000_0010;
pub const V4L2_BUF_FLAG_BFRAME: u32 = 0x0000_0020;
pub const V4L2_BUF_FLAG_ERROR: u32 = 0x0000_0040;
pub const V4L2_BUF_FLAG_TIMECODE: u32 = 0x0000_0100;
pub const V4L2_BUF_FLAG_PREPARED: u32 = 0x0000_0400;
pub const V4L2_BUF_FLAG_LAST: u32 = 0x0010_0000;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_capability {
    pub driver: [u8; 16],
    pub card: [u8; 32],
    pub bus_info: [u8; 32],
    pub version: u32,
    pub capabilities: u32,
    pub device_caps: u32,
    pub reserved: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_pix_format {
    pub width: u32,
    pub height: u32,
    pub pixelformat: u32,
    pub field: u32,
    pub bytesperline: u32,
    pub sizeimage: u32,
    pub colorspace: u32,
    pub priv_: u32,
    pub flags: u32,
    /// `ycbcr_enc` or `hsv_enc`, they share storage
    pub ycbcr_enc: u32,
    pub quantization: u32,
    pub xfer_func: u32,
}

// The kernel declares the two plane records packed; every field is already
// naturally aligned, so the C layout is identical.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_plane_pix_format {
    pub sizeimage: u32,
    pub bytesperline: u32,
    pub reserved: [u16; 6],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_pix_format_mplane {
    pub width: u32,
    pub height: u32,
    pub pixelformat: u32,
    pub field: u32,
    pub colorspace: u32,
    pub plane_fmt: [v4l2_plane_pix_format; VIDEO_MAX_PLANES],
    pub num_planes: u8,
    pub flags: u8,
    pub ycbcr_enc: u8,
    pub quantization: u8,
    pub xfer_func: u8,
    pub reserved: [u8; 7],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_rect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_clip {
    pub c: v4l2_rect,
    pub next: *mut v4l2_clip,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_window {
    pub w: v4l2_rect,
    pub field: u32,
    pub chromakey: u32,
    pub clips: *mut v4l2_clip,
    pub clipcount: u32,
    pub bitmap: *mut c_void,
    pub global_alpha: u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_vbi_format {
    pub sampling_rate: u32,
    pub offset: u32,
    pub samples_per_line: u32,
    pub sample_format: u32,
    pub start: [i32; 2],
    pub count: [u32; 2],
    pub flags: u32,
    pub reserved: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_sliced_vbi_format {
    pub service_set: u16,
    pub service_lines: [[u16; 24]; 2],
    pub io_size: u32,
    pub reserved: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_sdr_format {
    pub pixelformat: u32,
    pub buffersize: u32,
    pub reserved: [u8; 24],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_meta_format {
    pub dataformat: u32,
    pub buffersize: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_format_union {
    pub pix: v4l2_pix_format,
    pub pix_mp: v4l2_pix_format_mplane,
    pub win: v4l2_window,
    pub vbi: v4l2_vbi_format,
    pub sliced: v4l2_sliced_vbi_format,
    pub sdr: v4l2_sdr_format,
    pub meta: v4l2_meta_format,
    pub raw_data: [u8; 200],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_format {
    pub type_: u32,
    pub fmt: v4l2_format_union,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct v4l2_fract {
    pub numerator: u32,
    pub denominator: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_captureparm {
    pub capability: u32,
    pub capturemode: u32,
    pub timeperframe: v4l2_fract,
    pub extendedmode: u32,
    pub readbuffers: u32,
    pub reserved: [u32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_outputparm {
    pub capability: u32,
    pub outputmode: u32,
    pub timeperframe: v4l2_fract,
    pub extendedmode: u32,
    pub writebuffers: u32,
    pub reserved: [u32; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_streamparm_union {
    pub capture: v4l2_captureparm,
    pub output: v4l2_outputparm,
    pub raw_data: [u8; 200],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_streamparm {
    pub type_: u32,
    pub parm: v4l2_streamparm_union,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_requestbuffers {
    pub count: u32,
    pub type_: u32,
    pub memory: u32,
    pub capabilities: u32,
    pub flags: u8,
    pub reserved: [u8; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_timecode {
    pub type_: u32,
    pub flags: u32,
    pub frames: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub userbits: [u8; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_plane_m {
    pub mem_offset: u32,
    pub userptr: c_ulong,
    pub fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_plane {
    pub bytesused: u32,
    pub length: u32,
    pub m: v4l2_plane_m,
    pub data_offset: u32,
    pub reserved: [u32; 11],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_buffer_m {
    pub offset: u32,
    pub userptr: c_ulong,
    pub planes: *mut v4l2_plane,
    pub fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_buffer {
    pub index: u32,
    pub type_: u32,
    pub bytesused: u32,
    pub flags: u32,
    pub field: u32,
    pub timestamp: nix::libc::timeval,
    pub timecode: v4l2_timecode,
    pub sequence: u32,
    pub memory: u32,
    pub m: v4l2_buffer_m,
    pub length: u32,
    pub reserved2: u32,
    /// `request_fd` or `reserved`, they share storage
    pub request_fd: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_exportbuffer {
    pub type_: u32,
    pub index: u32,
    pub plane: u32,
    pub flags: u32,
    pub fd: i32,
    pub reserved: [u32; 11],
}

macro_rules! zeroed_default {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Default for $ty {
                fn default() -> Self {
                    // SAFETY: plain-old-data kernel record; all-zero is the
                    // initial state the kernel ABI expects.
                    unsafe { std::mem::zeroed() }
                }
            }
        )*
    };
}

zeroed_default!(
    v4l2_capability,
    v4l2_pix_format,
    v4l2_pix_format_mplane,
    v4l2_window,
    v4l2_vbi_format,
    v4l2_sliced_vbi_format,
    v4l2_sdr_format,
    v4l2_meta_format,
    v4l2_format,
    v4l2_streamparm,
    v4l2_requestbuffers,
    v4l2_buffer,
    v4l2_exportbuffer,
);

#[cfg(target_pointer_width = "64")]
const _: () = {
    use std::mem::size_of;
    assert!(size_of::<v4l2_capability>() == 104);
    assert!(size_of::<v4l2_pix_format_mplane>() == 192);
    assert!(size_of::<v4l2_format>() == 208);
    assert!(size_of::<v4l2_streamparm>() == 204);
    assert!(size_of::<v4l2_requestbuffers>() == 20);
    assert!(size_of::<v4l2_buffer>() == 88);
    assert!(size_of::<v4l2_exportbuffer>() == 64);
};

const VIDIOC_MAGIC: u8 = b'V';

nix::ioctl_read!(vidioc_querycap, VIDIOC_MAGIC, 0, v4l2_capability);
nix::ioctl_readwrite!(vidioc_g_fmt, VIDIOC_MAGIC, 4, v4l2_format);
nix::ioctl_readwrite!(vidioc_s_fmt, VIDIOC_MAGIC, 5, v4l2_format);
nix::ioctl_readwrite!(vidioc_reqbufs, VIDIOC_MAGIC, 8, v4l2_requestbuffers);
nix::ioctl_readwrite!(vidioc_querybuf, VIDIOC_MAGIC, 9, v4l2_buffer);
nix::ioctl_readwrite!(vidioc_qbuf, VIDIOC_MAGIC, 15, v4l2_buffer);
nix::ioctl_readwrite!(vidioc_expbuf, VIDIOC_MAGIC, 16, v4l2_exportbuffer);
nix::ioctl_readwrite!(vidioc_dqbuf, VIDIOC_MAGIC, 17, v4l2_buffer);
nix::ioctl_write_ptr!(vidioc_streamon, VIDIOC_MAGIC, 18, c_int);
nix::ioctl_write_ptr!(vidioc_streamoff, VIDIOC_MAGIC, 19, c_int);
nix::ioctl_readwrite!(vidioc_g_parm, VIDIOC_MAGIC, 21, v4l2_streamparm);
nix::ioctl_readwrite!(vidioc_s_parm, VIDIOC_MAGIC, 22, v4l2_streamparm);

/// Copy a NUL-padded kernel string field into an owned `String`.
pub fn string_from_bytes(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_request_codes_match_kernel() {
        // Reference values from the 64-bit kernel headers
        assert_eq!(
            nix::request_code_read!(VIDIOC_MAGIC, 0, size_of::<v4l2_capability>()) as u32,
            0x8068_5600
        );
        assert_eq!(
            nix::request_code_readwrite!(VIDIOC_MAGIC, 5, size_of::<v4l2_format>()) as u32,
            0xc0d0_5605
        );
        assert_eq!(
            nix::request_code_readwrite!(VIDIOC_MAGIC, 8, size_of::<v4l2_requestbuffers>())
                as u32,
            0xc014_5608
        );
        assert_eq!(
            nix::request_code_readwrite!(VIDIOC_MAGIC, 15, size_of::<v4l2_buffer>()) as u32,
            0xc058_560f
        );
        assert_eq!(
            nix::request_code_readwrite!(VIDIOC_MAGIC, 16, size_of::<v4l2_exportbuffer>())
                as u32,
            0xc040_5610
        );
        assert_eq!(
            nix::request_code_write!(VIDIOC_MAGIC, 18, size_of::<c_int>()) as u32,
            0x4004_5612
        );
        assert_eq!(
            nix::request_code_readwrite!(VIDIOC_MAGIC, 21, size_of::<v4l2_streamparm>()) as u32,
            0xc0cc_5615
        );
    }

    #[test]
    fn test_string_from_bytes() {
        let mut card = [0u8; 32];
        card[..9].copy_from_slice(b"UVC Video");
        assert_eq!(string_from_bytes(&card), "UVC Video");
        assert_eq!(string_from_bytes(b"full"), "full");
    }

    #[test]
    fn test_default_is_zeroed() {
        let buf = v4l2_buffer::default();
        assert_eq!(buf.index, 0);
        assert_eq!(buf.memory, 0);
        assert_eq!(unsafe { buf.m.offset }, 0);
    }
}
