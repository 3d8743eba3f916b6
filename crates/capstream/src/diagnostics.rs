// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
#![forbid(unsafe_code)]

//! Human-readable rendering of V4L2 values for debug logs
//!
//! Names follow the short spelling used by `v4l2-ctl`. Lookups never fail,
//! values outside the known tables render as `"unknown"`.

use std::fmt::Write;

use crate::driver::{DequeuedBuffer, Location, QueueRequest};
use crate::format::{Format, FormatData};
use capstream_sys as ffi;

/// Name of a raw `enum v4l2_field` value
pub fn field_name(raw: u32) -> &'static str {
    match raw {
        ffi::V4L2_FIELD_ANY => "any",
        ffi::V4L2_FIELD_NONE => "none",
        ffi::V4L2_FIELD_TOP => "top",
        ffi::V4L2_FIELD_BOTTOM => "bottom",
        ffi::V4L2_FIELD_INTERLACED => "interlaced",
        ffi::V4L2_FIELD_SEQ_TB => "seq-tb",
        ffi::V4L2_FIELD_SEQ_BT => "seq-bt",
        ffi::V4L2_FIELD_ALTERNATE => "alternate",
        ffi::V4L2_FIELD_INTERLACED_TB => "interlaced-tb",
        ffi::V4L2_FIELD_INTERLACED_BT => "interlaced-bt",
        _ => "unknown",
    }
}

/// Name of a raw `enum v4l2_buf_type` value
pub fn type_name(raw: u32) -> &'static str {
    match raw {
        ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE => "vid-cap",
        ffi::V4L2_BUF_TYPE_VIDEO_OVERLAY => "vid-overlay",
        ffi::V4L2_BUF_TYPE_VIDEO_OUTPUT => "vid-out",
        ffi::V4L2_BUF_TYPE_VBI_CAPTURE => "vbi-cap",
        ffi::V4L2_BUF_TYPE_VBI_OUTPUT => "vbi-out",
        ffi::V4L2_BUF_TYPE_SLICED_VBI_CAPTURE => "sliced-vbi-cap",
        ffi::V4L2_BUF_TYPE_SLICED_VBI_OUTPUT => "sliced-vbi-out",
        ffi::V4L2_BUF_TYPE_VIDEO_OUTPUT_OVERLAY => "vid-out-overlay",
        ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE => "vid-cap-mplane",
        ffi::V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE => "vid-out-mplane",
        ffi::V4L2_BUF_TYPE_SDR_CAPTURE => "sdr-cap",
        ffi::V4L2_BUF_TYPE_SDR_OUTPUT => "sdr-out",
        ffi::V4L2_BUF_TYPE_META_CAPTURE => "meta-cap",
        ffi::V4L2_BUF_TYPE_META_OUTPUT => "meta-out",
        _ => "unknown",
    }
}

/// Name of a raw `enum v4l2_memory` value
pub fn memory_name(raw: u32) -> &'static str {
    match raw {
        ffi::V4L2_MEMORY_MMAP => "mmap",
        ffi::V4L2_MEMORY_USERPTR => "userptr",
        ffi::V4L2_MEMORY_OVERLAY => "overlay",
        ffi::V4L2_MEMORY_DMABUF => "dmabuf",
        _ => "unknown",
    }
}

/// One-line summary of a format, plus one line per plane or sliced VBI line
pub fn describe_format(format: &Format) -> String {
    let mut out = format!("type={}", format.direction());
    // Writing to a String cannot fail
    let _ = match format.data() {
        FormatData::Pix(pix) => write!(
            out,
            ", width={}, height={}, pixelformat={}, field={}, bytesperline={}, \
             sizeimage={}, colorspace={}, flags={:#x}",
            pix.width,
            pix.height,
            pix.pixel_format,
            pix.field,
            pix.bytes_per_line,
            pix.size_image,
            pix.colorspace,
            pix.flags
        ),
        FormatData::PixMplane(mp) => {
            let _ = write!(
                out,
                ", width={}, height={}, format={}, field={}, colorspace={}, \
                 num_planes={}, flags={:#x}",
                mp.width,
                mp.height,
                mp.pixel_format,
                mp.field,
                mp.colorspace,
                mp.planes.len(),
                mp.flags
            );
            for (i, plane) in mp.planes.iter().enumerate() {
                let _ = write!(
                    out,
                    "\nplane {}: bytesperline={} sizeimage={}",
                    i, plane.bytes_per_line, plane.size_image
                );
            }
            Ok(())
        }
        FormatData::Window(win) => write!(
            out,
            ", wxh={}x{}, x,y={},{}, field={}, chromakey={:#010x}, clipcount={}, \
             global_alpha={:#04x}",
            win.width,
            win.height,
            win.left,
            win.top,
            win.field,
            win.chromakey,
            win.clip_count,
            win.global_alpha
        ),
        FormatData::Vbi(vbi) => write!(
            out,
            ", sampling_rate={}, offset={}, samples_per_line={}, sample_format={}, \
             start={},{}, count={},{}",
            vbi.sampling_rate,
            vbi.offset,
            vbi.samples_per_line,
            vbi.sample_format,
            vbi.start[0],
            vbi.start[1],
            vbi.count[0],
            vbi.count[1]
        ),
        FormatData::SlicedVbi(sliced) => {
            let _ = write!(
                out,
                ", service_set={:#010x}, io_size={}",
                sliced.service_set, sliced.io_size
            );
            for i in 0..24 {
                let _ = write!(
                    out,
                    "\nline[{:02}]={:#06x}, {:#06x}",
                    i, sliced.service_lines[0][i], sliced.service_lines[1][i]
                );
            }
            Ok(())
        }
        FormatData::Sdr(sdr) => write!(
            out,
            ", pixelformat={}, buffersize={}",
            sdr.pixel_format, sdr.buffer_size
        ),
        FormatData::Meta(meta) => write!(
            out,
            ", dataformat={}, buffersize={}",
            meta.data_format, meta.buffer_size
        ),
    };
    out
}

/// One-line summary of a buffer about to be queued
pub fn describe_request(req: &QueueRequest) -> String {
    let mut out = format!(
        "index={}, type={}, memory={}, bytesused={}",
        req.index,
        req.direction,
        req.memory(),
        req.bytes_used
    );
    let _ = match req.location {
        Location::Mmap => Ok(()),
        Location::UserPtr { address, length } => {
            write!(out, ", userptr={:#x}, length={}", address, length)
        }
        Location::DmaBuf(fd) => write!(out, ", fd={}", fd),
    };
    out
}

/// One-line summary of a completed buffer, led by its timestamp
///
/// The timestamp renders as `HH:MM:SS.uuuuuu` with the hour count not
/// wrapped at 24, since driver clocks are usually monotonic.
pub fn describe_buffer(buf: &DequeuedBuffer) -> String {
    let secs = buf.timestamp.as_secs();
    format!(
        "{:02}:{:02}:{:02}.{:06} index={}, type={}, flags={:#010x}, sequence={}, \
         memory={}, bytesused={}, length={}, offset={}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        buf.timestamp.subsec_micros(),
        buf.index,
        buf.direction,
        buf.flags.bits(),
        buf.sequence,
        buf.memory,
        buf.bytes_used,
        buf.length,
        buf.offset
    )
}
