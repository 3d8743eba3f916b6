// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! [`Driver`] implementation on a V4L2 device node
//!
//! Converts between the typed requests of this crate and the raw kernel
//! records of `capstream-sys`, and issues the ioctls.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::time::Duration;

use capstream_sys as ffi;
use nix::libc;

use super::{BufferInfo, DequeuedBuffer, DeviceInfo, Driver, Location, QueueRequest};
use crate::fourcc::FourCC;
use crate::format::{
    Format, FormatData, MetaFormat, PixFormat, PixFormatMplane, PlaneFormat, SdrFormat,
    SlicedVbiFormat, VbiFormat, Window,
};
use crate::framerate::{Fraction, StreamParameters};
use crate::v4l2::{BufferDirection, BufferFlags, Capabilities, Field, MemoryKind};

/// Control requests issued as ioctls on an open V4L2 device node
#[derive(Debug)]
pub struct V4l2Driver {
    file: File,
}

impl V4l2Driver {
    /// Open `path` read-write; the descriptor is close-on-exec
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(V4l2Driver { file })
    }

    /// Use an already opened device node
    pub fn from_file(file: File) -> Self {
        V4l2Driver { file }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl AsFd for V4l2Driver {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsRawFd for V4l2Driver {
    fn as_raw_fd(&self) -> RawFd {
        self.fd()
    }
}

fn invalid_data(what: &str, raw: u32) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("driver returned unknown {} {}", what, raw),
    )
}

fn direction_from_raw(raw: u32) -> io::Result<BufferDirection> {
    BufferDirection::from_raw(raw).ok_or_else(|| invalid_data("buffer type", raw))
}

fn memory_from_raw(raw: u32) -> io::Result<MemoryKind> {
    MemoryKind::from_raw(raw).ok_or_else(|| invalid_data("memory kind", raw))
}

// Unknown field orders from newer kernels are reported as "any"
fn field_from_raw(raw: u32) -> Field {
    Field::from_raw(raw).unwrap_or_default()
}

fn pix_to_raw(pix: &PixFormat) -> ffi::v4l2_pix_format {
    ffi::v4l2_pix_format {
        width: pix.width,
        height: pix.height,
        pixelformat: pix.pixel_format.as_u32(),
        field: pix.field.as_raw(),
        bytesperline: pix.bytes_per_line,
        sizeimage: pix.size_image,
        colorspace: pix.colorspace,
        flags: pix.flags,
        ..Default::default()
    }
}

fn pix_from_raw(raw: &ffi::v4l2_pix_format) -> PixFormat {
    PixFormat {
        width: raw.width,
        height: raw.height,
        pixel_format: FourCC::from(raw.pixelformat),
        field: field_from_raw(raw.field),
        bytes_per_line: raw.bytesperline,
        size_image: raw.sizeimage,
        colorspace: raw.colorspace,
        flags: raw.flags,
    }
}

fn pix_mp_to_raw(mp: &PixFormatMplane) -> ffi::v4l2_pix_format_mplane {
    let mut raw = ffi::v4l2_pix_format_mplane {
        width: mp.width,
        height: mp.height,
        pixelformat: mp.pixel_format.as_u32(),
        field: mp.field.as_raw(),
        colorspace: mp.colorspace,
        flags: mp.flags,
        ..Default::default()
    };
    let planes = mp.planes.len().min(ffi::VIDEO_MAX_PLANES);
    for (dst, src) in raw.plane_fmt.iter_mut().zip(&mp.planes[..planes]) {
        dst.sizeimage = src.size_image;
        dst.bytesperline = src.bytes_per_line;
    }
    raw.num_planes = planes as u8;
    raw
}

fn pix_mp_from_raw(raw: &ffi::v4l2_pix_format_mplane) -> PixFormatMplane {
    let planes = (raw.num_planes as usize).min(ffi::VIDEO_MAX_PLANES);
    PixFormatMplane {
        width: raw.width,
        height: raw.height,
        pixel_format: FourCC::from(raw.pixelformat),
        field: field_from_raw(raw.field),
        colorspace: raw.colorspace,
        planes: raw.plane_fmt[..planes]
            .iter()
            .map(|p| PlaneFormat {
                size_image: p.sizeimage,
                bytes_per_line: p.bytesperline,
            })
            .collect(),
        flags: raw.flags,
    }
}

fn format_to_raw(format: &Format) -> ffi::v4l2_format {
    let mut raw = ffi::v4l2_format {
        type_: format.direction().as_raw(),
        ..Default::default()
    };
    match format.data() {
        FormatData::Pix(pix) => raw.fmt.pix = pix_to_raw(pix),
        FormatData::PixMplane(mp) => raw.fmt.pix_mp = pix_mp_to_raw(mp),
        FormatData::Window(win) => {
            raw.fmt.win = ffi::v4l2_window {
                w: ffi::v4l2_rect {
                    left: win.left,
                    top: win.top,
                    width: win.width,
                    height: win.height,
                },
                field: win.field.as_raw(),
                chromakey: win.chromakey,
                global_alpha: win.global_alpha,
                ..Default::default()
            }
        }
        FormatData::Vbi(vbi) => {
            raw.fmt.vbi = ffi::v4l2_vbi_format {
                sampling_rate: vbi.sampling_rate,
                offset: vbi.offset,
                samples_per_line: vbi.samples_per_line,
                sample_format: vbi.sample_format.as_u32(),
                start: vbi.start,
                count: vbi.count,
                flags: vbi.flags,
                ..Default::default()
            }
        }
        FormatData::SlicedVbi(sliced) => {
            raw.fmt.sliced = ffi::v4l2_sliced_vbi_format {
                service_set: sliced.service_set,
                service_lines: sliced.service_lines,
                io_size: sliced.io_size,
                ..Default::default()
            }
        }
        FormatData::Sdr(sdr) => {
            raw.fmt.sdr = ffi::v4l2_sdr_format {
                pixelformat: sdr.pixel_format.as_u32(),
                buffersize: sdr.buffer_size,
                ..Default::default()
            }
        }
        FormatData::Meta(meta) => {
            raw.fmt.meta = ffi::v4l2_meta_format {
                dataformat: meta.data_format.as_u32(),
                buffersize: meta.buffer_size,
            }
        }
    }
    raw
}

fn format_from_raw(raw: &ffi::v4l2_format) -> io::Result<Format> {
    use BufferDirection::*;

    let direction = direction_from_raw(raw.type_)?;
    // SAFETY: the union member read is the one the kernel fills for this
    // buffer type, and every member is plain data valid for any bit pattern.
    let data = unsafe {
        match direction {
            Capture | Output => FormatData::Pix(pix_from_raw(&raw.fmt.pix)),
            CaptureMplane | OutputMplane => FormatData::PixMplane(pix_mp_from_raw(&raw.fmt.pix_mp)),
            Overlay | OutputOverlay => {
                let win = &raw.fmt.win;
                FormatData::Window(Window {
                    left: win.w.left,
                    top: win.w.top,
                    width: win.w.width,
                    height: win.w.height,
                    field: field_from_raw(win.field),
                    chromakey: win.chromakey,
                    clip_count: win.clipcount,
                    global_alpha: win.global_alpha,
                })
            }
            VbiCapture | VbiOutput => {
                let vbi = &raw.fmt.vbi;
                FormatData::Vbi(VbiFormat {
                    sampling_rate: vbi.sampling_rate,
                    offset: vbi.offset,
                    samples_per_line: vbi.samples_per_line,
                    sample_format: FourCC::from(vbi.sample_format),
                    start: vbi.start,
                    count: vbi.count,
                    flags: vbi.flags,
                })
            }
            SlicedVbiCapture | SlicedVbiOutput => {
                let sliced = &raw.fmt.sliced;
                FormatData::SlicedVbi(SlicedVbiFormat {
                    service_set: sliced.service_set,
                    service_lines: sliced.service_lines,
                    io_size: sliced.io_size,
                })
            }
            SdrCapture | SdrOutput => FormatData::Sdr(SdrFormat {
                pixel_format: FourCC::from(raw.fmt.sdr.pixelformat),
                buffer_size: raw.fmt.sdr.buffersize,
            }),
            MetaCapture | MetaOutput => FormatData::Meta(MetaFormat {
                data_format: FourCC::from(raw.fmt.meta.dataformat),
                buffer_size: raw.fmt.meta.buffersize,
            }),
        }
    };
    Format::new(direction, data).ok_or_else(|| invalid_data("format type", raw.type_))
}

fn parameters_to_raw(params: &StreamParameters) -> ffi::v4l2_streamparm {
    let mut raw = ffi::v4l2_streamparm {
        type_: params.direction.as_raw(),
        ..Default::default()
    };
    let capability = if params.time_per_frame_supported {
        ffi::V4L2_CAP_TIMEPERFRAME
    } else {
        0
    };
    let mode = if params.high_quality {
        ffi::V4L2_MODE_HIGHQUALITY
    } else {
        0
    };
    let time_per_frame = ffi::v4l2_fract {
        numerator: params.time_per_frame.numerator,
        denominator: params.time_per_frame.denominator,
    };
    if params.direction.is_output() {
        raw.parm.output = ffi::v4l2_outputparm {
            capability,
            outputmode: mode,
            timeperframe: time_per_frame,
            extendedmode: params.extended_mode,
            writebuffers: params.io_buffers,
            reserved: [0; 4],
        };
    } else {
        raw.parm.capture = ffi::v4l2_captureparm {
            capability,
            capturemode: mode,
            timeperframe: time_per_frame,
            extendedmode: params.extended_mode,
            readbuffers: params.io_buffers,
            reserved: [0; 4],
        };
    }
    raw
}

fn parameters_from_raw(raw: &ffi::v4l2_streamparm) -> io::Result<StreamParameters> {
    let direction = direction_from_raw(raw.type_)?;
    // SAFETY: both sub-records are plain data; the one read is selected by
    // the buffer direction the same way the kernel selects it.
    let (capability, mode, tpf, extended_mode, io_buffers) = unsafe {
        if direction.is_output() {
            let out = &raw.parm.output;
            (
                out.capability,
                out.outputmode,
                out.timeperframe,
                out.extendedmode,
                out.writebuffers,
            )
        } else {
            let cap = &raw.parm.capture;
            (
                cap.capability,
                cap.capturemode,
                cap.timeperframe,
                cap.extendedmode,
                cap.readbuffers,
            )
        }
    };
    Ok(StreamParameters {
        direction,
        time_per_frame_supported: capability & ffi::V4L2_CAP_TIMEPERFRAME != 0,
        high_quality: mode & ffi::V4L2_MODE_HIGHQUALITY != 0,
        time_per_frame: Fraction::new(tpf.numerator, tpf.denominator),
        extended_mode,
        io_buffers,
    })
}

fn timestamp_from_raw(tv: &libc::timeval) -> Duration {
    let secs = u64::try_from(tv.tv_sec).unwrap_or(0);
    let micros = u32::try_from(tv.tv_usec).unwrap_or(0);
    Duration::new(secs, micros.saturating_mul(1000))
}

fn single_plane(direction: BufferDirection, operation: &str) -> io::Result<()> {
    if direction.is_multiplanar() {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("cannot {} multi-planar {} buffers", operation, direction),
        ));
    }
    Ok(())
}

impl Driver for V4l2Driver {
    fn query_capabilities(&self) -> io::Result<DeviceInfo> {
        let mut raw = ffi::v4l2_capability::default();
        // SAFETY: fd is an open descriptor and raw is a valid record.
        unsafe { ffi::vidioc_querycap(self.fd(), &mut raw) }?;
        Ok(DeviceInfo {
            driver: ffi::string_from_bytes(&raw.driver),
            card: ffi::string_from_bytes(&raw.card),
            bus_info: ffi::string_from_bytes(&raw.bus_info),
            version: raw.version,
            capabilities: Capabilities::from_bits_retain(raw.capabilities),
            device_caps: Capabilities::from_bits_retain(raw.device_caps),
        })
    }

    fn get_format(&self, direction: BufferDirection) -> io::Result<Format> {
        let mut raw = ffi::v4l2_format {
            type_: direction.as_raw(),
            ..Default::default()
        };
        // SAFETY: fd is an open descriptor and raw is a valid record.
        unsafe { ffi::vidioc_g_fmt(self.fd(), &mut raw) }?;
        format_from_raw(&raw)
    }

    fn set_format(&self, request: &Format) -> io::Result<Format> {
        let mut raw = format_to_raw(request);
        // SAFETY: fd is an open descriptor and raw is a valid record with
        // null clip and bitmap pointers.
        unsafe { ffi::vidioc_s_fmt(self.fd(), &mut raw) }?;
        format_from_raw(&raw)
    }

    fn get_parameters(&self, direction: BufferDirection) -> io::Result<StreamParameters> {
        let mut raw = ffi::v4l2_streamparm {
            type_: direction.as_raw(),
            ..Default::default()
        };
        // SAFETY: fd is an open descriptor and raw is a valid record.
        unsafe { ffi::vidioc_g_parm(self.fd(), &mut raw) }?;
        parameters_from_raw(&raw)
    }

    fn set_parameters(&self, request: &StreamParameters) -> io::Result<StreamParameters> {
        let mut raw = parameters_to_raw(request);
        // SAFETY: fd is an open descriptor and raw is a valid record.
        unsafe { ffi::vidioc_s_parm(self.fd(), &mut raw) }?;
        parameters_from_raw(&raw)
    }

    fn request_buffers(
        &self,
        direction: BufferDirection,
        memory: MemoryKind,
        count: u32,
    ) -> io::Result<u32> {
        let mut raw = ffi::v4l2_requestbuffers {
            count,
            type_: direction.as_raw(),
            memory: memory.as_raw(),
            ..Default::default()
        };
        // SAFETY: fd is an open descriptor and raw is a valid record.
        unsafe { ffi::vidioc_reqbufs(self.fd(), &mut raw) }?;
        Ok(raw.count)
    }

    fn query_buffer(&self, direction: BufferDirection, index: u32) -> io::Result<BufferInfo> {
        single_plane(direction, "query")?;
        let mut raw = ffi::v4l2_buffer {
            index,
            type_: direction.as_raw(),
            ..Default::default()
        };
        // SAFETY: fd is an open descriptor and raw is a valid single-planar
        // record, so the driver never follows m.planes.
        unsafe { ffi::vidioc_querybuf(self.fd(), &mut raw) }?;
        let memory = memory_from_raw(raw.memory)?;
        let offset = if memory == MemoryKind::Mmap {
            // SAFETY: MMAP buffers report their mapping offset in m.offset.
            unsafe { raw.m.offset }
        } else {
            0
        };
        Ok(BufferInfo {
            index: raw.index,
            direction,
            memory,
            length: raw.length,
            offset,
            flags: BufferFlags::from_bits_retain(raw.flags),
        })
    }

    fn export_buffer(&self, direction: BufferDirection, index: u32) -> io::Result<OwnedFd> {
        single_plane(direction, "export")?;
        let mut raw = ffi::v4l2_exportbuffer {
            type_: direction.as_raw(),
            index,
            flags: (libc::O_CLOEXEC | libc::O_RDWR) as u32,
            ..Default::default()
        };
        // SAFETY: fd is an open descriptor and raw is a valid record.
        unsafe { ffi::vidioc_expbuf(self.fd(), &mut raw) }?;
        // SAFETY: on success the kernel installed a new descriptor that
        // nothing else owns.
        Ok(unsafe { OwnedFd::from_raw_fd(raw.fd) })
    }

    fn queue_buffer(&self, request: &QueueRequest) -> io::Result<()> {
        single_plane(request.direction, "queue")?;
        let mut raw = ffi::v4l2_buffer {
            index: request.index,
            type_: request.direction.as_raw(),
            memory: request.memory().as_raw(),
            bytesused: request.bytes_used,
            ..Default::default()
        };
        match request.location {
            Location::Mmap => {}
            Location::UserPtr { address, length } => {
                raw.m.userptr = address as libc::c_ulong;
                raw.length = length;
            }
            Location::DmaBuf(fd) => raw.m.fd = fd,
        }
        // SAFETY: fd is an open descriptor and raw is a valid single-planar
        // record.
        unsafe { ffi::vidioc_qbuf(self.fd(), &mut raw) }?;
        Ok(())
    }

    fn dequeue_buffer(
        &self,
        direction: BufferDirection,
        memory: MemoryKind,
    ) -> io::Result<DequeuedBuffer> {
        single_plane(direction, "dequeue")?;
        let mut raw = ffi::v4l2_buffer {
            type_: direction.as_raw(),
            memory: memory.as_raw(),
            ..Default::default()
        };
        // SAFETY: fd is an open descriptor and raw is a valid single-planar
        // record.
        unsafe { ffi::vidioc_dqbuf(self.fd(), &mut raw) }?;
        let offset = if memory == MemoryKind::Mmap {
            // SAFETY: MMAP buffers report their mapping offset in m.offset.
            unsafe { raw.m.offset }
        } else {
            0
        };
        Ok(DequeuedBuffer {
            index: raw.index,
            direction,
            memory,
            bytes_used: raw.bytesused,
            flags: BufferFlags::from_bits_retain(raw.flags),
            field: field_from_raw(raw.field),
            timestamp: timestamp_from_raw(&raw.timestamp),
            sequence: raw.sequence,
            length: raw.length,
            offset,
        })
    }

    fn stream_on(&self, direction: BufferDirection) -> io::Result<()> {
        let kind = direction.as_raw() as libc::c_int;
        // SAFETY: fd is an open descriptor and kind outlives the call.
        unsafe { ffi::vidioc_streamon(self.fd(), &kind) }?;
        Ok(())
    }

    fn stream_off(&self, direction: BufferDirection) -> io::Result<()> {
        let kind = direction.as_raw() as libc::c_int;
        // SAFETY: fd is an open descriptor and kind outlives the call.
        unsafe { ffi::vidioc_streamoff(self.fd(), &kind) }?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_raw_conversion() {
        let fmt = Format::video(BufferDirection::Capture, FourCC::YUYV, 640, 480).unwrap();
        let raw = format_to_raw(&fmt);
        assert_eq!(raw.type_, ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE);
        let pix = unsafe { raw.fmt.pix };
        assert_eq!(pix.width, 640);
        assert_eq!(pix.pixelformat, FourCC::YUYV.as_u32());
        assert_eq!(format_from_raw(&raw).unwrap(), fmt);
    }

    #[test]
    fn test_mplane_plane_count() {
        let mut raw = ffi::v4l2_format {
            type_: ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE,
            ..Default::default()
        };
        let mut mp = ffi::v4l2_pix_format_mplane {
            width: 64,
            height: 48,
            pixelformat: FourCC::NV12.as_u32(),
            num_planes: 2,
            ..Default::default()
        };
        mp.plane_fmt[0].sizeimage = 3072;
        mp.plane_fmt[1].sizeimage = 1536;
        // Stale data past num_planes must be ignored
        mp.plane_fmt[2].sizeimage = 99;
        raw.fmt.pix_mp = mp;

        let fmt = format_from_raw(&raw).unwrap();
        assert_eq!(fmt.size_image(), Some(4608));
    }

    #[test]
    fn test_unknown_type_is_invalid_data() {
        let raw = ffi::v4l2_format {
            type_: 0x80,
            ..Default::default()
        };
        let err = format_from_raw(&raw).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_parameters_use_output_record_for_output() {
        let params = StreamParameters {
            time_per_frame_supported: true,
            time_per_frame: Fraction::per_second(60),
            ..StreamParameters::empty(BufferDirection::Output)
        };
        let raw = parameters_to_raw(&params);
        let out = unsafe { raw.parm.output };
        assert_eq!(out.capability, ffi::V4L2_CAP_TIMEPERFRAME);
        assert_eq!(out.timeperframe.denominator, 60);
        assert_eq!(parameters_from_raw(&raw).unwrap(), params);

        let capture = StreamParameters {
            direction: BufferDirection::Capture,
            ..params
        };
        let raw = parameters_to_raw(&capture);
        let cap = unsafe { raw.parm.capture };
        assert_eq!(cap.timeperframe.numerator, 1);
        assert_eq!(cap.timeperframe.denominator, 60);
    }

    #[test]
    fn test_timestamp_from_raw() {
        let tv = libc::timeval {
            tv_sec: 12,
            tv_usec: 345_678,
        };
        assert_eq!(timestamp_from_raw(&tv), Duration::new(12, 345_678_000));
    }
}
