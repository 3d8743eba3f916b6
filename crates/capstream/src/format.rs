// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Pixel format and frame size negotiation
//!
//! A V4L2 format is a tagged record: the buffer type selects which member of
//! the kernel union is meaningful. [`Format`] keeps that pairing checked, a
//! [`FormatData`] variant can only be combined with a direction that uses it.
//!
//! [`configure`] is the strict negotiation used for streaming: the driver must
//! accept the requested frame size and pixel encoding exactly, any adjustment
//! is reported as an error rather than silently adopted.

use log::{debug, trace};

use crate::device::Device;
use crate::diagnostics;
use crate::driver::Driver;
use crate::fourcc::FourCC;
use crate::v4l2::{BufferDirection, Field};
use crate::Error;

/// Single-planar video format (`struct v4l2_pix_format`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: FourCC,
    pub field: Field,
    pub bytes_per_line: u32,
    pub size_image: u32,
    pub colorspace: u32,
    pub flags: u32,
}

/// Layout of one plane of a multi-planar format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneFormat {
    pub size_image: u32,
    pub bytes_per_line: u32,
}

/// Multi-planar video format (`struct v4l2_pix_format_mplane`)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PixFormatMplane {
    pub width: u32,
    pub height: u32,
    pub pixel_format: FourCC,
    pub field: Field,
    pub colorspace: u32,
    /// One entry per plane, at most eight
    pub planes: Vec<PlaneFormat>,
    pub flags: u8,
}

/// Overlay window (`struct v4l2_window`)
///
/// Clip lists and bitmaps are not carried; they are always passed to the
/// driver empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
    pub field: Field,
    pub chromakey: u32,
    pub clip_count: u32,
    pub global_alpha: u8,
}

/// Raw VBI format (`struct v4l2_vbi_format`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VbiFormat {
    pub sampling_rate: u32,
    pub offset: u32,
    pub samples_per_line: u32,
    pub sample_format: FourCC,
    pub start: [i32; 2],
    pub count: [u32; 2],
    pub flags: u32,
}

/// Sliced VBI format (`struct v4l2_sliced_vbi_format`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlicedVbiFormat {
    pub service_set: u16,
    pub service_lines: [[u16; 24]; 2],
    pub io_size: u32,
}

/// Software defined radio format (`struct v4l2_sdr_format`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SdrFormat {
    pub pixel_format: FourCC,
    pub buffer_size: u32,
}

/// Metadata format (`struct v4l2_meta_format`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetaFormat {
    pub data_format: FourCC,
    pub buffer_size: u32,
}

/// Direction-specific contents of a format
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatData {
    Pix(PixFormat),
    PixMplane(PixFormatMplane),
    Window(Window),
    Vbi(VbiFormat),
    SlicedVbi(SlicedVbiFormat),
    Sdr(SdrFormat),
    Meta(MetaFormat),
}

impl FormatData {
    /// Whether this variant is the one the kernel uses for `direction`
    pub fn fits(&self, direction: BufferDirection) -> bool {
        use BufferDirection::*;
        match self {
            FormatData::Pix(_) => matches!(direction, Capture | Output),
            FormatData::PixMplane(_) => matches!(direction, CaptureMplane | OutputMplane),
            FormatData::Window(_) => matches!(direction, Overlay | OutputOverlay),
            FormatData::Vbi(_) => matches!(direction, VbiCapture | VbiOutput),
            FormatData::SlicedVbi(_) => matches!(direction, SlicedVbiCapture | SlicedVbiOutput),
            FormatData::Sdr(_) => matches!(direction, SdrCapture | SdrOutput),
            FormatData::Meta(_) => matches!(direction, MetaCapture | MetaOutput),
        }
    }

    /// Zeroed contents of the variant used for `direction`
    pub fn empty(direction: BufferDirection) -> FormatData {
        use BufferDirection::*;
        match direction {
            Capture | Output => FormatData::Pix(PixFormat::default()),
            CaptureMplane | OutputMplane => FormatData::PixMplane(PixFormatMplane::default()),
            Overlay | OutputOverlay => FormatData::Window(Window::default()),
            VbiCapture | VbiOutput => FormatData::Vbi(VbiFormat::default()),
            SlicedVbiCapture | SlicedVbiOutput => {
                FormatData::SlicedVbi(SlicedVbiFormat::default())
            }
            SdrCapture | SdrOutput => FormatData::Sdr(SdrFormat::default()),
            MetaCapture | MetaOutput => FormatData::Meta(MetaFormat::default()),
        }
    }
}

/// A format bound to the buffer direction it describes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    direction: BufferDirection,
    data: FormatData,
}

impl Format {
    /// Pair `data` with `direction`, `None` if the kernel would not read that
    /// union member for this buffer type
    pub fn new(direction: BufferDirection, data: FormatData) -> Option<Format> {
        if data.fits(direction) {
            Some(Format { direction, data })
        } else {
            None
        }
    }

    /// A video format request for `width`x`height` in `pixel_format`
    ///
    /// Everything else is left for the driver to fill in. Multi-planar
    /// requests leave the plane count at zero so the driver picks it from the
    /// pixel format.
    pub fn video(
        direction: BufferDirection,
        pixel_format: FourCC,
        width: u32,
        height: u32,
    ) -> Result<Format, Error> {
        let data = match direction {
            BufferDirection::Capture | BufferDirection::Output => FormatData::Pix(PixFormat {
                width,
                height,
                pixel_format,
                ..Default::default()
            }),
            BufferDirection::CaptureMplane | BufferDirection::OutputMplane => {
                FormatData::PixMplane(PixFormatMplane {
                    width,
                    height,
                    pixel_format,
                    ..Default::default()
                })
            }
            _ => {
                return Err(Error::UnsupportedDirection {
                    direction,
                    operation: "configure a video format",
                })
            }
        };
        Ok(Format { direction, data })
    }

    pub fn direction(&self) -> BufferDirection {
        self.direction
    }

    pub fn data(&self) -> &FormatData {
        &self.data
    }

    pub fn into_data(self) -> FormatData {
        self.data
    }

    /// Frame or window width
    pub fn width(&self) -> Option<u32> {
        match &self.data {
            FormatData::Pix(pix) => Some(pix.width),
            FormatData::PixMplane(mp) => Some(mp.width),
            FormatData::Window(win) => Some(win.width),
            _ => None,
        }
    }

    /// Frame or window height
    pub fn height(&self) -> Option<u32> {
        match &self.data {
            FormatData::Pix(pix) => Some(pix.height),
            FormatData::PixMplane(mp) => Some(mp.height),
            FormatData::Window(win) => Some(win.height),
            _ => None,
        }
    }

    /// Pixel (or sample) encoding
    pub fn pixel_format(&self) -> Option<FourCC> {
        match &self.data {
            FormatData::Pix(pix) => Some(pix.pixel_format),
            FormatData::PixMplane(mp) => Some(mp.pixel_format),
            FormatData::Sdr(sdr) => Some(sdr.pixel_format),
            FormatData::Meta(meta) => Some(meta.data_format),
            FormatData::Vbi(vbi) => Some(vbi.sample_format),
            _ => None,
        }
    }

    /// Line stride of the first plane
    pub fn bytes_per_line(&self) -> Option<u32> {
        match &self.data {
            FormatData::Pix(pix) => Some(pix.bytes_per_line),
            FormatData::PixMplane(mp) => mp.planes.first().map(|p| p.bytes_per_line),
            _ => None,
        }
    }

    /// Bytes needed to hold one frame, summed over all planes
    pub fn size_image(&self) -> Option<u32> {
        match &self.data {
            FormatData::Pix(pix) => Some(pix.size_image),
            FormatData::PixMplane(mp) => Some(mp.planes.iter().map(|p| p.size_image).sum()),
            FormatData::Sdr(sdr) => Some(sdr.buffer_size),
            FormatData::Meta(meta) => Some(meta.buffer_size),
            _ => None,
        }
    }
}

/// Configure the frame size and pixel encoding of `direction`
///
/// The request is submitted with `VIDIOC_S_FMT`, then the driver's resulting
/// format is read back with `VIDIOC_G_FMT`. The call only succeeds when the
/// read-back width, height and pixel encoding equal the request. A size
/// change is reported before an encoding change.
///
/// Returns the full negotiated format, including the stride and image size
/// the driver computed.
pub fn configure<D: Driver>(
    device: &Device<D>,
    direction: BufferDirection,
    pixel_format: FourCC,
    width: u32,
    height: u32,
) -> Result<Format, Error> {
    let request = Format::video(direction, pixel_format, width, height)?;

    debug!("V4L2: Setup format for {} {}", device, direction);
    let answer = device
        .driver()
        .set_format(&request)
        .map_err(|source| Error::SetFormat { direction, source })?;
    trace!("V4L2: S_FMT answer: {}", diagnostics::describe_format(&answer));

    let negotiated = current(device, direction)?;
    verify(&request, &negotiated)?;

    debug!(
        "V4L2: Configured {}: pixelformat = {}, width = {}, height = {}, sizeimage = {}",
        direction,
        pixel_format,
        width,
        height,
        negotiated.size_image().unwrap_or(0)
    );
    debug!("{}", diagnostics::describe_format(&negotiated));
    Ok(negotiated)
}

/// Read the current format of `direction` with `VIDIOC_G_FMT`
pub fn current<D: Driver>(device: &Device<D>, direction: BufferDirection) -> Result<Format, Error> {
    device
        .driver()
        .get_format(direction)
        .map_err(|source| Error::GetFormat { direction, source })
}

fn verify(request: &Format, negotiated: &Format) -> Result<(), Error> {
    let direction = request.direction();
    let requested = (
        request.width().unwrap_or(0),
        request.height().unwrap_or(0),
    );
    let got = (
        negotiated.width().unwrap_or(0),
        negotiated.height().unwrap_or(0),
    );
    if negotiated.direction() != direction || requested != got {
        return Err(Error::SizeMismatch {
            direction,
            requested,
            negotiated: got,
        });
    }

    let requested = request.pixel_format().unwrap_or_default();
    let got = negotiated.pixel_format().unwrap_or_default();
    if requested != got {
        return Err(Error::EncodingMismatch {
            direction,
            requested,
            negotiated: got,
        });
    }
    Ok(())
}
