// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Frame interval negotiation
//!
//! Frame rate is requested as a whole number of frames per second and carried
//! to the driver as a time-per-frame fraction of `1/fps` seconds. Devices that
//! do not advertise `V4L2_CAP_TIMEPERFRAME` keep their own rate; that is
//! logged as a warning and not treated as a failure.

use std::fmt;

use log::{debug, warn};

use crate::device::Device;
use crate::driver::Driver;
use crate::v4l2::BufferDirection;
use crate::Error;

/// Time per frame in seconds, `numerator / denominator`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Fraction {
    pub numerator: u32,
    pub denominator: u32,
}

impl Fraction {
    pub const fn new(numerator: u32, denominator: u32) -> Fraction {
        Fraction {
            numerator,
            denominator,
        }
    }

    /// The interval of `fps` frames per second
    pub const fn per_second(fps: u32) -> Fraction {
        Fraction::new(1, fps)
    }

    /// Frames per second, `NaN` when the interval is zero
    pub fn fps(&self) -> f64 {
        if self.numerator == 0 {
            return f64::NAN;
        }
        self.denominator as f64 / self.numerator as f64
    }

    /// Whether both fractions describe the same interval (1/30 == 2/60)
    pub fn same_rate(&self, other: &Fraction) -> bool {
        self.numerator as u64 * other.denominator as u64
            == other.numerator as u64 * self.denominator as u64
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Streaming parameters of one direction (`struct v4l2_streamparm`)
///
/// The kernel record holds a capture or an output sub-record depending on
/// the direction; both carry the same fields under different names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParameters {
    pub direction: BufferDirection,
    /// `V4L2_CAP_TIMEPERFRAME` is advertised
    pub time_per_frame_supported: bool,
    /// `V4L2_MODE_HIGHQUALITY` capture or output mode
    pub high_quality: bool,
    pub time_per_frame: Fraction,
    pub extended_mode: u32,
    /// Read or write buffer count for the read()/write() I/O method
    pub io_buffers: u32,
}

impl StreamParameters {
    /// Parameters with every field cleared
    pub fn empty(direction: BufferDirection) -> StreamParameters {
        StreamParameters {
            direction,
            time_per_frame_supported: false,
            high_quality: false,
            time_per_frame: Fraction::default(),
            extended_mode: 0,
            io_buffers: 0,
        }
    }
}

/// Set the frame rate of `direction` to `fps` frames per second
///
/// When the device does not advertise frame interval support a warning is
/// logged and the call succeeds without changing anything. Otherwise the
/// interval is read back after being set and must equal `1/fps`.
pub fn set<D: Driver>(device: &Device<D>, direction: BufferDirection, fps: u32) -> Result<(), Error> {
    if fps == 0 {
        return Err(Error::InvalidFrameRate(fps));
    }

    debug!("V4L2: Setup framerate for {} {}", device, direction);
    let current = parameters(device, direction)?;
    if !current.time_per_frame_supported {
        warn!(
            "Device {} {} does not support framerate adjustment",
            device, direction
        );
        return Ok(());
    }

    let requested = Fraction::per_second(fps);
    let request = StreamParameters {
        time_per_frame: requested,
        ..current
    };
    device
        .driver()
        .set_parameters(&request)
        .map_err(|source| Error::SetParameters { direction, source })?;

    let confirmed = interval(device, direction)?;
    if !confirmed.same_rate(&requested) {
        return Err(Error::FrameRateRejected {
            direction,
            requested,
            confirmed,
        });
    }

    debug!("V4L2: {} {} framerate set to {} fps", device, direction, fps);
    Ok(())
}

/// Current frame rate of `direction` in frames per second
///
/// Never fails: a failed read is logged and reported as `NaN`.
pub fn get<D: Driver>(device: &Device<D>, direction: BufferDirection) -> f64 {
    match interval(device, direction) {
        Ok(interval) => interval.fps(),
        Err(err) => {
            warn!("Cannot read {} {} framerate: {}", device, direction, err);
            f64::NAN
        }
    }
}

/// Current time per frame of `direction`
pub fn interval<D: Driver>(
    device: &Device<D>,
    direction: BufferDirection,
) -> Result<Fraction, Error> {
    Ok(parameters(device, direction)?.time_per_frame)
}

/// Current streaming parameters of `direction` (`VIDIOC_G_PARM`)
pub fn parameters<D: Driver>(
    device: &Device<D>,
    direction: BufferDirection,
) -> Result<StreamParameters, Error> {
    device
        .driver()
        .get_parameters(direction)
        .map_err(|source| Error::GetParameters { direction, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_fps() {
        assert_eq!(Fraction::per_second(30).fps(), 30.0);
        assert_eq!(Fraction::new(1001, 30000).fps(), 30000.0 / 1001.0);
        assert!(Fraction::new(0, 30).fps().is_nan());
        assert_eq!(Fraction::per_second(25).to_string(), "1/25");
    }

    #[test]
    fn test_same_rate_cross_multiplies() {
        assert!(Fraction::new(1, 30).same_rate(&Fraction::new(2, 60)));
        assert!(!Fraction::new(1, 30).same_rate(&Fraction::new(1, 15)));
        assert!(Fraction::new(u32::MAX, u32::MAX).same_rate(&Fraction::new(1, 1)));
    }
}
