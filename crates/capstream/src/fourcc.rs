// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
#![forbid(unsafe_code)]

use core::{fmt, result::Result};

/// Four-character pixel encoding code
///
/// V4L2 packs the four characters little-endian regardless of the host byte
/// order (`v4l2_fourcc(a, b, c, d) = a | b << 8 | c << 16 | d << 24`), so the
/// conversions here are fixed to that layout.
///
/// ```
/// use capstream::fourcc::FourCC;
///
/// let yuyv = FourCC(*b"YUYV");
/// assert_eq!(u32::from(yuyv), 0x5659_5559);
/// assert_eq!(FourCC::from(0x3231_564e).to_string(), "NV12");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub const YUYV: FourCC = FourCC(*b"YUYV");
    pub const NV12: FourCC = FourCC(*b"NV12");
    pub const M420: FourCC = FourCC(*b"M420");
    pub const MJPG: FourCC = FourCC(*b"MJPG");
    pub const H264: FourCC = FourCC(*b"H264");
    pub const HEVC: FourCC = FourCC(*b"HEVC");

    pub const fn as_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    pub const fn from_u32(val: u32) -> FourCC {
        FourCC(val.to_le_bytes())
    }
}

impl From<&[u8; 4]> for FourCC {
    fn from(buf: &[u8; 4]) -> FourCC {
        FourCC(*buf)
    }
}

impl From<u32> for FourCC {
    fn from(val: u32) -> FourCC {
        FourCC::from_u32(val)
    }
}

impl From<FourCC> for u32 {
    fn from(val: FourCC) -> Self {
        val.as_u32()
    }
}

impl core::str::FromStr for FourCC {
    type Err = String;

    /// Parse a code such as "YUYV"; shorter codes are padded with spaces the
    /// way the kernel spells "Y8  " or "GREY".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.is_empty() || bytes.len() > 4 || !s.is_ascii() {
            return Err(format!("FOURCC must be 1 to 4 ASCII characters: {:?}", s));
        }
        let mut code = [b' '; 4];
        code[..bytes.len()].copy_from_slice(bytes);
        Ok(FourCC(code))
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match core::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s),
            Err(_) => {
                // Keep Display infallible, format!() panics on fmt::Error
                for b in self.0 {
                    write!(f, "{}", core::ascii::escape_default(b))?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_tuple("FourCC")
            .field(&format_args!("{}", self))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packing_is_little_endian() {
        assert_eq!(FourCC::YUYV.as_u32(), 0x5659_5559);
        assert_eq!(FourCC::H264.as_u32(), 0x3436_3248);
        assert_eq!(FourCC::from(0x3032_344d), FourCC::M420);
    }

    #[test]
    fn test_parse() {
        assert_eq!("NV12".parse::<FourCC>().unwrap(), FourCC::NV12);
        assert_eq!("Y8".parse::<FourCC>().unwrap(), FourCC(*b"Y8  "));
        assert!("TOOLONG".parse::<FourCC>().is_err());
        assert!("".parse::<FourCC>().is_err());
    }

    #[test]
    fn test_display_non_utf8() {
        let code = FourCC([0xff, b'A', b'B', b'C']);
        assert_eq!(code.to_string(), "\\xffABC");
        assert_eq!(format!("{:?}", FourCC::NV12), "FourCC(NV12)");
    }
}
