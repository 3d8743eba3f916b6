// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Open V4L2 device handle
//!
//! A [`Device`] is only constructed once the node has been opened, verified
//! to be a character device and its capabilities checked against what the
//! caller requires and forbids. Every later operation borrows the device, so
//! the node stays open for as long as anything uses it and is closed when
//! the handle is dropped.

use std::fmt;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

use log::{debug, info};

use crate::driver::{DeviceInfo, Driver, V4l2Driver};
use crate::v4l2::Capabilities;
use crate::Error;

/// Broad classification of a device node by its capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Produces frames (camera, frame grabber)
    Camera,
    /// Consumes frames (display, transmitter)
    Output,
    /// Memory-to-memory processor such as an encoder or scaler
    MemoryToMemory,
    /// Anything else (radio, VBI, metadata only)
    Other,
}

impl DeviceKind {
    pub fn classify(caps: Capabilities) -> DeviceKind {
        if caps.intersects(Capabilities::VIDEO_M2M | Capabilities::VIDEO_M2M_MPLANE) {
            DeviceKind::MemoryToMemory
        } else if caps
            .intersects(Capabilities::VIDEO_CAPTURE | Capabilities::VIDEO_CAPTURE_MPLANE)
        {
            DeviceKind::Camera
        } else if caps.intersects(Capabilities::VIDEO_OUTPUT | Capabilities::VIDEO_OUTPUT_MPLANE)
        {
            DeviceKind::Output
        } else {
            DeviceKind::Other
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceKind::Camera => "camera",
            DeviceKind::Output => "output",
            DeviceKind::MemoryToMemory => "m2m",
            DeviceKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Split `caps` into the required bits it lacks and the forbidden bits it has
pub fn check_capabilities(
    caps: Capabilities,
    required: Capabilities,
    forbidden: Capabilities,
) -> (Capabilities, Capabilities) {
    (required.difference(caps), forbidden.intersection(caps))
}

/// An open, capability-checked V4L2 device
///
/// # Example
///
/// ```no_run
/// use capstream::device::Device;
/// use capstream::v4l2::Capabilities;
///
/// let device = Device::open(
///     "/dev/video0",
///     Capabilities::VIDEO_CAPTURE | Capabilities::STREAMING,
///     Capabilities::empty(),
/// )?;
/// println!("{} ({})", device.card(), device.driver_name());
/// # Ok::<(), capstream::Error>(())
/// ```
#[derive(Debug)]
pub struct Device<D: Driver = V4l2Driver> {
    driver: D,
    name: String,
    info: DeviceInfo,
}

impl Device<V4l2Driver> {
    /// Open the node at `path` and check its capabilities
    ///
    /// Every bit of `required` must be present and no bit of `forbidden` may
    /// be. Per-node capabilities are used when the driver reports them.
    pub fn open(
        path: impl AsRef<Path>,
        required: Capabilities,
        forbidden: Capabilities,
    ) -> Result<Self, Error> {
        let path = path.as_ref();
        let driver = V4l2Driver::open(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(
            "V4L2: Device {} descriptor is {}",
            path.display(),
            driver.as_raw_fd()
        );

        let metadata = driver.file().metadata().map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        if !metadata.file_type().is_char_device() {
            return Err(Error::NotCharDevice(path.to_path_buf()));
        }

        Self::with_name(driver, path.display().to_string(), required, forbidden)
    }
}

impl<D: Driver> Device<D> {
    /// Wrap an already connected driver, named after its card
    pub fn with_driver(
        driver: D,
        required: Capabilities,
        forbidden: Capabilities,
    ) -> Result<Self, Error> {
        Self::with_name(driver, String::new(), required, forbidden)
    }

    fn with_name(
        driver: D,
        name: String,
        required: Capabilities,
        forbidden: Capabilities,
    ) -> Result<Self, Error> {
        let info = driver
            .query_capabilities()
            .map_err(|source| Error::QueryCapabilities {
                device: name.clone(),
                source,
            })?;
        let name = if name.is_empty() {
            info.card.clone()
        } else {
            name
        };

        let caps = info.node_capabilities();
        let (missing, present) = check_capabilities(caps, required, forbidden);
        if !missing.is_empty() || !present.is_empty() {
            return Err(Error::CapabilityMismatch {
                device: name,
                missing,
                forbidden: present,
            });
        }

        info!(
            "V4L2: {} is {} ({}), capabilities {}",
            name, info.card, info.driver, caps
        );
        Ok(Device { driver, name, info })
    }

    /// The control-request transport
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Everything `VIDIOC_QUERYCAP` reported
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Capabilities of the opened node
    pub fn capabilities(&self) -> Capabilities {
        self.info.node_capabilities()
    }

    pub fn kind(&self) -> DeviceKind {
        DeviceKind::classify(self.capabilities())
    }

    /// Display name of the device (at most 31 bytes, from the driver)
    pub fn card(&self) -> &str {
        &self.info.card
    }

    pub fn driver_name(&self) -> &str {
        &self.info.driver
    }

    pub fn bus_info(&self) -> &str {
        &self.info.bus_info
    }

    /// Path the device was opened from, or its card name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<D: Driver> AsFd for Device<D> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.driver.as_fd()
    }
}

impl<D: Driver> AsRawFd for Device<D> {
    fn as_raw_fd(&self) -> RawFd {
        self.driver.as_fd().as_raw_fd()
    }
}

impl<D: Driver> fmt::Display for Device<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_capabilities() {
        let caps = Capabilities::VIDEO_CAPTURE | Capabilities::STREAMING;
        let (missing, present) = check_capabilities(
            caps,
            Capabilities::VIDEO_CAPTURE | Capabilities::STREAMING,
            Capabilities::VIDEO_M2M,
        );
        assert!(missing.is_empty());
        assert!(present.is_empty());

        let (missing, present) = check_capabilities(
            caps | Capabilities::VIDEO_M2M,
            Capabilities::VIDEO_OUTPUT,
            Capabilities::VIDEO_M2M | Capabilities::VIDEO_M2M_MPLANE,
        );
        assert_eq!(missing, Capabilities::VIDEO_OUTPUT);
        assert_eq!(present, Capabilities::VIDEO_M2M);
    }

    #[test]
    fn test_open_missing_node() {
        let err = Device::open(
            "/dev/capstream-does-not-exist",
            Capabilities::empty(),
            Capabilities::empty(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Open { .. }));
        assert_eq!(err.raw_os_error(), Some(nix::libc::ENOENT));
    }

    #[test]
    fn test_open_regular_file_is_rejected() {
        let path = std::env::temp_dir().join(format!("capstream-regular-{}", std::process::id()));
        std::fs::write(&path, b"not a device").unwrap();
        let err = Device::open(&path, Capabilities::empty(), Capabilities::empty()).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(err, Error::NotCharDevice(p) if p == path));
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            DeviceKind::classify(Capabilities::VIDEO_CAPTURE_MPLANE | Capabilities::STREAMING),
            DeviceKind::Camera
        );
        assert_eq!(
            DeviceKind::classify(Capabilities::VIDEO_M2M_MPLANE | Capabilities::STREAMING),
            DeviceKind::MemoryToMemory
        );
        assert_eq!(
            DeviceKind::classify(Capabilities::VIDEO_OUTPUT),
            DeviceKind::Output
        );
        assert_eq!(DeviceKind::classify(Capabilities::RADIO), DeviceKind::Other);
    }
}
