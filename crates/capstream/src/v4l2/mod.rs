// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! V4L2 enumerations and capability flags
//!
//! Typed counterparts of the raw values carried by the kernel ABI records.
//! Each type converts from its raw value with `from_raw()`, which returns
//! `None` for values outside the ABI, and renders with the short names used
//! throughout the V4L2 tooling.
//!
//! # Buffer Directions
//!
//! | Variant | Raw | Name |
//! |---------|-----|------|
//! | [`BufferDirection::Capture`] | 1 | `vid-cap` |
//! | [`BufferDirection::Output`] | 2 | `vid-out` |
//! | [`BufferDirection::CaptureMplane`] | 9 | `vid-cap-mplane` |
//! | [`BufferDirection::OutputMplane`] | 10 | `vid-out-mplane` |
//!
//! Overlay, VBI, sliced VBI, SDR and metadata queues are also represented so
//! that formats read back from a device can always be described.
//!
//! # Memory Kinds
//!
//! | Kind | Description | Zero-Copy |
//! |------|-------------|-----------|
//! | [`MemoryKind::Mmap`] | Kernel allocates, user mmaps or exports | Via export |
//! | [`MemoryKind::UserPtr`] | User allocates, passes pointer | Possible |
//! | [`MemoryKind::DmaBuf`] | User passes dmabuf fd | Yes |

mod types;

pub use types::{BufferDirection, BufferFlags, Capabilities, Field, MemoryKind};
