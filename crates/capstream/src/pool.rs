// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Driver buffer pools
//!
//! A [`BufferPool`] is the set of buffers granted by one `VIDIOC_REQBUFS`
//! call for one direction. The driver must grant exactly the requested count,
//! anything else is released again and reported as an error.
//!
//! Buffers of an MMAP pool are made reachable in one of two ways:
//!
//! - [`BufferPool::map`] maps every buffer into this process
//! - [`BufferPool::export`] exports every buffer as a DMA-BUF descriptor for
//!   sharing with another device
//!
//! Both are all-or-nothing: when any buffer fails, the mappings or
//! descriptors already created for the pool are released before returning
//! the error, and the pool keeps its previous storage.

use std::ffi::c_void;
use std::fmt;
use std::io;
use std::num::NonZeroUsize;
use std::os::fd::{AsFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::ptr::NonNull;

use dma_buf::DmaBuf;
use log::{debug, trace, warn};
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};

use crate::device::Device;
use crate::driver::{BufferInfo, Driver};
use crate::v4l2::{BufferDirection, MemoryKind};
use crate::Error;

/// Ownership state of a buffer
///
/// `Queued` buffers belong to the driver; their memory must not be touched
/// until they are dequeued again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferState {
    /// Owned by the application, holds no data of interest
    Free,
    /// Owned by the driver
    Queued,
    /// Owned by the application, holds a completed frame
    Ready,
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BufferState::Free => "free",
            BufferState::Queued => "queued",
            BufferState::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Access requested for mapped buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    Read,
    Write,
    ReadWrite,
}

impl Protection {
    fn flags(self) -> ProtFlags {
        match self {
            Protection::Read => ProtFlags::PROT_READ,
            Protection::Write => ProtFlags::PROT_WRITE,
            Protection::ReadWrite => ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
        }
    }

    pub fn readable(self) -> bool {
        self != Protection::Write
    }

    pub fn writable(self) -> bool {
        self != Protection::Read
    }
}

/// A driver buffer mapped into this process, unmapped on drop
#[derive(Debug)]
pub struct MappedRegion {
    ptr: NonNull<c_void>,
    len: usize,
    protection: Protection,
}

// The region is plain shared memory owned by this value alone.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Map `len` bytes at `offset` of `fd` as a shared mapping
    pub fn map(
        fd: BorrowedFd<'_>,
        len: u32,
        offset: u32,
        protection: Protection,
    ) -> io::Result<MappedRegion> {
        let size = NonZeroUsize::new(len as usize)
            .ok_or_else(|| io::Error::from_raw_os_error(nix::libc::EINVAL))?;
        // SAFETY: a fresh shared mapping chosen by the kernel cannot alias
        // any Rust object.
        let ptr = unsafe {
            mmap(
                None,
                size,
                protection.flags(),
                MapFlags::MAP_SHARED,
                fd,
                offset as nix::libc::off_t,
            )
        }?;
        Ok(MappedRegion {
            ptr,
            len: size.get(),
            protection,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn protection(&self) -> Protection {
        self.protection
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr() as *const u8
    }

    /// Contents of the mapping, `None` when it is write-only
    pub fn as_slice(&self) -> Option<&[u8]> {
        if !self.protection.readable() {
            return None;
        }
        // SAFETY: the mapping is live and readable for len bytes while self
        // exists.
        Some(unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) })
    }

    /// Writable contents of the mapping, `None` when it is read-only
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        if !self.protection.writable() {
            return None;
        }
        // SAFETY: the mapping is live and writable for len bytes, and the
        // unique borrow of self excludes other views.
        Some(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr() as *mut u8, self.len) })
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: ptr and len describe a mapping created by map() that no
        // slice outlives.
        if let Err(err) = unsafe { munmap(self.ptr, self.len) } {
            warn!("munmap of {} bytes failed: {}", self.len, err);
        }
    }
}

/// A buffer exported as a DMA-BUF, the descriptor is closed on drop
pub struct ExportedBuffer {
    fd: RawFd,
    dmabuf: DmaBuf,
}

impl ExportedBuffer {
    fn new(fd: OwnedFd) -> ExportedBuffer {
        let fd = fd.into_raw_fd();
        // SAFETY: ownership of the descriptor moves into the DmaBuf.
        let dmabuf = unsafe { DmaBuf::from_raw_fd(fd) };
        ExportedBuffer { fd, dmabuf }
    }

    /// Descriptor number, valid while this value lives
    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    pub fn fd(&self) -> BorrowedFd<'_> {
        // SAFETY: the descriptor is owned by self.dmabuf and stays open for
        // the lifetime of the borrow.
        unsafe { BorrowedFd::borrow_raw(self.fd) }
    }

    pub fn dmabuf(&self) -> &DmaBuf {
        &self.dmabuf
    }
}

impl fmt::Debug for ExportedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedBuffer").field("fd", &self.fd).finish()
    }
}

/// How the application reaches a buffer's memory
#[derive(Debug, Default)]
pub enum Storage {
    /// Not mapped or exported
    #[default]
    Unbound,
    Mapped(MappedRegion),
    Exported(ExportedBuffer),
}

/// One buffer of a pool
#[derive(Debug)]
pub struct Buffer {
    index: u32,
    length: u32,
    offset: u32,
    state: BufferState,
    storage: Storage,
}

impl Buffer {
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Size in bytes, known once the buffer has been mapped or exported
    pub fn length(&self) -> u32 {
        self.length
    }

    /// `mmap()` offset reported by the driver
    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn mapped(&self) -> Option<&MappedRegion> {
        match &self.storage {
            Storage::Mapped(region) => Some(region),
            _ => None,
        }
    }

    pub fn exported(&self) -> Option<&ExportedBuffer> {
        match &self.storage {
            Storage::Exported(export) => Some(export),
            _ => None,
        }
    }

    pub(crate) fn mapped_mut(&mut self) -> Option<&mut MappedRegion> {
        match &mut self.storage {
            Storage::Mapped(region) => Some(region),
            _ => None,
        }
    }

    pub(crate) fn set_state(&mut self, state: BufferState) {
        self.state = state;
    }
}

/// Buffers granted by the driver for one direction
#[derive(Debug)]
pub struct BufferPool {
    direction: BufferDirection,
    memory: MemoryKind,
    buffers: Vec<Buffer>,
}

impl BufferPool {
    /// Request exactly `count` buffers of `memory` kind for `direction`
    ///
    /// Fails with [`Error::NoBuffers`] when the driver grants none and with
    /// [`Error::CountMismatch`] when it grants a different number; in both
    /// cases the grant is released again.
    pub fn request<D: Driver>(
        device: &Device<D>,
        direction: BufferDirection,
        count: u32,
        memory: MemoryKind,
    ) -> Result<BufferPool, Error> {
        if count == 0 {
            return Err(Error::InvalidBufferCount(count));
        }

        debug!(
            "V4L2: Obtaining {} {} buffers for {} {}",
            count, memory, device, direction
        );
        let granted = device
            .driver()
            .request_buffers(direction, memory, count)
            .map_err(|source| Error::RequestBuffers { direction, source })?;

        if granted != count {
            if granted > 0 {
                if let Err(err) = device.driver().request_buffers(direction, memory, 0) {
                    warn!("Cannot release {} {} buffers: {}", granted, direction, err);
                }
            }
            return Err(if granted == 0 {
                Error::NoBuffers { direction }
            } else {
                Error::CountMismatch {
                    direction,
                    requested: count,
                    granted,
                }
            });
        }

        let buffers = (0..count)
            .map(|index| Buffer {
                index,
                length: 0,
                offset: 0,
                state: BufferState::Free,
                storage: Storage::Unbound,
            })
            .collect();
        Ok(BufferPool {
            direction,
            memory,
            buffers,
        })
    }

    /// Map every buffer of an MMAP pool into this process
    pub fn map<D: Driver>(&mut self, device: &Device<D>, protection: Protection) -> Result<(), Error> {
        self.require_mmap("map")?;
        let direction = self.direction;

        let mut regions = Vec::with_capacity(self.buffers.len());
        for index in 0..self.count() {
            let info = self.query(device, index)?;
            let region = MappedRegion::map(device.as_fd(), info.length, info.offset, protection)
                .map_err(|source| Error::MapBuffer {
                    direction,
                    index,
                    source,
                })?;
            trace!(
                "V4L2: {} buffer #{} mapped at {:p}, length {}",
                direction,
                index,
                region.as_ptr(),
                region.len()
            );
            regions.push((info, region));
        }

        for (buffer, (info, region)) in self.buffers.iter_mut().zip(regions) {
            buffer.length = info.length;
            buffer.offset = info.offset;
            buffer.storage = Storage::Mapped(region);
        }
        debug!("V4L2: Mapped {} {} buffers", self.count(), direction);
        Ok(())
    }

    /// Export every buffer of an MMAP pool as a DMA-BUF descriptor
    pub fn export<D: Driver>(&mut self, device: &Device<D>) -> Result<(), Error> {
        self.require_mmap("export")?;
        let direction = self.direction;

        let mut exports = Vec::with_capacity(self.buffers.len());
        for index in 0..self.count() {
            let info = self.query(device, index)?;
            let fd = device
                .driver()
                .export_buffer(direction, index)
                .map_err(|source| Error::ExportBuffer {
                    direction,
                    index,
                    source,
                })?;
            let export = ExportedBuffer::new(fd);
            trace!(
                "V4L2: {} buffer #{} exported as fd {}",
                direction,
                index,
                export.raw_fd()
            );
            exports.push((info, export));
        }

        for (buffer, (info, export)) in self.buffers.iter_mut().zip(exports) {
            buffer.length = info.length;
            buffer.offset = info.offset;
            buffer.storage = Storage::Exported(export);
        }
        debug!("V4L2: Exported {} {} buffers", self.count(), direction);
        Ok(())
    }

    /// Unmap or close every buffer and return the allocation to the driver
    pub fn release<D: Driver>(mut self, device: &Device<D>) -> Result<(), Error> {
        for buffer in &mut self.buffers {
            buffer.storage = Storage::Unbound;
        }
        let direction = self.direction;
        debug!("V4L2: Releasing {} {} buffers", self.count(), direction);
        device
            .driver()
            .request_buffers(direction, self.memory, 0)
            .map_err(|source| Error::RequestBuffers { direction, source })?;
        Ok(())
    }

    pub fn direction(&self) -> BufferDirection {
        self.direction
    }

    pub fn memory(&self) -> MemoryKind {
        self.memory
    }

    /// Number of buffers
    pub fn count(&self) -> u32 {
        self.buffers.len() as u32
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn buffer(&self, index: u32) -> Option<&Buffer> {
        self.buffers.get(index as usize)
    }

    pub fn buffers(&self) -> &[Buffer] {
        &self.buffers
    }

    pub fn state(&self, index: u32) -> Option<BufferState> {
        self.buffer(index).map(Buffer::state)
    }

    /// Number of buffers currently in `state`
    pub fn count_in(&self, state: BufferState) -> usize {
        self.buffers.iter().filter(|b| b.state == state).count()
    }

    pub(crate) fn checked_mut(&mut self, index: u32) -> Result<&mut Buffer, Error> {
        let count = self.count();
        self.buffers
            .get_mut(index as usize)
            .ok_or(Error::IndexOutOfRange { index, count })
    }

    pub(crate) fn checked(&self, index: u32) -> Result<&Buffer, Error> {
        self.buffer(index).ok_or(Error::IndexOutOfRange {
            index,
            count: self.count(),
        })
    }

    pub(crate) fn reset_states(&mut self) {
        for buffer in &mut self.buffers {
            buffer.state = BufferState::Free;
        }
    }

    fn require_mmap(&self, operation: &'static str) -> Result<(), Error> {
        if self.memory != MemoryKind::Mmap {
            return Err(Error::UnsupportedMemory {
                memory: self.memory,
                operation,
            });
        }
        if self.direction.is_multiplanar() {
            return Err(Error::UnsupportedDirection {
                direction: self.direction,
                operation,
            });
        }
        Ok(())
    }

    fn query<D: Driver>(&self, device: &Device<D>, index: u32) -> Result<BufferInfo, Error> {
        let direction = self.direction;
        device
            .driver()
            .query_buffer(direction, index)
            .map_err(|source| Error::QueryBuffer {
                direction,
                index,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsFd;

    fn scratch_file(len: usize) -> std::fs::File {
        let path = std::env::temp_dir().join(format!(
            "capstream-pool-{}-{}",
            std::process::id(),
            rand::random::<u32>()
        ));
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .unwrap();
        std::fs::remove_file(&path).unwrap();
        file.write_all(&vec![0xa5; len]).unwrap();
        file
    }

    #[test]
    fn test_mapped_region_access() {
        let file = scratch_file(8192);
        let mut region = MappedRegion::map(file.as_fd(), 4096, 4096, Protection::ReadWrite).unwrap();
        assert_eq!(region.len(), 4096);
        assert!(region.as_slice().unwrap().iter().all(|&b| b == 0xa5));
        region.as_mut_slice().unwrap()[0] = 1;
        assert_eq!(region.as_slice().unwrap()[0], 1);

        let mut ro = MappedRegion::map(file.as_fd(), 4096, 4096, Protection::Read).unwrap();
        // Shared mapping sees the write made through the other region
        assert_eq!(ro.as_slice().unwrap()[0], 1);
        assert!(ro.as_mut_slice().is_none());
    }

    #[test]
    fn test_zero_length_map_fails() {
        let file = scratch_file(4096);
        let err = MappedRegion::map(file.as_fd(), 0, 0, Protection::Read).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(nix::libc::EINVAL));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(BufferState::Free.to_string(), "free");
        assert_eq!(BufferState::Queued.to_string(), "queued");
        assert_eq!(BufferState::Ready.to_string(), "ready");
    }
}
