// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Buffer ownership protocol
//!
//! A [`Stream`] owns a [`BufferPool`] and tracks which side holds each buffer.
//! Enqueueing hands a buffer to the driver, dequeueing takes a completed one
//! back. Buffer contents are only reachable while the application owns the
//! buffer, so a queued buffer can never be read or written by mistake.
//!
//! The device is passed to every call rather than stored, which lets two
//! streams share one memory-to-memory device (its output and capture queues).

use log::{debug, trace};

use crate::device::Device;
use crate::diagnostics;
use crate::driver::{DequeuedBuffer, Driver, Location, QueueRequest};
use crate::pool::{BufferPool, BufferState};
use crate::v4l2::{BufferDirection, MemoryKind};
use crate::Error;

/// Queue/dequeue state machine over one buffer pool
#[derive(Debug)]
pub struct Stream {
    pool: BufferPool,
    streaming: bool,
}

impl Stream {
    pub fn new(pool: BufferPool) -> Stream {
        Stream {
            pool,
            streaming: false,
        }
    }

    pub fn direction(&self) -> BufferDirection {
        self.pool.direction()
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Give buffer `index` of an MMAP pool to the driver
    ///
    /// For output queues the whole buffer is marked as payload.
    pub fn enqueue<D: Driver>(&mut self, device: &Device<D>, index: u32) -> Result<(), Error> {
        let bytes_used = if self.direction().is_output() {
            self.pool.checked(index)?.length()
        } else {
            0
        };
        self.enqueue_with(device, index, Location::Mmap, bytes_used)
    }

    /// Give buffer `index` to the driver with explicit storage and payload
    ///
    /// `location` must match the memory kind of the pool. A buffer that is
    /// already queued is refused.
    pub fn enqueue_with<D: Driver>(
        &mut self,
        device: &Device<D>,
        index: u32,
        location: Location,
        bytes_used: u32,
    ) -> Result<(), Error> {
        let memory = self.pool.memory();
        if location.memory() != memory {
            return Err(Error::UnsupportedMemory {
                memory: location.memory(),
                operation: "enqueue into a pool of another memory kind",
            });
        }

        let direction = self.direction();
        let state = self.pool.checked(index)?.state();
        if state == BufferState::Queued {
            return Err(Error::InvalidState {
                index,
                state,
                operation: "enqueue",
            });
        }

        let request = QueueRequest {
            direction,
            index,
            location,
            bytes_used,
        };
        trace!(
            "V4L2: Enqueue {} on {}",
            diagnostics::describe_request(&request),
            device
        );
        device
            .driver()
            .queue_buffer(&request)
            .map_err(|source| Error::Enqueue {
                direction,
                index,
                source,
            })?;
        self.pool.checked_mut(index)?.set_state(BufferState::Queued);
        trace!("V4L2: Queued {}", diagnostics::describe_request(&request));
        Ok(())
    }

    /// Wait for the driver to complete a buffer and take it back
    ///
    /// The returned buffer is `Ready`. Buffers flagged with
    /// [`BufferFlags::ERROR`](crate::v4l2::BufferFlags::ERROR) are returned
    /// like any other, callers decide whether to use the data.
    pub fn dequeue<D: Driver>(&mut self, device: &Device<D>) -> Result<DequeuedBuffer, Error> {
        let direction = self.direction();
        let done = device
            .driver()
            .dequeue_buffer(direction, self.pool.memory())
            .map_err(|source| Error::Dequeue { direction, source })?;

        let buffer = self.pool.checked_mut(done.index)?;
        if buffer.state() != BufferState::Queued {
            return Err(Error::InvalidState {
                index: done.index,
                state: buffer.state(),
                operation: "dequeue",
            });
        }
        buffer.set_state(BufferState::Ready);
        trace!("{}", diagnostics::describe_buffer(&done));
        Ok(done)
    }

    /// Start streaming; buffer states are unchanged
    pub fn stream_on<D: Driver>(&mut self, device: &Device<D>) -> Result<(), Error> {
        let direction = self.direction();
        debug!("V4L2: Stream on for {} {}", device, direction);
        device
            .driver()
            .stream_on(direction)
            .map_err(|source| Error::StreamOn { direction, source })?;
        self.streaming = true;
        Ok(())
    }

    /// Stop streaming; the driver gives up every queued buffer
    pub fn stream_off<D: Driver>(&mut self, device: &Device<D>) -> Result<(), Error> {
        let direction = self.direction();
        debug!("V4L2: Stream off for {} {}", device, direction);
        device
            .driver()
            .stream_off(direction)
            .map_err(|source| Error::StreamOff { direction, source })?;
        self.streaming = false;
        self.pool.reset_states();
        Ok(())
    }

    /// Mapped contents of buffer `index`
    ///
    /// Fails while the buffer is queued or when the pool is not mapped
    /// readable.
    pub fn data(&self, index: u32) -> Result<&[u8], Error> {
        let buffer = self.pool.checked(index)?;
        if buffer.state() == BufferState::Queued {
            return Err(Error::InvalidState {
                index,
                state: buffer.state(),
                operation: "read",
            });
        }
        buffer
            .mapped()
            .and_then(|region| region.as_slice())
            .ok_or(Error::UnsupportedMemory {
                memory: self.pool.memory(),
                operation: "read unmapped",
            })
    }

    /// Writable mapped contents of buffer `index`, for filling output buffers
    pub fn data_mut(&mut self, index: u32) -> Result<&mut [u8], Error> {
        let memory = self.pool.memory();
        let buffer = self.pool.checked_mut(index)?;
        if buffer.state() == BufferState::Queued {
            return Err(Error::InvalidState {
                index,
                state: buffer.state(),
                operation: "write",
            });
        }
        buffer
            .mapped_mut()
            .and_then(|region| region.as_mut_slice())
            .ok_or(Error::UnsupportedMemory {
                memory,
                operation: "write unmapped",
            })
    }

    /// Give the pool back, e.g. to release it after streaming stopped
    pub fn into_pool(self) -> BufferPool {
        self.pool
    }

    /// Memory kind of the pool
    pub fn memory(&self) -> MemoryKind {
        self.pool.memory()
    }
}
