/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # Advisory memory accounting
//!
//! The pool tracks current usage against an optional budget and can reject
//! admission with `OutOfMemory`. It is advisory bookkeeping, not a
//! concurrency primitive: it exists so a caller under memory pressure can
//! choose a lazy decode strategy instead of an eager one before loading a
//! very large file.
//!
//! Released buffers can be recycled through a small free list to avoid
//! re-allocation in decode loops; the statistics distinguish active from
//! pooled bytes so callers can see both.

use crate::error::EngineError;
use crate::error::Result;
use serde::Serialize;
use tracing::debug;

/// Most buffers kept on the free list
const MAX_POOLED_BUFFERS: usize = 8;

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct MemoryStats {
    /// Bytes currently admitted and in use
    pub active_bytes: usize,
    /// Bytes held in reusable buffers on the free list
    pub pooled_bytes: usize,
    /// Configured budget, if any
    pub budget_bytes: Option<usize>,
}

#[derive(Debug, Default)]
pub struct MemoryPool {
    budget: Option<usize>,
    active: usize,
    pooled: Vec<Vec<u8>>,
    pooled_bytes: usize,
}

impl MemoryPool {
    pub fn new() -> Self {
        MemoryPool::default()
    }

    pub fn with_budget(budget: usize) -> Self {
        MemoryPool {
            budget: Some(budget),
            ..MemoryPool::default()
        }
    }

    /// Change or clear the budget; existing admissions are not revisited
    pub fn set_budget(&mut self, budget: Option<usize>) {
        self.budget = budget;
    }

    /// Admit `bytes` of planned allocation, or fail with `OutOfMemory`
    pub fn reserve(&mut self, bytes: usize) -> Result<()> {
        if let Some(budget) = self.budget {
            let requested = self.active.saturating_add(bytes);
            if requested > budget {
                return Err(EngineError::OutOfMemory { requested, budget });
            }
        }
        self.active += bytes;
        Ok(())
    }

    /// Return previously reserved bytes
    pub fn release(&mut self, bytes: usize) {
        self.active = self.active.saturating_sub(bytes);
    }

    /// Take a cleared buffer of at least `capacity`, reusing a pooled one
    pub fn acquire_buffer(&mut self, capacity: usize) -> Vec<u8> {
        if let Some(index) = self.pooled.iter().position(|b| b.capacity() >= capacity) {
            let buffer = self.pooled.swap_remove(index);
            self.pooled_bytes -= buffer.capacity();
            debug!(capacity = buffer.capacity(), "reused pooled buffer");
            return buffer;
        }
        Vec::with_capacity(capacity)
    }

    /// Hand a buffer back for reuse; kept only while the free list has room
    pub fn recycle_buffer(&mut self, mut buffer: Vec<u8>) {
        if self.pooled.len() >= MAX_POOLED_BUFFERS || buffer.capacity() == 0 {
            return;
        }
        buffer.clear();
        self.pooled_bytes += buffer.capacity();
        self.pooled.push(buffer);
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            active_bytes: self.active,
            pooled_bytes: self.pooled_bytes,
            budget_bytes: self.budget,
        }
    }
}
