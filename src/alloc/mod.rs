//! Physical-memory allocators.
//!
//! Two independent engines cover the same simulated address space:
//!
//! - [`linear::LinearAllocator`] - an ordered list of variable-size blocks
//!   with first-fit / best-fit / worst-fit placement, splitting on
//!   allocation and coalescing on free.
//! - [`buddy::BuddyAllocator`] - power-of-two free lists with
//!   split-on-alloc and XOR-buddy merge-on-free.
//!
//! The allocators share nothing; the [`crate::system::System`] keeps at
//! most one of them live per session.

pub mod buddy;
pub mod linear;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier assigned to every successful allocation, used to free it.
pub type BlockId = u32;

/// Which allocator engine a session is using.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocatorMode {
    Linear,
    Buddy,
}

impl std::fmt::Display for AllocatorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocatorMode::Linear => write!(f, "linear"),
            AllocatorMode::Buddy => write!(f, "buddy"),
        }
    }
}

/// Allocator errors. None of these are fatal; the failed operation is a
/// no-op and the session continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocError {
    #[error("allocation size must be positive")]
    InvalidSize,

    #[error("no free block large enough for {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("no allocated block at address {addr:#x}")]
    UnknownAddress { addr: usize },

    #[error("no block with id {0}")]
    UnknownId(BlockId),
}

/// A successful allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub id: BlockId,
    pub addr: usize,
}

/// A successful free, reported back to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FreedBlock {
    pub id: BlockId,
    pub addr: usize,
    /// Size of the block that was released (for the buddy allocator, the
    /// rounded power-of-two size).
    pub size: usize,
}

/// Request counters shared by both allocator engines.
#[derive(Debug, Default, Clone, Serialize)]
pub struct AllocCounters {
    pub requests: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl AllocCounters {
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.succeeded as f64 * 100.0 / self.requests as f64
        }
    }
}
