//! memsim - Memory Hierarchy Simulator
//!
//! An educational simulator of an operating-system memory hierarchy. Every
//! address is an integer offset into a simulated byte space; no real memory
//! is handed out. Against one configured "physical" address space the crate
//! models four subsystems:
//!
//! - **Linear allocator** - ordered block list with first-fit / best-fit /
//!   worst-fit placement, exact splits, and coalescing on free
//! - **Buddy allocator** - power-of-two free lists, split-on-alloc,
//!   XOR-buddy merge-on-free
//! - **Virtual memory** - per-process page tables, demand paging, and
//!   global-LRU frame eviction with a disk penalty per fault
//! - **Cache hierarchy** - two set-associative levels (FIFO/LRU/LFU) in
//!   front of a fixed main-memory penalty
//!
//! The [`system::System`] aggregate ties them together: it routes a
//! `(pid, vaddr)` access through translation into the caches and keeps the
//! global cycle counter. The CLI in [`cli`] is one possible driver; any
//! harness calling the same operations gets the same deterministic trace
//! of hits, misses, faults, evictions, splits, and merges.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use memsim::config::SimConfig;
//! use memsim::system::{AllocRequest, System};
//!
//! let mut sys = System::new(config)?;
//! let block = sys.alloc(AllocRequest::Buddy, 100)?;
//! sys.vm_init(1, 4096)?;
//! let routed = sys.vm_access(1, 0)?;
//! println!("{:?} in {} cycles", routed.served_by, routed.cache_cycles);
//! ```

// Core engines
pub mod alloc;
pub mod cache;
pub mod config;
pub mod system;
pub mod vm;

// Command-line driver
pub mod cli;

// Re-exports for driver code
pub use alloc::{AllocError, Allocation, AllocatorMode, BlockId, FreedBlock};
pub use cache::{CacheLevel, CacheParams, ReplacementPolicy};
pub use cli::{CliConfig, OutputFormat};
pub use config::{ConfigError, SimConfig};
pub use system::{AllocRequest, CacheOutcome, System, SystemError};
pub use vm::{PageOutcome, Pid, Translation, VirtualMemory, VmError};

/// memsim version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
