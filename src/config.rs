//! Simulator configuration.
//!
//! A [`SimConfig`] describes one simulated machine: the size of its physical
//! address space, the page size used by the virtual-memory subsystem, the
//! geometry of the two cache levels, and the latency charged at each point
//! of the access path. The configuration is validated once, up front; the
//! engines assume a valid configuration afterwards.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheParams;

/// Default cycle cost of an L1 probe.
pub const DEFAULT_L1_LATENCY: u64 = 1;
/// Default cycle cost of an L2 probe.
pub const DEFAULT_L2_LATENCY: u64 = 5;
/// Default cycle penalty for going to main memory.
pub const DEFAULT_MEM_PENALTY: u64 = 50;
/// Default cycle penalty charged per page fault.
pub const DEFAULT_DISK_PENALTY: u64 = 200;
/// Default minimum block size of the buddy allocator.
pub const DEFAULT_MIN_BLOCK: usize = 16;

/// Configuration errors. These reject the offending command; the session
/// itself keeps running.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{what} must be positive")]
    NonPositive { what: &'static str },

    #[error("RAM size {ram} is not a multiple of page size {page}")]
    RamNotPageMultiple { ram: usize, page: usize },

    #[error("{what} must be a power of two (got {value})")]
    NotPowerOfTwo { what: &'static str, value: usize },

    #[error("minimum block size {min} exceeds RAM size {ram}")]
    MinBlockTooLarge { min: usize, ram: usize },

    #[error("cache {name}: size {size} is not a multiple of block size {block} x associativity {ways}")]
    CacheGeometry {
        name: String,
        size: usize,
        block: usize,
        ways: usize,
    },
}

/// Full configuration of one simulated machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Physical address space size in bytes.
    pub ram_size: usize,
    /// Page size in bytes.
    pub page_size: usize,
    /// Minimum block size handed out by the buddy allocator.
    pub min_block: usize,
    pub l1: CacheParams,
    pub l2: CacheParams,
    /// Cycles charged when the last cache level misses.
    pub mem_penalty: u64,
    /// Cycles charged per page fault.
    pub disk_penalty: u64,
}

impl SimConfig {
    /// Check the invariants every engine relies on.
    ///
    /// RAM must be a positive multiple of the page size, and a power of two
    /// because the buddy allocator always covers the whole address space.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ram_size == 0 {
            return Err(ConfigError::NonPositive { what: "RAM size" });
        }
        if self.page_size == 0 {
            return Err(ConfigError::NonPositive { what: "page size" });
        }
        if self.ram_size % self.page_size != 0 {
            return Err(ConfigError::RamNotPageMultiple {
                ram: self.ram_size,
                page: self.page_size,
            });
        }
        if !self.ram_size.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                what: "RAM size",
                value: self.ram_size,
            });
        }
        if !self.min_block.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                what: "minimum block size",
                value: self.min_block,
            });
        }
        if self.min_block > self.ram_size {
            return Err(ConfigError::MinBlockTooLarge {
                min: self.min_block,
                ram: self.ram_size,
            });
        }
        self.l1.validate()?;
        self.l2.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ReplacementPolicy;

    fn cache(name: &str, size: usize, block: usize, ways: usize, cost: u64) -> CacheParams {
        CacheParams {
            name: name.to_string(),
            size,
            block_size: block,
            associativity: ways,
            access_cost: cost,
            policy: ReplacementPolicy::Fifo,
        }
    }

    fn base() -> SimConfig {
        SimConfig {
            ram_size: 1024,
            page_size: 256,
            min_block: 16,
            l1: cache("L1", 128, 64, 2, 1),
            l2: cache("L2", 512, 64, 4, 5),
            mem_penalty: 50,
            disk_penalty: 200,
        }
    }

    #[test]
    fn accepts_valid_config() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn rejects_zero_ram() {
        let mut cfg = base();
        cfg.ram_size = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::NonPositive { what: "RAM size" })
        ));
    }

    #[test]
    fn rejects_ram_not_multiple_of_page() {
        let mut cfg = base();
        cfg.page_size = 300;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::RamNotPageMultiple { .. })
        ));
    }

    #[test]
    fn rejects_non_power_of_two_ram() {
        let mut cfg = base();
        cfg.ram_size = 1536;
        cfg.page_size = 256;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::NotPowerOfTwo { .. })
        ));
    }

    #[test]
    fn rejects_bad_cache_geometry() {
        let mut cfg = base();
        cfg.l1.size = 100;
        assert!(matches!(cfg.validate(), Err(ConfigError::CacheGeometry { .. })));
    }
}
