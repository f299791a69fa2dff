//! The simulated machine.
//!
//! A [`System`] owns one of everything: both allocators, the virtual-memory
//! subsystem, the cache hierarchy (L1 owning L2), and the global cycle
//! counter. Construction from a validated [`SimConfig`] is the `init`
//! barrier - building a new `System` releases all previous state at once.
//!
//! The first allocation after init locks the allocator mode (linear or
//! buddy) for the rest of the session; cross-mode allocations are rejected
//! until the next init. Frees route by block id, so the two allocators'
//! address spaces never collide at the command surface.

use serde::Serialize;
use thiserror::Error;

use crate::alloc::buddy::{AllocationEntry, BuddyAllocator, BuddyStats, FreeListEntry};
use crate::alloc::linear::{Block, LinearAllocator, LinearStats, Placement};
use crate::alloc::{AllocError, Allocation, AllocatorMode, BlockId, FreedBlock};
use crate::cache::{CacheLevel, CacheStats};
use crate::config::{ConfigError, SimConfig};
use crate::vm::{PageTableEntry, Pid, Translation, VirtualMemory, VmError, VmStats};

#[derive(Debug, Error)]
pub enum SystemError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Alloc(#[from] AllocError),

    #[error(transparent)]
    Vm(#[from] VmError),

    #[error("allocator mode is locked to {locked} until the next init")]
    ModeLocked { locked: AllocatorMode },
}

/// An allocation request as issued by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocRequest {
    Linear(Placement),
    Buddy,
}

impl AllocRequest {
    pub fn mode(self) -> AllocatorMode {
        match self {
            AllocRequest::Linear(_) => AllocatorMode::Linear,
            AllocRequest::Buddy => AllocatorMode::Buddy,
        }
    }
}

impl std::str::FromStr for AllocRequest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ff" => Ok(AllocRequest::Linear(Placement::FirstFit)),
            "bf" => Ok(AllocRequest::Linear(Placement::BestFit)),
            "wf" => Ok(AllocRequest::Linear(Placement::WorstFit)),
            "buddy" => Ok(AllocRequest::Buddy),
            _ => Err(format!("unknown allocation mode: {} (ff|bf|wf|buddy)", s)),
        }
    }
}

/// Which part of the hierarchy served a routed access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    L1Hit,
    L2Hit,
    MainMemory,
}

/// A translation routed through the cache hierarchy.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RoutedAccess {
    pub translation: Translation,
    pub cache_cycles: u64,
    pub served_by: CacheOutcome,
}

/// Aggregate statistics over every subsystem.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub mode: Option<AllocatorMode>,
    pub linear: LinearStats,
    pub buddy: BuddyStats,
    pub vm: VmStats,
    pub caches: Vec<CacheStats>,
    pub total_cycles: u64,
    /// Average cycles per routed access spent in the cache hierarchy.
    pub avg_access_cycles: f64,
}

/// Snapshot of both allocators' layouts.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryDump {
    pub mode: Option<AllocatorMode>,
    pub linear_blocks: Vec<Block>,
    pub buddy_free_lists: Vec<FreeListEntry>,
    pub buddy_allocations: Vec<AllocationEntry>,
}

/// Page table of one process, for dumps.
#[derive(Debug, Clone, Serialize)]
pub struct PageTableDump {
    pub pid: Pid,
    pub entries: Vec<PageTableEntry>,
}

pub struct System {
    config: SimConfig,
    linear: LinearAllocator,
    buddy: BuddyAllocator,
    vm: VirtualMemory,
    /// L1; owns L2 through its successor link.
    l1: CacheLevel,
    mode: Option<AllocatorMode>,
    total_cycles: u64,
    routed_accesses: u64,
    routed_cache_cycles: u64,
}

impl System {
    /// Build a fresh machine. All counters start at zero and no allocator
    /// mode is chosen yet.
    pub fn new(config: SimConfig) -> Result<Self, SystemError> {
        config.validate()?;
        let l2 = CacheLevel::new(config.l2.clone(), config.mem_penalty, None)?;
        let l1 = CacheLevel::new(config.l1.clone(), config.mem_penalty, Some(Box::new(l2)))?;
        Ok(Self {
            linear: LinearAllocator::new(config.ram_size),
            buddy: BuddyAllocator::new(config.ram_size, config.min_block)?,
            vm: VirtualMemory::new(config.ram_size, config.page_size, config.disk_penalty),
            l1,
            mode: None,
            total_cycles: 0,
            routed_accesses: 0,
            routed_cache_cycles: 0,
            config,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// The allocator mode this session is locked to, if any.
    pub fn mode(&self) -> Option<AllocatorMode> {
        self.mode
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Allocate through the requested engine. The first request after init
    /// locks the mode, whether or not the allocation itself succeeds.
    pub fn alloc(&mut self, request: AllocRequest, size: usize) -> Result<Allocation, SystemError> {
        let requested = request.mode();
        if let Some(locked) = self.mode {
            if locked != requested {
                return Err(SystemError::ModeLocked { locked });
            }
        }
        self.mode = Some(requested);

        let allocation = match request {
            AllocRequest::Linear(strategy) => {
                self.linear.set_strategy(strategy);
                self.linear.alloc(size)?
            }
            AllocRequest::Buddy => self.buddy.alloc(size)?,
        };
        Ok(allocation)
    }

    /// Free by block id, routed to whichever allocator issued the id.
    pub fn free(&mut self, id: BlockId) -> Result<FreedBlock, SystemError> {
        if let Some(addr) = self.linear.start_of(id) {
            return Ok(self.linear.free(addr)?);
        }
        if let Some(addr) = self.buddy.start_of(id) {
            return Ok(self.buddy.free(addr)?);
        }
        Err(SystemError::Alloc(AllocError::UnknownId(id)))
    }

    pub fn vm_init(&mut self, pid: Pid, virtual_size: usize) -> Result<usize, SystemError> {
        Ok(self.vm.init_process(pid, virtual_size)?)
    }

    /// Translate a virtual address and push the physical address through
    /// the cache hierarchy, charging the global cycle counter for both.
    pub fn vm_access(&mut self, pid: Pid, vaddr: usize) -> Result<RoutedAccess, SystemError> {
        let translation = self.vm.access(pid, vaddr)?;
        self.total_cycles += translation.cycles;

        let cache_cycles = self.l1.access(translation.paddr);
        self.total_cycles += cache_cycles;
        self.routed_accesses += 1;
        self.routed_cache_cycles += cache_cycles;

        let l1_cost = self.l1.access_cost();
        let l2_cost = self
            .l1
            .next_level()
            .map(|l| l.access_cost())
            .unwrap_or_default();
        let served_by = if cache_cycles == l1_cost {
            CacheOutcome::L1Hit
        } else if cache_cycles == l1_cost + l2_cost {
            CacheOutcome::L2Hit
        } else {
            CacheOutcome::MainMemory
        };

        Ok(RoutedAccess {
            translation,
            cache_cycles,
            served_by,
        })
    }

    pub fn vm_table(&self, pid: Pid) -> Result<PageTableDump, SystemError> {
        let entries = self.vm.page_table(pid)?.to_vec();
        Ok(PageTableDump { pid, entries })
    }

    pub fn stats(&self) -> SystemStats {
        SystemStats {
            mode: self.mode,
            linear: self.linear.stats(),
            buddy: self.buddy.stats(),
            vm: self.vm.stats(),
            caches: self.l1.stats_chain(),
            total_cycles: self.total_cycles,
            avg_access_cycles: if self.routed_accesses == 0 {
                0.0
            } else {
                self.routed_cache_cycles as f64 / self.routed_accesses as f64
            },
        }
    }

    pub fn dump(&self) -> MemoryDump {
        MemoryDump {
            mode: self.mode,
            linear_blocks: self.linear.blocks().to_vec(),
            buddy_free_lists: self.buddy.free_list_summary(),
            buddy_allocations: self.buddy.allocation_table(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheParams, ReplacementPolicy};

    /// RAM 1024, page 256, L1 {128, 64, 2, cost 1, FIFO},
    /// L2 {512, 64, 4, cost 5, FIFO}, memory 50, disk 200.
    fn config() -> SimConfig {
        SimConfig {
            ram_size: 1024,
            page_size: 256,
            min_block: 128,
            l1: CacheParams {
                name: "L1".to_string(),
                size: 128,
                block_size: 64,
                associativity: 2,
                access_cost: 1,
                policy: ReplacementPolicy::Fifo,
            },
            l2: CacheParams {
                name: "L2".to_string(),
                size: 512,
                block_size: 64,
                associativity: 4,
                access_cost: 5,
                policy: ReplacementPolicy::Fifo,
            },
            mem_penalty: 50,
            disk_penalty: 200,
        }
    }

    fn system() -> System {
        System::new(config()).unwrap()
    }

    #[test]
    fn rejects_invalid_configuration() {
        let mut cfg = config();
        cfg.ram_size = 1000; // not a power of two, not a page multiple
        assert!(matches!(
            System::new(cfg),
            Err(SystemError::Config(ConfigError::RamNotPageMultiple { .. }))
        ));
    }

    #[test]
    fn first_alloc_locks_the_mode() {
        let mut sys = system();
        sys.alloc(AllocRequest::Linear(Placement::BestFit), 100)
            .unwrap();
        assert_eq!(sys.mode(), Some(AllocatorMode::Linear));
        // Cross-mode allocation is rejected until the next init.
        assert!(matches!(
            sys.alloc(AllocRequest::Buddy, 100),
            Err(SystemError::ModeLocked {
                locked: AllocatorMode::Linear
            })
        ));
        // Same-mode allocation with another strategy is fine.
        sys.alloc(AllocRequest::Linear(Placement::FirstFit), 100)
            .unwrap();
    }

    #[test]
    fn failed_first_alloc_still_locks_the_mode() {
        let mut sys = system();
        assert!(sys.alloc(AllocRequest::Buddy, 4096).is_err());
        assert_eq!(sys.mode(), Some(AllocatorMode::Buddy));
        assert!(matches!(
            sys.alloc(AllocRequest::Linear(Placement::FirstFit), 64),
            Err(SystemError::ModeLocked {
                locked: AllocatorMode::Buddy
            })
        ));
    }

    #[test]
    fn free_routes_by_id() {
        let mut sys = system();
        let a = sys
            .alloc(AllocRequest::Linear(Placement::FirstFit), 200)
            .unwrap();
        let freed = sys.free(a.id).unwrap();
        assert_eq!(freed.addr, a.addr);
        assert!(matches!(
            sys.free(a.id),
            Err(SystemError::Alloc(AllocError::UnknownId(_)))
        ));
    }

    #[test]
    fn free_of_unknown_id_is_a_noop() {
        let mut sys = system();
        assert!(matches!(
            sys.free(42),
            Err(SystemError::Alloc(AllocError::UnknownId(42)))
        ));
        assert_eq!(sys.stats().linear.counters.requests, 0);
    }

    #[test]
    fn vm_access_routes_through_cache_hierarchy() {
        let mut sys = system();
        sys.vm_init(1, 1024).unwrap();

        // Cold access: page fault (disk 200) + L1 miss + L2 miss + memory.
        let routed = sys.vm_access(1, 0).unwrap();
        assert_eq!(routed.served_by, CacheOutcome::MainMemory);
        assert_eq!(routed.cache_cycles, 1 + 5 + 50);
        assert_eq!(sys.total_cycles(), 200 + 56);

        // Same page, same line: page hit + L1 hit.
        let routed = sys.vm_access(1, 4).unwrap();
        assert_eq!(routed.served_by, CacheOutcome::L1Hit);
        assert_eq!(routed.cache_cycles, 1);
        assert_eq!(sys.total_cycles(), 256 + 1);
    }

    #[test]
    fn l2_hit_is_classified() {
        let mut sys = system();
        sys.vm_init(1, 1024).unwrap();
        // Three distinct lines in the single L1 set overflow its two ways
        // but stay resident in the 4-way L2 set.
        sys.vm_access(1, 0).unwrap();
        sys.vm_access(1, 64).unwrap();
        sys.vm_access(1, 128).unwrap(); // evicts line 0 from L1 (FIFO)
        let routed = sys.vm_access(1, 0).unwrap();
        assert_eq!(routed.served_by, CacheOutcome::L2Hit);
        assert_eq!(routed.cache_cycles, 1 + 5);
    }

    #[test]
    fn cycles_are_monotonic_and_bounded_below() {
        let mut sys = system();
        sys.vm_init(1, 1024).unwrap();
        let mut last = sys.total_cycles();
        for vaddr in [0, 4, 64, 0, 128, 256, 300, 0] {
            sys.vm_access(1, vaddr).unwrap();
            let now = sys.total_cycles();
            // Every access charges at least the L1 probe cost.
            assert!(now >= last + 1);
            last = now;
        }
    }

    #[test]
    fn rejected_commands_charge_no_cycles() {
        let mut sys = system();
        sys.vm_init(1, 512).unwrap();
        let before = sys.total_cycles();
        assert!(sys.vm_access(1, 4096).is_err());
        assert!(sys.vm_access(9, 0).is_err());
        assert_eq!(sys.total_cycles(), before);
    }

    #[test]
    fn stats_aggregate_all_subsystems() {
        let mut sys = system();
        sys.alloc(AllocRequest::Linear(Placement::FirstFit), 100)
            .unwrap();
        sys.vm_init(1, 1024).unwrap();
        sys.vm_access(1, 0).unwrap();
        sys.vm_access(1, 4).unwrap();

        let stats = sys.stats();
        assert_eq!(stats.mode, Some(AllocatorMode::Linear));
        assert_eq!(stats.linear.counters.succeeded, 1);
        assert_eq!(stats.vm.page_faults, 1);
        assert_eq!(stats.vm.page_hits, 1);
        assert_eq!(stats.caches.len(), 2);
        assert_eq!(stats.caches[0].hits, 1);
        assert_eq!(stats.caches[0].misses, 1);
        // (56 + 1) / 2 routed accesses.
        assert!((stats.avg_access_cycles - 28.5).abs() < 1e-9);
    }

    #[test]
    fn dump_shows_live_allocator_state() {
        let mut sys = system();
        sys.alloc(AllocRequest::Buddy, 100).unwrap();
        let dump = sys.dump();
        assert_eq!(dump.mode, Some(AllocatorMode::Buddy));
        assert_eq!(dump.buddy_allocations.len(), 1);
        assert_eq!(dump.buddy_allocations[0].block_size, 128);
        // The untouched linear allocator is still one free block.
        assert_eq!(dump.linear_blocks.len(), 1);
    }

    #[test]
    fn reinit_resets_everything() {
        let mut sys = system();
        sys.alloc(AllocRequest::Buddy, 100).unwrap();
        sys.vm_init(1, 1024).unwrap();
        sys.vm_access(1, 0).unwrap();

        // The init barrier: a new System from the same config.
        sys = System::new(config()).unwrap();
        assert_eq!(sys.mode(), None);
        assert_eq!(sys.total_cycles(), 0);
        let stats = sys.stats();
        assert_eq!(stats.buddy.live_allocations, 0);
        assert_eq!(stats.vm.page_faults, 0);
    }
}
