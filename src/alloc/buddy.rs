//! Binary-buddy allocator.
//!
//! Free space lives on per-order free lists, where order `k` holds blocks
//! of `2^k` bytes. Allocation pops the smallest order that fits, splitting
//! larger blocks downward; freeing merges a block with its buddy (the block
//! at `addr XOR 2^k`) as long as the buddy is free at the same order.
//! External fragmentation is structurally zero; what an allocation wastes
//! is the internal slack `2^k - requested`.

use std::collections::{HashMap, VecDeque};

use log::{debug, warn};
use serde::Serialize;

use super::{AllocCounters, AllocError, Allocation, BlockId, FreedBlock};
use crate::config::ConfigError;

/// Bookkeeping for one live allocation.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BuddyBlock {
    pub order: u32,
    pub requested: usize,
    pub id: BlockId,
}

/// One row of the free-list dump.
#[derive(Debug, Clone, Serialize)]
pub struct FreeListEntry {
    pub order: u32,
    pub block_size: usize,
    pub addrs: Vec<usize>,
}

/// One row of the allocation-table dump.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AllocationEntry {
    pub addr: usize,
    pub order: u32,
    pub block_size: usize,
    pub requested: usize,
    pub id: BlockId,
}

/// Buddy allocator statistics.
#[derive(Debug, Clone, Serialize)]
pub struct BuddyStats {
    #[serde(flatten)]
    pub counters: AllocCounters,
    pub success_rate_pct: f64,
    pub used_bytes: usize,
    pub total_bytes: usize,
    pub utilization_pct: f64,
    pub live_allocations: usize,
    /// Sum of `2^order - requested` over live allocations.
    pub internal_frag_bytes: usize,
    /// Internal fragmentation as a share of used bytes.
    pub internal_frag_pct: f64,
}

pub struct BuddyAllocator {
    total_size: usize,
    min_order: u32,
    max_order: u32,
    used: usize,
    /// Indexed by order `0..=max_order`; orders below `min_order` stay empty.
    free_lists: Vec<VecDeque<usize>>,
    allocations: HashMap<usize, BuddyBlock>,
    next_id: BlockId,
    counters: AllocCounters,
}

impl BuddyAllocator {
    /// Create an allocator over `[0, total_size)` with the given minimum
    /// block size. Both must be powers of two.
    pub fn new(total_size: usize, min_block: usize) -> Result<Self, ConfigError> {
        if total_size == 0 {
            return Err(ConfigError::NonPositive { what: "RAM size" });
        }
        if !total_size.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                what: "RAM size",
                value: total_size,
            });
        }
        if !min_block.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                what: "minimum block size",
                value: min_block,
            });
        }
        if min_block > total_size {
            return Err(ConfigError::MinBlockTooLarge {
                min: min_block,
                ram: total_size,
            });
        }

        let max_order = total_size.trailing_zeros();
        let mut free_lists = vec![VecDeque::new(); max_order as usize + 1];
        free_lists[max_order as usize].push_back(0);

        Ok(Self {
            total_size,
            min_order: min_block.trailing_zeros(),
            max_order,
            used: 0,
            free_lists,
            allocations: HashMap::new(),
            next_id: 1,
            counters: AllocCounters::default(),
        })
    }

    /// Smallest order whose block holds `size` bytes, clamped to the
    /// configured minimum.
    fn order_for(&self, size: usize) -> u32 {
        size.next_power_of_two()
            .trailing_zeros()
            .max(self.min_order)
    }

    /// Allocate the smallest power-of-two block that holds `size` bytes.
    pub fn alloc(&mut self, size: usize) -> Result<Allocation, AllocError> {
        self.counters.requests += 1;
        if size == 0 {
            self.counters.failed += 1;
            return Err(AllocError::InvalidSize);
        }
        if size > self.total_size {
            self.counters.failed += 1;
            return Err(AllocError::OutOfMemory { requested: size });
        }

        let order = self.order_for(size);

        // Pop the head of the smallest non-empty list at or above `order`,
        // then split downward, keeping the lower half each time.
        let mut current = order;
        let addr = loop {
            if current > self.max_order {
                self.counters.failed += 1;
                warn!("buddy: no free block for {} bytes (order {})", size, order);
                return Err(AllocError::OutOfMemory { requested: size });
            }
            if let Some(addr) = self.free_lists[current as usize].pop_front() {
                break addr;
            }
            current += 1;
        };

        while current > order {
            current -= 1;
            let upper = addr + (1usize << current);
            self.free_lists[current as usize].push_back(upper);
            debug!("buddy: split, upper half {:#x} to order {}", upper, current);
        }

        let id = self.next_id;
        self.next_id += 1;
        self.allocations.insert(
            addr,
            BuddyBlock {
                order,
                requested: size,
                id,
            },
        );
        self.used += 1usize << order;
        self.counters.succeeded += 1;
        Ok(Allocation { id, addr })
    }

    /// Free the allocation at `addr`, merging with its buddy upward for as
    /// long as the buddy is free at the same order.
    pub fn free(&mut self, addr: usize) -> Result<FreedBlock, AllocError> {
        let Some(block) = self.allocations.remove(&addr) else {
            warn!("buddy: free of unknown address {:#x}", addr);
            return Err(AllocError::UnknownAddress { addr });
        };
        self.used -= 1usize << block.order;

        let mut merged = addr;
        let mut order = block.order;
        while order < self.max_order {
            let buddy = merged ^ (1usize << order);
            let list = &mut self.free_lists[order as usize];
            let Some(pos) = list.iter().position(|&a| a == buddy) else {
                break;
            };
            list.remove(pos);
            merged = merged.min(buddy);
            order += 1;
            debug!("buddy: merged with {:#x} into order {}", buddy, order);
        }

        debug_assert_eq!(merged % (1usize << order), 0, "misaligned buddy block");
        self.free_lists[order as usize].push_back(merged);

        Ok(FreedBlock {
            id: block.id,
            addr,
            size: 1usize << block.order,
        })
    }

    /// Start address of the live allocation with the given id.
    pub fn start_of(&self, id: BlockId) -> Option<usize> {
        self.allocations
            .iter()
            .find(|(_, b)| b.id == id)
            .map(|(&addr, _)| addr)
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn used_bytes(&self) -> usize {
        self.used
    }

    pub fn min_order(&self) -> u32 {
        self.min_order
    }

    pub fn max_order(&self) -> u32 {
        self.max_order
    }

    /// Sum of the slack between each block's power-of-two size and what was
    /// actually requested.
    pub fn internal_fragmentation(&self) -> usize {
        self.allocations
            .values()
            .map(|b| (1usize << b.order) - b.requested)
            .sum()
    }

    /// Non-empty free lists, lowest order first.
    pub fn free_list_summary(&self) -> Vec<FreeListEntry> {
        self.free_lists
            .iter()
            .enumerate()
            .filter(|(_, list)| !list.is_empty())
            .map(|(order, list)| FreeListEntry {
                order: order as u32,
                block_size: 1usize << order,
                addrs: list.iter().copied().collect(),
            })
            .collect()
    }

    /// Live allocations ordered by address.
    pub fn allocation_table(&self) -> Vec<AllocationEntry> {
        let mut rows: Vec<AllocationEntry> = self
            .allocations
            .iter()
            .map(|(&addr, b)| AllocationEntry {
                addr,
                order: b.order,
                block_size: 1usize << b.order,
                requested: b.requested,
                id: b.id,
            })
            .collect();
        rows.sort_by_key(|r| r.addr);
        rows
    }

    pub fn stats(&self) -> BuddyStats {
        let internal = self.internal_fragmentation();
        BuddyStats {
            counters: self.counters.clone(),
            success_rate_pct: self.counters.success_rate(),
            used_bytes: self.used,
            total_bytes: self.total_size,
            utilization_pct: if self.total_size == 0 {
                0.0
            } else {
                self.used as f64 * 100.0 / self.total_size as f64
            },
            live_allocations: self.allocations.len(),
            internal_frag_bytes: internal,
            internal_frag_pct: if self.used == 0 {
                0.0
            } else {
                internal as f64 * 100.0 / self.used as f64
            },
        }
    }
}
