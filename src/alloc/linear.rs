//! List-based allocator with configurable placement.
//!
//! The whole address space is an ordered sequence of blocks with no gaps.
//! Allocation scans the sequence for a free block per the active placement
//! strategy, splitting when the chosen block is larger than the request.
//! Freeing coalesces with free neighbors, so two adjacent blocks are never
//! both free.

use log::{debug, warn};
use serde::Serialize;

use super::{AllocCounters, AllocError, Allocation, BlockId, FreedBlock};

/// Placement strategy for subsequent allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    FirstFit,
    BestFit,
    WorstFit,
}

/// One contiguous range of the address space. A block is free exactly when
/// it carries no id.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Block {
    pub start: usize,
    pub size: usize,
    pub id: Option<BlockId>,
}

impl Block {
    pub fn is_free(&self) -> bool {
        self.id.is_none()
    }

    pub fn end(&self) -> usize {
        self.start + self.size
    }
}

/// Linear allocator statistics.
#[derive(Debug, Clone, Serialize)]
pub struct LinearStats {
    #[serde(flatten)]
    pub counters: AllocCounters,
    pub success_rate_pct: f64,
    pub utilization_pct: f64,
    /// Splits are exact, so allocated blocks waste nothing.
    pub internal_frag_bytes: usize,
    /// Free bytes outside the largest free block.
    pub external_frag_bytes: usize,
    /// External fragmentation as a share of all free bytes.
    pub external_frag_pct: f64,
}

pub struct LinearAllocator {
    blocks: Vec<Block>,
    total_size: usize,
    strategy: Placement,
    next_id: BlockId,
    counters: AllocCounters,
}

impl LinearAllocator {
    /// Create an allocator covering `[0, total_size)` as one free block.
    pub fn new(total_size: usize) -> Self {
        Self {
            blocks: vec![Block {
                start: 0,
                size: total_size,
                id: None,
            }],
            total_size,
            strategy: Placement::FirstFit,
            next_id: 1,
            counters: AllocCounters::default(),
        }
    }

    /// Change the placement rule for subsequent allocations.
    pub fn set_strategy(&mut self, strategy: Placement) {
        self.strategy = strategy;
    }

    pub fn strategy(&self) -> Placement {
        self.strategy
    }

    /// Allocate `size` bytes and return the new block's id and start.
    ///
    /// An exact fit reuses the block as-is; otherwise the chosen block is
    /// split, with the leftover inserted as a free block immediately after.
    /// Failure leaves the block sequence untouched.
    pub fn alloc(&mut self, size: usize) -> Result<Allocation, AllocError> {
        self.counters.requests += 1;
        if size == 0 {
            self.counters.failed += 1;
            return Err(AllocError::InvalidSize);
        }

        let Some(idx) = self.select(size) else {
            self.counters.failed += 1;
            warn!("linear: no free block fits {} bytes", size);
            return Err(AllocError::OutOfMemory { requested: size });
        };

        let id = self.next_id;
        self.next_id += 1;

        let start = self.blocks[idx].start;
        let chosen_size = self.blocks[idx].size;
        self.blocks[idx].id = Some(id);

        if chosen_size > size {
            self.blocks[idx].size = size;
            self.blocks.insert(
                idx + 1,
                Block {
                    start: start + size,
                    size: chosen_size - size,
                    id: None,
                },
            );
            debug!(
                "linear: split block at {:#x}, {} bytes used, {} byte hole",
                start,
                size,
                chosen_size - size
            );
        }

        self.counters.succeeded += 1;
        Ok(Allocation { id, addr: start })
    }

    /// Pick a qualifying free block per the active strategy. Ties break
    /// toward the lowest start address because the scan is in start order.
    fn select(&self, size: usize) -> Option<usize> {
        let mut chosen: Option<usize> = None;
        for (idx, block) in self.blocks.iter().enumerate() {
            if !block.is_free() || block.size < size {
                continue;
            }
            match self.strategy {
                Placement::FirstFit => return Some(idx),
                Placement::BestFit => {
                    if chosen.map_or(true, |c| block.size < self.blocks[c].size) {
                        chosen = Some(idx);
                    }
                }
                Placement::WorstFit => {
                    if chosen.map_or(true, |c| block.size > self.blocks[c].size) {
                        chosen = Some(idx);
                    }
                }
            }
        }
        chosen
    }

    /// Free the allocated block starting at `addr`, then coalesce with any
    /// free neighbor on either side.
    ///
    /// Freeing a free block or a non-boundary address is an error and a
    /// no-op.
    pub fn free(&mut self, addr: usize) -> Result<FreedBlock, AllocError> {
        let Some((mut idx, id)) = self
            .blocks
            .iter()
            .enumerate()
            .find_map(|(i, b)| match b.id {
                Some(id) if b.start == addr => Some((i, id)),
                _ => None,
            })
        else {
            warn!("linear: free of unknown address {:#x}", addr);
            return Err(AllocError::UnknownAddress { addr });
        };

        let size = self.blocks[idx].size;
        self.blocks[idx].id = None;

        if idx > 0 && self.blocks[idx - 1].is_free() {
            self.blocks[idx - 1].size += self.blocks[idx].size;
            self.blocks.remove(idx);
            idx -= 1;
            debug!("linear: coalesced with predecessor at {:#x}", self.blocks[idx].start);
        }
        if idx + 1 < self.blocks.len() && self.blocks[idx + 1].is_free() {
            self.blocks[idx].size += self.blocks[idx + 1].size;
            self.blocks.remove(idx + 1);
            debug!("linear: coalesced with successor at {:#x}", self.blocks[idx].start);
        }

        Ok(FreedBlock { id, addr, size })
    }

    /// Start address of the allocated block with the given id.
    pub fn start_of(&self, id: BlockId) -> Option<usize> {
        self.blocks
            .iter()
            .find(|b| b.id == Some(id))
            .map(|b| b.start)
    }

    /// The ordered block sequence, for dumps.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn free_bytes(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.is_free())
            .map(|b| b.size)
            .sum()
    }

    pub fn used_bytes(&self) -> usize {
        self.total_size - self.free_bytes()
    }

    /// Free bytes that are not part of the largest free block. With exact
    /// splits this is the only fragmentation the linear allocator has.
    pub fn external_fragmentation(&self) -> usize {
        let mut total = 0;
        let mut largest = 0;
        for block in self.blocks.iter().filter(|b| b.is_free()) {
            total += block.size;
            largest = largest.max(block.size);
        }
        total - largest
    }

    pub fn stats(&self) -> LinearStats {
        let free = self.free_bytes();
        let external = self.external_fragmentation();
        LinearStats {
            counters: self.counters.clone(),
            success_rate_pct: self.counters.success_rate(),
            utilization_pct: if self.total_size == 0 {
                0.0
            } else {
                self.used_bytes() as f64 * 100.0 / self.total_size as f64
            },
            internal_frag_bytes: 0,
            external_frag_bytes: external,
            external_frag_pct: if free == 0 {
                0.0
            } else {
                external as f64 * 100.0 / free as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The block sequence must always partition the address space, and no
    /// two neighbors may both be free.
    fn assert_partition(alloc: &LinearAllocator) {
        let blocks = alloc.blocks();
        assert_eq!(blocks[0].start, 0);
        for pair in blocks.windows(2) {
            assert_eq!(pair[1].start, pair[0].end(), "gap or overlap in sequence");
            assert!(
                !(pair[0].is_free() && pair[1].is_free()),
                "adjacent free blocks left uncoalesced"
            );
        }
        let total: usize = blocks.iter().map(|b| b.size).sum();
        assert_eq!(total, alloc.total_size());
    }

    #[test]
    fn first_fit_allocates_in_start_order() {
        let mut alloc = LinearAllocator::new(1024);
        let a = alloc.alloc(200).unwrap();
        let b = alloc.alloc(300).unwrap();
        assert_eq!(a.addr, 0);
        assert_eq!(b.addr, 200);
        assert_eq!((a.id, b.id), (1, 2));
        assert_partition(&alloc);
    }

    #[test]
    fn best_fit_picks_smallest_hole() {
        // alloc ff 200; alloc ff 300; free first; alloc bf 40 must land in
        // the 200-byte hole at 0, not in the tail hole after the 300.
        let mut alloc = LinearAllocator::new(1024);
        let a = alloc.alloc(200).unwrap();
        alloc.alloc(300).unwrap();
        alloc.free(a.addr).unwrap();
        alloc.set_strategy(Placement::BestFit);
        let c = alloc.alloc(40).unwrap();
        assert_eq!(c.addr, 0);
        assert_partition(&alloc);
    }

    #[test]
    fn worst_fit_picks_largest_hole() {
        let mut alloc = LinearAllocator::new(1024);
        let a = alloc.alloc(200).unwrap();
        alloc.alloc(300).unwrap();
        alloc.free(a.addr).unwrap();
        alloc.set_strategy(Placement::WorstFit);
        // Holes: 200 bytes at 0, 524 bytes at 500.
        let c = alloc.alloc(40).unwrap();
        assert_eq!(c.addr, 500);
        assert_partition(&alloc);
    }

    #[test]
    fn best_fit_tie_breaks_to_lowest_start() {
        let mut alloc = LinearAllocator::new(1024);
        let a = alloc.alloc(100).unwrap();
        let b = alloc.alloc(100).unwrap();
        let c = alloc.alloc(100).unwrap();
        alloc.alloc(100).unwrap();
        alloc.free(a.addr).unwrap();
        alloc.free(c.addr).unwrap();
        let _ = b;
        // Two 100-byte holes at 0 and 200; best fit must take the lower.
        alloc.set_strategy(Placement::BestFit);
        let d = alloc.alloc(100).unwrap();
        assert_eq!(d.addr, 0);
    }

    #[test]
    fn exact_fit_does_not_split() {
        let mut alloc = LinearAllocator::new(1024);
        alloc.alloc(1024).unwrap();
        assert_eq!(alloc.blocks().len(), 1);
        assert!(!alloc.blocks()[0].is_free());
    }

    #[test]
    fn failed_alloc_leaves_state_unchanged() {
        let mut alloc = LinearAllocator::new(1024);
        alloc.alloc(600).unwrap();
        let before: Vec<usize> = alloc.blocks().iter().map(|b| b.size).collect();
        assert_eq!(
            alloc.alloc(600),
            Err(AllocError::OutOfMemory { requested: 600 })
        );
        let after: Vec<usize> = alloc.blocks().iter().map(|b| b.size).collect();
        assert_eq!(before, after);
        assert_eq!(alloc.stats().counters.failed, 1);
    }

    #[test]
    fn zero_size_alloc_is_rejected() {
        let mut alloc = LinearAllocator::new(1024);
        assert_eq!(alloc.alloc(0), Err(AllocError::InvalidSize));
    }

    #[test]
    fn free_coalesces_both_neighbors() {
        let mut alloc = LinearAllocator::new(1024);
        let a = alloc.alloc(100).unwrap();
        let b = alloc.alloc(100).unwrap();
        let c = alloc.alloc(100).unwrap();
        alloc.free(a.addr).unwrap();
        alloc.free(c.addr).unwrap();
        // Freeing the middle block must merge all three holes plus the tail.
        alloc.free(b.addr).unwrap();
        assert_eq!(alloc.blocks().len(), 1);
        assert!(alloc.blocks()[0].is_free());
        assert_eq!(alloc.blocks()[0].size, 1024);
    }

    #[test]
    fn round_trip_returns_single_free_region() {
        let mut alloc = LinearAllocator::new(1024);
        let mut addrs = Vec::new();
        for size in [128, 64, 256, 32] {
            addrs.push(alloc.alloc(size).unwrap().addr);
        }
        // Free in an arbitrary non-allocation order.
        for &addr in &[addrs[2], addrs[0], addrs[3], addrs[1]] {
            alloc.free(addr).unwrap();
            assert_partition(&alloc);
        }
        assert_eq!(alloc.blocks().len(), 1);
        assert_eq!(alloc.blocks()[0].size, 1024);
    }

    #[test]
    fn double_free_is_an_error() {
        let mut alloc = LinearAllocator::new(1024);
        let a = alloc.alloc(100).unwrap();
        alloc.free(a.addr).unwrap();
        assert_eq!(
            alloc.free(a.addr),
            Err(AllocError::UnknownAddress { addr: a.addr })
        );
    }

    #[test]
    fn free_of_non_boundary_address_is_an_error() {
        let mut alloc = LinearAllocator::new(1024);
        alloc.alloc(100).unwrap();
        assert_eq!(alloc.free(50), Err(AllocError::UnknownAddress { addr: 50 }));
    }

    #[test]
    fn external_fragmentation_excludes_largest_hole() {
        let mut alloc = LinearAllocator::new(1024);
        let a = alloc.alloc(100).unwrap();
        alloc.alloc(100).unwrap();
        let c = alloc.alloc(100).unwrap();
        alloc.alloc(100).unwrap();
        alloc.free(a.addr).unwrap();
        alloc.free(c.addr).unwrap();
        // Holes: 100 at 0, 100 at 200, 624 at 400. Largest is 624.
        assert_eq!(alloc.external_fragmentation(), 200);
        let stats = alloc.stats();
        assert_eq!(stats.internal_frag_bytes, 0);
        assert!((stats.external_frag_pct - 200.0 * 100.0 / 824.0).abs() < 1e-9);
    }

    #[test]
    fn ids_stay_unique_across_reuse() {
        let mut alloc = LinearAllocator::new(1024);
        let a = alloc.alloc(100).unwrap();
        alloc.free(a.addr).unwrap();
        let b = alloc.alloc(100).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(alloc.start_of(b.id), Some(0));
        assert_eq!(alloc.start_of(a.id), None);
    }
}
