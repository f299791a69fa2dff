//! Demand-paged virtual memory.
//!
//! Each process owns a page table sized by its declared virtual size;
//! physical memory is a flat array of frames shared by every process. An
//! access either hits (the page is resident) or faults, in which case a
//! frame is claimed: the first free frame if one exists, otherwise the
//! frame holding the globally least-recently-used page, whose owner loses
//! the mapping. Every fault charges the configured disk penalty.
//!
//! Re-initializing an existing pid replaces its page table without
//! reclaiming the frames the old table held; those frames stay assigned
//! until another fault evicts them.

use std::collections::HashMap;

use log::{debug, warn};
use serde::Serialize;
use thiserror::Error;

/// Process identifier.
pub type Pid = u32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VmError {
    #[error("no process with pid {0}; run vm_init first")]
    UnknownProcess(Pid),

    #[error("invalid virtual address {vaddr} for pid {pid}: page {page} out of {num_pages}")]
    InvalidAddress {
        pid: Pid,
        vaddr: usize,
        page: usize,
        num_pages: usize,
    },

    #[error("virtual size {size} is not a positive multiple of page size {page_size}")]
    BadVirtualSize { size: usize, page_size: usize },
}

/// One page-table slot. The page is resident exactly when `frame` is set.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PageTableEntry {
    pub frame: Option<usize>,
    pub last_used: u64,
}

impl PageTableEntry {
    pub fn is_valid(&self) -> bool {
        self.frame.is_some()
    }
}

struct Process {
    table: Vec<PageTableEntry>,
}

/// A page displaced by a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Eviction {
    pub pid: Pid,
    pub page: usize,
    pub frame: usize,
}

/// What happened on one translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PageOutcome {
    Hit {
        frame: usize,
    },
    Fault {
        evicted: Option<Eviction>,
        frame: usize,
    },
}

/// Result of a successful translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Translation {
    pub pid: Pid,
    pub page: usize,
    pub paddr: usize,
    /// Cycles charged by this translation (the disk penalty on a fault,
    /// zero on a hit).
    pub cycles: u64,
    pub outcome: PageOutcome,
}

/// Per-process frame usage, for stats.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProcessFrames {
    pub pid: Pid,
    pub frames_used: usize,
    pub num_pages: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct VmStats {
    pub page_hits: u64,
    pub page_faults: u64,
    pub fault_rate_pct: f64,
    pub disk_penalty: u64,
    pub total_frames: usize,
    pub per_process: Vec<ProcessFrames>,
}

pub struct VirtualMemory {
    page_size: usize,
    num_frames: usize,
    /// Which pid currently occupies each frame, if any.
    frame_owner: Vec<Option<Pid>>,
    processes: HashMap<Pid, Process>,
    tick: u64,
    page_hits: u64,
    page_faults: u64,
    disk_penalty: u64,
}

impl VirtualMemory {
    pub fn new(physical_size: usize, page_size: usize, disk_penalty: u64) -> Self {
        debug_assert!(page_size > 0 && physical_size % page_size == 0);
        let num_frames = physical_size / page_size;
        Self {
            page_size,
            num_frames,
            frame_owner: vec![None; num_frames],
            processes: HashMap::new(),
            tick: 0,
            page_hits: 0,
            page_faults: 0,
            disk_penalty,
        }
    }

    /// Create (or replace) the page table for `pid`. Returns the number of
    /// pages in the new table.
    pub fn init_process(&mut self, pid: Pid, virtual_size: usize) -> Result<usize, VmError> {
        if virtual_size == 0 || virtual_size % self.page_size != 0 {
            return Err(VmError::BadVirtualSize {
                size: virtual_size,
                page_size: self.page_size,
            });
        }
        let num_pages = virtual_size / self.page_size;
        if self
            .processes
            .insert(
                pid,
                Process {
                    table: vec![PageTableEntry::default(); num_pages],
                },
            )
            .is_some()
        {
            warn!(
                "vm: pid {} re-initialized; frames held by the old table are not reclaimed",
                pid
            );
        }
        Ok(num_pages)
    }

    /// Translate `(pid, vaddr)` to a physical address, faulting the page in
    /// if needed.
    pub fn access(&mut self, pid: Pid, vaddr: usize) -> Result<Translation, VmError> {
        self.tick += 1;
        let page = vaddr / self.page_size;
        let offset = vaddr % self.page_size;

        let proc = self
            .processes
            .get_mut(&pid)
            .ok_or(VmError::UnknownProcess(pid))?;
        let num_pages = proc.table.len();
        if page >= num_pages {
            return Err(VmError::InvalidAddress {
                pid,
                vaddr,
                page,
                num_pages,
            });
        }

        if let Some(frame) = proc.table[page].frame {
            proc.table[page].last_used = self.tick;
            self.page_hits += 1;
            debug!("vm: page hit pid {} page {} frame {}", pid, page, frame);
            return Ok(Translation {
                pid,
                page,
                paddr: frame * self.page_size + offset,
                cycles: 0,
                outcome: PageOutcome::Hit { frame },
            });
        }

        self.page_faults += 1;
        let frame = self.choose_victim();
        let evicted = self.evict_resident(frame);
        debug!(
            "vm: page fault pid {} page {} -> frame {} (evicted {:?})",
            pid, page, frame, evicted
        );

        self.frame_owner[frame] = Some(pid);
        if let Some(proc) = self.processes.get_mut(&pid) {
            proc.table[page] = PageTableEntry {
                frame: Some(frame),
                last_used: self.tick,
            };
        }

        Ok(Translation {
            pid,
            page,
            paddr: frame * self.page_size + offset,
            cycles: self.disk_penalty,
            outcome: PageOutcome::Fault { evicted, frame },
        })
    }

    /// First free frame if any, otherwise the frame of the page with the
    /// smallest `last_used` tick across all processes. Ties fall to the
    /// lowest frame index because the scan runs in frame order.
    fn choose_victim(&self) -> usize {
        let mut victim = 0;
        let mut oldest = u64::MAX;
        for (frame, owner) in self.frame_owner.iter().enumerate() {
            let Some(pid) = owner else {
                return frame;
            };
            let Some(proc) = self.processes.get(pid) else {
                continue;
            };
            for entry in &proc.table {
                if entry.frame == Some(frame) && entry.last_used < oldest {
                    oldest = entry.last_used;
                    victim = frame;
                }
            }
        }
        victim
    }

    /// Invalidate the page-table entry of whichever page currently occupies
    /// `frame`, reporting the eviction.
    fn evict_resident(&mut self, frame: usize) -> Option<Eviction> {
        let owner = self.frame_owner[frame]?;
        let proc = self.processes.get_mut(&owner)?;
        let page = proc.table.iter().position(|e| e.frame == Some(frame))?;
        proc.table[page].frame = None;
        Some(Eviction {
            pid: owner,
            page,
            frame,
        })
    }

    /// The page table of `pid`, for dumps.
    pub fn page_table(&self, pid: Pid) -> Result<&[PageTableEntry], VmError> {
        self.processes
            .get(&pid)
            .map(|p| p.table.as_slice())
            .ok_or(VmError::UnknownProcess(pid))
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn frames_used(&self, pid: Pid) -> usize {
        self.processes
            .get(&pid)
            .map(|p| p.table.iter().filter(|e| e.is_valid()).count())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> VmStats {
        let total = self.page_hits + self.page_faults;
        let mut pids: Vec<Pid> = self.processes.keys().copied().collect();
        pids.sort_unstable();
        VmStats {
            page_hits: self.page_hits,
            page_faults: self.page_faults,
            fault_rate_pct: if total == 0 {
                0.0
            } else {
                self.page_faults as f64 * 100.0 / total as f64
            },
            disk_penalty: self.disk_penalty,
            total_frames: self.num_frames,
            per_process: pids
                .into_iter()
                .map(|pid| ProcessFrames {
                    pid,
                    frames_used: self.frames_used(pid),
                    num_pages: self.processes[&pid].table.len(),
                })
                .collect(),
        }
    }
}
