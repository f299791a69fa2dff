//! Set-associative cache levels.
//!
//! A [`CacheLevel`] is one cache in the hierarchy: a grid of
//! `num_sets x associativity` lines with a replacement policy and a fixed
//! probe cost. Levels chain by ownership - L1 owns L2 through its `next`
//! field - and the last level falls through to the configured main-memory
//! penalty. `access` returns the total cycles spent along the chain, which
//! is what lets the caller tell an L1 hit from an L2 hit from a trip to
//! main memory.
//!
//! Time is a per-level tick counter incremented on every access; FIFO, LRU
//! and LFU all read their ordering from it.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Replacement policy for a cache level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplacementPolicy {
    Fifo,
    Lru,
    Lfu,
}

impl std::str::FromStr for ReplacementPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fifo" => Ok(ReplacementPolicy::Fifo),
            "lru" => Ok(ReplacementPolicy::Lru),
            "lfu" => Ok(ReplacementPolicy::Lfu),
            _ => Err(format!("unknown replacement policy: {}", s)),
        }
    }
}

impl std::fmt::Display for ReplacementPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplacementPolicy::Fifo => write!(f, "FIFO"),
            ReplacementPolicy::Lru => write!(f, "LRU"),
            ReplacementPolicy::Lfu => write!(f, "LFU"),
        }
    }
}

/// Geometry and cost of one cache level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheParams {
    pub name: String,
    /// Total size in bytes.
    pub size: usize,
    /// Line size in bytes.
    pub block_size: usize,
    /// Ways per set (1 = direct mapped).
    pub associativity: usize,
    /// Cycles charged for probing this level.
    pub access_cost: u64,
    pub policy: ReplacementPolicy,
}

impl CacheParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.size == 0 {
            return Err(ConfigError::NonPositive { what: "cache size" });
        }
        if self.block_size == 0 {
            return Err(ConfigError::NonPositive { what: "cache block size" });
        }
        if self.associativity == 0 {
            return Err(ConfigError::NonPositive { what: "cache associativity" });
        }
        if self.size % (self.block_size * self.associativity) != 0 {
            return Err(ConfigError::CacheGeometry {
                name: self.name.clone(),
                size: self.size,
                block: self.block_size,
                ways: self.associativity,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CacheLine {
    valid: bool,
    tag: usize,
    inserted_at: u64,
    last_access: u64,
    frequency: u64,
}

/// Counters for one level.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub name: String,
    pub policy: ReplacementPolicy,
    pub size: usize,
    pub ways: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_ratio_pct: f64,
}

pub struct CacheLevel {
    params: CacheParams,
    num_sets: usize,
    sets: Vec<Vec<CacheLine>>,
    /// Cycles charged when this is the last level and it misses.
    mem_penalty: u64,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    next: Option<Box<CacheLevel>>,
}

impl CacheLevel {
    /// Build a level; `next` is the level below this one, or `None` for the
    /// last level before main memory.
    pub fn new(
        params: CacheParams,
        mem_penalty: u64,
        next: Option<Box<CacheLevel>>,
    ) -> Result<Self, ConfigError> {
        params.validate()?;
        let num_sets = params.size / (params.block_size * params.associativity);
        let sets = vec![vec![CacheLine::default(); params.associativity]; num_sets];
        Ok(Self {
            params,
            num_sets,
            sets,
            mem_penalty,
            tick: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            next,
        })
    }

    /// Probe for `addr`, recursing into the next level on a miss, and
    /// return the total cycles charged along the way.
    pub fn access(&mut self, addr: usize) -> u64 {
        self.tick += 1;
        let block = addr / self.params.block_size;
        let set_idx = block % self.num_sets;
        let tag = block / self.num_sets;

        let tick = self.tick;
        let policy = self.params.policy;
        let set = &mut self.sets[set_idx];
        if let Some(line) = set.iter_mut().find(|l| l.valid && l.tag == tag) {
            match policy {
                ReplacementPolicy::Fifo => {}
                ReplacementPolicy::Lru => line.last_access = tick,
                ReplacementPolicy::Lfu => {
                    line.frequency += 1;
                    line.last_access = tick;
                }
            }
            self.hits += 1;
            return self.params.access_cost;
        }

        self.misses += 1;
        let penalty = match self.next.as_mut() {
            Some(next) => next.access(addr),
            None => self.mem_penalty,
        };
        self.install(set_idx, tag);
        self.params.access_cost + penalty
    }

    /// Place `tag` in the set, evicting per policy when every way is valid.
    fn install(&mut self, set_idx: usize, tag: usize) {
        let tick = self.tick;
        let policy = self.params.policy;
        let set = &mut self.sets[set_idx];

        let way = match set.iter().position(|l| !l.valid) {
            Some(way) => way,
            None => {
                let victim = Self::victim(set, policy);
                debug!(
                    "{}: evicting tag {:#x} from set {} way {}",
                    self.params.name, set[victim].tag, set_idx, victim
                );
                self.evictions += 1;
                victim
            }
        };

        set[way] = CacheLine {
            valid: true,
            tag,
            inserted_at: tick,
            last_access: tick,
            frequency: 1,
        };
    }

    /// Victim way for a full set. FIFO evicts the oldest insertion, LRU the
    /// oldest access, LFU the lowest frequency with the oldest access as
    /// tie-break.
    fn victim(set: &[CacheLine], policy: ReplacementPolicy) -> usize {
        let chosen = match policy {
            ReplacementPolicy::Fifo => set
                .iter()
                .enumerate()
                .min_by_key(|(_, l)| l.inserted_at),
            ReplacementPolicy::Lru => set
                .iter()
                .enumerate()
                .min_by_key(|(_, l)| l.last_access),
            ReplacementPolicy::Lfu => set
                .iter()
                .enumerate()
                .min_by_key(|(_, l)| (l.frequency, l.last_access)),
        };
        chosen.map(|(way, _)| way).unwrap_or(0)
    }

    pub fn access_cost(&self) -> u64 {
        self.params.access_cost
    }

    pub fn params(&self) -> &CacheParams {
        &self.params
    }

    pub fn num_sets(&self) -> usize {
        self.num_sets
    }

    pub fn next_level(&self) -> Option<&CacheLevel> {
        self.next.as_deref()
    }

    pub fn stats(&self) -> CacheStats {
        let total = self.hits + self.misses;
        CacheStats {
            name: self.params.name.clone(),
            policy: self.params.policy,
            size: self.params.size,
            ways: self.params.associativity,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            hit_ratio_pct: if total == 0 {
                0.0
            } else {
                self.hits as f64 * 100.0 / total as f64
            },
        }
    }

    /// Stats for this level and every level below it, top first.
    pub fn stats_chain(&self) -> Vec<CacheStats> {
        let mut out = vec![self.stats()];
        let mut level = self.next_level();
        while let Some(l) = level {
            out.push(l.stats());
            level = l.next_level();
        }
        out
    }

    #[cfg(test)]
    fn valid_tags_in_set(&self, set_idx: usize) -> Vec<usize> {
        self.sets[set_idx]
            .iter()
            .filter(|l| l.valid)
            .map(|l| l.tag)
            .collect()
    }
}
