use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use log::trace;
use serde::Serialize;

use crate::base::behavior::*;
use crate::base::module::{module, IsModule, ModuleBase};
use crate::cpu::request::{Completion, MemoryRequest};
use crate::mem::MemoryPort;
use crate::sim::config::CacheConfig;
use crate::timeq::{ServerConfig, ServiceRequest, TimedServer};

/// A cache level between a core and memory, ticked by its owner.
pub trait CacheLevel: ModuleBehaviors {
    /// Accept `request`, forwarding misses to `lower`. `false` is back-pressure.
    fn send(&mut self, request: &MemoryRequest, lower: &mut dyn MemoryPort) -> bool;

    /// Observe a completion coming back up from below. Lines this level was waiting on are
    /// filled, and the completion is handed to `above` for the levels stacked on top of this one.
    fn callback(&mut self, completion: &Completion, above: &mut dyn FnMut(&Completion));

    /// Completions for requests that hit in this level.
    fn pop_completion(&mut self) -> Option<Completion>;

    fn is_idle(&self) -> bool;
}

#[derive(Debug)]
pub(crate) struct CacheTagArray {
    sets: usize,
    ways: usize,
    tags: Vec<Vec<Option<u64>>>,
    lru: Vec<Vec<usize>>,
}

impl CacheTagArray {
    pub(crate) fn new(sets: usize, ways: usize) -> Self {
        let sets = sets.max(1);
        let ways = ways.max(1);
        Self {
            sets,
            ways,
            tags: vec![vec![None; ways]; sets],
            lru: vec![(0..ways).collect(); sets],
        }
    }

    fn set_of(&self, line_addr: u64) -> usize {
        (line_addr % self.sets as u64) as usize
    }

    pub(crate) fn probe(&mut self, line_addr: u64) -> bool {
        let set_idx = self.set_of(line_addr);
        match self.tags[set_idx].iter().position(|tag| *tag == Some(line_addr)) {
            Some(way) => {
                self.touch(set_idx, way);
                true
            }
            None => false,
        }
    }

    pub(crate) fn fill(&mut self, line_addr: u64) {
        if self.probe(line_addr) {
            return;
        }
        let set_idx = self.set_of(line_addr);
        let way = match self.tags[set_idx].iter().position(Option::is_none) {
            Some(way) => way,
            None => *self.lru[set_idx].last().unwrap_or(&0),
        };
        self.tags[set_idx][way] = Some(line_addr);
        self.touch(set_idx, way);
    }

    pub(crate) fn invalidate_all(&mut self) {
        for set_idx in 0..self.sets {
            self.tags[set_idx].fill(None);
            self.lru[set_idx].clear();
            self.lru[set_idx].extend(0..self.ways);
        }
    }

    fn touch(&mut self, set_idx: usize, way: usize) {
        let order = &mut self.lru[set_idx];
        if let Some(pos) = order.iter().position(|&idx| idx == way) {
            order.remove(pos);
        }
        order.insert(0, way);
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub rejects: u64,
}

#[derive(Debug)]
pub struct CacheState {
    tags: CacheTagArray,
    hit_queue: TimedServer<MemoryRequest>,
    outstanding: HashSet<u64>,
    completions: VecDeque<Completion>,
    stats: CacheStats,
}

/// Write-allocate, set-associative LRU cache with a fixed hit latency. Read misses are
/// forwarded to the lower port and the line is filled when the matching completion comes back.
#[derive(Debug)]
pub struct SetAssocCache {
    base: ModuleBase<CacheState, CacheConfig>,
    name: String,
    line_bytes: u64,
}

impl SetAssocCache {
    pub fn new(name: impl Into<String>, config: Arc<CacheConfig>, line_bytes: u64) -> Self {
        let mut me = SetAssocCache {
            base: ModuleBase {
                cycle: 0,
                state: CacheState {
                    tags: CacheTagArray::new(config.sets, config.ways),
                    hit_queue: TimedServer::new(Self::server_config(&config)),
                    outstanding: HashSet::new(),
                    completions: VecDeque::new(),
                    stats: CacheStats::default(),
                },
                config: Default::default(),
            },
            name: name.into(),
            line_bytes: line_bytes.max(1),
        };
        me.init_conf(config);
        me
    }

    fn server_config(config: &CacheConfig) -> ServerConfig {
        ServerConfig {
            base_latency: config.hit_latency,
            bytes_per_cycle: u32::MAX,
            queue_capacity: config.queue_capacity.max(1),
        }
    }

    fn line_of(&self, addr: u64) -> u64 {
        addr / self.line_bytes
    }

    pub fn stats(&self) -> CacheStats {
        self.state().stats
    }
}

module!(SetAssocCache, CacheState, CacheConfig);

impl CacheLevel for SetAssocCache {
    fn send(&mut self, request: &MemoryRequest, lower: &mut dyn MemoryPort) -> bool {
        let now = self.now();
        let line = self.line_of(request.addr);
        let state = &mut self.base.state;

        if state.tags.probe(line) {
            if request.kind.is_write() {
                state.stats.hits += 1;
                return true;
            }
            return match state.hit_queue.try_enqueue(now, ServiceRequest::new(request.clone(), 0)) {
                Ok(_) => {
                    state.stats.hits += 1;
                    true
                }
                Err(_) => {
                    state.stats.rejects += 1;
                    false
                }
            };
        }

        if !lower.send(request) {
            trace!("{}: miss on {:#x} blocked below", self.name, request.addr);
            state.stats.rejects += 1;
            return false;
        }
        state.stats.misses += 1;
        if request.kind.is_write() {
            state.tags.fill(line);
        } else {
            state.outstanding.insert(line);
        }
        true
    }

    fn callback(&mut self, completion: &Completion, above: &mut dyn FnMut(&Completion)) {
        let line = self.line_of(completion.request.addr);
        let state = &mut self.base.state;
        if state.outstanding.remove(&line) {
            state.tags.fill(line);
        }
        // every read from above passes through here, so whatever completes belongs to them
        above(completion);
    }

    fn pop_completion(&mut self) -> Option<Completion> {
        self.base.state.completions.pop_front()
    }

    fn is_idle(&self) -> bool {
        let state = self.state();
        state.hit_queue.is_empty() && state.completions.is_empty() && state.outstanding.is_empty()
    }
}

impl ModuleBehaviors for SetAssocCache {
    fn tick_one(&mut self) {
        self.base.cycle += 1;
        let now = self.base.cycle;
        let state = &mut self.base.state;
        let completions = &mut state.completions;
        state.hit_queue.service_ready(now, |result| {
            completions.push_back(Completion::new(
                result.payload,
                result.ticket.issued_at(),
                result.ticket.ready_at(),
            ));
        });
    }

    fn reset(&mut self) {
        self.base.cycle = 0;
        let state = &mut self.base.state;
        state.tags.invalidate_all();
        state.hit_queue.clear();
        state.outstanding.clear();
        state.completions.clear();
        state.stats = CacheStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::request::AccessKind;

    #[derive(Default)]
    struct Recorder {
        accept: bool,
        sent: Vec<MemoryRequest>,
    }

    impl MemoryPort for Recorder {
        fn send(&mut self, request: &MemoryRequest) -> bool {
            if self.accept {
                self.sent.push(request.clone());
            }
            self.accept
        }
    }

    fn cache() -> SetAssocCache {
        let config = CacheConfig {
            sets: 4,
            ways: 2,
            hit_latency: 3,
            queue_capacity: 4,
        };
        SetAssocCache::new("l1", Arc::new(config), 64)
    }

    fn llc_port<'a>(
        llc: &'a mut SetAssocCache,
        memory: &'a mut Recorder,
    ) -> crate::mem::Downstream<'a> {
        crate::mem::Downstream {
            cache: Some(llc as &mut dyn CacheLevel),
            memory,
        }
    }

    fn read(addr: u64) -> MemoryRequest {
        MemoryRequest::new(addr, AccessKind::Read, 0)
    }

    #[test]
    fn cache_tag_array_hits_and_evicts() {
        let mut tags = CacheTagArray::new(1, 2);
        assert!(!tags.probe(0));
        tags.fill(0);
        tags.fill(1);
        assert!(tags.probe(0));
        tags.fill(2);
        assert!(tags.probe(0));
        assert!(!tags.probe(1));
    }

    #[test]
    fn miss_forwards_then_fills_on_callback() {
        let mut l1 = cache();
        let mut lower = Recorder { accept: true, ..Default::default() };
        assert!(l1.send(&read(0x1000), &mut lower));
        assert_eq!(lower.sent.len(), 1);
        assert!(!l1.is_idle());

        l1.callback(&Completion::new(read(0x1010), 0, 20), &mut |_| {});
        assert!(l1.is_idle());

        assert!(l1.send(&read(0x1020), &mut lower));
        assert_eq!(lower.sent.len(), 1, "second access to the line should hit");
        assert_eq!(l1.stats().hits, 1);
    }

    #[test]
    fn hit_completes_after_latency() {
        let mut l1 = cache();
        let mut lower = Recorder { accept: true, ..Default::default() };
        l1.send(&read(0x40), &mut lower);
        l1.callback(&Completion::new(read(0x40), 0, 5), &mut |_| {});
        assert!(l1.send(&read(0x40), &mut lower));
        let mut ticks = 0;
        while l1.pop_completion().is_none() {
            l1.tick_one();
            ticks += 1;
            assert!(ticks < 10);
        }
        assert_eq!(ticks, 3);
    }

    #[test]
    fn blocked_lower_is_backpressure() {
        let mut l1 = cache();
        let mut lower = Recorder::default();
        assert!(!l1.send(&read(0x40), &mut lower));
        assert_eq!(l1.stats().rejects, 1);
        assert!(l1.is_idle());
    }

    #[test]
    fn unrelated_completion_does_not_fill() {
        let mut l1 = cache();
        let mut lower = Recorder { accept: true, ..Default::default() };
        l1.callback(&Completion::new(read(0x80), 0, 5), &mut |_| {});
        assert!(l1.send(&read(0x80), &mut lower));
        assert_eq!(lower.sent.len(), 1);
    }

    #[test]
    fn callback_passes_completion_up() {
        let mut llc = cache();
        let mut l1 = cache();
        let mut lower = Recorder { accept: true, ..Default::default() };
        assert!(l1.send(&read(0x200), &mut llc_port(&mut llc, &mut lower)));
        assert_eq!(lower.sent.len(), 1);

        let mut passed_up = Vec::new();
        llc.callback(&Completion::new(read(0x200), 0, 30), &mut |fill| {
            passed_up.push(fill.request.addr);
            l1.callback(fill, &mut |_| {});
        });
        assert_eq!(passed_up, vec![0x200]);
        assert!(llc.is_idle());
        assert!(l1.is_idle());
        assert!(l1.send(&read(0x200), &mut lower));
        assert_eq!(lower.sent.len(), 1, "the private level should hit after the fill");
    }

    #[test]
    fn reset_invalidates_lines() {
        let mut l1 = cache();
        let mut lower = Recorder { accept: true, ..Default::default() };
        l1.send(&read(0x40), &mut lower);
        l1.callback(&Completion::new(read(0x40), 0, 5), &mut |_| {});
        l1.reset();
        assert!(l1.is_idle());
        assert!(l1.send(&read(0x40), &mut lower));
        assert_eq!(lower.sent.len(), 2);
        assert_eq!(l1.stats().misses, 1);
    }
}
