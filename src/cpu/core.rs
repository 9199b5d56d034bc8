use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{ensure, Context};
use log::{debug, info, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::cpu::request::{Completion, MemoryRequest, WalkStep};
use crate::cpu::tlb::TranslationCache;
use crate::cpu::window::ReorderWindow;
use crate::mem::{CacheLevel, MemoryPort, PageAllocator};
use crate::sim::config::CoreConfig;
use crate::sim::trace::{TraceEntry, TraceMode, TraceReader};
use crate::timeq::Cycle;

/// Snapshot taken the first time the committed-instruction count reaches the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimitRecord {
    pub cycle: Cycle,
    pub insts: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoreStats {
    pub core_id: usize,
    pub trace: String,
    pub cycles: Cycle,
    pub retired: u64,
    pub committed: u64,
    pub ipc: f64,
    pub memory_access_cycles: Cycle,
    pub page_walks: u64,
    pub limit: Option<LimitRecord>,
}

/// Trace-driven timing model of one in-order-retire core.
///
/// Each [`CoreSimulator::tick`] advances one cycle: it applies completions delivered since the
/// last tick, retires ready window entries, pushes pending page-walk reads, drains non-memory
/// bubbles into the window and then tries to issue the current trace access. An access whose
/// page misses both translation tables is replaced by a chain of `WALK_STEPS` dependent reads to
/// random addresses; only after the last one returns is the access itself sent and admitted.
pub struct CoreSimulator {
    id: usize,
    config: Arc<CoreConfig>,
    trace: TraceReader,
    trace_mode: TraceMode,
    window: ReorderWindow,
    l1_tlb: TranslationCache,
    l2_tlb: TranslationCache,
    cache: Option<Box<dyn CacheLevel>>,
    rng: StdRng,

    // next trace access; `None` once the trace is exhausted
    current: Option<TraceEntry>,
    bubbles: u64,

    inbox: VecDeque<Completion>,
    // walk reads that still need a send slot, oldest first
    walk_reads: VecDeque<MemoryRequest>,
    // accesses whose walk is done, waiting for a window slot and a send slot
    admissions: VecDeque<MemoryRequest>,
    // walks started whose access has not been admitted yet
    walks_in_flight: usize,

    clk: Cycle,
    retired: u64,
    committed: u64,
    memory_access_cycles: Cycle,
    last_completion: Cycle,
    page_walks: u64,
    limit: Option<LimitRecord>,
}

impl std::fmt::Debug for CoreSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreSimulator")
            .field("id", &self.id)
            .field("trace", &self.trace.name())
            .field("clk", &self.clk)
            .field("window_load", &self.window.load())
            .field("walks_in_flight", &self.walks_in_flight)
            .field("committed", &self.committed)
            .finish()
    }
}

impl CoreSimulator {
    pub fn new(
        id: usize,
        config: Arc<CoreConfig>,
        trace: TraceReader,
        cache: Option<Box<dyn CacheLevel>>,
        seed: u64,
        pages: &mut dyn PageAllocator,
    ) -> anyhow::Result<Self> {
        ensure!(
            config.line_bytes.is_power_of_two(),
            "line size {} is not a power of two",
            config.line_bytes
        );
        ensure!(
            config.walk_region_start <= config.walk_region_end,
            "empty page-walk region {:#x}..={:#x}",
            config.walk_region_start,
            config.walk_region_end
        );
        let window = ReorderWindow::new(config.window_depth, config.window_width)
            .with_context(|| format!("core {id}"))?;
        let l1_tlb = TranslationCache::new(config.l1_tlb_entries, config.l1_tlb_ways)
            .with_context(|| format!("core {id}: L1 TLB"))?;
        let l2_tlb = TranslationCache::new(config.l2_tlb_entries, config.l2_tlb_ways)
            .with_context(|| format!("core {id}: L2 TLB"))?;
        // without a private hierarchy the trace is assumed to be already cache-filtered
        let trace_mode = if cache.is_some() {
            TraceMode::Unfiltered
        } else {
            TraceMode::Filtered
        };

        let mut core = CoreSimulator {
            id,
            trace: trace.with_replay(config.has_limit()),
            config,
            trace_mode,
            window,
            l1_tlb,
            l2_tlb,
            cache,
            rng: StdRng::seed_from_u64(seed),
            current: None,
            bubbles: 0,
            inbox: VecDeque::new(),
            walk_reads: VecDeque::new(),
            admissions: VecDeque::new(),
            walks_in_flight: 0,
            clk: 0,
            retired: 0,
            committed: 0,
            memory_access_cycles: 0,
            last_completion: 0,
            page_walks: 0,
            limit: None,
        };
        core.fetch(pages)?;
        ensure!(
            core.current.is_some() || !core.config.has_limit(),
            "trace {} is empty but an instruction limit is configured",
            core.trace.name()
        );
        if core.current.is_none() {
            core.record_limit();
        }
        info!("core {} instantiated on trace {}", id, core.trace.name());
        Ok(core)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn tick(
        &mut self,
        lower: &mut dyn MemoryPort,
        pages: &mut dyn PageAllocator,
    ) -> anyhow::Result<()> {
        while let Some(completion) = self.inbox.pop_front() {
            self.complete(completion);
        }

        self.clk += 1;
        if let Some(cache) = &mut self.cache {
            cache.tick_one();
        }
        self.retired += self.window.retire() as u64;
        self.issue_walks(lower)?;

        let Some(entry) = self.current else {
            return Ok(());
        };

        // bubbles (non-memory instructions)
        let width = self.window.width();
        let mut inserted = 0;
        while self.bubbles > 0 {
            if inserted == width || self.window.is_full() {
                return Ok(());
            }
            self.window.insert(true, None)?;
            inserted += 1;
            self.bubbles -= 1;
            self.commit();
        }

        let request = MemoryRequest::new(entry.addr, entry.kind, self.id);
        let tlb_hit = self.l1_tlb.get(entry.addr) || self.l2_tlb.get(entry.addr);
        if tlb_hit {
            if inserted == width || self.window.is_full() {
                trace!("core {}: issue of {:#x} stalled on window", self.id, entry.addr);
                return Ok(());
            }
            if !self.send(&request, lower) {
                return Ok(());
            }
            if request.kind.is_read() {
                self.window.insert(false, Some(request.addr))?;
            }
            self.commit();
        } else {
            let walk = MemoryRequest::walk_step(self.walk_addr(), self.id, 1, &request);
            if !self.send(&walk, lower) {
                return Ok(());
            }
            debug!("core {}: translation miss on {:#x}, starting walk", self.id, entry.addr);
            self.walks_in_flight += 1;
            self.page_walks += 1;
        }

        self.fetch(pages)?;
        if self.current.is_none() && self.limit.is_none() {
            // with a limit configured the trace replays, so it can only run dry without one
            assert!(
                !self.config.has_limit(),
                "core {}: trace exhausted before the instruction limit",
                self.id
            );
            self.record_limit();
        }
        Ok(())
    }

    /// Queue a completion for this core; completions for other cores are ignored.
    pub fn receive(&mut self, completion: &Completion) {
        if completion.request.core_id == self.id {
            self.inbox.push_back(completion.clone());
        }
    }

    pub fn finished(&self) -> bool {
        self.current.is_none() && self.window.is_empty() && self.walks_in_flight == 0
    }

    pub fn has_reached_limit(&self) -> bool {
        self.limit.is_some()
    }

    pub fn limit_record(&self) -> Option<LimitRecord> {
        self.limit
    }

    pub fn committed_instructions(&self) -> u64 {
        self.committed
    }

    pub fn retired_instructions(&self) -> u64 {
        self.retired
    }

    pub fn cycles(&self) -> Cycle {
        self.clk
    }

    pub fn memory_access_cycles(&self) -> Cycle {
        self.memory_access_cycles
    }

    pub fn page_walks(&self) -> u64 {
        self.page_walks
    }

    pub fn window(&self) -> &ReorderWindow {
        &self.window
    }

    pub fn l1_tlb(&self) -> &TranslationCache {
        &self.l1_tlb
    }

    pub fn l2_tlb(&self) -> &TranslationCache {
        &self.l2_tlb
    }

    pub fn cache_mut(&mut self) -> Option<&mut (dyn CacheLevel + 'static)> {
        self.cache.as_deref_mut()
    }

    pub fn calc_ipc(&self) -> f64 {
        if self.clk == 0 {
            return 0.0;
        }
        self.retired as f64 / self.clk as f64
    }

    pub fn reset_stats(&mut self) {
        self.clk = 0;
        self.retired = 0;
        self.committed = 0;
    }

    pub fn stats(&self) -> CoreStats {
        CoreStats {
            core_id: self.id,
            trace: self.trace.name().to_string(),
            cycles: self.clk,
            retired: self.retired,
            committed: self.committed,
            ipc: self.calc_ipc(),
            memory_access_cycles: self.memory_access_cycles,
            page_walks: self.page_walks,
            limit: self.limit,
        }
    }

    fn fetch(&mut self, pages: &mut dyn PageAllocator) -> anyhow::Result<()> {
        self.current = self.trace.next_entry(self.trace_mode)?.map(|mut entry| {
            entry.addr = pages.translate(entry.addr, self.id);
            entry
        });
        self.bubbles = self.current.map_or(0, |entry| entry.bubbles);
        Ok(())
    }

    fn send(&mut self, request: &MemoryRequest, lower: &mut dyn MemoryPort) -> bool {
        assert!(
            !request.is_walk() || request.kind.is_read(),
            "core {}: page-walk step issued as a write",
            self.id
        );
        match &mut self.cache {
            Some(cache) => cache.send(request, lower),
            None => lower.send(request),
        }
    }

    fn walk_addr(&mut self) -> u64 {
        self.rng
            .gen_range(self.config.walk_region_start..=self.config.walk_region_end)
    }

    fn commit(&mut self) {
        self.committed += 1;
        if self.committed == self.config.limit_insts && self.limit.is_none() {
            self.record_limit();
        }
    }

    fn record_limit(&mut self) {
        info!(
            "core {} reached {} instructions at cycle {}",
            self.id, self.committed, self.clk
        );
        self.limit = Some(LimitRecord {
            cycle: self.clk,
            insts: self.committed,
        });
    }

    fn complete(&mut self, completion: Completion) {
        let request = completion.request;
        match request.walk {
            None => {
                let mask = !(self.config.line_bytes - 1);
                self.window.set_ready(request.addr & mask, mask);
                if completion.depart > self.last_completion {
                    self.memory_access_cycles +=
                        completion.depart - self.last_completion.max(completion.arrive);
                    self.last_completion = completion.depart;
                }
            }
            Some(walk) if walk.is_last() => {
                self.l1_tlb.update(walk.original_addr);
                self.l2_tlb.update(walk.original_addr);
                self.admissions.push_back(MemoryRequest::new(
                    walk.original_addr,
                    walk.original_kind,
                    self.id,
                ));
            }
            Some(walk) => {
                let next = MemoryRequest {
                    addr: self.walk_addr(),
                    walk: Some(WalkStep {
                        step: walk.step + 1,
                        ..walk
                    }),
                    ..request
                };
                self.walk_reads.push_back(next);
            }
        }
    }

    /// Send parked walk reads, then admit accesses whose walk is done. Walk reads ignore the
    /// issue width and window occupancy, so a blocked admission never holds them back.
    fn issue_walks(&mut self, lower: &mut dyn MemoryPort) -> anyhow::Result<()> {
        while let Some(request) = self.walk_reads.front() {
            let request = request.clone();
            if !self.send(&request, lower) {
                break;
            }
            self.walk_reads.pop_front();
        }

        while let Some(request) = self.admissions.front() {
            let request = request.clone();
            if self.window.is_full() || !self.send(&request, lower) {
                break;
            }
            self.admissions.pop_front();
            if request.kind.is_read() {
                self.window.insert(false, Some(request.addr))?;
            }
            self.walks_in_flight -= 1;
            debug!("core {}: walk for {:#x} finished", self.id, request.addr);
            self.commit();
        }
        Ok(())
    }
}
