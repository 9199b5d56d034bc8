use std::sync::Arc;

use anyhow::{ensure, Context};
use log::info;

use crate::cpu::{Completion, CoreSimulator, CoreStats};
use crate::mem::{CacheLevel, Downstream, MemoryPort, PageAllocator, SetAssocCache};
use crate::sim::config::{CacheHierarchyConfig, CoreConfig};
use crate::sim::trace::TraceReader;
use crate::timeq::Cycle;

const HEARTBEAT_CYCLES: Cycle = 50_000_000;

/// Drives a set of cores off one clock and fans memory completions back out to them.
pub struct Processor {
    cores: Vec<CoreSimulator>,
    llc: Option<Box<dyn CacheLevel>>,
    pages: Box<dyn PageAllocator>,
    early_exit: bool,
    // per-core throughput, latched the first time each core is seen finished
    ipcs: Vec<Option<f64>>,
    ipc: f64,
    exited: bool,
    cpu_cycles: Cycle,
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("cores", &self.cores)
            .field("shared_cache", &self.llc.is_some())
            .field("early_exit", &self.early_exit)
            .field("cpu_cycles", &self.cpu_cycles)
            .finish()
    }
}

impl Processor {
    pub fn new(
        cores: Vec<CoreSimulator>,
        llc: Option<Box<dyn CacheLevel>>,
        pages: Box<dyn PageAllocator>,
        early_exit: bool,
    ) -> anyhow::Result<Self> {
        ensure!(!cores.is_empty(), "processor needs at least one trace");
        let num_cores = cores.len();
        info!("processor with {} cores, shared cache: {}", num_cores, llc.is_some());
        Ok(Self {
            cores,
            llc,
            pages,
            early_exit,
            ipcs: vec![None; num_cores],
            ipc: 0.0,
            exited: false,
            cpu_cycles: 0,
        })
    }

    /// Build one core per trace, with private and shared caches as configured. Core `i` seeds its
    /// walk-address generator with `seed + i`.
    pub fn build(
        traces: Vec<TraceReader>,
        core_config: Arc<CoreConfig>,
        caches: &CacheHierarchyConfig,
        mut pages: Box<dyn PageAllocator>,
        seed: u64,
        early_exit: bool,
    ) -> anyhow::Result<Self> {
        let line_bytes = core_config.line_bytes;
        let mut cores = Vec::with_capacity(traces.len());
        for (id, trace) in traces.into_iter().enumerate() {
            let cache = core_config.core_caches.then(|| {
                Box::new(SetAssocCache::new(
                    format!("l1_core{id}"),
                    Arc::new(caches.l1),
                    line_bytes,
                )) as Box<dyn CacheLevel>
            });
            let core = CoreSimulator::new(
                id,
                Arc::clone(&core_config),
                trace,
                cache,
                seed.wrapping_add(id as u64),
                pages.as_mut(),
            )
            .with_context(|| format!("cannot build core {id}"))?;
            cores.push(core);
        }
        let llc = caches.shared_cache.then(|| {
            Box::new(SetAssocCache::new("llc", Arc::new(caches.llc), line_bytes))
                as Box<dyn CacheLevel>
        });
        Self::new(cores, llc, pages, early_exit)
    }

    /// Advance the shared cache, then every core once in index order, starting from the core
    /// picked by the cycle count. Cache hits that completed this cycle are delivered before
    /// returning.
    pub fn tick(&mut self, memory: &mut dyn MemoryPort) -> anyhow::Result<()> {
        self.cpu_cycles += 1;
        if self.cpu_cycles % HEARTBEAT_CYCLES == 0 {
            info!("CPU heartbeat, cycles: {}", self.cpu_cycles);
        }

        if let Some(llc) = &mut self.llc {
            llc.tick_one();
        }
        let first = (self.cpu_cycles % self.cores.len() as Cycle) as usize;
        let (wrapped, leading) = self.cores.split_at_mut(first);
        for core in leading.iter_mut().chain(wrapped) {
            let mut lower = Downstream {
                cache: self.llc.as_deref_mut(),
                memory: &mut *memory,
            };
            core.tick(&mut lower, self.pages.as_mut())?;
        }

        let mut hits = Vec::new();
        if let Some(llc) = &mut self.llc {
            hits.extend(std::iter::from_fn(|| llc.pop_completion()));
        }
        for core in &mut self.cores {
            if let Some(cache) = core.cache_mut() {
                hits.extend(std::iter::from_fn(|| cache.pop_completion()));
            }
        }
        for completion in &hits {
            self.receive(completion);
        }
        Ok(())
    }

    /// Route `completion` to the shared cache, which passes fills up to the private caches, or
    /// straight to the private caches when there is no shared level. Then offer it to every
    /// core; each core keeps only its own.
    pub fn receive(&mut self, completion: &Completion) {
        let cores = &mut self.cores;
        let mut fill_private = |fill: &Completion| {
            for core in cores.iter_mut() {
                if let Some(cache) = core.cache_mut() {
                    cache.callback(fill, &mut |_| {});
                }
            }
        };
        match &mut self.llc {
            Some(llc) => llc.callback(completion, &mut fill_private),
            None => fill_private(completion),
        }
        for core in &mut self.cores {
            core.receive(completion);
        }
    }

    /// With early exit, true as soon as any core has finished, and throughput is taken from the
    /// cores finished at that moment. Otherwise true once every core has finished, latching each
    /// core's throughput the first time it is seen finished.
    pub fn finished(&mut self) -> bool {
        if self.early_exit {
            if self.exited {
                return true;
            }
            if !self.cores.iter().any(CoreSimulator::finished) {
                return false;
            }
            for id in 0..self.cores.len() {
                if self.cores[id].finished() {
                    self.latch_ipc(id);
                }
            }
            self.exited = true;
            return true;
        }

        let mut all_finished = true;
        for id in 0..self.cores.len() {
            if self.cores[id].finished() {
                self.latch_ipc(id);
            } else {
                all_finished = false;
            }
        }
        all_finished
    }

    fn latch_ipc(&mut self, id: usize) {
        if self.ipcs[id].is_some() {
            return;
        }
        let core = &self.cores[id];
        let ipc = core.calc_ipc();
        info!(
            "[{}] retired: {}, clk: {}, ipc: {:.4}",
            id,
            core.retired_instructions(),
            core.cycles(),
            ipc
        );
        self.ipcs[id] = Some(ipc);
        self.ipc += ipc;
    }

    pub fn has_reached_limit(&self) -> bool {
        self.cores.iter().all(CoreSimulator::has_reached_limit)
    }

    pub fn committed_instructions(&self) -> u64 {
        self.cores.iter().map(CoreSimulator::committed_instructions).sum()
    }

    /// Sum of the latched per-core IPCs.
    pub fn throughput(&self) -> f64 {
        self.ipc
    }

    pub fn reset_stats(&mut self) {
        self.cores.iter_mut().for_each(CoreSimulator::reset_stats);
        self.ipc = 0.0;
        self.ipcs.fill(None);
        self.exited = false;
    }

    pub fn caches_idle(&mut self) -> bool {
        let llc_idle = self.llc.as_ref().map_or(true, |llc| llc.is_idle());
        llc_idle
            && self
                .cores
                .iter_mut()
                .all(|core| core.cache_mut().map_or(true, |cache| cache.is_idle()))
    }

    pub fn cpu_cycles(&self) -> Cycle {
        self.cpu_cycles
    }

    pub fn cores(&self) -> &[CoreSimulator] {
        &self.cores
    }

    pub fn core_stats(&self) -> Vec<CoreStats> {
        self.cores.iter().map(CoreSimulator::stats).collect()
    }
}
