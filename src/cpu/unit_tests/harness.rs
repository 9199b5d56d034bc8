use std::io::Cursor;
use std::sync::Arc;

use crate::cpu::{Completion, CoreSimulator, MemoryRequest};
use crate::mem::{CacheLevel, IdentityPages, MemoryPort};
use crate::sim::config::CoreConfig;
use crate::sim::trace::TraceReader;

/// Accepts everything unless `refuse` is set. [`step`] answers accepted reads one cycle later.
#[derive(Default)]
pub(super) struct ScriptedPort {
    pub refuse: bool,
    /// Only answer page-walk reads; data reads stay outstanding.
    pub hold_data: bool,
    pub sent: Vec<MemoryRequest>,
    pub(super) answered: usize,
}

impl MemoryPort for ScriptedPort {
    fn send(&mut self, request: &MemoryRequest) -> bool {
        if self.refuse {
            return false;
        }
        self.sent.push(request.clone());
        true
    }
}

impl ScriptedPort {
    /// Reads accepted since the last call that should be answered.
    pub fn unanswered(&mut self) -> Vec<MemoryRequest> {
        let fresh: Vec<MemoryRequest> = self.sent[self.answered..]
            .iter()
            .filter(|request| request.kind.is_read() && (request.is_walk() || !self.hold_data))
            .cloned()
            .collect();
        self.answered = self.sent.len();
        fresh
    }
}

pub(super) fn small_config() -> CoreConfig {
    CoreConfig {
        window_depth: 8,
        window_width: 4,
        l1_tlb_entries: 8,
        l1_tlb_ways: 4,
        l2_tlb_entries: 32,
        l2_tlb_ways: 4,
        ..CoreConfig::default()
    }
}

pub(super) fn core_with(trace: &str, config: CoreConfig) -> CoreSimulator {
    core_with_cache(trace, config, None)
}

pub(super) fn core_with_cache(
    trace: &str,
    config: CoreConfig,
    cache: Option<Box<dyn CacheLevel>>,
) -> CoreSimulator {
    let reader = TraceReader::new("t", Cursor::new(trace.as_bytes().to_vec()));
    CoreSimulator::new(0, Arc::new(config), reader, cache, 1, &mut IdentityPages).unwrap()
}

/// One core cycle, then answer whatever reads it sent.
pub(super) fn step(core: &mut CoreSimulator, port: &mut ScriptedPort) {
    core.tick(port, &mut IdentityPages).unwrap();
    let now = core.cycles();
    for request in port.unanswered() {
        core.receive(&Completion::new(request, now, now + 1));
    }
}

pub(super) fn run_to_finish(core: &mut CoreSimulator, port: &mut ScriptedPort, max_cycles: u64) {
    while !core.finished() {
        assert!(core.cycles() < max_cycles, "core did not finish in {} cycles", max_cycles);
        step(core, port);
    }
}
