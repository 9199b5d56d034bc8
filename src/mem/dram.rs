use std::collections::VecDeque;
use std::sync::Arc;

use log::trace;
use serde::Serialize;

use crate::base::behavior::*;
use crate::base::module::{module, IsModule, ModuleBase};
use crate::cpu::request::{Completion, MemoryRequest};
use crate::mem::MemoryPort;
use crate::sim::config::MemConfig;
use crate::timeq::{Backpressure, ServerConfig, ServiceRequest, TimedServer};

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MemoryStats {
    pub reads: u64,
    pub writes: u64,
    pub rejects: u64,
}

#[derive(Debug)]
pub struct MemoryState {
    server: TimedServer<MemoryRequest>,
    completions: VecDeque<Completion>,
    stats: MemoryStats,
}

/// Reference memory: a single pipelined channel with a fixed access latency. Writes are posted
/// and produce no completion.
#[derive(Debug)]
pub struct FixedLatencyMemory {
    base: ModuleBase<MemoryState, MemConfig>,
}

impl FixedLatencyMemory {
    pub fn new(config: Arc<MemConfig>) -> Self {
        let mut me = FixedLatencyMemory {
            base: ModuleBase {
                cycle: 0,
                state: MemoryState {
                    server: TimedServer::new(Self::server_config(&config)),
                    completions: VecDeque::new(),
                    stats: MemoryStats::default(),
                },
                config: Default::default(),
            },
        };
        me.init_conf(config);
        me
    }

    fn server_config(config: &MemConfig) -> ServerConfig {
        ServerConfig {
            base_latency: config.latency,
            bytes_per_cycle: config.bytes_per_cycle.max(1),
            queue_capacity: config.queue_capacity.max(1),
        }
    }

    pub fn pop_completion(&mut self) -> Option<Completion> {
        self.base.state.completions.pop_front()
    }

    pub fn is_idle(&self) -> bool {
        self.state().server.is_empty() && self.state().completions.is_empty()
    }

    pub fn stats(&self) -> MemoryStats {
        self.state().stats
    }
}

module!(FixedLatencyMemory, MemoryState, MemConfig);

impl MemoryPort for FixedLatencyMemory {
    fn send(&mut self, request: &MemoryRequest) -> bool {
        let now = self.now();
        let bytes = self.conf().access_bytes;
        let state = &mut self.base.state;
        match state.server.try_enqueue(now, ServiceRequest::new(request.clone(), bytes)) {
            Ok(_) => {
                if request.kind.is_read() {
                    state.stats.reads += 1;
                } else {
                    state.stats.writes += 1;
                }
                true
            }
            Err(Backpressure::QueueFull { capacity, .. }) => {
                trace!("memory queue full ({} entries), {:#x} refused", capacity, request.addr);
                state.stats.rejects += 1;
                false
            }
            Err(Backpressure::Busy { available_at, .. }) => {
                trace!("memory busy until {}, {:#x} refused at {}", available_at, request.addr, now);
                state.stats.rejects += 1;
                false
            }
        }
    }
}

impl ModuleBehaviors for FixedLatencyMemory {
    fn tick_one(&mut self) {
        self.base.cycle += 1;
        let now = self.base.cycle;
        let state = &mut self.base.state;
        let completions = &mut state.completions;
        state.server.service_ready(now, |result| {
            if result.payload.kind.is_read() {
                completions.push_back(Completion::new(
                    result.payload,
                    result.ticket.issued_at(),
                    result.ticket.ready_at(),
                ));
            }
        });
    }

    fn reset(&mut self) {
        self.base.cycle = 0;
        self.base.state.server.clear();
        self.base.state.completions.clear();
        self.base.state.stats = MemoryStats::default();
    }
}
