use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use log::info;
use serde::Serialize;

use crate::cpu::CoreStats;
use crate::mem::dram::MemoryStats;
use crate::timeq::Cycle;

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub cycles: Cycle,
    /// Summed IPC: latched per-core IPC for a run to completion, or instructions over cycles at
    /// the limit snapshot of each core when an instruction limit is set.
    pub throughput: f64,
    pub committed: u64,
    pub timed_out: bool,
    pub per_core: Vec<CoreStats>,
    pub memory: MemoryStats,
}

impl RunSummary {
    pub fn new(
        cycles: Cycle,
        latched_throughput: f64,
        limited: bool,
        timed_out: bool,
        per_core: Vec<CoreStats>,
        memory: MemoryStats,
    ) -> Self {
        let throughput = if limited {
            limit_throughput(&per_core)
        } else {
            latched_throughput
        };
        let committed = per_core.iter().map(|core| core.committed).sum();
        Self {
            cycles,
            throughput,
            committed,
            timed_out,
            per_core,
            memory,
        }
    }

    pub fn log(&self) {
        info!(
            "run ended after {} cycles, throughput {:.4}, committed {}",
            self.cycles, self.throughput, self.committed
        );
        for core in &self.per_core {
            info!(
                "[{}] {}: retired {}, committed {}, ipc {:.4}, memory cycles {}, page walks {}",
                core.core_id,
                core.trace,
                core.retired,
                core.committed,
                core.ipc,
                core.memory_access_cycles,
                core.page_walks
            );
        }
        info!(
            "memory: {} reads, {} writes, {} rejected",
            self.memory.reads, self.memory.writes, self.memory.rejects
        );
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let file = File::create(path)
            .with_context(|| format!("cannot create stats file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }
}

fn limit_throughput(per_core: &[CoreStats]) -> f64 {
    per_core
        .iter()
        .filter_map(|core| core.limit)
        .filter(|record| record.cycle > 0)
        .map(|record| record.insts as f64 / record.cycle as f64)
        .sum()
}
