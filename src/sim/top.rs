use std::sync::Arc;

use anyhow::{ensure, Context};
use log::{info, warn};

use crate::base::behavior::*;
use crate::mem::{FixedLatencyMemory, IdentityPages, PageAllocator, RandomPages};
use crate::processor::Processor;
use crate::sim::config::{CacheHierarchyConfig, CoreConfig, MemConfig, PageMode, SimConfig};
use crate::sim::stats::RunSummary;
use crate::sim::trace::TraceReader;

/// Processor plus reference memory, advanced together on one clock.
pub struct Sim {
    config: SimConfig,
    core_config: Arc<CoreConfig>,
    processor: Processor,
    memory: FixedLatencyMemory,
}

impl Sim {
    pub fn new(
        sim_config: SimConfig,
        core_config: CoreConfig,
        cache_config: CacheHierarchyConfig,
        mem_config: MemConfig,
    ) -> anyhow::Result<Sim> {
        ensure!(
            !sim_config.traces.is_empty(),
            "no traces given; set sim.traces or pass --trace"
        );
        let traces = sim_config
            .traces
            .iter()
            .map(|path| TraceReader::open(path))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let pages: Box<dyn PageAllocator> = match mem_config.pages {
            PageMode::Identity => Box::new(IdentityPages),
            PageMode::Random => Box::new(RandomPages::new(mem_config.frames, sim_config.seed)),
        };
        let core_config = Arc::new(core_config);
        let processor = Processor::build(
            traces,
            Arc::clone(&core_config),
            &cache_config,
            pages,
            sim_config.seed,
            sim_config.early_exit,
        )
        .context("cannot build processor")?;
        let memory = FixedLatencyMemory::new(Arc::new(mem_config));
        Ok(Self::from_parts(sim_config, core_config, processor, memory))
    }

    /// Assemble a simulation around an already built processor.
    pub fn from_parts(
        config: SimConfig,
        core_config: Arc<CoreConfig>,
        processor: Processor,
        memory: FixedLatencyMemory,
    ) -> Sim {
        Sim {
            config,
            core_config,
            processor,
            memory,
        }
    }

    pub fn tick(&mut self) -> anyhow::Result<()> {
        self.processor.tick(&mut self.memory)?;
        self.memory.tick_one();
        while let Some(completion) = self.memory.pop_completion() {
            self.processor.receive(&completion);
        }
        Ok(())
    }

    fn done(&mut self) -> bool {
        if self.core_config.has_limit() {
            return self.processor.has_reached_limit();
        }
        if self.config.early_exit {
            return self.processor.finished();
        }
        self.processor.finished() && self.memory.is_idle() && self.processor.caches_idle()
    }

    /// Run until the processor is done or the timeout elapses, then report.
    pub fn simulate(&mut self) -> anyhow::Result<RunSummary> {
        let mut timed_out = false;
        loop {
            self.tick()?;
            if self.done() {
                break;
            }
            if self.config.timeout > 0 && self.processor.cpu_cycles() >= self.config.timeout {
                warn!(
                    "simulation timed out after {} cycles",
                    self.processor.cpu_cycles()
                );
                timed_out = true;
                break;
            }
        }

        let summary = RunSummary::new(
            self.processor.cpu_cycles(),
            self.processor.throughput(),
            self.core_config.has_limit(),
            timed_out,
            self.processor.core_stats(),
            self.memory.stats(),
        );
        summary.log();
        if let Some(path) = &self.config.stats_json {
            summary.write_json(path)?;
            info!("statistics written to {}", path.display());
        }
        Ok(summary)
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    pub fn memory(&self) -> &FixedLatencyMemory {
        &self.memory
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn reader(name: &str, trace: &str) -> TraceReader {
        TraceReader::new(name, Cursor::new(trace.as_bytes().to_vec()))
    }

    fn mem_config() -> MemConfig {
        MemConfig {
            latency: 10,
            ..MemConfig::default()
        }
    }

    fn sim_with(
        traces: Vec<TraceReader>,
        sim_config: SimConfig,
        core_config: CoreConfig,
        caches: CacheHierarchyConfig,
    ) -> Sim {
        let core_config = Arc::new(core_config);
        let processor = Processor::build(
            traces,
            Arc::clone(&core_config),
            &caches,
            Box::new(IdentityPages),
            sim_config.seed,
            sim_config.early_exit,
        )
        .unwrap();
        let memory = FixedLatencyMemory::new(Arc::new(mem_config()));
        Sim::from_parts(sim_config, core_config, processor, memory)
    }

    #[test]
    fn runs_to_completion() {
        let trace = "2 0x1000\n0 0x1040 0x2000\n3 0x3000\n";
        let mut sim = sim_with(
            vec![reader("a", trace)],
            SimConfig::default(),
            CoreConfig::default(),
            CacheHierarchyConfig::default(),
        );
        let summary = sim.simulate().unwrap();
        assert!(!summary.timed_out);
        assert_eq!(summary.per_core[0].committed, 9);
        assert_eq!(summary.per_core[0].retired, 8);
        assert!(summary.throughput > 0.0);
        assert!(sim.memory().is_idle());
        assert_eq!(summary.memory.writes, 1);
    }

    #[test]
    fn instruction_limit_stops_the_run() {
        let core_config = CoreConfig {
            limit_insts: 40,
            ..CoreConfig::default()
        };
        let mut sim = sim_with(
            vec![reader("a", "3 0x1000\n"), reader("b", "1 0x8000\n")],
            SimConfig {
                timeout: 10_000,
                ..SimConfig::default()
            },
            core_config,
            CacheHierarchyConfig::default(),
        );
        let summary = sim.simulate().unwrap();
        assert!(!summary.timed_out, "both cores must reach the limit");
        assert!(sim.processor().has_reached_limit());
        for core in &summary.per_core {
            assert_eq!(core.limit.unwrap().insts, 40);
        }
        assert!(summary.throughput > 0.0);
    }

    #[test]
    fn timeout_is_reported() {
        let sim_config = SimConfig {
            timeout: 20,
            ..SimConfig::default()
        };
        let core_config = CoreConfig {
            limit_insts: 1_000_000,
            ..CoreConfig::default()
        };
        let mut sim = sim_with(
            vec![reader("a", "0 0x1000\n")],
            sim_config,
            core_config,
            CacheHierarchyConfig::default(),
        );
        let summary = sim.simulate().unwrap();
        assert!(summary.timed_out);
        assert_eq!(summary.cycles, 20);
    }

    #[test]
    fn shared_and_private_caches_complete() {
        let caches = CacheHierarchyConfig {
            shared_cache: true,
            ..CacheHierarchyConfig::default()
        };
        let core_config = CoreConfig {
            core_caches: true,
            ..CoreConfig::default()
        };
        let trace = "1 0x1000 R\n0 0x1000 R\n0 0x1040 W\n2 0x1000 R\n";
        let mut sim = sim_with(
            vec![reader("a", trace), reader("b", trace)],
            SimConfig::default(),
            core_config,
            caches,
        );
        let summary = sim.simulate().unwrap();
        assert!(!summary.timed_out);
        for core in &summary.per_core {
            assert_eq!(core.committed, 7);
            assert_eq!(core.retired, 6);
        }
        assert!(sim.processor().cores().iter().all(|core| core.finished()));
    }

    #[test]
    fn missing_traces_are_an_error() {
        let result = Sim::new(
            SimConfig::default(),
            CoreConfig::default(),
            CacheHierarchyConfig::default(),
            MemConfig::default(),
        );
        assert!(result.is_err());

        let sim_config = SimConfig {
            traces: vec!["/nonexistent/trace.txt".into()],
            ..SimConfig::default()
        };
        let err = Sim::new(
            sim_config,
            CoreConfig::default(),
            CacheHierarchyConfig::default(),
            MemConfig::default(),
        )
        .err()
        .unwrap();
        assert!(format!("{err:#}").contains("bad trace file"));
    }
}
