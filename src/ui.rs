use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use toml::Table;

use crate::sim::config::{CacheHierarchyConfig, Config, CoreConfig, MemConfig, PageMode, SimConfig};
use crate::sim::top::Sim;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct TracecoreArgs {
    #[arg(help = "Path to config.toml")]
    pub config_path: PathBuf,
    #[arg(long = "trace", help = "Trace file for one core; repeat per core (replaces sim.traces)")]
    pub traces: Vec<PathBuf>,
    #[arg(long, help = "Override per-core instruction limit (0: run traces to the end)")]
    pub limit_insts: Option<u64>,
    #[arg(long, help = "Stop as soon as any core finishes")]
    pub early_exit: Option<bool>,
    #[arg(long, help = "Enable log at level (0:warn, 1:info, 2:debug, 3:trace)")]
    pub log: Option<u64>,
    #[arg(long, help = "Write run statistics as JSON to this path")]
    pub stats_json: Option<PathBuf>,
    #[arg(long, help = "Override page allocation (identity, random)")]
    pub pages: Option<PageMode>,
    #[arg(long, help = "Override base random seed")]
    pub seed: Option<u64>,
}

/// Every config section of one run.
#[derive(Debug, Clone)]
pub struct SimConfigs {
    pub sim: SimConfig,
    pub core: CoreConfig,
    pub cache: CacheHierarchyConfig,
    pub mem: MemConfig,
}

/// Parse the TOML configuration. If `cli_args` is given, override TOML options with CLI
/// arguments.
pub fn parse_configs(toml_string: &str, cli_args: Option<&TracecoreArgs>) -> anyhow::Result<SimConfigs> {
    let config_table: Table = toml::from_str(toml_string).context("cannot parse config toml")?;
    let mut sim = SimConfig::from_section(config_table.get("sim"))?;
    let mut core = CoreConfig::from_section(config_table.get("core"))?;
    let cache = CacheHierarchyConfig::from_section(config_table.get("cache"))?;
    let mut mem = MemConfig::from_section(config_table.get("mem"))?;

    // override toml configs with CLI args
    if let Some(args) = cli_args {
        if !args.traces.is_empty() {
            sim.traces = args.traces.clone();
        }
        sim.early_exit = args.early_exit.unwrap_or(sim.early_exit);
        sim.log_level = args.log.unwrap_or(sim.log_level);
        sim.seed = args.seed.unwrap_or(sim.seed);
        if args.stats_json.is_some() {
            sim.stats_json = args.stats_json.clone();
        }
        core.limit_insts = args.limit_insts.unwrap_or(core.limit_insts);
        mem.pages = args.pages.unwrap_or(mem.pages);
    }

    Ok(SimConfigs { sim, core, cache, mem })
}

/// Make a Sim object from the TOML configuration.
pub fn make_sim(toml_string: &str, cli_args: Option<&TracecoreArgs>) -> anyhow::Result<Sim> {
    let configs = parse_configs(toml_string, cli_args)?;
    Sim::new(configs.sim, configs.core, configs.cache, configs.mem)
}
