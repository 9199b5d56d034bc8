use std::fs;

use clap::Parser;
use tracecore::sim::log::init_logger;
use tracecore::sim::top::Sim;
use tracecore::ui::{parse_configs, TracecoreArgs};

pub fn main() -> anyhow::Result<()> {
    let argv = TracecoreArgs::parse();
    let config = fs::read_to_string(&argv.config_path).unwrap_or_else(|err| {
        eprintln!("failed to read config file: {}", err);
        std::process::exit(1);
    });

    let configs = parse_configs(&config, Some(&argv))?;
    init_logger(configs.sim.log_level);

    let mut sim = Sim::new(configs.sim, configs.core, configs.cache, configs.mem)?;
    let summary = sim.simulate()?;
    println!(
        "cycles: {}, committed: {}, throughput: {:.4}{}",
        summary.cycles,
        summary.committed,
        summary.throughput,
        if summary.timed_out { " (timed out)" } else { "" }
    );
    Ok(())
}
