use std::io::Cursor;
use std::sync::Arc;

use super::harness::{small_config, ScriptedPort};
use crate::base::behavior::ModuleBehaviors;
use crate::cpu::{AccessKind, Completion, MemoryRequest};
use crate::mem::{FixedLatencyMemory, IdentityPages};
use crate::processor::Processor;
use crate::sim::config::{CacheHierarchyConfig, CoreConfig, MemConfig};
use crate::sim::trace::TraceReader;

fn processor(traces: &[&str], config: CoreConfig, early_exit: bool) -> Processor {
    processor_with(traces, config, &CacheHierarchyConfig::default(), early_exit)
}

fn processor_with(
    traces: &[&str],
    config: CoreConfig,
    caches: &CacheHierarchyConfig,
    early_exit: bool,
) -> Processor {
    let readers = traces
        .iter()
        .enumerate()
        .map(|(id, trace)| TraceReader::new(format!("core{id}"), Cursor::new(trace.as_bytes().to_vec())))
        .collect();
    Processor::build(
        readers,
        Arc::new(config),
        caches,
        Box::new(IdentityPages),
        0,
        early_exit,
    )
    .unwrap()
}

fn cycle(processor: &mut Processor, port: &mut ScriptedPort) {
    processor.tick(port).unwrap();
    let now = processor.cpu_cycles();
    for request in port.unanswered() {
        processor.receive(&Completion::new(request, now, now + 1));
    }
}

/// One access per page, so every line needs its own walk.
fn many_pages(count: u64) -> String {
    (1..=count).map(|page| format!("0 {:#x}\n", page << 12)).collect()
}

#[test]
fn needs_at_least_one_core() {
    assert!(Processor::new(Vec::new(), None, Box::new(IdentityPages), false).is_err());
}

#[test]
fn early_exit_latches_first_finisher_once() {
    let long = many_pages(20);
    let mut processor = processor(&["0 0x1000\n", long.as_str()], small_config(), true);
    let mut port = ScriptedPort::default();

    while !processor.finished() {
        assert!(processor.cpu_cycles() < 200);
        cycle(&mut processor, &mut port);
    }
    assert!(processor.cores()[0].finished());
    assert!(!processor.cores()[1].finished());
    let throughput = processor.throughput();
    assert!((throughput - processor.cores()[0].calc_ipc()).abs() < 1e-12);

    for _ in 0..100 {
        cycle(&mut processor, &mut port);
    }
    assert!(processor.cores()[1].finished());
    assert!(processor.finished());
    assert_eq!(processor.throughput(), throughput);
}

#[test]
fn wait_all_sums_each_core_once() {
    let long = many_pages(20);
    let mut processor = processor(&["0 0x1000\n", long.as_str()], small_config(), false);
    let mut port = ScriptedPort::default();
    let mut first_ipc = None;

    while !processor.finished() {
        assert!(processor.cpu_cycles() < 200);
        cycle(&mut processor, &mut port);
        if first_ipc.is_none() && processor.cores()[0].finished() {
            first_ipc = Some(processor.cores()[0].calc_ipc());
        }
    }
    let expected = first_ipc.unwrap() + processor.cores()[1].calc_ipc();
    assert!((processor.throughput() - expected).abs() < 1e-12);

    assert!(processor.finished());
    assert!((processor.throughput() - expected).abs() < 1e-12);
}

#[test]
fn completions_reach_only_their_core() {
    let mut processor = processor(&["", ""], small_config(), false);
    let mut port = ScriptedPort::default();
    let request = MemoryRequest::new(0x40, AccessKind::Read, 1);
    processor.receive(&Completion::new(request, 0, 25));
    cycle(&mut processor, &mut port);
    assert_eq!(processor.cores()[0].memory_access_cycles(), 0);
    assert_eq!(processor.cores()[1].memory_access_cycles(), 25);
}

#[test]
fn limit_needs_every_core() {
    let config = CoreConfig {
        limit_insts: 6,
        ..small_config()
    };
    let mut processor = processor(&["5 0x1000\n", "0 0x2000\n"], config, false);
    let mut port = ScriptedPort::default();

    // the bubble-heavy core gets there first
    while !processor.cores()[0].has_reached_limit() {
        assert!(processor.cpu_cycles() < 100);
        cycle(&mut processor, &mut port);
    }
    assert!(!processor.cores()[1].has_reached_limit());
    assert!(!processor.has_reached_limit());

    while !processor.has_reached_limit() {
        assert!(processor.cpu_cycles() < 300);
        cycle(&mut processor, &mut port);
    }
    let sum: u64 = processor
        .cores()
        .iter()
        .map(|core| core.committed_instructions())
        .sum();
    assert_eq!(processor.committed_instructions(), sum);
    assert!(sum >= 12);
}

#[test]
fn reset_stats_clears_counters_and_throughput() {
    let mut processor = processor(&["0 0x1000\n"], small_config(), false);
    let mut port = ScriptedPort::default();
    while !processor.finished() {
        assert!(processor.cpu_cycles() < 100);
        cycle(&mut processor, &mut port);
    }
    assert!(processor.throughput() > 0.0);

    processor.reset_stats();
    assert_eq!(processor.throughput(), 0.0);
    assert_eq!(processor.committed_instructions(), 0);
    assert_eq!(processor.cores()[0].cycles(), 0);
}

#[test]
fn one_request_per_cycle_memory_serves_every_core() {
    let config = CoreConfig {
        limit_insts: 20,
        ..small_config()
    };
    let mut processor = processor(&["0 0x1000\n", "0 0x2000\n"], config, false);
    // the default channel accepts a single access per cycle
    let mut memory = FixedLatencyMemory::new(Arc::new(MemConfig {
        latency: 5,
        ..MemConfig::default()
    }));

    while !processor.has_reached_limit() {
        assert!(
            processor.cpu_cycles() < 1_000,
            "core 1 starved: {:?}",
            processor.cores()[1]
        );
        processor.tick(&mut memory).unwrap();
        memory.tick_one();
        while let Some(completion) = memory.pop_completion() {
            processor.receive(&completion);
        }
    }
    for core in processor.cores() {
        assert_eq!(core.limit_record().unwrap().insts, 20);
    }
}

#[test]
fn shared_cache_fills_private_caches_on_the_way_up() {
    let caches = CacheHierarchyConfig {
        shared_cache: true,
        ..CacheHierarchyConfig::default()
    };
    let config = CoreConfig {
        core_caches: true,
        ..small_config()
    };
    let mut processor = processor_with(&["0 0x1000 R\n"], config, &caches, false);
    let mut port = ScriptedPort::default();

    processor.tick(&mut port).unwrap();
    assert_eq!(port.sent.len(), 1);
    assert!(port.sent[0].is_walk());
    assert!(!processor.caches_idle());

    let now = processor.cpu_cycles();
    for request in port.unanswered() {
        processor.receive(&Completion::new(request, now, now + 1));
    }
    assert!(processor.caches_idle());
}
