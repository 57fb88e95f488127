//! Topology example for cpuprobe.
//!
//! This example probes every logical processor with each scheduling mode
//! and prints the resulting topology table.

use cpuprobe_core::arch::{
    AffinityRunner, Capabilities, LeafTable, NativeLeafReader, PinnedThreadRunner, ProbeConfig,
    ProbeMode, TopologyLeaf, TopologyProber,
};
use tracing::info;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let leaves = LeafTable::capture(&NativeLeafReader)?;
    let caps = Capabilities::new(&leaves);
    let runner = PinnedThreadRunner::new();
    let count = runner.logical_processor_count()?;

    println!("CPU Information:");
    println!("  Vendor: {}", caps.vendor_id());
    println!("  Logical processors in affinity set: {}", count);
    println!("  Hybrid: {}", caps.has_hybrid());

    // Example 1: Sequential probing
    println!("\nExample 1: Sequential probing");
    let config = ProbeConfig::default().with_mode(ProbeMode::Sequential);
    let sequential = TopologyProber::new(&leaves, &NativeLeafReader, &runner, config).probe()?;

    println!("  ordinal  x2apic  core  package  smt  type");
    for record in &sequential {
        if !record.is_valid() {
            println!("  {:>7}  probe failed", record.ordinal);
            continue;
        }
        let core_type = record
            .core_type
            .map_or_else(|| "uniform".to_string(), |t| t.to_string());
        println!(
            "  {:>7}  {:>6}  {:>4}  {:>7}  {:>3}  {}",
            record.ordinal,
            record.x2apic_id,
            record.core_id,
            record.package_id,
            record.smt_id,
            core_type
        );
    }

    // Example 2: Parallel probing with the automatically selected batch size
    let mode = ProbeMode::select_for_system(count);
    println!("\nExample 2: {}", mode.description());
    let parallel =
        TopologyProber::new(&leaves, &NativeLeafReader, &runner, ProbeConfig::default()).probe()?;

    if parallel == sequential {
        info!("parallel probe matches sequential probe");
    } else {
        println!("  Parallel probe differs from sequential probe");
    }

    // Example 3: Force the legacy topology leaf
    println!("\nExample 3: Legacy topology leaf");
    let config = ProbeConfig::default().with_topology_leaf(TopologyLeaf::Legacy);
    let legacy = TopologyProber::new(&leaves, &NativeLeafReader, &runner, config).probe()?;
    println!(
        "  {} cores in {} packages",
        legacy.core_count(),
        legacy.package_count()
    );

    match sequential.validate() {
        Ok(()) => println!("\nTopology is consistent"),
        Err(err) => println!("\nTopology is inconsistent: {}", err),
    }

    Ok(())
}
