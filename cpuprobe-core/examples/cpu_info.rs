use anyhow::Context;
use cpuprobe_core::arch;
use sysinfo::{System, SystemExt};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    // Detect identification data and topology
    let processor = arch::detect_processor().context("Failed to detect processor")?;
    let caps = processor.capabilities();

    println!("Vendor: {}", caps.vendor_id());
    println!("Intel: {}", caps.is_intel());
    println!("AMD: {}", caps.is_amd());

    match caps.brand_string() {
        Some(brand) => println!("Brand: {}", brand),
        None => println!("Brand string not available"),
    }

    println!(
        "Family {:#x}, model {:#x}, stepping {:#x} (type {})",
        caps.display_family(),
        caps.display_model(),
        caps.stepping(),
        caps.processor_type()
    );
    println!(
        "Max standard leaf {:#x}, max extended leaf {:#x}",
        processor.leaves().max_leaf(),
        processor.leaves().max_extended_leaf()
    );

    let features: Vec<String> = caps.features().map(|f| f.to_string()).collect();
    println!("Features: {}", features.join(" "));

    let topology = processor.topology();
    println!("\nDetected {} logical processors", topology.len());
    println!("Detected {} physical cores", topology.core_count());
    println!("Detected {} packages", topology.package_count());

    // Cross-check against what the OS reports
    let system = System::new();
    if let Some(physical) = system.physical_core_count() {
        println!("OS reports {} physical cores", physical);
    } else {
        println!("OS physical core count not available");
    }

    Ok(())
}
