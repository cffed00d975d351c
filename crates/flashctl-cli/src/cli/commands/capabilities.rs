//! `flashctl capabilities` – show what a brand supports.

use anyhow::{anyhow, Result};
use flashctl_core::job::{BuiltinCapabilities, CapabilityLookup, DeviceBrand};

pub fn run_capabilities(brand: DeviceBrand) -> Result<()> {
    let caps = BuiltinCapabilities
        .capabilities(brand)
        .ok_or_else(|| anyhow!("no capability entry for brand {brand}"))?;
    let methods: Vec<&str> = caps.supported_methods.iter().map(|m| m.as_str()).collect();
    println!("brand:             {}", caps.brand);
    println!("methods:           {}", methods.join(", "));
    println!("device state:      {:?}", caps.required_device_state);
    if caps.partition_support.is_empty() {
        println!("partitions:        any");
    } else {
        println!("partitions:        {}", caps.partition_support.join(", "));
    }
    println!("bootloader unlock: {}", if caps.bootloader_unlock_required { "required" } else { "not required" });
    Ok(())
}
