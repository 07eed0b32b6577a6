//! `devices` subcommand: scan and list matching USB devices.

use std::path::Path;

use usbtap_lib::UsbtapError;
use usbtap_lib::config::check_scan_capacity;
use usbtap_lib::runner::{EXIT_NO_DEVICE, EXIT_OK, EXIT_TRANSPORT_FAILED};

use super::{
    DevicesOutput, PlatformNative, Result, Transport, UsbFilter, load_config, print_json,
};

/// A listing that finds nothing exits like a read that finds nothing.
fn listing_exit_code(found: usize) -> i32 {
    if found == 0 { EXIT_NO_DEVICE } else { EXIT_OK }
}

pub(super) fn cmd_devices(
    capacity: Option<usize>,
    json: bool,
    config_path: Option<&Path>,
) -> Result<i32> {
    let config = load_config(config_path);
    let capacity = capacity.unwrap_or(config.scan_capacity);
    check_scan_capacity(capacity).map_err(|e| UsbtapError::Config(e.to_string()))?;

    let transport = Transport::new(PlatformNative::new(UsbFilter::from(&config)));
    let scanned = transport.scan(capacity);
    transport.shutdown();

    let records = match scanned {
        Ok(records) => records,
        Err(e) => {
            if json {
                print_json(&DevicesOutput {
                    count: 0,
                    devices: vec![],
                    error: Some(e.to_string()),
                });
            } else {
                eprintln!("Error: {e}");
            }
            return Ok(EXIT_TRANSPORT_FAILED);
        }
    };

    for record in &records {
        for (field, problem) in record.text_problems() {
            log::warn!(
                "device at bus {} address {}: {field} is not ASCII ({problem}), shown lossily",
                record.bus_number,
                record.device_address
            );
        }
    }

    let devices: Vec<_> = records.iter().map(|r| r.summary()).collect();
    let exit_code = listing_exit_code(devices.len());

    if json {
        print_json(&DevicesOutput {
            count: devices.len(),
            devices,
            error: None,
        });
        return Ok(exit_code);
    }

    if devices.is_empty() {
        println!(
            "No devices found matching {:04X}:{:04X}.",
            config.vendor_id, config.product_id
        );
        return Ok(exit_code);
    }

    println!(
        "Found {} device{}:",
        devices.len(),
        if devices.len() == 1 { "" } else { "s" }
    );
    println!();

    for (i, dev) in devices.iter().enumerate() {
        println!(
            "  [{}] {}:{}  bus {} address {}",
            i + 1,
            dev.vendor_id,
            dev.product_id,
            dev.bus,
            dev.address
        );
        println!("      Serial:       {}", dev.serial);
        if let Some(ref manufacturer) = dev.manufacturer {
            println!("      Manufacturer: {manufacturer}");
        }
        if let Some(ref product) = dev.product {
            println!("      Product:      {product}");
        }
    }

    Ok(EXIT_OK)
}
