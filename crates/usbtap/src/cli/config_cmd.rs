//! `config` subcommand: show the effective configuration and its file.

use std::path::Path;

use usbtap_lib::UsbtapError;
use usbtap_lib::runner::EXIT_OK;

use super::{Config, ConfigOutput, Result, kv, kv_indent, kv_width, load_config, print_json};

/// Write `config` to `path` (or the default location). Never overwrites.
fn init_file(config: &Config, path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) if p.exists() => Err(UsbtapError::Config(format!(
            "{} already exists",
            p.display()
        ))),
        Some(p) => {
            config.save_to(p)?;
            log::info!("wrote {}", p.display());
            Ok(())
        }
        None => Ok(config.save()?),
    }
}

pub(super) fn cmd_config(init: bool, json: bool, custom_path: Option<&Path>) -> Result<i32> {
    let config = load_config(custom_path);
    let config_path = custom_path.map(Path::to_path_buf).or_else(Config::path);
    if init {
        init_file(&config, config_path.as_deref())?;
    }
    let config_exists = config_path.as_ref().is_some_and(|p| p.exists());
    let problems: Vec<String> = match config.validate() {
        Ok(()) => vec![],
        Err(errors) => errors.iter().map(|e| e.to_string()).collect(),
    };

    if json {
        print_json(&ConfigOutput {
            config_file: config_path.as_ref().map(|p| p.display().to_string()),
            config_file_exists: config_exists,
            settings: config,
            problems,
        });
        return Ok(EXIT_OK);
    }

    let w = kv_width(
        &["Config file:"],
        &[
            "vendor_id:",
            "product_id:",
            "interface:",
            "endpoint:",
            "transfer_size:",
            "scan_capacity:",
            "device_serial:",
            "read_size:",
            "read_count:",
            "read_interval_ms:",
            "settle_ms:",
            "deadline_ms:",
            "initialize:",
        ],
    );

    match &config_path {
        Some(p) if config_exists => kv("Config file:", format_args!("{} (loaded)", p.display()), w),
        Some(p) => kv(
            "Config file:",
            format_args!("{} (not found, using defaults)", p.display()),
            w,
        ),
        None => kv("Config file:", "(no config directory)", w),
    }
    println!();

    println!("Device:");
    kv_indent("vendor_id:", format_args!("0x{:04X}", config.vendor_id), w);
    kv_indent("product_id:", format_args!("0x{:04X}", config.product_id), w);
    kv_indent("interface:", config.interface, w);
    kv_indent("endpoint:", format_args!("0x{:02X}", config.endpoint), w);
    kv_indent("transfer_size:", config.transfer_size, w);
    kv_indent("scan_capacity:", config.scan_capacity, w);
    kv_indent(
        "device_serial:",
        config.target_serial().unwrap_or("(first found)"),
        w,
    );
    println!();

    println!("Reads:");
    kv_indent("read_size:", config.read_size, w);
    kv_indent("read_count:", config.read_count, w);
    kv_indent("read_interval_ms:", config.read_interval_ms, w);
    kv_indent("settle_ms:", config.settle_ms, w);
    let deadline = if config.deadline_ms == 0 {
        "none".to_string()
    } else {
        config.deadline_ms.to_string()
    };
    kv_indent("deadline_ms:", deadline, w);
    kv_indent("initialize:", config.initialize, w);

    if !problems.is_empty() {
        println!();
        println!("Problems:");
        for p in &problems {
            println!("  {p}");
        }
    }
    Ok(EXIT_OK)
}
