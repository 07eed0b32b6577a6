//! CLI subcommands: device listing, read runs, configuration.

mod config_cmd;
mod devices;
mod read;

use std::path::Path;

use clap::{Args, Subcommand};
use serde::Serialize;

pub(super) use usbtap_lib::config::{Config, Preset};
pub(super) use usbtap_lib::error::Result;
pub(super) use usbtap_lib::native::{PlatformNative, UsbFilter};
pub(super) use usbtap_lib::record::DeviceSummary;
pub(super) use usbtap_lib::read_loop::ReadOutcome;
pub(super) use usbtap_lib::transport::Transport;

const PADDING: usize = 2;

/// Compute alignment width for key-value output: the longest key in either
/// level plus PADDING, with indented values lined up with top-level ones.
pub(super) fn kv_width(top: &[&str], indent: &[&str]) -> usize {
    let top_max = top.iter().map(|k| k.len()).max().unwrap_or(0);
    let indent_max = indent.iter().map(|k| k.len()).max().unwrap_or(0);
    let top_need = if top.is_empty() { 0 } else { top_max + PADDING };
    // indent keys lose 2 columns to the "  " prefix
    let indent_need = if indent.is_empty() {
        0
    } else {
        indent_max + PADDING + 2
    };
    top_need.max(indent_need)
}

pub(super) fn format_kv(key: &str, value: impl std::fmt::Display, w: usize) -> String {
    format!("{key:<width$}{value}", width = w)
}

pub(super) fn kv(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("{}", format_kv(key, value, w));
}

pub(super) fn kv_indent(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("  {key:<width$}{value}", width = w - 2);
}

/// Load the config from `custom` or the default path, logging parse warnings.
pub(super) fn load_config(custom: Option<&Path>) -> Config {
    let (config, warnings) = match custom {
        Some(path) => Config::load_from(path),
        None => Config::load_with_warnings(),
    };
    for w in &warnings {
        log::warn!("{w}");
    }
    config
}

/// Pretty JSON on stdout.
pub(super) fn print_json(value: &impl Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => log::error!("JSON serialization failed: {e}"),
    }
}

// ── JSON output structs ──

#[derive(Serialize)]
pub(super) struct ConfigOutput {
    pub config_file: Option<String>,
    pub config_file_exists: bool,
    pub settings: Config,
    pub problems: Vec<String>,
}

#[derive(Serialize)]
pub(super) struct DevicesOutput {
    pub count: usize,
    pub devices: Vec<DeviceSummary>,
    pub error: Option<String>,
}

#[derive(Serialize)]
pub(super) struct ReadJson {
    pub index: u32,
    pub outcome: ReadOutcome,
    /// Lowercase hex of the bytes read, empty for non-data outcomes.
    pub data: String,
}

#[derive(Serialize)]
pub(super) struct ReadOutput {
    pub device: Option<DeviceSummary>,
    pub reads: Vec<ReadJson>,
    pub bytes_total: usize,
    pub halted_by: Option<String>,
    pub deadline_hit: bool,
    pub error: Option<String>,
    pub close_error: Option<String>,
    pub exit_code: i32,
}

// ── Commands ──

#[derive(Args, Debug, Default)]
pub struct ReadArgs {
    /// Serial of the device to open (default: from config, else first found)
    #[arg(long)]
    pub serial: Option<String>,
    /// Start from a canned plan: snapshot, poll or stream
    #[arg(long)]
    pub preset: Option<Preset>,
    /// Number of reads
    #[arg(long)]
    pub count: Option<u32>,
    /// Read buffer size in bytes
    #[arg(long)]
    pub size: Option<usize>,
    /// Pause between reads in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,
    /// Pause between open and the first read in milliseconds
    #[arg(long)]
    pub settle_ms: Option<u64>,
    /// Stop reading after this many milliseconds (0 = no limit)
    #[arg(long)]
    pub deadline_ms: Option<u64>,
    /// Skip the transport initialize step
    #[arg(long)]
    pub no_init: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// List matching USB devices
    Devices {
        /// Maximum number of devices to report (default: from config)
        #[arg(long)]
        capacity: Option<usize>,
    },

    /// Open a device, poll it for data, close it
    Read(ReadArgs),

    /// Show current configuration and file paths
    Config {
        /// Write the current settings to the config file if it doesn't exist
        #[arg(long)]
        init: bool,
    },
}

/// Run `cmd`, returning the process exit code.
pub fn run(cmd: Command, json: bool, config_path: Option<&Path>) -> Result<i32> {
    match cmd {
        Command::Devices { capacity } => devices::cmd_devices(capacity, json, config_path),
        Command::Read(args) => read::cmd_read(args, json, config_path),
        Command::Config { init } => config_cmd::cmd_config(init, json, config_path),
    }
}
