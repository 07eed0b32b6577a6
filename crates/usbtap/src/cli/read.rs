//! `read` subcommand: scan, open the chosen device, poll it, close it.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use usbtap_lib::UsbtapError;
use usbtap_lib::finalizer::Finalizer;
use usbtap_lib::record::{DeviceRecord, SessionHandle};
use usbtap_lib::runner::{self, RunObserver, RunPlan};
use usbtap_lib::session::{SessionError, SessionManager};

use super::{
    Config, PlatformNative, ReadArgs, ReadJson, ReadOutcome, ReadOutput, Result, Transport,
    UsbFilter, load_config, print_json,
};

/// Exit status after Ctrl+C / SIGTERM.
const EXIT_INTERRUPTED: i32 = 130;

/// Bytes per hex dump line.
const DUMP_WIDTH: usize = 16;

/// Config from file, then preset, then individual flags.
fn effective_config(args: &ReadArgs, config_path: Option<&Path>) -> Result<Config> {
    let mut config = load_config(config_path);
    if let Some(preset) = args.preset {
        preset.apply(&mut config);
    }
    if let Some(ref serial) = args.serial {
        config.device_serial = serial.clone();
    }
    if let Some(count) = args.count {
        config.read_count = count;
    }
    if let Some(size) = args.size {
        config.read_size = size;
    }
    if let Some(ms) = args.interval_ms {
        config.read_interval_ms = ms;
    }
    if let Some(ms) = args.settle_ms {
        config.settle_ms = ms;
    }
    if let Some(ms) = args.deadline_ms {
        config.deadline_ms = ms;
    }
    if args.no_init {
        config.initialize = false;
    }

    config.validate().map_err(|errors| {
        let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        UsbtapError::Config(msgs.join("; "))
    })?;
    Ok(config)
}

/// Classic offset / hex / ASCII dump.
pub(super) fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for (line, chunk) in data.chunks(DUMP_WIDTH).enumerate() {
        let _ = write!(out, "  {:04x}:", line * DUMP_WIDTH);
        for b in chunk {
            let _ = write!(out, " {b:02x}");
        }
        for _ in chunk.len()..DUMP_WIDTH {
            out.push_str("   ");
        }
        out.push_str("  ");
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push('\n');
    }
    out
}

fn hex_string(data: &[u8]) -> String {
    data.iter().fold(String::with_capacity(data.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// Prints progress as it happens (text mode) and keeps the reads for JSON.
struct Reporter {
    json: bool,
    reads: Vec<ReadJson>,
}

impl RunObserver for Reporter {
    fn on_scan(&mut self, records: &[DeviceRecord]) {
        if !self.json {
            println!(
                "Found {} device{}",
                records.len(),
                if records.len() == 1 { "" } else { "s" }
            );
        }
    }

    fn on_selected(&mut self, record: &DeviceRecord) {
        for (field, problem) in record.text_problems() {
            log::warn!("selected device {field} is not ASCII ({problem})");
        }
        if !self.json {
            let s = record.summary();
            println!(
                "Using {}:{} serial {} (bus {} address {})",
                s.vendor_id, s.product_id, s.serial, s.bus, s.address
            );
        }
    }

    fn on_opened(&mut self, handle: &SessionHandle) {
        if !self.json {
            println!("Opened {handle}");
        }
    }

    fn on_read(&mut self, index: u32, outcome: &ReadOutcome, data: &[u8]) {
        if !self.json {
            println!("[{}] {outcome}", index + 1);
            if !data.is_empty() {
                print!("{}", hex_dump(data));
            }
        }
        self.reads.push(ReadJson {
            index,
            outcome: *outcome,
            data: hex_string(data),
        });
    }

    fn on_closed(&mut self, close_error: Option<&SessionError>) {
        if self.json {
            return;
        }
        match close_error {
            Some(e) => println!("Closed (warning: {e})"),
            None => println!("Closed"),
        }
    }
}

pub(super) fn cmd_read(args: ReadArgs, json: bool, config_path: Option<&Path>) -> Result<i32> {
    let config = effective_config(&args, config_path)?;
    let plan = RunPlan::from_config(&config);
    log::debug!("run plan: {plan:?}");

    let transport = Arc::new(Transport::new(PlatformNative::new(UsbFilter::from(&config))));

    // Ctrl+C / SIGTERM: close whatever is open, release the transport, exit.
    let finalizer = Finalizer::new();
    finalizer.install_transport(Arc::clone(&transport));
    {
        let finalizer = finalizer.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            finalizer.run();
            std::process::exit(EXIT_INTERRUPTED);
        }) {
            log::warn!("could not install Ctrl+C handler: {e}");
        }
    }

    let manager = SessionManager::new(&*transport).with_finalizer(finalizer.clone());
    let mut reporter = Reporter {
        json,
        reads: Vec::new(),
    };
    let report = runner::run(&manager, &plan, &mut reporter);
    let exit_code = report.exit_code();

    if json {
        let series = report.series.as_ref();
        print_json(&ReadOutput {
            device: report.selected.as_ref().map(DeviceRecord::summary),
            reads: reporter.reads,
            bytes_total: series.map_or(0, |s| s.bytes_total),
            halted_by: series.and_then(|s| s.halted_by).map(|e| e.to_string()),
            deadline_hit: series.is_some_and(|s| s.deadline_hit),
            error: report.error.as_ref().map(|e| e.to_string()),
            close_error: report.close_error.as_ref().map(|e| e.to_string()),
            exit_code,
        });
        return Ok(exit_code);
    }

    if let Some(series) = &report.series {
        let reads = series.outcomes.len();
        println!(
            "Total: {} bytes in {} read{}{}",
            series.bytes_total,
            reads,
            if reads == 1 { "" } else { "s" },
            if series.deadline_hit {
                " (deadline reached)"
            } else {
                ""
            }
        );
    }
    if let Some(e) = &report.error {
        eprintln!("Error: {e}");
    }
    Ok(exit_code)
}
