//! Maintenance CLI
//!
//! Small operational surface for the box: inspect status, timers, and
//! logs, manage configuration, and run a hardware diagnostic. Every
//! command exits zero on success and nonzero on a diagnostic failure.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use cpal::traits::{DeviceTrait, HostTrait};

use walnut_alarm::AlarmStore;
use walnut_config::{load_settings, Settings};
use walnut_core::PerfMonitor;
use walnut_tts::PhraseCache;

/// Where the running daemon drops its timer snapshots.
const PERF_SNAPSHOT: &str = "./data/perf.json";

#[derive(Parser)]
#[command(name = "walnut", about = "Always-listening voice assistant", version)]
pub struct Cli {
    /// Path to a configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the assistant (default)
    Run,
    /// Summarize configuration and persisted state
    Status,
    /// Show pipeline stage timings from the running assistant
    Perf,
    /// Show where logs go and the most recent lines
    Logs,
    /// Inspect or adjust configuration
    Config(ConfigArgs),
    /// Probe audio devices and persistent stores
    Diag,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Print the effective configuration
    #[arg(long)]
    pub show: bool,

    /// Print one value by dotted path, e.g. tts.cache.enabled
    #[arg(long, value_name = "KEY")]
    pub get: Option<String>,

    /// Persist an override, e.g. tts.cache.enabled=false
    #[arg(long, value_name = "KEY=VALUE")]
    pub set: Option<String>,

    /// Revalidate the on-disk configuration
    #[arg(long)]
    pub reload: bool,

    /// Validate without printing
    #[arg(long)]
    pub validate: bool,
}

fn load(config_path: Option<&Path>) -> Result<Settings, i32> {
    load_settings(config_path).map_err(|e| {
        eprintln!("configuration error: {e}");
        1
    })
}

pub fn status(config_path: Option<&Path>) -> i32 {
    let settings = match load(config_path) {
        Ok(settings) => settings,
        Err(code) => return code,
    };

    println!("walnut {}", env!("CARGO_PKG_VERSION"));
    println!("  input device:   {}", settings.audio.input_device);
    println!("  output device:  {}", settings.audio.output_device);
    println!("  wake words:     {}", settings.wakeword.wake_words.join(", "));
    println!("  tts engine:     {:?}", settings.tts.engine);

    if settings.tts.cache.enabled {
        match PhraseCache::open(&settings.tts.cache.cache_dir) {
            Ok(cache) => println!("  phrase cache:   {} entries", cache.len()),
            Err(e) => println!("  phrase cache:   unavailable ({e})"),
        }
    } else {
        println!("  phrase cache:   disabled");
    }

    if settings.alarm.enabled {
        match AlarmStore::open(&settings.alarm.storage_path) {
            Ok(store) => match store.list_active() {
                Ok(alarms) => println!("  active alarms:  {}", alarms.len()),
                Err(e) => println!("  active alarms:  unreadable ({e})"),
            },
            Err(e) => println!("  alarm store:    unavailable ({e})"),
        }
    } else {
        println!("  alarms:         disabled");
    }

    0
}

pub fn perf(_config_path: Option<&Path>) -> i32 {
    match std::fs::read_to_string(PERF_SNAPSHOT) {
        Ok(raw) => {
            match serde_json::from_str::<serde_json::Value>(&raw) {
                Ok(snapshot) => {
                    println!("{}", serde_json::to_string_pretty(&snapshot).unwrap_or(raw));
                    0
                }
                Err(e) => {
                    eprintln!("perf snapshot unreadable: {e}");
                    1
                }
            }
        }
        Err(_) => {
            println!("no perf snapshot yet; is the assistant running?");
            0
        }
    }
}

/// Serialize the current timers for the `perf` command.
pub fn dump_perf_snapshot(perf: &PerfMonitor) {
    let entries: Vec<serde_json::Value> = perf
        .snapshot()
        .into_iter()
        .map(|entry| {
            serde_json::json!({
                "stage": entry.name,
                "count": entry.count,
                "avg_ms": entry.avg_ms,
                "max_ms": entry.max_ms,
            })
        })
        .collect();

    if let Some(parent) = Path::new(PERF_SNAPSHOT).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Ok(serialized) = serde_json::to_string_pretty(&entries) {
        let _ = std::fs::write(PERF_SNAPSHOT, serialized);
    }
}

pub fn logs(config_path: Option<&Path>) -> i32 {
    let settings = match load(config_path) {
        Ok(settings) => settings,
        Err(code) => return code,
    };

    let path = &settings.observability.log_path;
    println!("log destination: {path}");

    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let lines: Vec<&str> = contents.lines().collect();
            let tail = lines.len().saturating_sub(20);
            for line in &lines[tail..] {
                println!("{line}");
            }
            0
        }
        Err(_) => {
            println!("(no log file yet; the daemon logs to stderr unless redirected)");
            0
        }
    }
}

pub fn config(config_path: Option<&Path>, args: &ConfigArgs) -> i32 {
    if let Some(assignment) = &args.set {
        return config_set(assignment);
    }

    let settings = match load(config_path) {
        Ok(settings) => settings,
        Err(code) => return code,
    };

    if args.validate || args.reload {
        println!("configuration is valid");
        if args.reload {
            println!("restart the assistant to apply changes");
        }
        return 0;
    }

    let value = match serde_json::to_value(&settings) {
        Ok(value) => value,
        Err(e) => {
            eprintln!("serialization failed: {e}");
            return 1;
        }
    };

    if let Some(key) = &args.get {
        return match lookup_path(&value, key) {
            Some(found) => {
                println!("{found}");
                0
            }
            None => {
                eprintln!("unknown configuration key: {key}");
                1
            }
        };
    }

    // Default (and --show): the effective configuration.
    match serde_json::to_string_pretty(&value) {
        Ok(rendered) => {
            println!("{rendered}");
            0
        }
        Err(e) => {
            eprintln!("serialization failed: {e}");
            1
        }
    }
}

/// Persist a dotted-key override into config/local.toml.
fn config_set(assignment: &str) -> i32 {
    let Some((key, value)) = assignment.split_once('=') else {
        eprintln!("expected KEY=VALUE, got '{assignment}'");
        return 1;
    };
    let key = key.trim();
    let value = value.trim();
    if key.is_empty() || value.is_empty() {
        eprintln!("expected KEY=VALUE, got '{assignment}'");
        return 1;
    }

    // Bare numbers and booleans stay unquoted; everything else is a
    // string.
    let rendered = if value.parse::<f64>().is_ok() || value == "true" || value == "false" {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('"', "\\\""))
    };

    let path = Path::new("config/local.toml");
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("cannot create config directory: {e}");
            return 1;
        }
    }

    let existing = std::fs::read_to_string(path).unwrap_or_default();
    let mut lines: Vec<String> = existing
        .lines()
        .filter(|line| !line.trim_start().starts_with(&format!("{key} ")))
        .map(str::to_string)
        .collect();
    lines.push(format!("{key} = {rendered}"));

    match std::fs::write(path, lines.join("\n") + "\n") {
        Ok(()) => {
            println!("set {key} = {rendered}");
            0
        }
        Err(e) => {
            eprintln!("cannot write {}: {e}", path.display());
            1
        }
    }
}

fn lookup_path<'a>(value: &'a serde_json::Value, dotted: &str) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for part in dotted.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

pub fn diag(config_path: Option<&Path>) -> i32 {
    let settings = match load(config_path) {
        Ok(settings) => settings,
        Err(code) => return code,
    };

    let mut failures = 0;
    let host = cpal::default_host();

    match host.input_devices() {
        Ok(devices) => {
            let names: Vec<String> = devices.filter_map(|d| d.name().ok()).collect();
            println!("input devices:  {}", names.join(", "));
            if names.is_empty() {
                eprintln!("  no input devices found");
                failures += 1;
            }
        }
        Err(e) => {
            eprintln!("input device enumeration failed: {e}");
            failures += 1;
        }
    }

    match host.output_devices() {
        Ok(devices) => {
            let names: Vec<String> = devices.filter_map(|d| d.name().ok()).collect();
            println!("output devices: {}", names.join(", "));
            if names.is_empty() {
                eprintln!("  no output devices found");
                failures += 1;
            }
        }
        Err(e) => {
            eprintln!("output device enumeration failed: {e}");
            failures += 1;
        }
    }

    if settings.alarm.enabled {
        match AlarmStore::open(&settings.alarm.storage_path) {
            Ok(_) => println!("alarm store:    ok"),
            Err(e) => {
                eprintln!("alarm store:    failed ({e})");
                failures += 1;
            }
        }
    }

    if settings.tts.cache.enabled {
        match PhraseCache::open(&settings.tts.cache.cache_dir) {
            Ok(cache) => println!("phrase cache:   ok ({} entries)", cache.len()),
            Err(e) => {
                eprintln!("phrase cache:   failed ({e})");
                failures += 1;
            }
        }
    }

    if failures == 0 {
        println!("all diagnostics passed");
        0
    } else {
        eprintln!("{failures} diagnostic(s) failed");
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_lookup() {
        let value = serde_json::json!({
            "tts": { "cache": { "enabled": true } }
        });
        assert_eq!(
            lookup_path(&value, "tts.cache.enabled"),
            Some(&serde_json::Value::Bool(true))
        );
        assert!(lookup_path(&value, "tts.nope").is_none());
    }
}
