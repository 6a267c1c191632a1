//! Startup tasks
//!
//! Includes:
//! - Logger initialization
//! - FFmpeg/FFprobe availability check
//! - Folder structure initialization

use anyhow::Result;
use env_logger::fmt::style::{AnsiColor, Style};
use env_logger::{Builder, Env, WriteStyle};
use log::kv::Key;
use log::{error, info};
use std::io::Write;
use std::process::Command;

use crate::common::{IMPORTED_DIR, VERSIONS_DIR};
use crate::config::AppConfig;
use crate::utils::fs_utils::{ensure_dir, ensure_parent};

// ────────────────────────────────────────────────────────────────
// Logger Initialization
// ────────────────────────────────────────────────────────────────

/// Timestamp, level, target on one line; duration column and message below.
pub fn initialize_logger() {
    let grey: Style = AnsiColor::BrightBlack.on_default();
    let cyan: Style = AnsiColor::Cyan.on_default();

    Builder::from_env(Env::default().default_filter_or("info"))
        .write_style(WriteStyle::Auto)
        .format(move |buf, record| {
            let ts = buf.timestamp();
            let level_style = buf.default_level_style(record.level());

            // "1.234567ms" -> "1.23 ms"
            let dur_raw = record
                .key_values()
                .get(Key::from("duration"))
                .map(|v| {
                    let s = format!("{}", v);
                    if let Some(idx) = s.find(|c: char| c.is_alphabetic()) {
                        let (num, unit) = (&s[..idx], &s[idx..]);
                        if let Ok(val) = num.parse::<f32>() {
                            return format!("{:.2} {}", val, unit);
                        }
                    }
                    s
                })
                .unwrap_or_default();

            let dur = if dur_raw.is_empty() {
                " ".repeat(10)
            } else {
                format!("{cyan}{:>10}{cyan:#}", dur_raw)
            };

            writeln!(
                buf,
                "{grey}{}{grey:#} {level_style}{}{level_style:#} {grey}{}{grey:#}",
                ts,
                record.level(),
                record.target()
            )?;

            let message = format!("{}", record.args());
            let subsequent_indent = " ".repeat(11);
            let mut lines = message.lines();
            if let Some(first_line) = lines.next() {
                writeln!(buf, "{} {}", dur, first_line)?;
            }
            for line in lines {
                writeln!(buf, "{}{}", subsequent_indent, line)?;
            }
            Ok(())
        })
        .filter(Some("reqwest"), log::LevelFilter::Warn)
        .filter(Some("hyper_util"), log::LevelFilter::Warn)
        .init();
}

// ────────────────────────────────────────────────────────────────
// FFmpeg Check
// ────────────────────────────────────────────────────────────────

/// Video and audio versions fail without these; images and clones still work.
pub fn check_ffmpeg_and_ffprobe() {
    for command in &["ffmpeg", "ffprobe"] {
        match Command::new(command).arg("-version").output() {
            Ok(output) if output.status.success() => {
                let version_info = String::from_utf8_lossy(&output.stdout);
                let version_number = version_info
                    .lines()
                    .next()
                    .unwrap_or("Unknown version")
                    .split_whitespace()
                    .nth(2)
                    .unwrap_or("Unknown");
                info!("{} version: {}", command, version_number);
            }
            Ok(_) => {
                error!(
                    "`{}` command was found, but it returned an error. Please ensure it's correctly installed.",
                    command
                );
            }
            Err(_) => {
                error!(
                    "`{}` is not installed or not available in PATH. Video and audio versions will fail.",
                    command
                );
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────
// Folder Initialization
// ────────────────────────────────────────────────────────────────

pub fn initialize_folder(config: &AppConfig) -> Result<()> {
    ensure_parent(&config.db_path)?;
    ensure_dir(config.object_root.join(IMPORTED_DIR))?;
    ensure_dir(config.object_root.join(VERSIONS_DIR))?;
    ensure_dir(&config.temp_root)?;
    Ok(())
}

/// Run after `initialize_logger`, once the configuration is known.
pub fn initialize(config: &AppConfig) -> Result<()> {
    check_ffmpeg_and_ffprobe();
    initialize_folder(config)
}
