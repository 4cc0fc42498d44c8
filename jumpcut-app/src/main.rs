//! Jumpcut headless host.
//!
//! Plays a WAV file through a simulated player under a [`Controller`],
//! printing every playback command, silence event and status change as one
//! JSON object per line, followed by a summary report.
//!
//! ```text
//! jumpcut <input.wav> [--settings <path>] [--save-settings] [--quiet]
//! ```
//!
//! [`Controller`]: jumpcut_core::Controller

mod settings;
mod sim;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context};
use settings::{default_settings_path, load_settings, save_settings};
use sim::SimOutput;
use tracing::info;

struct Args {
    input: PathBuf,
    settings_path: PathBuf,
    save_settings: bool,
    quiet: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut input = None;
    let mut settings_path = None;
    let mut save_settings = false;
    let mut quiet = false;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--settings" => {
                settings_path = Some(PathBuf::from(args.next().context("--settings needs a path")?));
            }
            "--save-settings" => save_settings = true,
            "--quiet" => quiet = true,
            flag if flag.starts_with("--") => bail!("unknown flag {flag}"),
            path => {
                if input.replace(PathBuf::from(path)).is_some() {
                    bail!("only one input file is supported");
                }
            }
        }
    }
    Ok(Args {
        input: input.context("usage: jumpcut <input.wav> [--settings <path>] [--save-settings] [--quiet]")?,
        settings_path: settings_path.unwrap_or_else(default_settings_path),
        save_settings,
        quiet,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("jumpcut=info,jumpcut_core=info")),
        )
        .init();

    let args = parse_args()?;
    let app_settings = load_settings(&args.settings_path);
    info!(
        settings_path = ?args.settings_path,
        volume_threshold = app_settings.playback.volume_threshold,
        sounded_speed = app_settings.playback.sounded_speed,
        silence_speed = app_settings.playback.silence_speed,
        margin_before = app_settings.playback.margin_before,
        margin_after = app_settings.playback.margin_after,
        "settings loaded"
    );
    if args.save_settings {
        save_settings(&args.settings_path, &app_settings)
            .with_context(|| format!("saving {}", args.settings_path.display()))?;
        info!(path = ?args.settings_path, "settings saved");
    }

    // The simulation is blocking work; keep it off the async executor.
    let quiet = args.quiet;
    let report = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        sim::run(&args.input, &app_settings, |out| {
            if quiet && !matches!(out, SimOutput::Report(_)) {
                return;
            }
            match serde_json::to_string(&out) {
                Ok(line) => {
                    let _ = writeln!(stdout.lock(), "{line}");
                }
                Err(e) => tracing::warn!("unserialisable output: {e}"),
            }
        })
    })
    .await
    .context("simulation task panicked")??;

    info!(
        media_duration = report.media_duration,
        played_in = report.played_in,
        time_saved = report.time_saved.compared_to_intrinsic,
        time_saved_fraction = report.time_saved.compared_to_intrinsic_fraction(),
        "done"
    );
    Ok(())
}
