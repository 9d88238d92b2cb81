//! Hush - command line front end
//!
//! Runs the voice pipeline between a capture device and a playback device
//! until Enter is pressed, then saves the settings used.

use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::TryRecvError;
use hush_core::{AudioDevice, AudioEngine, EngineConfig, Event, HushSettings};
use hush_dsp::{BackendKind, ParamValue};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "hush_core=info,hush_dsp=info,hush_cli=info";

#[derive(Parser, Debug)]
#[command(name = "hush", version, about = "Real-time voice processing: denoise, echo cancel, level")]
struct Args {
    /// Processing backend: preprocess (25 ms), apm (10 ms) or passthrough
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Archive raw and processed audio as WAV files into this directory
    #[arg(long)]
    archive_dir: Option<PathBuf>,

    /// Capture device name
    #[arg(long)]
    input: Option<String>,

    /// Echo reference device name (for example a playback monitor)
    #[arg(long)]
    monitor: Option<String>,

    /// Playback device name
    #[arg(long)]
    output: Option<String>,

    /// Set a backend parameter, e.g. --set gain_control_enabled=true
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_param)]
    params: Vec<(String, ParamValue)>,

    /// Read and write settings at this path instead of the platform config dir
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Do not persist settings on exit
    #[arg(long)]
    no_save: bool,

    /// List audio devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = Args::parse();

    if args.list_devices {
        return list_devices();
    }

    let mut settings = match &args.settings {
        Some(path) => HushSettings::load_from(path),
        None => HushSettings::load(),
    };
    apply_args(&mut settings, &args);

    let engine = AudioEngine::with_config(EngineConfig::from(&settings))
        .context("failed to create audio engine")?;
    info!(
        "Starting Hush with the {} backend ({} ms frames)",
        settings.backend,
        settings.backend.required_interval_ms()
    );

    for (name, value) in settings.parameters_for(settings.backend) {
        if let Err(e) = engine.set_parameter(name, value) {
            warn!("Ignoring stored parameter {}: {}", name, e);
        }
    }

    engine.start()?;
    match wait_for(
        &engine,
        |e| matches!(e, Event::Started | Event::Error { .. }),
        Duration::from_secs(5),
    ) {
        Some(Event::Started) => info!("Audio streams running"),
        Some(Event::Error { message }) => bail!("failed to start audio: {}", message),
        _ => bail!("audio engine did not start in time"),
    }
    run_until_enter(&engine);

    engine.stop()?;
    wait_for(&engine, |e| *e == Event::Stopped, Duration::from_secs(2));
    let stats = engine.stats();
    info!(
        "Processed {} frames ({} dropped)",
        stats.frames_processed, stats.frames_dropped
    );

    if !args.no_save {
        let saved = match &args.settings {
            Some(path) => settings.save_to(path),
            None => settings.save(),
        };
        if let Err(e) = saved {
            warn!("Failed to save settings: {}", e);
        }
    }
    Ok(())
}

/// Fold command line overrides into the persisted settings
fn apply_args(settings: &mut HushSettings, args: &Args) {
    if let Some(backend) = args.backend {
        settings.backend = backend;
    }
    if let Some(dir) = &args.archive_dir {
        settings.archive.enabled = true;
        settings.archive.directory = dir.clone();
    }
    if args.input.is_some() {
        settings.input_device = args.input.clone();
    }
    if args.monitor.is_some() {
        settings.monitor_device = args.monitor.clone();
    }
    if args.output.is_some() {
        settings.output_device = args.output.clone();
    }
    for (name, value) in &args.params {
        settings.set_parameter(settings.backend, name, *value);
    }
}

fn list_devices() -> Result<()> {
    let devices = AudioDevice::enumerate_all().context("failed to enumerate audio devices")?;
    for device in devices {
        println!(
            "{:?}\t{}{}\t{} ch\t{:?}",
            device.device_type,
            device.name,
            if device.is_default { " (default)" } else { "" },
            device.max_channels,
            device.sample_rates
        );
    }
    Ok(())
}

/// Log engine events until a line (or EOF) arrives on stdin
fn run_until_enter(engine: &AudioEngine) {
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().lock().read_line(&mut line);
        let _ = stop_tx.send(());
    });

    println!("Press Enter to stop");
    while let Err(TryRecvError::Empty) = stop_rx.try_recv() {
        if let Some(event) = engine.wait_event_timeout(Duration::from_millis(100)) {
            log_event(&event);
        }
    }
}

fn log_event(event: &Event) {
    match event {
        Event::VoiceActivityChanged { active } => {
            info!("Voice {}", if *active { "detected" } else { "ended" })
        }
        Event::InputLevelsChanged { levels } => debug!("Input levels {:?} dBFS", levels),
        Event::OutputLevelsChanged { levels } => debug!("Output levels {:?} dBFS", levels),
        Event::FrameDropped { reason } => warn!("Frame dropped: {}", reason),
        Event::BufferUnderrun => debug!("Playback underrun"),
        Event::Error { message } => warn!("Engine error: {}", message),
        _ => {}
    }
}

/// Wait for the first event matching `pred`, logging the others
fn wait_for(engine: &AudioEngine, pred: impl Fn(&Event) -> bool, timeout: Duration) -> Option<Event> {
    let deadline = Instant::now() + timeout;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match engine.wait_event_timeout(remaining) {
            Some(event) if pred(&event) => return Some(event),
            Some(event) => log_event(&event),
            None => return None,
        }
    }
    None
}

/// Parse `name=value`, typing the value as bool, integer or float
fn parse_param(arg: &str) -> Result<(String, ParamValue)> {
    let Some((name, raw)) = arg.split_once('=') else {
        bail!("expected NAME=VALUE, got {:?}", arg);
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("parameter name is empty");
    }

    let raw = raw.trim();
    let value = match raw {
        "true" | "on" => ParamValue::Bool(true),
        "false" | "off" => ParamValue::Bool(false),
        _ => {
            if let Ok(int) = raw.parse::<i64>() {
                ParamValue::Int(int)
            } else if let Ok(float) = raw.parse::<f64>() {
                ParamValue::Float(float)
            } else {
                bail!("cannot parse {:?} as bool or number", raw);
            }
        }
    };
    Ok((name.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("gain_control_enabled=true").unwrap(),
            ("gain_control_enabled".to_string(), ParamValue::Bool(true))
        );
        assert_eq!(
            parse_param("gain_control_level = 9000").unwrap(),
            ("gain_control_level".to_string(), ParamValue::Int(9000))
        );
        assert_eq!(
            parse_param("gain_control_max_gain=12.5").unwrap().1,
            ParamValue::Float(12.5)
        );
        assert!(parse_param("noise").is_err());
        assert!(parse_param("=1").is_err());
        assert!(parse_param("x=loud").is_err());
    }

    #[test]
    fn test_args_override_settings() {
        let args = Args::parse_from([
            "hush",
            "--backend",
            "apm",
            "--archive-dir",
            "/tmp/takes",
            "--monitor",
            "Monitor of Speakers",
            "--set",
            "gain_control_enabled=on",
        ]);
        let mut settings = HushSettings::default();
        apply_args(&mut settings, &args);

        assert_eq!(settings.backend, BackendKind::Apm);
        assert!(settings.archive.enabled);
        assert_eq!(settings.archive.directory, PathBuf::from("/tmp/takes"));
        assert_eq!(settings.monitor_device.as_deref(), Some("Monitor of Speakers"));
        assert!(settings
            .parameters_for(BackendKind::Apm)
            .any(|(name, value)| name == "gain_control_enabled" && value == ParamValue::Bool(true)));
    }

    #[test]
    fn test_backend_aliases() {
        let args = Args::parse_from(["hush", "--backend", "bypass"]);
        assert_eq!(args.backend, Some(BackendKind::Passthrough));
        assert!(Args::try_parse_from(["hush", "--backend", "reverb"]).is_err());
    }
}
