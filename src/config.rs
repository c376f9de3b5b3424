// src/config.rs  —  Runtime configuration (CLI + TOML)
use anyhow::{Context, Result};
use clap::Parser;
use cw_engine::generator::{
    DEFAULT_FREQUENCY, DEFAULT_GAP, DEFAULT_SLOPE_US, DEFAULT_SPEED, DEFAULT_VOLUME,
    DEFAULT_WEIGHTING,
};
use cw_engine::receiver::{DEFAULT_NOISE_THRESHOLD_US, DEFAULT_TOLERANCE_PCT};
use cw_engine::{SinkConfig, SlopeShape, SoundSystem};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The example config is embedded directly in the binary at compile time.
/// Users can write it out with:  cw-engine --write-config
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../config.toml.example");

// ── CLI ───────────────────────────────────────────────────────────────────────
#[derive(Parser, Debug)]
#[command(
    name  = "cw-engine",
    about = "Send text as Morse code, optionally decoding it back",
    version,
)]
pub struct Cli {
    /// Text to send (default: read stdin)
    pub text: Vec<String>,

    /// Config file path (default: ~/.config/cw-engine/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Sound system: null | console | oss | alsa | pulseaudio | soundcard
    #[arg(short, long)]
    pub sound: Option<SoundSystem>,

    /// Device for the sound system (console/OSS path, ALSA/PulseAudio device name)
    #[arg(short, long)]
    pub device: Option<String>,

    /// Sending speed in WPM (4–60)
    #[arg(short, long)]
    pub wpm: Option<u32>,

    /// Tone frequency Hz (0–4000)
    #[arg(short, long)]
    pub tone: Option<u32>,

    /// Volume percent (0–100)
    #[arg(long)]
    pub volume: Option<u32>,

    /// Extra units between characters (0–60)
    #[arg(long)]
    pub gap: Option<u32>,

    /// Dot/space weighting percent (20–80, 50 = standard)
    #[arg(long)]
    pub weighting: Option<u32>,

    /// Slope shape: linear | raised-cosine | sine | rectangular
    #[arg(long)]
    pub slope: Option<SlopeShape>,

    /// Slope duration in microseconds
    #[arg(long)]
    pub slope_us: Option<u32>,

    /// Decode the generated signal and print it
    #[arg(long, action)]
    pub echo: bool,

    /// Let the echo receiver track the speed instead of assuming --wpm
    #[arg(long, action)]
    pub adaptive: bool,

    /// Write the built-in default config.toml to the config path and exit.
    /// Use --config <PATH> to write to a custom location.
    #[arg(long, action)]
    pub write_config: bool,

    /// Print the built-in default config.toml to stdout and exit
    #[arg(long, action)]
    pub print_config: bool,
}

// ── TOML file structure ───────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    pub sound:    Option<SoundCfg>,
    pub morse:    Option<MorseCfg>,
    pub receiver: Option<ReceiverCfg>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoundCfg {
    pub system: Option<SoundSystem>,
    pub device: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MorseCfg {
    pub wpm:       Option<u32>,
    pub tone_hz:   Option<u32>,
    pub volume:    Option<u32>,
    pub gap:       Option<u32>,
    pub weighting: Option<u32>,
    pub slope:     Option<SlopeShape>,
    pub slope_us:  Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverCfg {
    pub echo:               Option<bool>,
    pub adaptive:           Option<bool>,
    pub tolerance_pct:      Option<u32>,
    pub noise_threshold_us: Option<u32>,
}

// ── Resolved / merged config ──────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub sink:               SinkConfig,
    pub wpm:                u32,
    pub tone_hz:            u32,
    pub volume:             u32,
    pub gap:                u32,
    pub weighting:          u32,
    pub slope:              SlopeShape,
    pub slope_us:           u32,
    pub echo:               bool,
    pub adaptive:           bool,
    pub tolerance_pct:      u32,
    pub noise_threshold_us: u32,
    /// None → read stdin
    pub text:               Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sink:               SinkConfig::new(SoundSystem::Soundcard),
            wpm:                DEFAULT_SPEED,
            tone_hz:            DEFAULT_FREQUENCY,
            volume:             DEFAULT_VOLUME,
            gap:                DEFAULT_GAP,
            weighting:          DEFAULT_WEIGHTING,
            slope:              SlopeShape::RaisedCosine,
            slope_us:           DEFAULT_SLOPE_US,
            echo:               false,
            adaptive:           false,
            tolerance_pct:      DEFAULT_TOLERANCE_PCT,
            noise_threshold_us: DEFAULT_NOISE_THRESHOLD_US,
            text:               None,
        }
    }
}

// ── Config loader ─────────────────────────────────────────────────────────────
impl AppConfig {
    /// Write the embedded default config to disk.
    /// Returns the path it was written to.
    pub fn write_default_config(cli: &Cli) -> Result<PathBuf> {
        let path = cli.config.clone().unwrap_or_else(default_config_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Creating config directory {:?}", parent))?;
        }
        std::fs::write(&path, DEFAULT_CONFIG_TOML)
            .with_context(|| format!("Writing config to {:?}", path))?;
        Ok(path)
    }

    pub fn load(cli: &Cli) -> Result<Self> {
        let mut cfg = Self::default();

        // 1. Load TOML file; a missing file just means defaults
        let path = cli.config.clone().unwrap_or_else(default_config_path);
        if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Reading config {:?}", path))?;
            let fc: FileConfig = toml::from_str(&raw)
                .with_context(|| format!("Parsing config {:?}", path))?;
            cfg.apply_file(&fc);
        } else if cli.config.is_some() {
            anyhow::bail!("Config file {} does not exist", path.display());
        } else {
            log::debug!("[config] no config file at {}", path.display());
        }

        // 2. Apply CLI overrides
        cfg.apply_cli(cli);
        Ok(cfg)
    }

    fn apply_file(&mut self, fc: &FileConfig) {
        if let Some(s) = &fc.sound {
            if let Some(v) = s.system  { self.sink.sound_system = v; }
            if let Some(v) = &s.device { self.sink.device       = Some(v.clone()); }
        }
        if let Some(m) = &fc.morse {
            if let Some(v) = m.wpm       { self.wpm       = v; }
            if let Some(v) = m.tone_hz   { self.tone_hz   = v; }
            if let Some(v) = m.volume    { self.volume    = v; }
            if let Some(v) = m.gap       { self.gap       = v; }
            if let Some(v) = m.weighting { self.weighting = v; }
            if let Some(v) = m.slope     { self.slope     = v; }
            if let Some(v) = m.slope_us  { self.slope_us  = v; }
        }
        if let Some(r) = &fc.receiver {
            if let Some(v) = r.echo               { self.echo               = v; }
            if let Some(v) = r.adaptive           { self.adaptive           = v; }
            if let Some(v) = r.tolerance_pct      { self.tolerance_pct      = v; }
            if let Some(v) = r.noise_threshold_us { self.noise_threshold_us = v; }
        }
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(v) = cli.sound     { self.sink.sound_system = v; }
        if let Some(v) = &cli.device   { self.sink.device       = Some(v.clone()); }
        if let Some(v) = cli.wpm       { self.wpm       = v; }
        if let Some(v) = cli.tone      { self.tone_hz   = v; }
        if let Some(v) = cli.volume    { self.volume    = v; }
        if let Some(v) = cli.gap       { self.gap       = v; }
        if let Some(v) = cli.weighting { self.weighting = v; }
        if let Some(v) = cli.slope     { self.slope     = v; }
        if let Some(v) = cli.slope_us  { self.slope_us  = v; }
        if cli.echo                    { self.echo      = true; }
        if cli.adaptive                { self.adaptive  = true; }
        if !cli.text.is_empty()        { self.text      = Some(cli.text.join(" ")); }
    }
}

fn default_config_path() -> PathBuf {
    config_dir().join("cw-engine").join("config.toml")
}

fn config_dir() -> PathBuf {
    if let Ok(v) = std::env::var("XDG_CONFIG_HOME") { return PathBuf::from(v); }
    if let Ok(v) = std::env::var("APPDATA")          { return PathBuf::from(v); }
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_default();
    PathBuf::from(home).join(".config")
}
