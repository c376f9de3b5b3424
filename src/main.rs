// src/main.rs  —  cw-engine  entry point: send text as CW, optionally decode it back
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::{AppConfig, Cli};
use cw_engine::morse;
use cw_engine::{CwError, Generator, KeyValue, Receiver, SlopeShape};
use std::io::Read;
use std::sync::{Arc, Mutex, PoisonError};

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    // ── --print-config  ───────────────────────────────────────────────────────
    if cli.print_config {
        print!("{}", config::DEFAULT_CONFIG_TOML);
        return Ok(());
    }

    // ── --write-config  ───────────────────────────────────────────────────────
    if cli.write_config {
        let path = AppConfig::write_default_config(&cli)?;
        println!("Config written to: {}", path.display());
        return Ok(());
    }

    // ── Load config ───────────────────────────────────────────────────────────
    let cfg = AppConfig::load(&cli)?;

    // ── Generator ─────────────────────────────────────────────────────────────
    let mut gen = Generator::new(&cfg.sink)
        .with_context(|| format!("Opening sound system {:?}", cfg.sink.sound_system))?;
    gen.set_speed(cfg.wpm).context("--wpm")?;
    gen.set_frequency(cfg.tone_hz).context("--tone")?;
    gen.set_volume(cfg.volume).context("--volume")?;
    gen.set_gap(cfg.gap).context("--gap")?;
    gen.set_weighting(cfg.weighting).context("--weighting")?;
    let slope_us = if cfg.slope == SlopeShape::Rectangular { None } else { Some(cfg.slope_us) };
    gen.set_tone_slope(Some(cfg.slope), slope_us).context("--slope")?;
    log::info!(
        "[main] {} at {} Hz: {} wpm, {} Hz tone",
        gen.sink_name(), gen.sample_rate(), cfg.wpm, cfg.tone_hz
    );

    // ── Echo receiver ─────────────────────────────────────────────────────────
    let echo = if cfg.echo { Some(attach_receiver(&gen, &cfg)?) } else { None };

    // ── Text ──────────────────────────────────────────────────────────────────
    let text = match &cfg.text {
        Some(t) => t.clone(),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("Reading stdin")?;
            buf
        }
    };
    let words: Vec<&str> = text.split_whitespace().collect();

    gen.start()?;
    for word in &words {
        send(&gen, word)?;
        send(&gen, " ")?;
    }
    gen.wait_for_queue_level(0)?;
    gen.stop()?;

    if let Some((receiver, decoded)) = echo {
        gen.unregister_value_tracking_callback();
        let mut r = receiver.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = decoded.lock().unwrap_or_else(PoisonError::into_inner);
        drain(&mut r, &mut out);
        println!("{}", out.trim_end());
    }
    Ok(())
}

/// Enqueue `text`, backing off while the queue is full.  Characters
/// without a Morse representation are skipped.
fn send(gen: &Generator, text: &str) -> Result<()> {
    for ch in text.chars() {
        if !morse::is_character_valid(ch) {
            log::warn!("[main] no Morse for {:?}, skipped", ch);
            continue;
        }
        loop {
            match gen.enqueue_character(ch) {
                Err(CwError::Full) => gen.wait_for_queue_level(gen.queue_capacity() / 2)?,
                other => break other?,
            }
        }
    }
    Ok(())
}

type Echo = (Arc<Mutex<Receiver>>, Arc<Mutex<String>>);

/// Feed the generator's key edges to a receiver
fn attach_receiver(gen: &Generator, cfg: &AppConfig) -> Result<Echo> {
    let mut receiver = Receiver::new();
    receiver.set_speed(cfg.wpm)?;
    receiver.set_gap(cfg.gap)?;
    receiver.set_tolerance_pct(cfg.tolerance_pct)?;
    receiver.set_noise_threshold_us(cfg.noise_threshold_us);
    receiver.enable_adaptive(cfg.adaptive);

    let receiver = Arc::new(Mutex::new(receiver));
    let decoded = Arc::new(Mutex::new(String::new()));
    let (r, d) = (Arc::clone(&receiver), Arc::clone(&decoded));

    gen.register_value_tracking_callback(move |value| {
        let mut r = r.lock().unwrap_or_else(PoisonError::into_inner);
        let result = match value {
            KeyValue::Closed => {
                drain(&mut r, &mut d.lock().unwrap_or_else(PoisonError::into_inner));
                r.start_tone(None)
            }
            KeyValue::Open => r.end_tone(None).map(|_| ()),
        };
        if let Err(e) = result {
            log::debug!("[main] echo receiver: {}", e);
            if value.is_closed() {
                r.clear();
                let _ = r.start_tone(None);
            }
        }
    });
    Ok((receiver, decoded))
}

/// Move every finished character from the receiver into `out`
fn drain(r: &mut Receiver, out: &mut String) {
    while let Ok(polled) = r.poll_character(None) {
        out.push(polled.character);
        if polled.is_iws && polled.character != ' ' {
            out.push(' ');
        }
    }
}
