//! Cadence Host - drives the audio pipeline without an emulator
//!
//! Starts an [`AudioEngine`] from the user's settings, then plays the part
//! of a guest program: it opens a stereo port, listens for mix
//! notifications and writes one block of a test tone after each period.
//!
//! ## Command line flags
//!
//! - `--seconds <n>`: how long to play (default 5)
//! - `--null`: use the null backend instead of the audio device

use std::f32::consts::TAU;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use cadence_core::backend::default_backend_factory;
use cadence_core::config::{default_config_path, load_config, AudioSettings, BackendKind};
use cadence_core::guest::PortParam;
use cadence_core::notify::AUDIO_EVENT_MIX;
use cadence_core::scheduler::CellAudio;
use cadence_core::{AudioEngine, BLOCK_SAMPLES, DEFAULT_SAMPLE_RATE};

const PROCESS_ID: u32 = 1;
const TONE_HZ: f32 = 440.0;
const TONE_LEVEL: f32 = 0.2;

struct Args {
    seconds: u64,
    null_backend: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        seconds: 5,
        null_backend: false,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--seconds" => {
                let value = iter.next().context("--seconds needs a value")?;
                args.seconds = value.parse().with_context(|| format!("Invalid --seconds value: {}", value))?;
            }
            "--null" => args.null_backend = true,
            other => bail!("Unknown argument: {}", other),
        }
    }
    Ok(args)
}

/// Stereo sine generator, one port block at a time
struct Tone {
    phase: f32,
    step: f32,
}

impl Tone {
    fn new(freq: f32) -> Self {
        Self {
            phase: 0.0,
            step: freq / DEFAULT_SAMPLE_RATE as f32,
        }
    }

    fn fill(&mut self, block: &mut [f32]) {
        for frame in block.chunks_exact_mut(2) {
            let s = (self.phase * TAU).sin() * TONE_LEVEL;
            frame[0] = s;
            frame[1] = s;
            self.phase = (self.phase + self.step).fract();
        }
    }
}

/// Play a tone through one port until `deadline`
fn run_guest(cell: Arc<CellAudio>, deadline: Instant) -> Result<()> {
    cell.init().context("Audio init failed")?;
    let (key, mut events) = cell.create_notify_event_queue(0).context("Notify queue creation failed")?;
    cell.set_notify_event_queue(key, 0).context("Notify registration failed")?;

    let port = cell
        .port_open(&PortParam {
            channels: 2,
            blocks: 8,
            attr: 0,
            level: 1.0,
        })
        .context("Port open failed")?;
    cell.port_start(port).context("Port start failed")?;
    log::info!("Guest port {} running", port);

    let mut tone = Tone::new(TONE_HZ);
    let mut block = vec![0.0f32; BLOCK_SAMPLES * 2];
    let mut periods = 0u64;

    while Instant::now() < deadline {
        while let Some(event) = events.try_recv() {
            if event.data1 != AUDIO_EVENT_MIX {
                continue;
            }
            tone.fill(&mut block);
            if let Err(e) = cell.add_2ch_data(port, &block, BLOCK_SAMPLES as u32, 1.0) {
                log::warn!("Add data failed: {}", e);
            }
            periods += 1;
        }
        thread::sleep(Duration::from_millis(1));
    }

    log::info!("Guest wrote {} blocks", periods);
    let _ = cell.port_stop(port);
    let _ = cell.port_close(port);
    let _ = cell.remove_notify_event_queue(key, 0);
    let _ = cell.quit();
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;
    log::info!("cadence-host starting up");

    let config_path = default_config_path("audio.yaml");
    let mut settings: AudioSettings = load_config(&config_path);
    if args.null_backend {
        settings = settings.with_backend(BackendKind::Null);
    }

    let mut engine = AudioEngine::new(settings, PROCESS_ID).context("Failed to create audio engine")?;
    engine
        .start(default_backend_factory())
        .context("Failed to start audio engine")?;

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    let cell = Arc::clone(engine.cell());
    let guest = thread::Builder::new()
        .name("guest".to_string())
        .spawn(move || run_guest(cell, deadline))
        .context("Failed to spawn guest thread")?;

    let result = guest
        .join()
        .map_err(|_| anyhow::anyhow!("Guest thread panicked"))?;

    engine.stop();
    result
}
