//! CPAL output backend
//!
//! Opens one output stream on the default host. The stream callback hands
//! the device buffer to [`BackendCallbacks::on_write`] as raw bytes; stream
//! errors are forwarded as [`StateEvent::UnspecifiedError`].
//!
//! ```text
//! ┌──────────────────┐   open/play/pause    ┌─────────────────────┐
//! │  Feeder Thread   │─────────────────────►│   cpal::Stream      │
//! │ (owns backend)   │                      │  (!Send, stays put) │
//! └──────────────────┘                      └──────────┬──────────┘
//!          ▲                                           │ data callback
//!          │ on_state()                                ▼
//!          │                                 ┌─────────────────────┐
//!          └─────────────────────────────────│  on_write(&mut [u8])│
//!                                            └─────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat as CpalSampleFormat, Stream, StreamConfig};

use super::{AudioBackend, BackendCallbacks, StateEvent};
use crate::error::{AudioError, AudioResult};
use crate::types::{ChannelLayout, SampleFormat, StreamParams};

/// Callback length requested from the device when it allows a fixed size
const PREFERRED_CALLBACK_FRAMES: u32 = 512;

/// Backend on the platform's default CPAL host
pub struct CpalBackend {
    stream: Option<Stream>,
    callbacks: Option<Arc<dyn BackendCallbacks>>,
    params: StreamParams,
    callback_frames: usize,
    playing: bool,
    failed: Arc<AtomicBool>,
    /// Name of the system default device when the stream was opened
    default_device_name: Option<String>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            stream: None,
            callbacks: None,
            params: StreamParams::default(),
            callback_frames: PREFERRED_CALLBACK_FRAMES as usize,
            playing: false,
            failed: Arc::new(AtomicBool::new(false)),
            default_device_name: None,
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn default_device_name(host: &cpal::Host) -> Option<String> {
    host.default_output_device().and_then(|d| d.name().ok())
}

fn find_device(host: &cpal::Host, name: Option<&str>) -> AudioResult<cpal::Device> {
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?;
    pick_device(devices, name, |d: &cpal::Device| d.name().ok(), || host.default_output_device())
}

/// Choose the named device, or the default one when `name` is `None`
fn pick_device<D>(
    devices: impl IntoIterator<Item = D>,
    name: Option<&str>,
    device_name: impl Fn(&D) -> Option<String>,
    default: impl FnOnce() -> Option<D>,
) -> AudioResult<D> {
    let mut devices = devices.into_iter().peekable();
    if devices.peek().is_none() {
        return Err(AudioError::NoDevices);
    }
    match name {
        Some(name) => devices
            .find(|d| device_name(d).as_deref() == Some(name))
            .ok_or_else(|| AudioError::DeviceNotFound(name.to_string())),
        None => default().ok_or_else(|| AudioError::NoDefaultDevice("no default output device".to_string())),
    }
}

fn to_cpal_format(format: SampleFormat) -> CpalSampleFormat {
    match format {
        SampleFormat::S16 => CpalSampleFormat::I16,
        SampleFormat::F32 => CpalSampleFormat::F32,
    }
}

fn from_cpal_format(format: CpalSampleFormat) -> Option<SampleFormat> {
    match format {
        CpalSampleFormat::I16 => Some(SampleFormat::S16),
        CpalSampleFormat::F32 => Some(SampleFormat::F32),
        _ => None,
    }
}

/// Pick the closest supported configuration for `params`
///
/// Exact format, channel count and rate first; then any f32/i16 config with
/// the requested channel count; then the device's stereo configuration.
fn select_config(
    device: &cpal::Device,
    params: StreamParams,
) -> AudioResult<(cpal::SupportedStreamConfig, cpal::SupportedBufferSize)> {
    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .filter(|c| from_cpal_format(c.sample_format()).is_some())
        .collect();

    if supported.is_empty() {
        return Err(AudioError::UnsupportedFormat(
            "device offers neither f32 nor i16 output".to_string(),
        ));
    }

    let rate = params.sample_rate;
    let channels = params.layout.channels() as u16;
    let in_range = |c: &&cpal::SupportedStreamConfigRange| {
        rate >= c.min_sample_rate().0 && rate <= c.max_sample_rate().0
    };

    let best = supported
        .iter()
        .filter(|c| c.sample_format() == to_cpal_format(params.format))
        .filter(|c| c.channels() == channels)
        .find(in_range)
        .or_else(|| supported.iter().filter(|c| c.channels() == channels).find(in_range))
        .or_else(|| supported.iter().filter(|c| c.channels() == 2).find(in_range))
        .or_else(|| supported.iter().find(|c| c.channels() == 2))
        .ok_or_else(|| AudioError::ConfigError("No suitable output configuration found".to_string()))?;

    let sample_rate = if in_range(&best) {
        cpal::SampleRate(rate)
    } else {
        let fallback = best.max_sample_rate();
        log::warn!(
            "Audio device doesn't support {}Hz, falling back to {}Hz",
            rate,
            fallback.0
        );
        fallback
    };

    let buffer_size = best.buffer_size().clone();
    Ok((best.clone().with_sample_rate(sample_rate), buffer_size))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    callbacks: Arc<dyn BackendCallbacks>,
    failed: Arc<AtomicBool>,
) -> AudioResult<Stream>
where
    T: cpal::SizedSample + bytemuck::Pod + Default,
{
    let error_callbacks = Arc::clone(&callbacks);
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
                let bytes: &mut [u8] = bytemuck::cast_slice_mut(data);
                let written = callbacks.on_write(bytes).min(bytes.len());
                bytes[written..].fill(0);
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
                failed.store(true, Ordering::SeqCst);
                error_callbacks.on_state(StateEvent::UnspecifiedError);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn open(&mut self, device: Option<&str>, params: StreamParams) -> AudioResult<()> {
        self.close();

        let callbacks = self.callbacks.clone().ok_or(AudioError::NotOperational)?;
        let host = cpal::default_host();
        let dev = find_device(&host, device)?;
        let dev_name = dev.name().unwrap_or_else(|_| "Unknown".to_string());
        log::info!("Using audio device: {}", dev_name);

        let (supported, buffer_range) = select_config(&dev, params)?;
        let format = from_cpal_format(supported.sample_format())
            .ok_or_else(|| AudioError::UnsupportedFormat(format!("{:?}", supported.sample_format())))?;

        let (buffer_size, callback_frames) = match buffer_range {
            cpal::SupportedBufferSize::Range { min, max }
                if (min..=max).contains(&PREFERRED_CALLBACK_FRAMES) =>
            {
                (CpalBufferSize::Fixed(PREFERRED_CALLBACK_FRAMES), PREFERRED_CALLBACK_FRAMES)
            }
            _ => (CpalBufferSize::Default, PREFERRED_CALLBACK_FRAMES),
        };

        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size,
        };

        self.failed.store(false, Ordering::SeqCst);
        let stream = match format {
            SampleFormat::F32 => build_stream::<f32>(&dev, &config, callbacks, Arc::clone(&self.failed))?,
            SampleFormat::S16 => build_stream::<i16>(&dev, &config, callbacks, Arc::clone(&self.failed))?,
        };
        // Streams may start running as soon as they are built
        stream
            .pause()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

        self.params = StreamParams::new(
            config.sample_rate.0,
            format,
            ChannelLayout::from_channels(config.channels as usize),
        );
        self.callback_frames = callback_frames as usize;
        self.default_device_name = default_device_name(&host);
        self.stream = Some(stream);
        self.playing = false;

        log::info!(
            "Audio config: {} channels, {}Hz, {:?}, {} frames per callback",
            config.channels,
            self.params.sample_rate,
            format,
            self.callback_frames
        );
        Ok(())
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            log::debug!("Audio stream closed");
        }
        self.playing = false;
    }

    fn play(&mut self) {
        let Some(stream) = &self.stream else {
            return;
        };
        match stream.play() {
            Ok(()) => self.playing = true,
            Err(e) => {
                log::warn!("Failed to start audio stream: {}", e);
                self.failed.store(true, Ordering::SeqCst);
            }
        }
    }

    fn pause(&mut self) {
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.pause() {
                log::warn!("Failed to pause audio stream: {}", e);
            }
        }
        self.playing = false;
    }

    fn is_playing(&self) -> bool {
        self.playing && self.operational()
    }

    fn operational(&self) -> bool {
        self.stream.is_some() && !self.failed.load(Ordering::SeqCst)
    }

    fn default_device_changed(&mut self) -> bool {
        let current = default_device_name(&cpal::default_host());
        if current != self.default_device_name {
            log::info!(
                "Default audio device changed: {:?} -> {:?}",
                self.default_device_name,
                current
            );
            self.default_device_name = current;
            return true;
        }
        false
    }

    fn set_callbacks(&mut self, callbacks: Arc<dyn BackendCallbacks>) {
        self.callbacks = Some(callbacks);
    }

    fn sample_rate(&self) -> u32 {
        self.params.sample_rate
    }

    fn format(&self) -> SampleFormat {
        self.params.format
    }

    fn layout(&self) -> ChannelLayout {
        self.params.layout
    }

    fn callback_frame_len(&self) -> usize {
        self.callback_frames
    }
}
