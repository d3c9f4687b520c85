// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc, Arc,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info, span, Level};

use crate::config;
use crate::samples::LoadedSample;

use super::mixer::{frames_to_duration, Mixer, MixerVoice, VoiceControls};
use super::{AudioError, GainParam, VoiceOptions};

/// A cpal output device. All voices are mixed inside the output callback.
pub struct Device {
    name: String,
    host_id: cpal::HostId,
    channels: u16,
    sample_rate: u32,
    voices_tx: crossbeam_channel::Sender<MixerVoice>,
    frames_rendered: Arc<AtomicU64>,
    /// Owns the stream; cpal streams cannot move between threads.
    _output_thread: thread::JoinHandle<()>,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}, Rate={}) ({})",
            self.name,
            self.channels,
            self.sample_rate,
            self.host_id.name()
        )
    }
}

impl Device {
    /// Lists the output devices of every available host.
    pub fn list() -> Result<Vec<String>, Box<dyn Error>> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        let mut names = Vec::new();
        for host_id in cpal::available_hosts() {
            let devices = match cpal::host_from_id(host_id)?.output_devices() {
                Ok(devices) => devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in devices {
                if let Ok(name) = device.name() {
                    names.push(format!("{} ({})", name, host_id.name()));
                }
            }
        }

        names.sort();
        Ok(names)
    }

    fn find(name: &str) -> Result<(cpal::HostId, cpal::Device), Box<dyn Error>> {
        if name == "default" {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or("no default output device")?;
            return Ok((host.id(), device));
        }

        for host_id in cpal::available_hosts() {
            let Ok(devices) = cpal::host_from_id(host_id)?.output_devices() else {
                continue;
            };
            for device in devices {
                if device.name().is_ok_and(|n| n.trim() == name) {
                    return Ok((host_id, device));
                }
            }
        }

        Err(format!("no device found with name {}", name).into())
    }

    /// Opens the configured device and starts its output stream.
    pub fn get(config: &config::Audio) -> Result<Device, Box<dyn Error>> {
        let (host_id, device) = Device::find(config.device())?;
        let name = device.name()?;
        let default_config = device.default_output_config()?;
        let channels = default_config.channels();
        let sample_format = default_config.sample_format();
        let sample_rate = config.sample_rate();

        let stream_config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (voices_tx, voices_rx) = crossbeam_channel::unbounded();
        let frames_rendered = Arc::new(AtomicU64::new(0));
        let mixer = Mixer::new(voices_rx, channels, sample_rate, frames_rendered.clone());

        let (ready_tx, ready_rx) = mpsc::channel();
        let output_thread = thread::spawn(move || {
            run_output_stream(device, stream_config, sample_format, mixer, ready_tx)
        });
        ready_rx.recv()?.map_err(AudioError::Stream)?;

        info!(device = name, channels, sample_rate, "Audio device opened.");
        Ok(Device {
            name,
            host_id,
            channels,
            sample_rate,
            voices_tx,
            frames_rendered,
            _output_thread: output_thread,
        })
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut mixer: Mixer,
) -> Result<cpal::Stream, String>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                mixer.render(&mut scratch);
                for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                    *dst = T::from_sample(src);
                }
            },
            |err| error!("CPAL output stream error: {}", err),
            None,
        )
        .map_err(|e| e.to_string())
}

fn run_output_stream(
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    mixer: Mixer,
    ready: mpsc::Sender<Result<(), String>>,
) {
    let span = span!(Level::INFO, "output stream (cpal)");
    let _enter = span.enter();

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, mixer),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, mixer),
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, mixer),
        other => Err(format!("unsupported sample format {:?}", other)),
    };
    let stream = match stream.and_then(|stream| {
        stream.play().map_err(|e| e.to_string())?;
        Ok(stream)
    }) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));
    info!("CPAL output stream started successfully");

    // Keep the stream alive.
    let _stream = stream;
    loop {
        thread::park();
    }
}

impl super::Device for Device {
    fn now(&self) -> Duration {
        frames_to_duration(self.frames_rendered.load(Ordering::Relaxed), self.sample_rate)
    }

    fn supports_gain_automation(&self) -> bool {
        true
    }

    fn start(
        &self,
        sample: &LoadedSample,
        options: VoiceOptions,
    ) -> Result<Box<dyn super::Voice>, AudioError> {
        let gain = GainParam::new(options.gain);
        let controls = Arc::new(VoiceControls::new());
        let start_frame = (options.offset.as_secs_f64() * f64::from(sample.sample_rate())) as usize;
        let voice = MixerVoice::new(
            sample.data().clone(),
            sample.channel_count(),
            start_frame,
            options.looping,
            gain.clone(),
            controls.clone(),
        );
        self.voices_tx
            .send(voice)
            .map_err(|_| AudioError::Stream(format!("{} output stream closed", self.name)))?;

        Ok(Box::new(Voice {
            id: super::next_voice_id(),
            gain,
            controls,
        }))
    }
}

struct Voice {
    id: u64,
    gain: GainParam,
    controls: Arc<VoiceControls>,
}

impl super::Voice for Voice {
    fn id(&self) -> u64 {
        self.id
    }

    fn gain(&self) -> Option<GainParam> {
        Some(self.gain.clone())
    }

    fn set_volume(&self, volume: f32) {
        self.controls.set_volume(volume);
    }

    fn volume(&self) -> f32 {
        self.controls.volume()
    }

    fn stop(&self) {
        self.controls.stop();
    }

    fn is_stopped(&self) -> bool {
        self.controls.is_stopped()
    }
}
