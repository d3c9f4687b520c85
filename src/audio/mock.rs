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
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::info;

use crate::samples::LoadedSample;

use super::{AudioError, GainParam, Voice as _, VoiceOptions};

/// A mock device. Doesn't actually play anything, but keeps track of every voice.
#[derive(Clone)]
pub struct Device {
    name: String,
    epoch: Instant,
    gain_automation: bool,
    reject: Arc<AtomicBool>,
    voices: Arc<Mutex<Vec<Voice>>>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            epoch: Instant::now(),
            gain_automation: true,
            reject: Arc::new(AtomicBool::new(false)),
            voices: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A mock device whose voices have no gain stage.
    pub fn without_gain_stage(name: &str) -> Device {
        Device {
            gain_automation: false,
            ..Device::get(name)
        }
    }

    /// Makes every following start fail, as an autoplay policy would.
    pub fn reject_playback(&self, reject: bool) {
        self.reject.store(reject, Ordering::Relaxed);
    }

    /// Every voice started so far, in order.
    pub fn started(&self) -> Vec<Voice> {
        self.voices.lock().clone()
    }

    /// Voices that have been started and not stopped.
    pub fn active(&self) -> Vec<Voice> {
        self.voices
            .lock()
            .iter()
            .filter(|voice| !voice.is_stopped())
            .cloned()
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.active().len()
    }
}

impl super::Device for Device {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn supports_gain_automation(&self) -> bool {
        self.gain_automation
    }

    fn start(
        &self,
        sample: &LoadedSample,
        options: VoiceOptions,
    ) -> Result<Box<dyn super::Voice>, AudioError> {
        if self.reject.load(Ordering::Relaxed) {
            return Err(AudioError::Rejected(format!("{} is not allowed to play", self.name)));
        }

        let voice = Voice {
            state: Arc::new(VoiceState {
                id: super::next_voice_id(),
                sample: sample.clone(),
                gain: self.gain_automation.then(|| GainParam::new(options.gain)),
                options,
                volume: AtomicU32::new(1.0f32.to_bits()),
                stopped: AtomicBool::new(false),
            }),
        };
        info!(
            device = self.name,
            voice = voice.state.id,
            looping = voice.state.options.looping,
            "Starting voice."
        );
        self.voices.lock().push(voice.clone());
        Ok(Box::new(voice))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name,)
    }
}

struct VoiceState {
    id: u64,
    sample: LoadedSample,
    options: VoiceOptions,
    gain: Option<GainParam>,
    volume: AtomicU32,
    stopped: AtomicBool,
}

/// A voice on the mock device.
#[derive(Clone)]
pub struct Voice {
    state: Arc<VoiceState>,
}

impl Voice {
    pub fn sample(&self) -> &LoadedSample {
        &self.state.sample
    }

    pub fn options(&self) -> &VoiceOptions {
        &self.state.options
    }
}

impl super::Voice for Voice {
    fn id(&self) -> u64 {
        self.state.id
    }

    fn gain(&self) -> Option<GainParam> {
        self.state.gain.clone()
    }

    fn set_volume(&self, volume: f32) {
        self.state.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.state.volume.load(Ordering::Relaxed))
    }

    fn stop(&self) {
        self.state.stopped.store(true, Ordering::Relaxed);
    }

    fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::Relaxed)
    }
}
