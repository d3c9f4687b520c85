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
        Arc,
    },
    time::Duration,
};

use crate::config;
use crate::samples::LoadedSample;

mod automation;
pub mod cpal;
mod mixer;
pub mod mock;

pub use automation::{equal_power_curve, GainParam, EQUAL_POWER_STEPS};

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("playback rejected: {0}")]
    Rejected(String),

    #[error("output stream unavailable: {0}")]
    Stream(String),
}

/// How a voice should be started.
#[derive(Clone, Debug, PartialEq)]
pub struct VoiceOptions {
    /// The initial gain of the voice's gain stage.
    pub gain: f32,
    /// Where in the sample to start playing.
    pub offset: Duration,
    /// Loop the sample natively.
    pub looping: bool,
}

impl Default for VoiceOptions {
    fn default() -> Self {
        VoiceOptions {
            gain: 1.0,
            offset: Duration::ZERO,
            looping: false,
        }
    }
}

/// A single sounding instance of a sample.
pub trait Voice: Send + Sync {
    fn id(&self) -> u64;

    /// The automatable gain stage, if the device provides one.
    fn gain(&self) -> Option<GainParam>;

    /// Plain volume, applied on top of any gain stage.
    fn set_volume(&self, volume: f32);

    fn volume(&self) -> f32;

    /// Stops the voice and releases it from the device.
    fn stop(&self);

    fn is_stopped(&self) -> bool;
}

/// An output that can start voices.
pub trait Device: fmt::Display + Send + Sync {
    /// The device clock that gain automation is scheduled against.
    fn now(&self) -> Duration;

    /// Whether voices come with a gain stage.
    fn supports_gain_automation(&self) -> bool;

    /// Starts playing the sample. The voice shares the sample's decoded data.
    fn start(&self, sample: &LoadedSample, options: VoiceOptions)
        -> Result<Box<dyn Voice>, AudioError>;
}

static NEXT_VOICE_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_voice_id() -> u64 {
    NEXT_VOICE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Lists the names of the output devices known to cpal.
pub fn list_devices() -> Result<Vec<String>, Box<dyn Error>> {
    cpal::Device::list()
}

/// Gets the device named in the configuration.
pub fn get_device(config: &config::Audio) -> Result<Arc<dyn Device>, Box<dyn Error>> {
    let device = config.device();
    if device.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(device)));
    };

    Ok(Arc::new(cpal::Device::get(config)?))
}
