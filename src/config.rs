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
use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;
use tracing::info;

use crate::drones::DroneTiming;
use crate::trial::TrainerTiming;

mod audio;
mod error;
mod midi;
mod timing;

pub use self::audio::Audio;
pub use self::error::ConfigError;
pub use self::midi::Midi;
pub use self::timing::{Drones, Timing};

const DEFAULT_ASSETS: &str = "assets";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_PREFETCH: usize = 10;
const ENV_PREFIX: &str = "CHROMADRILL";

/// The trainer configuration.
#[derive(Deserialize, Clone, Debug)]
pub struct TrainerConfig {
    /// The asset root. Relative paths resolve against the config file's directory.
    assets: Option<String>,

    /// Where settings, the trial log and saved series are kept.
    data_dir: Option<String>,

    audio: Audio,
    midi: Option<Midi>,
    timing: Option<Timing>,
    drones: Option<Drones>,

    /// How many Recognize trials are kept ready ahead of time.
    prefetch: Option<usize>,

    #[serde(skip)]
    base_path: PathBuf,
}

impl TrainerConfig {
    /// Creates a configuration with every optional section left at its default.
    pub fn new(audio: Audio) -> TrainerConfig {
        TrainerConfig {
            assets: None,
            data_dir: None,
            audio,
            midi: None,
            timing: None,
            drones: None,
            prefetch: None,
            base_path: PathBuf::new(),
        }
    }

    fn resolve(&self, path: &Option<String>, default: &str) -> PathBuf {
        self.base_path
            .join(path.as_deref().unwrap_or(default))
    }

    pub fn assets(&self) -> PathBuf {
        self.resolve(&self.assets, DEFAULT_ASSETS)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.resolve(&self.data_dir, DEFAULT_DATA_DIR)
    }

    pub fn audio(&self) -> &Audio {
        &self.audio
    }

    pub fn midi(&self) -> Option<&Midi> {
        self.midi.as_ref()
    }

    pub fn prefetch(&self) -> usize {
        self.prefetch.unwrap_or(DEFAULT_PREFETCH)
    }

    pub fn trainer_timing(&self) -> Result<TrainerTiming, ConfigError> {
        match &self.timing {
            Some(timing) => timing.to_trainer_timing(),
            None => Ok(TrainerTiming::default()),
        }
    }

    pub fn drone_timing(&self) -> Result<DroneTiming, ConfigError> {
        match &self.drones {
            Some(drones) => drones.to_drone_timing(),
            None => Ok(DroneTiming::default()),
        }
    }

    /// Checks everything that can only be checked after deserialization.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.prefetch == Some(0) {
            return Err(ConfigError::Invalid(
                "prefetch must be at least 1".to_string(),
            ));
        }
        if self.audio.sample_rate() == 0 {
            return Err(ConfigError::Invalid(
                "audio.sample_rate must be greater than zero".to_string(),
            ));
        }
        self.trainer_timing()?;
        self.drone_timing()?;
        Ok(())
    }
}

/// Loads the configuration file, with `CHROMADRILL__*` environment overrides.
pub fn load(path: &Path) -> Result<TrainerConfig, ConfigError> {
    let mut config: TrainerConfig = Config::builder()
        .add_source(File::from(path))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;
    config.base_path = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    config.validate()?;

    info!(
        path = ?path,
        assets = ?config.assets(),
        data_dir = ?config.data_dir(),
        "Loaded configuration."
    );
    Ok(config)
}
