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
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::music::{Chroma, Instrument};

/// The lowest drone note. Drone assets are one octave, starting at C.
pub const DRONE_MIDI_START: u8 = 48;
pub const DRONE_MIDI_END: u8 = 59;

/// Drones ship in a single format regardless of the selected one.
const DRONE_EXTENSION: &str = "mp3";
const DRONE_FOLDER: &str = "Drones";
const FEEDBACK_FILE: &str = "feedback.mp3";

/// The encoding of the instrument tone assets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Wav,
}

impl AudioFormat {
    pub fn folder(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "MP3",
            AudioFormat::Wav => "WAV",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mp3" => Ok(AudioFormat::Mp3),
            "wav" => Ok(AudioFormat::Wav),
            _ => Err(format!("unsupported audio format '{}'", s)),
        }
    }
}

/// Resolves asset paths under an asset root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetLayout {
    root: PathBuf,
}

impl AssetLayout {
    pub fn new(root: impl Into<PathBuf>) -> AssetLayout {
        AssetLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn instrument_path(&self, format: AudioFormat, instrument: Instrument, note: u8) -> PathBuf {
        self.root
            .join(format.folder())
            .join(instrument.name())
            .join(format!("{}.{}", note, format.extension()))
    }

    pub fn drone_path(&self, chroma: Chroma) -> PathBuf {
        self.root.join(DRONE_FOLDER).join(format!(
            "{}.{}",
            DRONE_MIDI_START + chroma.index(),
            DRONE_EXTENSION
        ))
    }

    pub fn feedback_path(&self) -> PathBuf {
        self.root.join(FEEDBACK_FILE)
    }
}
