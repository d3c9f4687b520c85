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
//! Learner settings and how they are persisted, one store key per setting.

use std::{fmt, str::FromStr};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::music::{Chroma, ChromaSet, MidiRange};
use crate::samples::AudioFormat;
use crate::store::{SettingsStore, StoreError};

/// The exercise being drilled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Name the chroma of a played note.
    #[default]
    Recognize,
    /// Recall a named target, then name what was played.
    Recall,
    /// Like recall, but the note is played straight away.
    Discrimination,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Recognize, Mode::Recall, Mode::Discrimination];

    /// Recall and Discrimination share target selection and option building.
    pub fn is_recall_family(self) -> bool {
        matches!(self, Mode::Recall | Mode::Discrimination)
    }

    pub fn label(self) -> &'static str {
        match self {
            Mode::Recognize => "Recognize",
            Mode::Recall => "Recall",
            Mode::Discrimination => "Discrimination",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Mode::Recognize => "recognize",
            Mode::Recall => "recall",
            Mode::Discrimination => "discrimination",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::ALL
            .into_iter()
            .find(|mode| mode.key().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown mode '{}'", s))
    }
}

/// What the learner is told after answering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackMode {
    /// Show the chosen and the correct chroma.
    #[default]
    Feedback,
    /// Only a short tone, and only when wrong.
    Limited,
    None,
}

impl FeedbackMode {
    pub const ALL: [FeedbackMode; 3] =
        [FeedbackMode::Feedback, FeedbackMode::Limited, FeedbackMode::None];

    fn key(self) -> &'static str {
        match self {
            FeedbackMode::Feedback => "feedback",
            FeedbackMode::Limited => "limited",
            FeedbackMode::None => "none",
        }
    }
}

impl fmt::Display for FeedbackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl FromStr for FeedbackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeedbackMode::ALL
            .into_iter()
            .find(|mode| mode.key().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown feedback mode '{}'", s))
    }
}

/// The largest distance between a recall target and the other options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecallPrecision {
    #[default]
    Fourth,
    MajorThird,
    MinorThird,
    Second,
    MinorSecond,
}

impl RecallPrecision {
    pub const ALL: [RecallPrecision; 5] = [
        RecallPrecision::Fourth,
        RecallPrecision::MajorThird,
        RecallPrecision::MinorThird,
        RecallPrecision::Second,
        RecallPrecision::MinorSecond,
    ];

    pub fn semitones(self) -> u8 {
        match self {
            RecallPrecision::Fourth => 5,
            RecallPrecision::MajorThird => 4,
            RecallPrecision::MinorThird => 3,
            RecallPrecision::Second => 2,
            RecallPrecision::MinorSecond => 1,
        }
    }

    fn key(self) -> &'static str {
        match self {
            RecallPrecision::Fourth => "fourth",
            RecallPrecision::MajorThird => "major-third",
            RecallPrecision::MinorThird => "minor-third",
            RecallPrecision::Second => "second",
            RecallPrecision::MinorSecond => "minor-second",
        }
    }
}

impl fmt::Display for RecallPrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl FromStr for RecallPrecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecallPrecision::ALL
            .into_iter()
            .find(|precision| precision.key().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown recall precision '{}'", s))
    }
}

/// Which chroma set is active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChromaSetChoice {
    /// An index into the built-in sets.
    Builtin(usize),
    Custom,
}

impl Default for ChromaSetChoice {
    fn default() -> Self {
        ChromaSetChoice::Builtin(0)
    }
}

/// Every learner-facing setting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub mode: Mode,
    pub chroma_set: ChromaSetChoice,
    pub custom_chromas: Vec<Chroma>,
    pub precision: RecallPrecision,
    pub reduced_range: bool,
    pub feedback: FeedbackMode,
    pub drone_count: usize,
    pub series_randomize_start: bool,
    pub audio_format: AudioFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            mode: Mode::default(),
            chroma_set: ChromaSetChoice::default(),
            custom_chromas: Vec::new(),
            precision: RecallPrecision::default(),
            reduced_range: false,
            feedback: FeedbackMode::default(),
            drone_count: 0,
            series_randomize_start: false,
            audio_format: AudioFormat::default(),
        }
    }
}

impl Settings {
    /// Resolves the active chroma set. An out of range built-in index falls back
    /// to the first set.
    pub fn active_chroma_set(&self, builtins: &[ChromaSet]) -> ChromaSet {
        match self.chroma_set {
            ChromaSetChoice::Builtin(index) => builtins
                .get(index)
                .or_else(|| builtins.first())
                .cloned()
                .unwrap_or_else(|| ChromaSet::custom(&[])),
            ChromaSetChoice::Custom => {
                let indices: Vec<u8> = self.custom_chromas.iter().map(|c| c.index()).collect();
                ChromaSet::custom(&indices)
            }
        }
    }

    pub fn range(&self) -> MidiRange {
        MidiRange::for_setting(self.reduced_range)
    }

    /// The chromas drones are drawn from: all of them in the recall family,
    /// otherwise the active set.
    pub fn drone_pool(&self, builtins: &[ChromaSet]) -> Vec<Chroma> {
        if self.mode.is_recall_family() {
            Chroma::ALL.to_vec()
        } else {
            self.active_chroma_set(builtins).chromas().to_vec()
        }
    }

    pub fn clamp_drone_count(&mut self, builtins: &[ChromaSet]) {
        let pool = self.drone_pool(builtins).len();
        if self.drone_count > pool {
            debug!(requested = self.drone_count, pool, "Clamping drone count.");
            self.drone_count = pool;
        }
    }

    /// The feedback mode in effect. The recall family always gets full feedback.
    pub fn effective_feedback(&self) -> FeedbackMode {
        if self.mode.is_recall_family() {
            FeedbackMode::Feedback
        } else {
            self.feedback
        }
    }

    /// Reads every setting from the store. Missing or malformed values keep
    /// their defaults.
    pub async fn load(store: &dyn SettingsStore) -> Settings {
        let mut settings = Settings::default();
        for key in SettingsKey::ALL {
            match store.get(key.name()).await {
                Ok(Some(value)) => {
                    if let Err(e) = settings.apply(key, value) {
                        warn!(key = key.name(), err = %e, "Ignoring malformed setting.");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(key = key.name(), err = %e, "Unable to read setting."),
            }
        }
        settings
    }

    /// Writes a single setting.
    pub async fn save(&self, store: &dyn SettingsStore, key: SettingsKey) -> Result<(), StoreError> {
        store.set(key.name(), self.value(key)?).await
    }

    fn value(&self, key: SettingsKey) -> Result<Value, serde_json::Error> {
        match key {
            SettingsKey::Mode => serde_json::to_value(self.mode),
            SettingsKey::ChromaSet => serde_json::to_value(self.chroma_set),
            SettingsKey::CustomChromas => serde_json::to_value(&self.custom_chromas),
            SettingsKey::Precision => serde_json::to_value(self.precision),
            SettingsKey::ReducedRange => serde_json::to_value(self.reduced_range),
            SettingsKey::Feedback => serde_json::to_value(self.feedback),
            SettingsKey::DroneCount => serde_json::to_value(self.drone_count),
            SettingsKey::SeriesRandomizeStart => serde_json::to_value(self.series_randomize_start),
            SettingsKey::AudioFormat => serde_json::to_value(self.audio_format),
        }
    }

    fn apply(&mut self, key: SettingsKey, value: Value) -> Result<(), serde_json::Error> {
        fn parse<T: DeserializeOwned>(value: Value) -> Result<T, serde_json::Error> {
            serde_json::from_value(value)
        }

        match key {
            SettingsKey::Mode => self.mode = parse(value)?,
            SettingsKey::ChromaSet => self.chroma_set = parse(value)?,
            SettingsKey::CustomChromas => {
                let indices: Vec<u8> = parse(value)?;
                let set = ChromaSet::custom(&indices);
                self.custom_chromas = set.chromas().to_vec();
            }
            SettingsKey::Precision => self.precision = parse(value)?,
            SettingsKey::ReducedRange => self.reduced_range = parse(value)?,
            SettingsKey::Feedback => self.feedback = parse(value)?,
            SettingsKey::DroneCount => self.drone_count = parse(value)?,
            SettingsKey::SeriesRandomizeStart => self.series_randomize_start = parse(value)?,
            SettingsKey::AudioFormat => self.audio_format = parse(value)?,
        }
        Ok(())
    }
}

/// The store key of each setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SettingsKey {
    Mode,
    ChromaSet,
    CustomChromas,
    Precision,
    ReducedRange,
    Feedback,
    DroneCount,
    SeriesRandomizeStart,
    AudioFormat,
}

impl SettingsKey {
    pub const ALL: [SettingsKey; 9] = [
        SettingsKey::Mode,
        SettingsKey::ChromaSet,
        SettingsKey::CustomChromas,
        SettingsKey::Precision,
        SettingsKey::ReducedRange,
        SettingsKey::Feedback,
        SettingsKey::DroneCount,
        SettingsKey::SeriesRandomizeStart,
        SettingsKey::AudioFormat,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SettingsKey::Mode => "last-mode",
            SettingsKey::ChromaSet => "last-chroma-set",
            SettingsKey::CustomChromas => "custom-chromas",
            SettingsKey::Precision => "last-recall-precision",
            SettingsKey::ReducedRange => "reduced-range-enabled",
            SettingsKey::Feedback => "feedback-mode",
            SettingsKey::DroneCount => "drone-count",
            SettingsKey::SeriesRandomizeStart => "series-randomize-start",
            SettingsKey::AudioFormat => "audio-format",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use serde_json::json;

    use super::*;
    use crate::music::builtin_chroma_sets;
    use crate::store::MemoryStore;

    #[test]
    fn parse_names() {
        assert_eq!(Ok(Mode::Discrimination), "Discrimination".parse());
        assert_eq!(Ok(FeedbackMode::Limited), "limited".parse());
        assert_eq!(Ok(RecallPrecision::MinorThird), "minor-third".parse());
        assert!("sixth".parse::<RecallPrecision>().is_err());
        assert_eq!("major-third", RecallPrecision::MajorThird.to_string());
        assert_eq!(5, RecallPrecision::default().semitones());
        assert_eq!(1, RecallPrecision::MinorSecond.semitones());
    }

    #[test]
    fn active_chroma_set() {
        let builtins = builtin_chroma_sets();
        let mut settings = Settings::default();
        assert_eq!("Chromatic", settings.active_chroma_set(&builtins).name());

        settings.chroma_set = ChromaSetChoice::Builtin(1);
        assert_eq!("Tritones 1", settings.active_chroma_set(&builtins).name());

        settings.chroma_set = ChromaSetChoice::Builtin(999);
        assert_eq!("Chromatic", settings.active_chroma_set(&builtins).name());

        settings.chroma_set = ChromaSetChoice::Custom;
        settings.custom_chromas = vec![Chroma::ALL[7], Chroma::ALL[2]];
        let custom = settings.active_chroma_set(&builtins);
        assert_eq!("Custom", custom.exercise_type());
        assert_eq!(&[Chroma::ALL[2], Chroma::ALL[7]], custom.chromas());
    }

    #[test]
    fn drone_pool_and_clamp() {
        let builtins = builtin_chroma_sets();
        let mut settings = Settings {
            chroma_set: ChromaSetChoice::Builtin(1),
            drone_count: 5,
            ..Default::default()
        };
        assert_eq!(2, settings.drone_pool(&builtins).len());

        settings.mode = Mode::Recall;
        assert_eq!(12, settings.drone_pool(&builtins).len());
        settings.clamp_drone_count(&builtins);
        assert_eq!(5, settings.drone_count);

        settings.mode = Mode::Recognize;
        settings.clamp_drone_count(&builtins);
        assert_eq!(2, settings.drone_count);
    }

    #[test]
    fn recall_family_forces_feedback() {
        let mut settings = Settings {
            feedback: FeedbackMode::None,
            ..Default::default()
        };
        assert_eq!(FeedbackMode::None, settings.effective_feedback());
        settings.mode = Mode::Discrimination;
        assert_eq!(FeedbackMode::Feedback, settings.effective_feedback());
    }

    #[tokio::test]
    async fn save_and_load() -> Result<(), Box<dyn Error>> {
        let store = MemoryStore::new();
        let settings = Settings {
            mode: Mode::Recall,
            chroma_set: ChromaSetChoice::Custom,
            custom_chromas: vec![Chroma::ALL[1], Chroma::ALL[5]],
            precision: RecallPrecision::Second,
            reduced_range: true,
            feedback: FeedbackMode::Limited,
            drone_count: 3,
            series_randomize_start: true,
            audio_format: AudioFormat::Wav,
        };
        for key in SettingsKey::ALL {
            settings.save(&store, key).await?;
        }

        assert_eq!(Some(json!("recall")), store.get("last-mode").await?);
        assert_eq!(Some(json!("custom")), store.get("last-chroma-set").await?);
        assert_eq!(Some(json!([1, 5])), store.get("custom-chromas").await?);
        assert_eq!(Some(json!("second")), store.get("last-recall-precision").await?);
        assert_eq!(Some(json!("wav")), store.get("audio-format").await?);

        assert_eq!(settings, Settings::load(&store).await);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_values_fall_back() -> Result<(), Box<dyn Error>> {
        let store = MemoryStore::new();
        store.set("last-mode", json!("sing")).await?;
        store.set("drone-count", json!(-3)).await?;
        store.set("last-chroma-set", json!({ "builtin": 4 })).await?;
        store.set("custom-chromas", json!([11, 3, 3, 40])).await?;

        let settings = Settings::load(&store).await;
        assert_eq!(Mode::Recognize, settings.mode);
        assert_eq!(0, settings.drone_count);
        assert_eq!(ChromaSetChoice::Builtin(4), settings.chroma_set);
        assert_eq!(vec![Chroma::ALL[3], Chroma::ALL[11]], settings.custom_chromas);
        Ok(())
    }
}
