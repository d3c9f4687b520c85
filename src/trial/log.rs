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
use serde::{Deserialize, Serialize};

use crate::music::{Chroma, Instrument};
use crate::settings::{FeedbackMode, Mode};

/// Where in a playing series a trial came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesLogContext {
    pub series_id: String,
    pub run_id: String,
    /// 1-based slot within the series.
    pub index: usize,
}

/// One answered trial.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialLogEntry {
    pub trial_number: u64,
    pub timestamp_ms: i64,
    pub chroma_set: String,
    pub exercise_type: String,
    pub mode: Mode,
    pub feedback_mode: FeedbackMode,
    /// The chroma that actually sounded.
    pub presented_chroma: Chroma,
    pub chosen_chroma: Chroma,
    pub correct: bool,
    pub midi_note: u8,
    pub instrument: Instrument,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recall_target: Option<Chroma>,
    /// In semitones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recall_precision: Option<u8>,
    pub reduced_range: bool,
    /// Labels of the drones sounding when the answer was given.
    #[serde(default)]
    pub drones: Vec<String>,
    /// From the first play. Replays do not restart it.
    pub response_time_ms: Option<u64>,
    pub replay_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<SeriesLogContext>,
}

/// The number the next logged trial gets, continuing from the existing log.
pub fn next_trial_number(entries: &[TrialLogEntry]) -> u64 {
    entries
        .iter()
        .map(|entry| entry.trial_number)
        .max()
        .map_or(1, |max| max + 1)
}
