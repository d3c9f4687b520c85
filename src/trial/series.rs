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
//! Series: pre-generated, replayable trial sequences.
//!
//! A series records the exact chroma, note and instrument of every slot along with
//! the settings it was generated under, so replaying it presents the same trials
//! in the same order no matter how often it runs.

use std::{collections::HashSet, fmt};

use chrono::{Local, Utc};
use rand::{distributions::Alphanumeric, seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::recall::{build_recall_options, choose_target};
use super::SeriesLogContext;
use crate::music::{Chroma, Instrument};
use crate::samples::{SamplingContext, TrialSampler};
use crate::settings::{FeedbackMode, Mode, Settings};
use crate::store::{SeriesStore, StoreError};

/// One recorded slot of a series.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesTrial {
    #[serde(alias = "chromaIndex")]
    pub chroma: Chroma,
    #[serde(alias = "midiNote")]
    pub midi_note: u8,
    pub instrument: Instrument,
    /// The recall target, for Recall and Discrimination series.
    #[serde(
        default,
        alias = "targetChromaIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub target: Option<Chroma>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<Chroma>,
}

/// A saved series.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub id: String,
    /// Unix milliseconds.
    pub created_at: i64,
    pub name: String,
    pub settings_snapshot: Settings,
    pub trials: Vec<SeriesTrial>,
}

impl Series {
    pub fn label(&self) -> String {
        format!("{} ({} trials)", self.name, self.trials.len())
    }
}

fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

/// `series-<unix ms>-<8 random characters>`
pub fn generate_series_id() -> String {
    format!("series-{}-{}", Utc::now().timestamp_millis(), random_suffix(8))
}

/// Identifies one playback run of a series in the trial log.
pub fn generate_run_id(series_id: &str, feedback: FeedbackMode, mode: Mode) -> String {
    format!(
        "{}__run_{}__{}__{}__{}",
        series_id,
        Local::now().format("%Y%m%d-%H%M%S"),
        feedback,
        mode,
        random_suffix(6)
    )
}

/// Samples up to `length` trials. Notes, targets and played chromas are chained
/// so that no slot repeats the one before it. Stops early if sampling fails.
pub async fn generate_trials(
    sampler: &TrialSampler,
    context: &SamplingContext,
    mode: Mode,
    precision: u8,
    length: usize,
) -> Vec<SeriesTrial> {
    let mut trials: Vec<SeriesTrial> = Vec::with_capacity(length);
    let mut last_target: Option<Chroma> = None;
    let mut last_played: Option<Chroma> = None;

    while trials.len() < length {
        let last_note = trials.last().map(|trial| trial.midi_note);

        if !mode.is_recall_family() {
            let Some(trial) = sampler.sample(last_note, context).await else {
                break;
            };
            trials.push(SeriesTrial {
                chroma: trial.chroma(),
                midi_note: trial.midi_note(),
                instrument: trial.instrument(),
                target: None,
                options: Vec::new(),
            });
            continue;
        }

        let excluded: Vec<Chroma> = [last_target, last_played].into_iter().flatten().collect();
        let picked = {
            let mut rng = rand::thread_rng();
            choose_target(&context.pool, precision, &excluded, &mut rng).map(|target| {
                let options = build_recall_options(target, precision, &excluded, &mut rng);
                let played = options.choose(&mut rng).copied().unwrap_or(target);
                (target, options, played)
            })
        };
        let Some((target, options, played)) = picked else {
            break;
        };
        let Some(trial) = sampler.sample_for_chroma(played, last_note, context).await else {
            break;
        };

        last_target = Some(target);
        last_played = Some(played);
        trials.push(SeriesTrial {
            chroma: played,
            midi_note: trial.midi_note(),
            instrument: trial.instrument(),
            target: Some(target),
            options,
        });
    }

    if trials.len() < length {
        info!(
            requested = length,
            generated = trials.len(),
            "Series generation stopped early."
        );
    }
    trials
}

/// Why series playback ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeriesEnd {
    Empty,
    Complete,
    AudioUnavailable,
    Stopped,
}

impl fmt::Display for SeriesEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            SeriesEnd::Empty => "No trials in series.",
            SeriesEnd::Complete => "Series complete.",
            SeriesEnd::AudioUnavailable => "Series audio unavailable.",
            SeriesEnd::Stopped => "Series stopped.",
        };
        f.write_str(message)
    }
}

/// The cursor of a playing series.
#[derive(Clone, Debug)]
pub struct SeriesPlayback {
    series: Series,
    run_id: String,
    /// The last slot played. `None` before the first trial.
    index: Option<usize>,
    count: usize,
    total: usize,
}

impl SeriesPlayback {
    /// Starts a run. The total defaults to one pass over the series; a
    /// randomized start begins after a random slot.
    pub fn new(series: Series, total: Option<usize>, randomize_start: bool) -> SeriesPlayback {
        let len = series.trials.len();
        let index = (randomize_start && len > 0).then(|| rand::thread_rng().gen_range(0..len));
        let run_id = generate_run_id(
            &series.id,
            series.settings_snapshot.effective_feedback(),
            series.settings_snapshot.mode,
        );
        SeriesPlayback {
            total: total.unwrap_or(len),
            series,
            run_id,
            index,
            count: 0,
        }
    }

    /// Advances to the next slot.
    pub fn next_slot(&mut self) -> Result<(usize, SeriesTrial), SeriesEnd> {
        let len = self.series.trials.len();
        if len == 0 {
            return Err(SeriesEnd::Empty);
        }
        if self.count >= self.total {
            return Err(SeriesEnd::Complete);
        }

        let slot = self.index.map_or(0, |index| (index + 1) % len);
        self.index = Some(slot);
        self.count += 1;
        debug!(slot, count = self.count, total = self.total, "Next series slot.");
        Ok((slot, self.series.trials[slot].clone()))
    }

    pub fn series(&self) -> &Series {
        &self.series
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Trials played so far and the total for this run.
    pub fn progress(&self) -> (usize, usize) {
        (self.count, self.total)
    }

    /// The log context of the slot most recently handed out.
    pub fn log_context(&self) -> Option<SeriesLogContext> {
        self.index.map(|index| SeriesLogContext {
            series_id: self.series.id.clone(),
            run_id: self.run_id.clone(),
            index: index + 1,
        })
    }
}

/// Serializes one series for export.
pub fn export_series(series: &Series) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(series)
}

#[derive(Debug, thiserror::Error)]
pub enum SeriesImportError {
    #[error("Invalid JSON file.")]
    InvalidJson(#[source] serde_json::Error),

    #[error("No valid series found in file.")]
    NoValidSeries { skipped: Vec<SkippedEntry> },

    #[error("Unable to read saved series: {0}")]
    Store(#[from] StoreError),
}

/// An entry of an import file that was rejected.
#[derive(Clone, Debug, PartialEq)]
pub struct SkippedEntry {
    /// 1-based position in the file.
    pub position: usize,
    pub reason: String,
}

impl fmt::Display for SkippedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry {}: {}", self.position, self.reason)
    }
}

/// The accepted and rejected entries of an import file.
#[derive(Debug)]
pub struct ParsedImport {
    pub series: Vec<Series>,
    pub skipped: Vec<SkippedEntry>,
}

/// A leniently parsed series, before ids and defaults are filled in.
#[derive(Deserialize)]
struct ImportedSeries {
    id: Option<String>,
    #[serde(alias = "createdAt")]
    created_at: Option<Value>,
    name: Option<String>,
    #[serde(default, alias = "settingsSnapshot")]
    settings_snapshot: Settings,
    trials: Vec<SeriesTrial>,
}

/// Parses a single series or an array of them. Entries without trials are
/// skipped; missing or colliding ids are regenerated.
pub fn parse_import(
    text: &str,
    existing_ids: &HashSet<String>,
) -> Result<ParsedImport, SeriesImportError> {
    let value: Value = serde_json::from_str(text).map_err(SeriesImportError::InvalidJson)?;
    let candidates = match value {
        Value::Array(items) => items,
        other => vec![other],
    };

    let mut taken = existing_ids.clone();
    let mut series = Vec::new();
    let mut skipped = Vec::new();
    for (index, candidate) in candidates.into_iter().enumerate() {
        let position = index + 1;
        let parsed: ImportedSeries = match serde_json::from_value(candidate) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(position, err = %e, "Skipping invalid series entry.");
                skipped.push(SkippedEntry {
                    position,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        if parsed.trials.is_empty() {
            warn!(position, "Skipping series without trials.");
            skipped.push(SkippedEntry {
                position,
                reason: "no trials".to_string(),
            });
            continue;
        }

        let id = match parsed.id {
            Some(id) if !id.trim().is_empty() && !taken.contains(&id) => id,
            _ => generate_series_id(),
        };
        taken.insert(id.clone());

        let created_at = parsed
            .created_at
            .as_ref()
            .and_then(Value::as_i64)
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        series.push(Series {
            name: parsed.name.unwrap_or_else(|| id.clone()),
            id,
            created_at,
            settings_snapshot: parsed.settings_snapshot,
            trials: parsed.trials,
        });
    }

    if series.is_empty() {
        return Err(SeriesImportError::NoValidSeries { skipped });
    }
    Ok(ParsedImport { series, skipped })
}

/// What an import stored, and what it could not.
#[derive(Debug)]
pub struct ImportReport {
    pub imported: Vec<Series>,
    pub skipped: Vec<SkippedEntry>,
    /// Series that parsed but could not be saved, with the reason.
    pub failed: Vec<(Series, StoreError)>,
}

impl ImportReport {
    /// The status line shown after an import.
    pub fn status(&self) -> String {
        format!("Imported {} series.", self.imported.len())
    }
}

/// Parses an import file and saves every valid series. A failed save is logged
/// and does not stop the remaining ones.
pub async fn import_series(
    store: &dyn SeriesStore,
    text: &str,
) -> Result<ImportReport, SeriesImportError> {
    let existing: HashSet<String> = store.list().await?.into_iter().map(|s| s.id).collect();
    let parsed = parse_import(text, &existing)?;

    let mut imported = Vec::with_capacity(parsed.series.len());
    let mut failed = Vec::new();
    for series in parsed.series {
        match store.save(&series).await {
            Ok(()) => imported.push(series),
            Err(e) => {
                error!(series = %series.id, err = %e, "Unable to save imported series.");
                failed.push((series, e));
            }
        }
    }

    info!(
        imported = imported.len(),
        skipped = parsed.skipped.len(),
        failed = failed.len(),
        "Series import finished."
    );
    Ok(ImportReport {
        imported,
        skipped: parsed.skipped,
        failed,
    })
}
