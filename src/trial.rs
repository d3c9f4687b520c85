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
//! Trial orchestration: prefetching, recall option rules, series and the
//! trainer state machine that ties them to playback.

mod log;
mod prefetch;
mod recall;
mod series;
mod trainer;

pub use log::{next_trial_number, SeriesLogContext, TrialLogEntry};
pub use prefetch::PrefetchQueue;
pub use recall::{build_recall_options, choose_target, recall_options, RecallState};
pub use series::{
    export_series, generate_run_id, generate_series_id, generate_trials, import_series,
    parse_import, ImportReport, ParsedImport, Series, SeriesEnd, SeriesImportError,
    SeriesPlayback, SeriesTrial, SkippedEntry,
};
pub use trainer::{
    AnswerOptions, ChangeOptions, Notification, Phase, Stores, Trainer, TrainerError,
    TrainerOptions, TrainerTiming,
};
