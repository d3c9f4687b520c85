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
//! Persistence for settings, the trial log and saved series.
//!
//! Everything here is asynchronous and fallible, but the trainer treats writes as
//! fire-and-forget: failures are logged and never interrupt a drill.

use std::io;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::trial::{Series, TrialLogEntry};

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A key/value settings store.
pub trait SettingsStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, StoreError>>;

    fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<(), StoreError>>;
}

/// An append-only log of answered trials.
pub trait TrialLog: Send + Sync {
    fn append<'a>(&'a self, entry: &'a TrialLogEntry) -> BoxFuture<'a, Result<(), StoreError>>;

    fn get_all(&self) -> BoxFuture<'_, Result<Vec<TrialLogEntry>, StoreError>>;
}

/// Saved series, by id.
pub trait SeriesStore: Send + Sync {
    /// Saves the series, replacing any with the same id.
    fn save<'a>(&'a self, series: &'a Series) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Every saved series, oldest first.
    fn list(&self) -> BoxFuture<'_, Result<Vec<Series>, StoreError>>;

    fn get_by_id<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Series>, StoreError>>;

    /// Returns whether a series was deleted.
    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>>;
}
