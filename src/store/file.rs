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
    io,
    path::{Path, PathBuf},
};

use futures_util::{future::BoxFuture, FutureExt};
use serde_json::{Map, Value};
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, warn};

use super::{SeriesStore, SettingsStore, StoreError, TrialLog};
use crate::trial::{Series, TrialLogEntry};

const SETTINGS_FILE: &str = "settings.json";
const TRIALS_FILE: &str = "trials.jsonl";
const SERIES_DIR: &str = "series";

/// Stores everything as JSON files below a data directory:
///
/// - `settings.json`: one object holding every setting key.
/// - `trials.jsonl`: one trial log entry per line.
/// - `series/<id>.json`: one file per saved series.
pub struct FileStore {
    dir: PathBuf,
    settings_lock: Mutex<()>,
    trials_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> FileStore {
        FileStore {
            dir: dir.into(),
            settings_lock: Mutex::new(()),
            trials_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn series_path(&self, id: &str) -> PathBuf {
        let file_name: String = id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(SERIES_DIR).join(format!("{}.json", file_name))
    }

    async fn read_settings(&self) -> Result<Map<String, Value>, StoreError> {
        match read_optional(&self.dir.join(SETTINGS_FILE)).await? {
            Some(text) => Ok(serde_json::from_str(&text)?),
            None => Ok(Map::new()),
        }
    }
}

/// Reads a file, treating a missing file as empty.
async fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
    match fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Writes through a temporary file so readers never see a partial file.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

impl SettingsStore for FileStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, StoreError>> {
        async move {
            let mut settings = self.read_settings().await?;
            Ok(settings.remove(key))
        }
        .boxed()
    }

    fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<(), StoreError>> {
        async move {
            let _guard = self.settings_lock.lock().await;
            let mut settings = self.read_settings().await?;
            settings.insert(key.to_string(), value);
            let contents = serde_json::to_vec_pretty(&settings)?;
            write_atomic(&self.dir.join(SETTINGS_FILE), &contents).await?;
            debug!(key, "Saved setting.");
            Ok(())
        }
        .boxed()
    }
}

impl TrialLog for FileStore {
    fn append<'a>(&'a self, entry: &'a TrialLogEntry) -> BoxFuture<'a, Result<(), StoreError>> {
        async move {
            let mut line = serde_json::to_string(entry)?;
            line.push('\n');

            let _guard = self.trials_lock.lock().await;
            fs::create_dir_all(&self.dir).await?;
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.dir.join(TRIALS_FILE))
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
            Ok(())
        }
        .boxed()
    }

    fn get_all(&self) -> BoxFuture<'_, Result<Vec<TrialLogEntry>, StoreError>> {
        async move {
            let Some(text) = read_optional(&self.dir.join(TRIALS_FILE)).await? else {
                return Ok(Vec::new());
            };

            let mut entries = Vec::new();
            for (number, line) in text.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str(line) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!(line = number + 1, err = %e, "Skipping malformed trial log entry."),
                }
            }
            Ok(entries)
        }
        .boxed()
    }
}

impl SeriesStore for FileStore {
    fn save<'a>(&'a self, series: &'a Series) -> BoxFuture<'a, Result<(), StoreError>> {
        async move {
            let contents = serde_json::to_vec_pretty(series)?;
            write_atomic(&self.series_path(&series.id), &contents).await?;
            debug!(id = series.id, trials = series.trials.len(), "Saved series.");
            Ok(())
        }
        .boxed()
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<Series>, StoreError>> {
        async move {
            let mut dir = match fs::read_dir(self.dir.join(SERIES_DIR)).await {
                Ok(dir) => dir,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            };

            let mut series = Vec::new();
            while let Some(entry) = dir.next_entry().await? {
                let path = entry.path();
                if !path.extension().is_some_and(|ext| ext == "json") {
                    continue;
                }
                let text = fs::read_to_string(&path).await?;
                match serde_json::from_str::<Series>(&text) {
                    Ok(parsed) => series.push(parsed),
                    Err(e) => warn!(path = ?path, err = %e, "Skipping unreadable series."),
                }
            }
            series.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            Ok(series)
        }
        .boxed()
    }

    fn get_by_id<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Series>, StoreError>> {
        async move {
            match read_optional(&self.series_path(id)).await? {
                Some(text) => Ok(Some(serde_json::from_str(&text)?)),
                None => Ok(None),
            }
        }
        .boxed()
    }

    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        async move {
            match fs::remove_file(self.series_path(id)).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        }
        .boxed()
    }
}
