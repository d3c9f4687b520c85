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
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use futures_util::{future::BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::Value;

use super::{SeriesStore, SettingsStore, StoreError, TrialLog};
use crate::trial::{Series, TrialLogEntry};

/// Keeps everything in memory. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    settings: Mutex<HashMap<String, Value>>,
    trials: Mutex<Vec<TrialLogEntry>>,
    series: Mutex<Vec<Series>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// Makes every following write fail.
    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

impl SettingsStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, StoreError>> {
        async move { Ok(self.settings.lock().get(key).cloned()) }.boxed()
    }

    fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<(), StoreError>> {
        async move {
            self.check_writable()?;
            self.settings.lock().insert(key.to_string(), value);
            Ok(())
        }
        .boxed()
    }
}

impl TrialLog for MemoryStore {
    fn append<'a>(&'a self, entry: &'a TrialLogEntry) -> BoxFuture<'a, Result<(), StoreError>> {
        async move {
            self.check_writable()?;
            self.trials.lock().push(entry.clone());
            Ok(())
        }
        .boxed()
    }

    fn get_all(&self) -> BoxFuture<'_, Result<Vec<TrialLogEntry>, StoreError>> {
        async move { Ok(self.trials.lock().clone()) }.boxed()
    }
}

impl SeriesStore for MemoryStore {
    fn save<'a>(&'a self, series: &'a Series) -> BoxFuture<'a, Result<(), StoreError>> {
        async move {
            self.check_writable()?;
            let mut saved = self.series.lock();
            match saved.iter_mut().find(|s| s.id == series.id) {
                Some(existing) => *existing = series.clone(),
                None => saved.push(series.clone()),
            }
            Ok(())
        }
        .boxed()
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<Series>, StoreError>> {
        async move { Ok(self.series.lock().clone()) }.boxed()
    }

    fn get_by_id<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Series>, StoreError>> {
        async move { Ok(self.series.lock().iter().find(|s| s.id == id).cloned()) }.boxed()
    }

    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        async move {
            self.check_writable()?;
            let mut saved = self.series.lock();
            let before = saved.len();
            saved.retain(|s| s.id != id);
            Ok(saved.len() != before)
        }
        .boxed()
    }
}
