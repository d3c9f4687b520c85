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
    collections::HashSet,
    io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;

use crate::music::{Chroma, Instrument};
use crate::samples::{AssetLayout, AssetSource, AudioFormat, LoadedSample, SampleError};

/// Wait for the given async predicate to return true or fail. Works with paused time.
pub async fn eventually_async<F, Fut>(mut predicate: F, error_msg: &str)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let tick = Duration::from_millis(10);
    let timeout = Duration::from_secs(3);
    let start = tokio::time::Instant::now();

    loop {
        if start.elapsed() > timeout {
            panic!("{}", error_msg);
        }
        if predicate().await {
            return;
        }
        tokio::time::sleep(tick).await;
    }
}

/// Wait for the given predicate to return true or fail.
pub async fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    eventually_async(|| std::future::ready(predicate()), error_msg).await
}

/// The asset layout used throughout the tests.
pub fn test_layout() -> AssetLayout {
    AssetLayout::new("assets")
}

/// An in-memory asset source with configurable contents and latency.
#[derive(Default)]
pub struct MockAssets {
    existing: Mutex<HashSet<PathBuf>>,
    failing: Mutex<HashSet<PathBuf>>,
    latency: Duration,
    probes: AtomicUsize,
    loads: AtomicUsize,
}

impl MockAssets {
    pub fn new() -> MockAssets {
        MockAssets::default()
    }

    /// Every probe and load sleeps for the given latency first.
    pub fn with_latency(latency: Duration) -> MockAssets {
        MockAssets {
            latency,
            ..Default::default()
        }
    }

    pub fn add(&self, path: PathBuf) {
        self.existing.lock().insert(path);
    }

    pub fn add_notes(&self, format: AudioFormat, instrument: Instrument, notes: &[u8]) {
        let layout = test_layout();
        for note in notes {
            self.add(layout.instrument_path(format, instrument, *note));
        }
    }

    /// Adds every note of every instrument within its physical range.
    pub fn add_all_instruments(&self, format: AudioFormat) {
        for instrument in Instrument::ALL {
            let range = instrument.range();
            let notes: Vec<u8> = (range.min..=range.max).collect();
            self.add_notes(format, instrument, &notes);
        }
    }

    pub fn add_drones(&self) {
        let layout = test_layout();
        for chroma in Chroma::ALL {
            self.add(layout.drone_path(chroma));
        }
        self.add(layout.feedback_path());
    }

    /// The asset is reported as existing but fails to decode.
    pub fn fail_load(&self, path: PathBuf) {
        self.failing.lock().insert(path);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl AssetSource for MockAssets {
    fn exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<bool>> {
        async move {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.delay().await;
            Ok(self.existing.lock().contains(path))
        }
        .boxed()
    }

    fn load<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<LoadedSample, SampleError>> {
        async move {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.delay().await;
            if self.failing.lock().contains(path) {
                return Err(SampleError::Unsupported(format!(
                    "corrupt asset {}",
                    path.display()
                )));
            }
            if !self.existing.lock().contains(path) {
                return Err(SampleError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    path.display().to_string(),
                )));
            }
            Ok(LoadedSample::new(vec![0.25; 882], 2, 44100))
        }
        .boxed()
    }
}
