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
//! Sample loading for instrument tones, drones and the feedback tone.
//!
//! Samples are decoded entirely into memory so that replaying a trial never
//! touches the disk again.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::{debug, info};

use super::decode::decode_file;

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] symphonia::core::errors::Error),

    #[error("unsupported sample: {0}")]
    Unsupported(String),

    #[error("decode task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A loaded sample that can be played back.
/// The sample data is stored in an Arc for efficient sharing between voices.
#[derive(Clone)]
pub struct LoadedSample {
    /// The sample data as f32 samples (interleaved if multi-channel).
    data: Arc<Vec<f32>>,
    /// Number of channels in the sample.
    channel_count: u16,
    /// Sample rate of the audio data.
    sample_rate: u32,
}

impl LoadedSample {
    pub fn new(data: Vec<f32>, channel_count: u16, sample_rate: u32) -> LoadedSample {
        LoadedSample {
            data: Arc::new(data),
            channel_count: channel_count.max(1),
            sample_rate,
        }
    }

    /// The shared, interleaved sample data.
    pub fn data(&self) -> &Arc<Vec<f32>> {
        &self.data
    }

    /// Returns the number of channels.
    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.data.len() / usize::from(self.channel_count)
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / f64::from(self.sample_rate))
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// True if both samples share the same decoded buffer.
    pub fn shares_data_with(&self, other: &LoadedSample) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl std::fmt::Debug for LoadedSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedSample")
            .field("channel_count", &self.channel_count)
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.frames())
            .finish()
    }
}

/// Decodes sample files and converts them to the output sample rate.
#[derive(Clone, Debug)]
pub struct SampleLoader {
    /// Target sample rate for transcoding (matches audio output).
    target_sample_rate: u32,
}

impl SampleLoader {
    pub fn new(target_sample_rate: u32) -> Self {
        Self { target_sample_rate }
    }

    /// Loads a sample from a file into memory. This blocks while decoding.
    pub fn load(&self, path: &Path) -> Result<LoadedSample, SampleError> {
        let decoded = decode_file(path)?;

        let samples = if decoded.sample_rate != self.target_sample_rate {
            debug!(
                source_rate = decoded.sample_rate,
                target_rate = self.target_sample_rate,
                "Transcoding sample"
            );
            self.transcode_samples(
                &decoded.samples,
                decoded.channel_count,
                decoded.sample_rate,
                self.target_sample_rate,
            )
        } else {
            decoded.samples
        };

        let loaded = LoadedSample::new(samples, decoded.channel_count, self.target_sample_rate);
        info!(
            path = ?path,
            channels = loaded.channel_count(),
            sample_rate = loaded.sample_rate(),
            duration_ms = loaded.duration().as_millis(),
            memory_kb = loaded.memory_size() / 1024,
            "Sample loaded"
        );
        Ok(loaded)
    }

    /// Transcodes samples from one sample rate to another using linear interpolation.
    fn transcode_samples(
        &self,
        samples: &[f32],
        channel_count: u16,
        source_rate: u32,
        target_rate: u32,
    ) -> Vec<f32> {
        let ratio = f64::from(target_rate) / f64::from(source_rate);
        let channels = usize::from(channel_count);
        let source_frames = samples.len() / channels;
        let target_frames = (source_frames as f64 * ratio).ceil() as usize;

        let mut output = Vec::with_capacity(target_frames * channels);

        for target_frame in 0..target_frames {
            let source_pos = target_frame as f64 / ratio;
            let source_frame = source_pos.floor() as usize;
            let frac = source_pos.fract() as f32;

            for channel in 0..channels {
                let idx0 = source_frame * channels + channel;
                let idx1 = (source_frame + 1) * channels + channel;

                let s0 = samples.get(idx0).copied().unwrap_or(0.0);
                let s1 = samples.get(idx1).copied().unwrap_or(s0);

                output.push(s0 + (s1 - s0) * frac);
            }
        }

        output
    }
}

/// Where assets come from. Both operations may suspend.
pub trait AssetSource: Send + Sync {
    /// Checks whether the asset exists without decoding it.
    fn exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<bool>>;

    /// Loads and decodes the asset.
    fn load<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<LoadedSample, SampleError>>;
}

/// Assets on the local filesystem. Decoding happens on the blocking pool.
pub struct FileAssetSource {
    loader: SampleLoader,
}

impl FileAssetSource {
    pub fn new(loader: SampleLoader) -> FileAssetSource {
        FileAssetSource { loader }
    }
}

impl AssetSource for FileAssetSource {
    fn exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<bool>> {
        tokio::fs::try_exists(path).boxed()
    }

    fn load<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<LoadedSample, SampleError>> {
        let loader = self.loader.clone();
        let path: PathBuf = path.to_path_buf();
        async move {
            let sample = tokio::task::spawn_blocking(move || loader.load(&path)).await??;
            Ok::<_, SampleError>(sample)
        }
        .boxed()
    }
}
