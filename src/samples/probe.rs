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
use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use tracing::debug;

use crate::music::Instrument;

use super::{AssetLayout, AssetSource, AudioFormat};

type ProbeKey = (AudioFormat, Instrument, u8);

/// Checks which instrument tones exist, remembering every verdict for the session.
pub struct SampleProbe {
    assets: Arc<dyn AssetSource>,
    layout: AssetLayout,
    cache: RwLock<HashMap<ProbeKey, bool>>,
}

impl SampleProbe {
    pub fn new(assets: Arc<dyn AssetSource>, layout: AssetLayout) -> SampleProbe {
        SampleProbe {
            assets,
            layout,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns true if the asset exists. Errors count as missing.
    pub async fn exists(&self, format: AudioFormat, instrument: Instrument, note: u8) -> bool {
        let key = (format, instrument, note);
        let cached = self.cache.read().get(&key).copied();
        if let Some(exists) = cached {
            return exists;
        }

        let path = self.layout.instrument_path(format, instrument, note);
        let exists = match self.assets.exists(&path).await {
            Ok(exists) => exists,
            Err(e) => {
                debug!(path = ?path, err = %e, "Asset probe failed.");
                false
            }
        };

        self.cache.write().insert(key, exists);
        exists
    }

    pub fn cached_len(&self) -> usize {
        self.cache.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_layout, MockAssets};

    #[tokio::test]
    async fn verdicts_are_cached_per_format() {
        let assets = Arc::new(MockAssets::new());
        assets.add_notes(AudioFormat::Mp3, Instrument::Piano, &[60]);
        let probe = SampleProbe::new(assets.clone(), test_layout());

        assert!(probe.exists(AudioFormat::Mp3, Instrument::Piano, 60).await);
        assert!(probe.exists(AudioFormat::Mp3, Instrument::Piano, 60).await);
        assert_eq!(1, assets.probe_count());

        assert!(!probe.exists(AudioFormat::Wav, Instrument::Piano, 60).await);
        assert!(!probe.exists(AudioFormat::Mp3, Instrument::Piano, 61).await);
        assert!(!probe.exists(AudioFormat::Mp3, Instrument::Piano, 61).await);
        assert_eq!(3, assets.probe_count());
        assert_eq!(3, probe.cached_len());
    }
}
