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
use std::sync::Arc;

use futures_util::future::join_all;
use rand::seq::SliceRandom;

use crate::music::Instrument;

use super::{AudioFormat, SampleProbe};

/// Picks an instrument that can play a note and has an asset for it.
pub struct InstrumentSelector {
    probe: Arc<SampleProbe>,
    instruments: Vec<Instrument>,
}

impl InstrumentSelector {
    pub fn new(probe: Arc<SampleProbe>) -> InstrumentSelector {
        InstrumentSelector {
            probe,
            instruments: Instrument::ALL.to_vec(),
        }
    }

    /// Chooses uniformly among the instruments whose range covers the note and
    /// whose asset exists.
    pub async fn choose(&self, format: AudioFormat, note: u8) -> Option<Instrument> {
        let probe = &self.probe;
        let checks = self
            .instruments
            .iter()
            .filter(|instrument| instrument.range().contains(note))
            .map(|&instrument| async move {
                probe
                    .exists(format, instrument, note)
                    .await
                    .then_some(instrument)
            });

        let available: Vec<Instrument> = join_all(checks).await.into_iter().flatten().collect();
        available.choose(&mut rand::thread_rng()).copied()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::testutil::{test_layout, MockAssets};

    fn selector(assets: Arc<MockAssets>) -> InstrumentSelector {
        InstrumentSelector::new(Arc::new(SampleProbe::new(assets, test_layout())))
    }

    #[tokio::test]
    async fn only_instruments_in_range_are_probed() {
        let assets = Arc::new(MockAssets::new());
        assets.add_all_instruments(AudioFormat::Mp3);
        let selector = selector(assets.clone());

        // Only Bassoon, Harp, Horn and Piano reach down to 36.
        let mut seen = HashSet::new();
        for _ in 0..200 {
            seen.insert(selector.choose(AudioFormat::Mp3, 36).await.unwrap());
        }
        assert_eq!(
            HashSet::from([
                Instrument::Bassoon,
                Instrument::Harp,
                Instrument::Horn,
                Instrument::Piano
            ]),
            seen
        );
        assert_eq!(4, assets.probe_count());
    }

    #[tokio::test]
    async fn missing_assets_are_skipped() {
        let assets = Arc::new(MockAssets::new());
        assets.add_notes(AudioFormat::Wav, Instrument::Flute, &[94]);
        let selector = selector(assets);

        for _ in 0..20 {
            assert_eq!(
                Some(Instrument::Flute),
                selector.choose(AudioFormat::Wav, 94).await
            );
        }
        assert_eq!(None, selector.choose(AudioFormat::Mp3, 94).await);
        assert_eq!(None, selector.choose(AudioFormat::Wav, 20).await);
    }
}
