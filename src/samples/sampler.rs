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
use std::{fmt, sync::Arc};

use rand::{seq::SliceRandom, Rng};
use tracing::{debug, warn};

use crate::music::{Chroma, Instrument, NotesByChroma};

use super::{
    AssetLayout, AssetSource, AudioFormat, InstrumentSelector, LoadedSample, SampleProbe,
};

/// How many times a sample is attempted before the trial space counts as exhausted.
pub const MAX_SAMPLE_ATTEMPTS: usize = 30;

/// A stimulus ready to play: its identity plus the decoded asset.
#[derive(Clone)]
pub struct Trial {
    chroma: Chroma,
    midi_note: u8,
    instrument: Instrument,
    sample: LoadedSample,
}

impl Trial {
    pub fn new(midi_note: u8, instrument: Instrument, sample: LoadedSample) -> Trial {
        Trial {
            chroma: Chroma::from_note(midi_note),
            midi_note,
            instrument,
            sample,
        }
    }

    pub fn chroma(&self) -> Chroma {
        self.chroma
    }

    pub fn midi_note(&self) -> u8 {
        self.midi_note
    }

    pub fn instrument(&self) -> Instrument {
        self.instrument
    }

    pub fn sample(&self) -> &LoadedSample {
        &self.sample
    }
}

impl fmt::Debug for Trial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trial")
            .field("chroma", &self.chroma)
            .field("midi_note", &self.midi_note)
            .field("instrument", &self.instrument)
            .finish()
    }
}

/// The configuration a trial is sampled under.
#[derive(Clone, Debug)]
pub struct SamplingContext {
    pub pool: Vec<Chroma>,
    pub notes: Arc<NotesByChroma>,
    pub format: AudioFormat,
}

/// Picks a note uniformly, avoiding `excluded` unless it is the only candidate.
pub fn pick_note<R: Rng + ?Sized>(notes: &[u8], excluded: Option<u8>, rng: &mut R) -> Option<u8> {
    let filtered: Vec<u8> = notes
        .iter()
        .copied()
        .filter(|note| Some(*note) != excluded)
        .collect();
    if filtered.is_empty() {
        notes.choose(rng).copied()
    } else {
        filtered.choose(rng).copied()
    }
}

/// Samples playable trials, retrying until an asset is found and decoded.
pub struct TrialSampler {
    selector: InstrumentSelector,
    assets: Arc<dyn AssetSource>,
    layout: AssetLayout,
}

impl TrialSampler {
    pub fn new(assets: Arc<dyn AssetSource>, layout: AssetLayout) -> TrialSampler {
        let probe = Arc::new(SampleProbe::new(assets.clone(), layout.clone()));
        TrialSampler {
            selector: InstrumentSelector::new(probe),
            assets,
            layout,
        }
    }

    /// Samples a trial from any chroma of the pool.
    pub async fn sample(&self, excluded: Option<u8>, context: &SamplingContext) -> Option<Trial> {
        self.sample_with(None, excluded, context).await
    }

    /// Samples a trial with a fixed chroma.
    pub async fn sample_for_chroma(
        &self,
        chroma: Chroma,
        excluded: Option<u8>,
        context: &SamplingContext,
    ) -> Option<Trial> {
        self.sample_with(Some(chroma), excluded, context).await
    }

    async fn sample_with(
        &self,
        fixed: Option<Chroma>,
        excluded: Option<u8>,
        context: &SamplingContext,
    ) -> Option<Trial> {
        for attempt in 1..=MAX_SAMPLE_ATTEMPTS {
            let picked = {
                let mut rng = rand::thread_rng();
                let chroma = match fixed {
                    Some(chroma) => Some(chroma),
                    None => context.pool.choose(&mut rng).copied(),
                };
                chroma.and_then(|chroma| pick_note(context.notes.notes(chroma), excluded, &mut rng))
            };
            let Some(note) = picked else {
                // Empty pool, or no notes in range for the chroma.
                break;
            };

            if let Some(instrument) = self.selector.choose(context.format, note).await {
                if let Some(trial) = self.prepare(note, instrument, context.format).await {
                    return Some(trial);
                }
            }
            debug!(attempt, note, "No playable asset, resampling.");
        }

        warn!(
            chroma = ?fixed,
            pool = context.pool.len(),
            "No playable trial found."
        );
        None
    }

    /// Loads the asset for an already chosen note and instrument.
    pub async fn prepare(
        &self,
        midi_note: u8,
        instrument: Instrument,
        format: AudioFormat,
    ) -> Option<Trial> {
        let path = self.layout.instrument_path(format, instrument, midi_note);
        match self.assets.load(&path).await {
            Ok(sample) => Some(Trial::new(midi_note, instrument, sample)),
            Err(e) => {
                debug!(path = ?path, err = %e, "Unable to load asset.");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::music::MidiRange;
    use crate::testutil::{test_layout, MockAssets};

    fn context(pool: &[u8], range: MidiRange) -> SamplingContext {
        SamplingContext {
            pool: pool.iter().filter_map(|c| Chroma::new(*c)).collect(),
            notes: Arc::new(NotesByChroma::new(range)),
            format: AudioFormat::Mp3,
        }
    }

    #[test]
    fn pick_note_avoids_exclusion() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            assert_ne!(Some(60), pick_note(&[48, 60, 72], Some(60), &mut rng));
        }
        assert_eq!(Some(60), pick_note(&[60], Some(60), &mut rng));
        assert_eq!(None, pick_note(&[], None, &mut rng));
    }

    #[tokio::test]
    async fn tritone_pool_in_full_range() {
        let assets = Arc::new(MockAssets::new());
        assets.add_all_instruments(AudioFormat::Mp3);
        let sampler = TrialSampler::new(assets, test_layout());
        let context = context(&[0, 6], MidiRange::full());

        for _ in 0..50 {
            let trial = sampler.sample(None, &context).await.unwrap();
            assert!(trial.midi_note() % 12 == 0 || trial.midi_note() % 12 == 6);
            assert!(trial.instrument().range().contains(trial.midi_note()));
            assert!(MidiRange::full().contains(trial.midi_note()));
        }
    }

    #[tokio::test]
    async fn never_repeats_excluded_note() {
        let assets = Arc::new(MockAssets::new());
        assets.add_all_instruments(AudioFormat::Mp3);
        let sampler = TrialSampler::new(assets, test_layout());
        let context = context(&[2], MidiRange::reduced());

        let mut previous = None;
        for _ in 0..50 {
            let trial = sampler.sample(previous, &context).await.unwrap();
            assert_ne!(previous, Some(trial.midi_note()));
            previous = Some(trial.midi_note());
        }
    }

    #[tokio::test]
    async fn single_candidate_is_repeated() {
        let assets = Arc::new(MockAssets::new());
        assets.add_all_instruments(AudioFormat::Mp3);
        let sampler = TrialSampler::new(assets, test_layout());
        // 60 is the only C in this range.
        let context = context(&[0], MidiRange::new(55, 65));

        let trial = sampler.sample(Some(60), &context).await.unwrap();
        assert_eq!(60, trial.midi_note());
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let assets = Arc::new(MockAssets::new());
        let sampler = TrialSampler::new(assets.clone(), test_layout());
        let context = context(&[0, 6], MidiRange::full());

        assert!(sampler.sample(None, &context).await.is_none());
        assert_eq!(0, assets.load_count());

        assert!(sampler.sample(None, &self::context(&[], MidiRange::full())).await.is_none());
    }

    #[tokio::test]
    async fn load_failures_are_retried() {
        let assets = Arc::new(MockAssets::new());
        assets.add_notes(AudioFormat::Mp3, Instrument::Piano, &[60, 72]);
        assets.fail_load(test_layout().instrument_path(AudioFormat::Mp3, Instrument::Piano, 60));
        let sampler = TrialSampler::new(assets, test_layout());

        let trial = sampler
            .sample_for_chroma(Chroma::ALL[0], None, &context(&[0], MidiRange::new(55, 75)))
            .await
            .unwrap();
        assert_eq!(72, trial.midi_note());
        assert_eq!(Instrument::Piano, trial.instrument());
    }
}
