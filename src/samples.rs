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
//! Sample discovery, loading and trial sampling.
//!
//! Instrument tones live under `<assets>/<FORMAT>/<Instrument>/<note>.<ext>`. Which
//! of them exist is discovered lazily by probing, and trials are only ever built
//! from assets that were both found and decoded.

mod decode;
mod layout;
mod loader;
mod probe;
mod sampler;
mod selector;

pub use layout::{AssetLayout, AudioFormat, DRONE_MIDI_END, DRONE_MIDI_START};
pub use loader::{AssetSource, FileAssetSource, LoadedSample, SampleError, SampleLoader};
pub use probe::SampleProbe;
pub use sampler::{pick_note, SamplingContext, Trial, TrialSampler, MAX_SAMPLE_ATTEMPTS};
pub use selector::InstrumentSelector;
