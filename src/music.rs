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
//! Static music tables: chromas, chroma sets, MIDI ranges and instruments.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// The number of pitch classes in an octave.
pub const CHROMA_COUNT: usize = 12;

const CHROMA_LABELS: [&str; CHROMA_COUNT] = [
    "C", "C♯", "D", "E♭", "E", "F", "F♯", "G", "A♭", "A", "B♭", "B",
];

/// A pitch class, 0 (C) through 11 (B).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Chroma(u8);

impl Chroma {
    /// All chromas in ascending order.
    pub const ALL: [Chroma; CHROMA_COUNT] = [
        Chroma(0),
        Chroma(1),
        Chroma(2),
        Chroma(3),
        Chroma(4),
        Chroma(5),
        Chroma(6),
        Chroma(7),
        Chroma(8),
        Chroma(9),
        Chroma(10),
        Chroma(11),
    ];

    /// Returns the chroma with the given index, if it is a valid pitch class.
    pub fn new(index: u8) -> Option<Chroma> {
        (usize::from(index) < CHROMA_COUNT).then_some(Chroma(index))
    }

    /// Returns the chroma of the given MIDI note.
    pub fn from_note(note: u8) -> Chroma {
        Chroma(note % CHROMA_COUNT as u8)
    }

    pub fn index(self) -> u8 {
        self.0
    }

    pub fn label(self) -> &'static str {
        CHROMA_LABELS[usize::from(self.0)]
    }

    /// Moves the chroma by the given number of semitones, wrapping around the octave.
    pub fn transpose(self, semitones: i16) -> Chroma {
        let index = (i16::from(self.0) + semitones).rem_euclid(CHROMA_COUNT as i16);
        Chroma(index as u8)
    }
}

impl TryFrom<u8> for Chroma {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Chroma::new(value).ok_or_else(|| format!("{} is not a valid chroma", value))
    }
}

impl From<Chroma> for u8 {
    fn from(chroma: Chroma) -> u8 {
        chroma.0
    }
}

impl fmt::Display for Chroma {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Chroma {
    type Err = String;

    /// Parses a chroma from a label (`F♯`), an ASCII spelling (`f#`, `Gb`) or an index.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(index) = trimmed.parse::<u8>() {
            return Chroma::try_from(index);
        }

        let normalized = trimmed.replace('♯', "#").replace('♭', "b");
        let mut chars = normalized.chars();
        let base = match chars.next().map(|c| c.to_ascii_uppercase()) {
            Some('C') => 0,
            Some('D') => 2,
            Some('E') => 4,
            Some('F') => 5,
            Some('G') => 7,
            Some('A') => 9,
            Some('B') => 11,
            _ => return Err(format!("unrecognized chroma '{}'", s)),
        };
        let accidental = match chars.as_str() {
            "" => 0,
            "#" | "s" => 1,
            "b" => -1,
            _ => return Err(format!("unrecognized chroma '{}'", s)),
        };
        Ok(Chroma(base).transpose(accidental))
    }
}

/// A named, ordered set of chromas used as the trial pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChromaSet {
    name: String,
    exercise_type: String,
    chromas: Vec<Chroma>,
}

impl ChromaSet {
    pub fn new(name: &str, exercise_type: &str, chromas: Vec<Chroma>) -> ChromaSet {
        ChromaSet {
            name: name.to_string(),
            exercise_type: exercise_type.to_string(),
            chromas,
        }
    }

    /// Builds the custom set from a raw selection. Invalid and duplicate indices are dropped.
    pub fn custom(selection: &[u8]) -> ChromaSet {
        let mut chromas: Vec<Chroma> = selection
            .iter()
            .filter_map(|index| Chroma::new(*index))
            .collect();
        chromas.sort();
        chromas.dedup();
        ChromaSet::new("Custom", "Custom", chromas)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exercise_type(&self) -> &str {
        &self.exercise_type
    }

    pub fn chromas(&self) -> &[Chroma] {
        &self.chromas
    }

    pub fn is_empty(&self) -> bool {
        self.chromas.is_empty()
    }

    pub fn contains(&self, chroma: Chroma) -> bool {
        self.chromas.contains(&chroma)
    }

    /// A display label including the member chromas, e.g. `Tritones 1: C, F♯`.
    pub fn label(&self) -> String {
        if self.chromas.len() == CHROMA_COUNT {
            return self.name.clone();
        }
        if self.chromas.is_empty() {
            return format!("{}: none", self.name);
        }
        let members: Vec<&str> = self.chromas.iter().map(|c| c.label()).collect();
        format!("{}: {}", self.name, members.join(", "))
    }
}

impl fmt::Display for ChromaSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Every set built from stacking `interval` around the octave, one per starting chroma.
fn interval_cycles(family: &str, interval: u8) -> Vec<ChromaSet> {
    let members = CHROMA_COUNT as u8 / interval;
    (0..interval)
        .map(|start| {
            let chromas = (0..members)
                .map(|step| Chroma::from_note(start + step * interval))
                .collect();
            ChromaSet::new(&format!("{} {}", family, start + 1), family, chromas)
        })
        .collect()
}

/// The built-in chroma sets in menu order.
pub fn builtin_chroma_sets() -> Vec<ChromaSet> {
    let mut sets = vec![ChromaSet::new(
        "Chromatic",
        "Chromatic",
        Chroma::ALL.to_vec(),
    )];
    sets.extend(interval_cycles("Tritones", 6));
    sets.extend(interval_cycles("Thirds", 4));
    sets.extend(interval_cycles("Minor thirds", 3));
    sets.extend(interval_cycles("Tones", 2));
    sets
}

/// Inclusive MIDI note bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MidiRange {
    pub min: u8,
    pub max: u8,
}

const FULL_RANGE: MidiRange = MidiRange { min: 36, max: 96 };

impl MidiRange {
    pub const fn new(min: u8, max: u8) -> MidiRange {
        MidiRange { min, max }
    }

    pub fn full() -> MidiRange {
        FULL_RANGE
    }

    /// The full range narrowed by an octave on each side.
    pub fn reduced() -> MidiRange {
        MidiRange::new(FULL_RANGE.min + 12, FULL_RANGE.max - 12)
    }

    pub fn for_setting(reduced: bool) -> MidiRange {
        if reduced {
            MidiRange::reduced()
        } else {
            MidiRange::full()
        }
    }

    pub fn contains(&self, note: u8) -> bool {
        (self.min..=self.max).contains(&note)
    }
}

/// The notes of a range, bucketed by chroma.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotesByChroma {
    range: MidiRange,
    notes: [Vec<u8>; CHROMA_COUNT],
}

impl NotesByChroma {
    pub fn new(range: MidiRange) -> NotesByChroma {
        let mut notes: [Vec<u8>; CHROMA_COUNT] = Default::default();
        for note in range.min..=range.max {
            notes[usize::from(Chroma::from_note(note).index())].push(note);
        }
        NotesByChroma { range, notes }
    }

    pub fn range(&self) -> MidiRange {
        self.range
    }

    /// The notes in range with the given chroma, in ascending order.
    pub fn notes(&self, chroma: Chroma) -> &[u8] {
        &self.notes[usize::from(chroma.index())]
    }
}

/// The sampled instruments. The variant name is the asset folder name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Instrument {
    Bassoon,
    Cellos,
    Clarinet,
    Flute,
    Harp,
    Horn,
    Oboe,
    Piano,
    Trumpet,
    Violins,
}

impl Instrument {
    pub const ALL: [Instrument; 10] = [
        Instrument::Bassoon,
        Instrument::Cellos,
        Instrument::Clarinet,
        Instrument::Flute,
        Instrument::Harp,
        Instrument::Horn,
        Instrument::Oboe,
        Instrument::Piano,
        Instrument::Trumpet,
        Instrument::Violins,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Instrument::Bassoon => "Bassoon",
            Instrument::Cellos => "Cellos",
            Instrument::Clarinet => "Clarinet",
            Instrument::Flute => "Flute",
            Instrument::Harp => "Harp",
            Instrument::Horn => "Horn",
            Instrument::Oboe => "Oboe",
            Instrument::Piano => "Piano",
            Instrument::Trumpet => "Trumpet",
            Instrument::Violins => "Violins",
        }
    }

    /// The physical range of the instrument.
    pub fn range(self) -> MidiRange {
        match self {
            Instrument::Bassoon => MidiRange::new(36, 79),
            Instrument::Cellos => MidiRange::new(37, 80),
            Instrument::Clarinet => MidiRange::new(50, 92),
            Instrument::Flute => MidiRange::new(60, 94),
            Instrument::Harp => MidiRange::new(36, 96),
            Instrument::Horn => MidiRange::new(36, 79),
            Instrument::Oboe => MidiRange::new(58, 93),
            Instrument::Piano => MidiRange::new(36, 96),
            Instrument::Trumpet => MidiRange::new(52, 91),
            Instrument::Violins => MidiRange::new(56, 96),
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notes_by_chroma_buckets_by_pitch_class() {
        for range in [MidiRange::full(), MidiRange::reduced(), MidiRange::new(40, 41)] {
            let index = NotesByChroma::new(range);
            let mut total = 0;
            for chroma in Chroma::ALL {
                let c = i32::from(chroma.index());
                let notes = index.notes(chroma);
                assert!(notes.iter().all(|n| Chroma::from_note(*n) == chroma));
                assert!(notes.iter().all(|n| range.contains(*n)));

                let expected = (i32::from(range.max) - c).div_euclid(12)
                    - (i32::from(range.min) - c - 1).div_euclid(12);
                assert_eq!(expected as usize, notes.len(), "chroma {}", chroma);
                total += notes.len();
            }
            assert_eq!(usize::from(range.max - range.min) + 1, total);
        }
    }

    #[test]
    fn reduced_range() {
        assert_eq!(MidiRange::new(48, 84), MidiRange::reduced());
        assert_eq!(MidiRange::new(36, 96), MidiRange::for_setting(false));
    }

    #[test]
    fn builtin_sets() {
        let sets = builtin_chroma_sets();
        assert_eq!(1 + 6 + 4 + 3 + 2, sets.len());
        assert_eq!("Chromatic", sets[0].label());

        let tritones = &sets[1];
        assert_eq!("Tritones", tritones.exercise_type());
        assert_eq!("Tritones 1: C, F♯", tritones.label());

        let thirds = sets.iter().find(|s| s.name() == "Thirds 2").unwrap();
        assert_eq!(
            vec![Chroma::ALL[1], Chroma::ALL[5], Chroma::ALL[9]],
            thirds.chromas()
        );

        let tones = sets.iter().find(|s| s.name() == "Tones 2").unwrap();
        assert_eq!(6, tones.chromas().len());
        assert!(tones.chromas().iter().all(|c| c.index() % 2 == 1));
    }

    #[test]
    fn custom_set_is_sorted_and_deduplicated() {
        let custom = ChromaSet::custom(&[7, 0, 7, 14, 4]);
        assert_eq!("Custom: C, E, G", custom.label());
        assert_eq!("Custom: none", ChromaSet::custom(&[]).label());
    }

    #[test]
    fn parse_chroma() {
        assert_eq!(Ok(Chroma::ALL[6]), "F#".parse());
        assert_eq!(Ok(Chroma::ALL[6]), "f♯".parse());
        assert_eq!(Ok(Chroma::ALL[6]), "Gb".parse());
        assert_eq!(Ok(Chroma::ALL[11]), "Cb".parse());
        assert_eq!(Ok(Chroma::ALL[3]), "3".parse());
        assert!("H".parse::<Chroma>().is_err());
        assert!("12".parse::<Chroma>().is_err());
    }

    #[test]
    fn chroma_serializes_as_index() {
        assert_eq!("6", serde_json::to_string(&Chroma::ALL[6]).unwrap());
        assert!(serde_json::from_str::<Chroma>("12").is_err());
    }

    #[test]
    fn transpose_wraps() {
        assert_eq!(Chroma::ALL[11], Chroma::ALL[0].transpose(-1));
        assert_eq!(Chroma::ALL[2], Chroma::ALL[9].transpose(5));
    }
}
