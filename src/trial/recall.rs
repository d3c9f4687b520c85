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
use rand::{seq::SliceRandom, Rng};

use crate::music::Chroma;

/// How many options a recall trial offers at most.
pub const MAX_RECALL_OPTIONS: usize = 3;

/// The state of a Recall or Discrimination trial.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecallState {
    /// The chroma the learner is asked to recall.
    pub target: Chroma,
    /// The candidates offered as answers. Always contains the target.
    pub options: Vec<Chroma>,
    /// What actually sounded, once played.
    pub played: Option<Chroma>,
    pub precision: u8,
}

impl RecallState {
    pub fn armed(target: Chroma, precision: u8) -> RecallState {
        RecallState {
            target,
            options: Vec::new(),
            played: None,
            precision,
        }
    }
}

/// The target and its neighbours `precision` semitones away, without duplicates.
pub fn recall_options(target: Chroma, precision: u8) -> Vec<Chroma> {
    let step = i16::from(precision);
    let mut options = Vec::with_capacity(MAX_RECALL_OPTIONS);
    for chroma in [target, target.transpose(step), target.transpose(-step)] {
        if !options.contains(&chroma) {
            options.push(chroma);
        }
    }
    options
}

/// Picks a target from the pool. Prefers targets whose whole option set avoids
/// the exclusions, then any target that is not itself excluded, then anything.
pub fn choose_target<R: Rng + ?Sized>(
    pool: &[Chroma],
    precision: u8,
    excluded: &[Chroma],
    rng: &mut R,
) -> Option<Chroma> {
    let allowed: Vec<Chroma> = pool
        .iter()
        .copied()
        .filter(|chroma| !excluded.contains(chroma))
        .collect();
    let clean: Vec<Chroma> = allowed
        .iter()
        .copied()
        .filter(|chroma| {
            recall_options(*chroma, precision)
                .iter()
                .all(|option| !excluded.contains(option))
        })
        .collect();

    clean
        .choose(rng)
        .or_else(|| allowed.choose(rng))
        .or_else(|| pool.choose(rng))
        .copied()
}

/// Builds the options for a target. Excluded chromas are dropped, though never
/// the target, and the set is backfilled from the remaining chromas up to three.
pub fn build_recall_options<R: Rng + ?Sized>(
    target: Chroma,
    precision: u8,
    excluded: &[Chroma],
    rng: &mut R,
) -> Vec<Chroma> {
    let mut options: Vec<Chroma> = recall_options(target, precision)
        .into_iter()
        .filter(|chroma| *chroma == target || !excluded.contains(chroma))
        .collect();

    if options.len() < MAX_RECALL_OPTIONS {
        let mut fallback: Vec<Chroma> = Chroma::ALL
            .into_iter()
            .filter(|chroma| !excluded.contains(chroma) && !options.contains(chroma))
            .collect();
        fallback.shuffle(rng);
        let missing = MAX_RECALL_OPTIONS - options.len();
        options.extend(fallback.into_iter().take(missing));
    }

    options
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn c(index: u8) -> Chroma {
        Chroma::ALL[usize::from(index)]
    }

    #[test]
    fn options_wrap_around() {
        assert_eq!(vec![c(0), c(5), c(7)], recall_options(c(0), 5));
        assert_eq!(vec![c(11), c(0), c(10)], recall_options(c(11), 1));
        // A tritone lands on the same chroma both ways.
        assert_eq!(vec![c(2), c(8)], recall_options(c(2), 6));
    }

    #[test]
    fn options_always_contain_target() {
        let mut rng = rand::thread_rng();
        for target in Chroma::ALL {
            for precision in 1..=5 {
                for excluded in [vec![], vec![target], vec![target.transpose(1), target.transpose(-1)]] {
                    let options = build_recall_options(target, precision, &excluded, &mut rng);
                    assert!(options.contains(&target));
                    assert!(options.len() <= 3);
                    assert_eq!(options.len(), options.iter().collect::<HashSet<_>>().len());
                }
            }
        }
    }

    #[test]
    fn excluded_neighbours_are_backfilled() {
        let mut rng = rand::thread_rng();
        let excluded = [c(3), c(5)];
        for _ in 0..50 {
            let options = build_recall_options(c(4), 1, &excluded, &mut rng);
            assert_eq!(3, options.len());
            assert_eq!(c(4), options[0]);
            assert!(!options.contains(&c(3)));
            assert!(!options.contains(&c(5)));
        }
    }

    #[test]
    fn untouched_options_are_kept() {
        let mut rng = rand::thread_rng();
        assert_eq!(
            vec![c(0), c(5), c(7)],
            build_recall_options(c(0), 5, &[c(1)], &mut rng)
        );
    }

    #[test]
    fn target_prefers_clean_options() {
        let mut rng = rand::thread_rng();
        let pool = [c(0), c(6)];
        // Every option of C avoids the exclusions; F♯'s options include F.
        for _ in 0..50 {
            assert_eq!(Some(c(0)), choose_target(&pool, 1, &[c(5)], &mut rng));
        }
        // Both targets are tainted, but C itself is excluded.
        for _ in 0..50 {
            assert_eq!(
                Some(c(6)),
                choose_target(&pool, 1, &[c(0), c(7)], &mut rng)
            );
        }
        // Everything excluded still yields a target.
        assert!(choose_target(&pool, 1, &[c(0), c(6)], &mut rng).is_some());
        assert_eq!(None, choose_target(&[], 1, &[], &mut rng));
    }
}
