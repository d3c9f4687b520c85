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
//! Background drones.
//!
//! Each drone loops a multi-second sample. A native loop leaves an audible seam,
//! so every voice is instead crossfaded into a fresh instance of the same sample
//! shortly before that point, using equal-power curves. Voices without a gain
//! stage fall back to native looping.

use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::{equal_power_curve, Device, Voice, VoiceOptions, EQUAL_POWER_STEPS};
use crate::music::Chroma;
use crate::samples::{AssetLayout, AssetSource, LoadedSample};

const DEFAULT_CROSSFADE_START: Duration = Duration::from_secs(2);
const DEFAULT_CROSSFADE_DURATION: Duration = Duration::from_millis(300);
const DEFAULT_RESTART_OFFSET: Duration = Duration::from_millis(150);
const DEFAULT_BASE_GAIN_DB: f32 = -10.0;

/// When and how drone voices are crossfaded.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DroneTiming {
    /// Time from an instance's start to its crossfade.
    pub crossfade_start: Duration,
    pub crossfade_duration: Duration,
    /// Where in the sample the incoming instance starts.
    pub restart_offset: Duration,
    /// The level of a single drone, in dB.
    pub base_gain_db: f32,
}

impl Default for DroneTiming {
    fn default() -> Self {
        DroneTiming {
            crossfade_start: DEFAULT_CROSSFADE_START,
            crossfade_duration: DEFAULT_CROSSFADE_DURATION,
            restart_offset: DEFAULT_RESTART_OFFSET,
            base_gain_db: DEFAULT_BASE_GAIN_DB,
        }
    }
}

/// The per-voice gain for `count` simultaneous drones. Each doubling of the
/// count lowers every voice by about 3 dB.
pub fn drone_gain_for_count(base_gain_db: f32, count: usize) -> f32 {
    if count == 0 {
        return 0.0;
    }
    let db = base_gain_db - 10.0 * (count as f32).log10();
    10f32.powf(db / 20.0)
}

/// The sounding instances of one drone: at most an incoming and an outgoing one.
#[derive(Default)]
struct Slot {
    current: Option<Box<dyn Voice>>,
    outgoing: Option<Box<dyn Voice>>,
}

impl Slot {
    fn voices(&self) -> impl Iterator<Item = &dyn Voice> + '_ {
        self.current
            .iter()
            .chain(self.outgoing.iter())
            .map(|voice| voice.as_ref())
    }

    fn release(&mut self) {
        if let Some(voice) = self.current.take() {
            voice.stop();
        }
        if let Some(voice) = self.outgoing.take() {
            voice.stop();
        }
    }
}

struct DronePlayer {
    chroma: Chroma,
    target_gain: f32,
    slot: Arc<Mutex<Slot>>,
    crossfade: Option<JoinHandle<()>>,
}

impl DronePlayer {
    fn cancel_crossfade(&mut self) {
        if let Some(crossfade) = self.crossfade.take() {
            crossfade.abort();
        }
    }

    fn release(mut self) {
        self.cancel_crossfade();
        self.slot.lock().release();
    }
}

#[derive(Default)]
struct State {
    players: Vec<DronePlayer>,
    /// Bumped on every start and stop so that slow loads of a superseded start
    /// never create voices.
    generation: u64,
    samples: HashMap<Chroma, LoadedSample>,
}

/// Owns every drone voice.
#[derive(Clone)]
pub struct DroneEngine {
    device: Arc<dyn Device>,
    assets: Arc<dyn AssetSource>,
    layout: AssetLayout,
    timing: DroneTiming,
    state: Arc<Mutex<State>>,
}

impl DroneEngine {
    pub fn new(
        device: Arc<dyn Device>,
        assets: Arc<dyn AssetSource>,
        layout: AssetLayout,
        timing: DroneTiming,
    ) -> DroneEngine {
        DroneEngine {
            device,
            assets,
            layout,
            timing,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Replaces the current drones with `count` distinct chromas drawn from the pool.
    /// Returns the chromas that are now sounding.
    pub async fn start(&self, pool: &[Chroma], count: usize) -> Vec<Chroma> {
        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            for player in state.players.drain(..) {
                player.release();
            }
            state.generation
        };

        let count = count.min(pool.len());
        if count == 0 {
            return Vec::new();
        }
        let chromas: Vec<Chroma> = pool
            .choose_multiple(&mut rand::thread_rng(), count)
            .copied()
            .collect();
        let gain = drone_gain_for_count(self.timing.base_gain_db, count);

        let mut loaded = Vec::with_capacity(count);
        for chroma in chromas {
            if let Some(sample) = self.sample_for(chroma).await {
                loaded.push((chroma, sample));
            }
        }

        let mut state = self.state.lock();
        if state.generation != generation {
            debug!(generation, "Drone start superseded.");
            return Vec::new();
        }
        for (chroma, sample) in loaded {
            if let Some(player) = self.spawn_player(chroma, sample, gain) {
                state.players.push(player);
            }
        }

        let active: Vec<Chroma> = state.players.iter().map(|player| player.chroma).collect();
        info!(
            drones = ?active.iter().map(|c| c.label()).collect::<Vec<_>>(),
            gain,
            "Drones started."
        );
        active
    }

    /// Fades every drone out with an equal-power curve and releases it once the
    /// fade completes. A zero fade releases immediately.
    pub fn stop(&self, fade: Duration) {
        let mut players: Vec<DronePlayer> = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.players.drain(..).collect()
        };
        if players.is_empty() {
            return;
        }
        debug!(count = players.len(), fade_ms = fade.as_millis() as u64, "Stopping drones.");

        if fade.is_zero() {
            for player in players {
                player.release();
            }
            return;
        }

        let now = self.device.now();
        let mut stepped = Vec::new();
        for player in players.iter_mut() {
            player.cancel_crossfade();
            let mut automated = true;
            for voice in player.slot.lock().voices() {
                match voice.gain() {
                    Some(gain) => {
                        let from = gain.hold_at(now);
                        gain.set_value_curve_at(
                            &equal_power_curve(false, EQUAL_POWER_STEPS, from),
                            now,
                            fade,
                        );
                    }
                    None => automated = false,
                }
            }
            if !automated {
                stepped.push((player.slot.clone(), player.target_gain));
            }
        }

        tokio::spawn(async move {
            if stepped.is_empty() {
                tokio::time::sleep(fade).await;
            } else {
                step_volumes_down(&stepped, fade).await;
            }
            for player in players {
                player.release();
            }
        });
    }

    /// Changes the number of drones. Sounding drones are faded out first when a
    /// fade is given.
    pub async fn set_count(&self, pool: &[Chroma], count: usize, fade: Duration) -> Vec<Chroma> {
        if self.active_count() > 0 && !fade.is_zero() {
            self.stop(fade);
            tokio::time::sleep(fade).await;
        }
        self.start(pool, count).await
    }

    /// Fades out and restarts with a fresh random choice of chromas.
    pub async fn reset(&self, pool: &[Chroma], count: usize, fade: Duration) -> Vec<Chroma> {
        info!(count, "Resetting drones.");
        self.set_count(pool, count, fade).await
    }

    pub fn active_chromas(&self) -> Vec<Chroma> {
        self.state
            .lock()
            .players
            .iter()
            .map(|player| player.chroma)
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().players.len()
    }

    async fn sample_for(&self, chroma: Chroma) -> Option<LoadedSample> {
        if let Some(sample) = self.state.lock().samples.get(&chroma) {
            return Some(sample.clone());
        }

        let path = self.layout.drone_path(chroma);
        match self.assets.load(&path).await {
            Ok(sample) => {
                self.state.lock().samples.insert(chroma, sample.clone());
                Some(sample)
            }
            Err(e) => {
                warn!(chroma = %chroma, path = ?path, err = %e, "Unable to load drone.");
                None
            }
        }
    }

    fn spawn_player(&self, chroma: Chroma, sample: LoadedSample, gain: f32) -> Option<DronePlayer> {
        let automated = self.device.supports_gain_automation();
        let options = VoiceOptions {
            gain,
            offset: Duration::ZERO,
            looping: !automated,
        };
        let voice = match self.device.start(&sample, options) {
            Ok(voice) => voice,
            Err(e) => {
                debug!(chroma = %chroma, err = %e, "Drone playback rejected.");
                return None;
            }
        };
        if voice.gain().is_none() {
            voice.set_volume(gain);
        }

        let slot = Arc::new(Mutex::new(Slot {
            current: Some(voice),
            outgoing: None,
        }));
        let crossfade = automated.then(|| {
            tokio::spawn(crossfade_loop(
                self.device.clone(),
                self.timing,
                sample,
                gain,
                slot.clone(),
            ))
        });

        Some(DronePlayer {
            chroma,
            target_gain: gain,
            slot,
            crossfade,
        })
    }
}

/// Crossfades the slot's voice into a fresh instance, over and over, until aborted.
async fn crossfade_loop(
    device: Arc<dyn Device>,
    timing: DroneTiming,
    sample: LoadedSample,
    gain: f32,
    slot: Arc<Mutex<Slot>>,
) {
    let mut wait = timing.crossfade_start;
    loop {
        tokio::time::sleep(wait).await;
        wait = timing
            .crossfade_start
            .saturating_sub(timing.crossfade_duration);

        let incoming = match device.start(
            &sample,
            VoiceOptions {
                gain: 0.0,
                offset: timing.restart_offset,
                looping: false,
            },
        ) {
            Ok(voice) => voice,
            Err(e) => {
                debug!(err = %e, "Drone crossfade rejected.");
                continue;
            }
        };

        let now = device.now();
        if let Some(param) = incoming.gain() {
            param.set_value_curve_at(
                &equal_power_curve(true, EQUAL_POWER_STEPS, gain),
                now,
                timing.crossfade_duration,
            );
        }

        {
            let mut slot = slot.lock();
            if let Some(stale) = slot.outgoing.take() {
                stale.stop();
            }
            if let Some(previous) = slot.current.take() {
                if let Some(param) = previous.gain() {
                    let from = param.hold_at(now);
                    param.set_value_curve_at(
                        &equal_power_curve(false, EQUAL_POWER_STEPS, from),
                        now,
                        timing.crossfade_duration,
                    );
                }
                slot.outgoing = Some(previous);
            }
            slot.current = Some(incoming);
        }

        tokio::time::sleep(timing.crossfade_duration).await;
        if let Some(outgoing) = slot.lock().outgoing.take() {
            outgoing.stop();
        }
    }
}

/// Fades voices without a gain stage by stepping their plain volume along an
/// equal-power curve.
async fn step_volumes_down(voices: &[(Arc<Mutex<Slot>>, f32)], fade: Duration) {
    let start = tokio::time::Instant::now();
    let step = fade / EQUAL_POWER_STEPS as u32;
    let curves: Vec<Vec<f32>> = voices
        .iter()
        .map(|(_, from)| equal_power_curve(false, EQUAL_POWER_STEPS, *from))
        .collect();

    for i in 0..EQUAL_POWER_STEPS {
        for ((slot, _), curve) in voices.iter().zip(curves.iter()) {
            for voice in slot.lock().voices() {
                voice.set_volume(curve[i]);
            }
        }
        tokio::time::sleep_until(start + step * (i as u32 + 1)).await;
    }
}
