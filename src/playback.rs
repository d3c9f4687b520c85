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
//! The foreground voice: the trial tone and the feedback tone.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, info};

use crate::audio::{Device, Voice, VoiceOptions};
use crate::samples::{LoadedSample, Trial};

#[derive(Default)]
struct State {
    current: Option<Box<dyn Voice>>,
    feedback: Option<Box<dyn Voice>>,
    pending_fade: Option<JoinHandle<()>>,
    /// Bumped whenever the pending fade is replaced or cancelled.
    fade_generation: u64,
    /// When the current trial was first played. Replays keep it.
    started_at: Option<Instant>,
}

impl State {
    fn cancel_fade(&mut self) {
        self.fade_generation += 1;
        if let Some(pending) = self.pending_fade.take() {
            pending.abort();
        }
    }

    /// Claims a generation for a fade task about to be stored as pending.
    fn next_fade(&mut self) -> u64 {
        self.fade_generation += 1;
        self.fade_generation
    }

    /// Called by a fade task once it wakes. Returns false, leaving the pending
    /// handle alone, if the task has been superseded.
    fn finish_fade(&mut self, generation: u64) -> bool {
        if self.fade_generation != generation {
            return false;
        }
        // This task's own handle; dropping it detaches rather than aborts.
        self.pending_fade.take();
        true
    }

    fn stop_voices(&mut self) {
        if let Some(voice) = self.current.take() {
            voice.stop();
        }
        if let Some(voice) = self.feedback.take() {
            voice.stop();
        }
    }
}

/// Owns the single trial voice and the feedback tone voice.
#[derive(Clone)]
pub struct PlaybackEngine {
    device: Arc<dyn Device>,
    feedback_tone: Option<LoadedSample>,
    state: Arc<Mutex<State>>,
}

impl PlaybackEngine {
    pub fn new(device: Arc<dyn Device>, feedback_tone: Option<LoadedSample>) -> PlaybackEngine {
        PlaybackEngine {
            device,
            feedback_tone,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Plays the trial from the start and restarts response timing. Returns
    /// whether the device accepted the voice.
    pub fn play(&self, trial: &Trial) -> bool {
        self.start(trial, true)
    }

    /// Plays the trial again without touching response timing.
    pub fn replay(&self, trial: &Trial) -> bool {
        self.start(trial, false)
    }

    fn start(&self, trial: &Trial, first_play: bool) -> bool {
        let mut state = self.state.lock();
        state.cancel_fade();
        state.stop_voices();
        if first_play {
            state.started_at = Some(Instant::now());
        }

        match self.device.start(trial.sample(), VoiceOptions::default()) {
            Ok(voice) => {
                debug!(
                    note = trial.midi_note(),
                    instrument = %trial.instrument(),
                    voice = voice.id(),
                    replay = !first_play,
                    "Playing trial."
                );
                state.current = Some(voice);
                true
            }
            Err(e) => {
                debug!(err = %e, "Trial playback rejected.");
                false
            }
        }
    }

    /// The time since the current trial was first played.
    pub fn response_time(&self) -> Option<Duration> {
        self.state.lock().started_at.map(|started| started.elapsed())
    }

    pub fn reset_timing(&self) {
        self.state.lock().started_at = None;
    }

    pub fn is_playing(&self) -> bool {
        self.state
            .lock()
            .current
            .as_ref()
            .is_some_and(|voice| !voice.is_stopped())
    }

    /// Stops everything immediately and drops any pending fade.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.cancel_fade();
        state.stop_voices();
    }

    /// Ramps the trial voice to silence and releases it. Any pending fade is
    /// replaced. Without a gain stage the voice stops right away.
    pub fn fade_out_and_stop(&self, fade: Duration) {
        let mut state = self.state.lock();
        state.cancel_fade();
        self.begin_fade(&mut state, fade);
    }

    /// Starts the fade once `delay` has passed.
    pub fn fade_out_after(&self, delay: Duration, fade: Duration) {
        let mut state = self.state.lock();
        state.cancel_fade();
        if delay.is_zero() {
            self.begin_fade(&mut state, fade);
            return;
        }

        let engine = self.clone();
        let generation = state.next_fade();
        state.pending_fade = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = engine.state.lock();
            if state.finish_fade(generation) {
                engine.begin_fade(&mut state, fade);
            }
        }));
    }

    fn begin_fade(&self, state: &mut State, fade: Duration) {
        let Some(voice) = state.current.as_ref() else {
            return;
        };

        let gain = match voice.gain() {
            Some(gain) if !fade.is_zero() => gain,
            _ => {
                if let Some(voice) = state.current.take() {
                    voice.stop();
                }
                return;
            }
        };

        let now = self.device.now();
        gain.hold_at(now);
        gain.linear_ramp_to(0.0, now + fade);

        let id = voice.id();
        let engine_state = self.state.clone();
        let generation = state.next_fade();
        state.pending_fade = Some(tokio::spawn(async move {
            tokio::time::sleep(fade).await;
            let mut state = engine_state.lock();
            if !state.finish_fade(generation) {
                return;
            }
            if state.current.as_ref().is_some_and(|voice| voice.id() == id) {
                if let Some(voice) = state.current.take() {
                    voice.stop();
                }
            }
        }));
    }

    /// Plays the short feedback tone. It never touches the trial voice.
    pub fn play_feedback_tone(&self) {
        let Some(tone) = self.feedback_tone.as_ref() else {
            debug!("No feedback tone loaded.");
            return;
        };

        let mut state = self.state.lock();
        if let Some(previous) = state.feedback.take() {
            previous.stop();
        }
        match self.device.start(tone, VoiceOptions::default()) {
            Ok(voice) => {
                info!(voice = voice.id(), "Playing feedback tone.");
                state.feedback = Some(voice);
            }
            Err(e) => debug!(err = %e, "Feedback tone rejected."),
        }
    }
}
