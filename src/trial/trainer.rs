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
//! The trial state machine.
//!
//! A [`Trainer`] owns the current trial and walks it through
//! `Idle -> TrialReady -> AwaitingGuess -> Feedback -> NextScheduled -> Idle`.
//! Every trial runs under an epoch; anything asynchronous that completes after the
//! epoch moved on (a slow sample, a feedback timer) is dropped instead of applied.

use std::{path::PathBuf, sync::Arc, time::Duration};

use chrono::{Local, Utc};
use midly::{live::LiveEvent, MidiMessage};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, span, warn, Level};

use super::recall::{build_recall_options, choose_target, recall_options, RecallState};
use super::series::{generate_series_id, generate_trials, Series, SeriesEnd, SeriesPlayback};
use super::{next_trial_number, PrefetchQueue, TrialLogEntry};
use crate::audio::Device;
use crate::drones::{DroneEngine, DroneTiming};
use crate::music::{builtin_chroma_sets, Chroma, ChromaSet, NotesByChroma};
use crate::playback::PlaybackEngine;
use crate::samples::{AssetLayout, AssetSource, AudioFormat, SamplingContext, Trial, TrialSampler};
use crate::settings::{ChromaSetChoice, FeedbackMode, Mode, RecallPrecision, Settings, SettingsKey};
use crate::store::{FileStore, MemoryStore, SeriesStore, SettingsStore, StoreError, TrialLog};

const DEFAULT_CORRECT_FEEDBACK: Duration = Duration::from_millis(400);
const DEFAULT_INCORRECT_FEEDBACK: Duration = Duration::from_millis(1500);
const DEFAULT_FADE: Duration = Duration::from_millis(100);
const DEFAULT_PREFETCH: usize = 10;

/// Fade used whenever drones are restarted.
const DRONE_FADE: Duration = Duration::from_millis(100);

/// MIDI notes below this reset the drones instead of answering.
const MIDI_DRONE_RESET_BELOW: u8 = 48;

const NOTIFICATION_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum TrainerError {
    #[error("settings are locked while a series is playing")]
    SettingsLocked,

    #[error("a series is already playing")]
    SeriesActive,

    #[error("series length must be at least 1")]
    InvalidSeriesLength,

    #[error("the active chroma set is empty")]
    EmptyChromaSet,

    #[error("series has no trials")]
    EmptySeries,

    #[error("no trials could be generated")]
    NothingGenerated,

    #[error("no series with id {0}")]
    SeriesNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Feedback and inter-trial timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrainerTiming {
    pub correct_feedback: Duration,
    pub incorrect_feedback: Duration,
    /// Added after the feedback before the next trial starts.
    pub next_trial_delay: Duration,
    /// Fade applied to the trial tone once answered.
    pub fade: Duration,
}

impl Default for TrainerTiming {
    fn default() -> Self {
        TrainerTiming {
            correct_feedback: DEFAULT_CORRECT_FEEDBACK,
            incorrect_feedback: DEFAULT_INCORRECT_FEEDBACK,
            next_trial_delay: Duration::ZERO,
            fade: DEFAULT_FADE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrainerOptions {
    pub timing: TrainerTiming,
    pub drones: DroneTiming,
    /// How many Recognize trials are kept ready.
    pub prefetch: usize,
}

impl Default for TrainerOptions {
    fn default() -> Self {
        TrainerOptions {
            timing: TrainerTiming::default(),
            drones: DroneTiming::default(),
            prefetch: DEFAULT_PREFETCH,
        }
    }
}

/// Options for a settings change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChangeOptions {
    /// Apply the change without persisting it.
    pub skip_save: bool,
}

/// Options for answering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnswerOptions {
    /// Fade the trial tone out during the feedback.
    pub fade_out: bool,
}

impl Default for AnswerOptions {
    fn default() -> Self {
        AnswerOptions { fade_out: true }
    }
}

/// Where the trainer is in the trial lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Idle with guessing disabled because no playable trial could be found.
    Exhausted,
    /// A recall target is armed and waits for play. `play_pending` is set while
    /// the trial is being prepared and guards against overlapping plays.
    TrialReady { play_pending: bool },
    AwaitingGuess,
    Feedback,
    NextScheduled,
}

/// What the trainer tells its front end.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    /// A trial is sounding and answers are accepted from `options`.
    TrialStarted { mode: Mode, options: Vec<Chroma> },
    RecallArmed { target: Chroma },
    Feedback {
        chosen: Chroma,
        presented: Chroma,
        correct: bool,
        feedback: FeedbackMode,
    },
    NoPlayableTrial,
    DronesChanged(Vec<Chroma>),
    SettingsChanged(Settings),
    SettingsLocked(bool),
    SeriesStatus(String),
}

/// The stores the trainer persists to.
#[derive(Clone)]
pub struct Stores {
    pub settings: Arc<dyn SettingsStore>,
    pub trials: Arc<dyn TrialLog>,
    pub series: Arc<dyn SeriesStore>,
}

impl Stores {
    pub fn memory() -> Stores {
        let store = Arc::new(MemoryStore::new());
        Stores {
            settings: store.clone(),
            trials: store.clone(),
            series: store,
        }
    }

    pub fn file(dir: impl Into<PathBuf>) -> Stores {
        let store = Arc::new(FileStore::new(dir));
        Stores {
            settings: store.clone(),
            trials: store.clone(),
            series: store,
        }
    }
}

struct State {
    phase: Phase,
    epoch: u64,
    settings: Settings,
    notes: Arc<NotesByChroma>,
    current: Option<Trial>,
    recall: Option<RecallState>,
    /// A prepared series slot waiting for its recall target to be played.
    series_pending: Option<Trial>,
    replay_count: u32,
    last_target: Option<Chroma>,
    last_played: Option<Chroma>,
    last_note: Option<u8>,
    next_trial: Option<JoinHandle<()>>,
    next_trial_number: u64,
    series: Option<SeriesPlayback>,
    /// The learner's own settings while a series snapshot is applied.
    saved_settings: Option<Settings>,
}

impl State {
    /// Drops the current trial and moves to a new epoch.
    fn reset_trial(&mut self) {
        self.epoch += 1;
        if let Some(next) = self.next_trial.take() {
            next.abort();
        }
        self.current = None;
        self.recall = None;
        self.series_pending = None;
        self.replay_count = 0;
        self.phase = Phase::Idle;
    }

    fn exclusions(&self) -> Vec<Chroma> {
        [self.last_target, self.last_played]
            .into_iter()
            .flatten()
            .collect()
    }
}

struct Inner {
    sampler: Arc<TrialSampler>,
    queue: PrefetchQueue,
    playback: PlaybackEngine,
    drones: DroneEngine,
    stores: Stores,
    timing: TrainerTiming,
    chroma_sets: Vec<ChromaSet>,
    notifications: broadcast::Sender<Notification>,
    state: Mutex<State>,
}

/// Drives trials, drones and series for one learner.
#[derive(Clone)]
pub struct Trainer {
    inner: Arc<Inner>,
}

impl Trainer {
    pub async fn new(
        device: Arc<dyn Device>,
        assets: Arc<dyn AssetSource>,
        layout: AssetLayout,
        stores: Stores,
        options: TrainerOptions,
    ) -> Trainer {
        let feedback_tone = match assets.load(&layout.feedback_path()).await {
            Ok(tone) => Some(tone),
            Err(e) => {
                warn!(err = %e, "Unable to load the feedback tone.");
                None
            }
        };

        let sampler = Arc::new(TrialSampler::new(assets.clone(), layout.clone()));
        let settings = Settings::default();
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        Trainer {
            inner: Arc::new(Inner {
                queue: PrefetchQueue::new(sampler.clone(), options.prefetch),
                sampler,
                playback: PlaybackEngine::new(device.clone(), feedback_tone),
                drones: DroneEngine::new(device, assets, layout, options.drones),
                stores,
                timing: options.timing,
                chroma_sets: builtin_chroma_sets(),
                notifications,
                state: Mutex::new(State {
                    phase: Phase::Idle,
                    epoch: 0,
                    notes: Arc::new(NotesByChroma::new(settings.range())),
                    settings,
                    current: None,
                    recall: None,
                    series_pending: None,
                    replay_count: 0,
                    last_target: None,
                    last_played: None,
                    last_note: None,
                    next_trial: None,
                    next_trial_number: 1,
                    series: None,
                    saved_settings: None,
                }),
            }),
        }
    }

    /// Restores persisted settings and the trial counter, then starts drones
    /// and prefetching.
    pub async fn hydrate(&self) {
        let mut settings = Settings::load(self.inner.stores.settings.as_ref()).await;
        settings.clamp_drone_count(&self.inner.chroma_sets);
        let next = match self.inner.stores.trials.get_all().await {
            Ok(entries) => next_trial_number(&entries),
            Err(e) => {
                error!(err = %e, "Unable to read the trial log.");
                1
            }
        };

        info!(
            mode = %settings.mode,
            chroma_set = ?settings.chroma_set,
            drones = settings.drone_count,
            next_trial = next,
            "Settings restored."
        );
        {
            let mut state = self.inner.state.lock();
            state.settings = settings;
            state.next_trial_number = next;
        }
        self.reconfigure().await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifications.subscribe()
    }

    fn notify(&self, notification: Notification) {
        // Nobody listening is fine.
        let _ = self.inner.notifications.send(notification);
    }

    fn active_set(&self, settings: &Settings) -> ChromaSet {
        settings.active_chroma_set(&self.inner.chroma_sets)
    }

    fn sampling_context(&self, state: &State) -> SamplingContext {
        SamplingContext {
            pool: self.active_set(&state.settings).chromas().to_vec(),
            notes: state.notes.clone(),
            format: state.settings.audio_format,
        }
    }

    /// Applies the current settings: discards the trial, rebuilds the note index,
    /// refreshes prefetching and restarts drones.
    async fn reconfigure(&self) {
        let (context, pool, count, settings) = {
            let mut state = self.inner.state.lock();
            state.reset_trial();
            state.notes = Arc::new(NotesByChroma::new(state.settings.range()));
            let prefetch = state.settings.mode == Mode::Recognize && state.series.is_none();
            (
                prefetch.then(|| self.sampling_context(&state)),
                state.settings.drone_pool(&self.inner.chroma_sets),
                state.settings.drone_count,
                state.settings.clone(),
            )
        };

        self.inner.playback.stop();
        let prefetch = context.is_some();
        self.inner.queue.configure(context);
        if prefetch {
            let _ = self.inner.queue.ensure_filled();
        }
        self.notify(Notification::SettingsChanged(settings));

        let drones = self.inner.drones.set_count(&pool, count, DRONE_FADE).await;
        self.notify(Notification::DronesChanged(drones));
    }

    /// Starts the next trial for the active mode or series.
    pub async fn start(&self) {
        let (epoch, mode, in_series) = {
            let mut state = self.inner.state.lock();
            state.reset_trial();
            (state.epoch, state.settings.mode, state.series.is_some())
        };
        self.inner.playback.reset_timing();

        if in_series {
            self.start_series_trial(epoch).await;
            return;
        }
        match mode {
            Mode::Recognize => self.start_recognize(epoch).await,
            Mode::Recall => self.arm_recall(epoch, false).await,
            Mode::Discrimination => self.arm_recall(epoch, true).await,
        }
    }

    fn no_playable_trial(&self) {
        warn!("No playable trial, guessing disabled.");
        self.notify(Notification::NoPlayableTrial);
    }

    async fn start_recognize(&self, epoch: u64) {
        let trial = self.inner.queue.take().await;
        let _ = self.inner.queue.ensure_filled();

        let started = {
            let mut state = self.inner.state.lock();
            if state.epoch != epoch {
                debug!(epoch, "Recognize trial superseded.");
                return;
            }
            match trial {
                Some(trial) => {
                    state.last_note = Some(trial.midi_note());
                    state.current = Some(trial.clone());
                    state.phase = Phase::AwaitingGuess;
                    Some((trial, self.active_set(&state.settings).chromas().to_vec()))
                }
                None => {
                    state.phase = Phase::Exhausted;
                    None
                }
            }
        };

        match started {
            Some((trial, options)) => {
                self.inner.playback.play(&trial);
                info!(
                    chroma = %trial.chroma(),
                    note = trial.midi_note(),
                    instrument = %trial.instrument(),
                    "Trial started."
                );
                self.notify(Notification::TrialStarted {
                    mode: Mode::Recognize,
                    options,
                });
            }
            None => self.no_playable_trial(),
        }
    }

    async fn arm_recall(&self, epoch: u64, auto_play: bool) {
        let armed = {
            let mut state = self.inner.state.lock();
            if state.epoch != epoch {
                return;
            }
            let pool = self.active_set(&state.settings).chromas().to_vec();
            let precision = state.settings.precision.semitones();
            let excluded = state.exclusions();
            let target = choose_target(&pool, precision, &excluded, &mut rand::thread_rng());
            match target {
                Some(target) => {
                    state.recall = Some(RecallState::armed(target, precision));
                    state.phase = Phase::TrialReady {
                        play_pending: false,
                    };
                }
                None => state.phase = Phase::Exhausted,
            }
            target
        };

        let Some(target) = armed else {
            self.no_playable_trial();
            return;
        };
        info!(target = %target, "Recall target armed.");
        self.notify(Notification::RecallArmed { target });
        if auto_play {
            self.play().await;
        }
    }

    /// Plays the armed recall target: picks what sounds from its options and
    /// starts it. Ignored unless a target is armed and nothing is in flight.
    pub async fn play(&self) {
        enum Source {
            Prepared(Trial),
            Sample {
                chroma: Chroma,
                context: SamplingContext,
                excluded_note: Option<u8>,
            },
        }

        let (epoch, mode, target, options, source) = {
            let mut state = self.inner.state.lock();
            if state.phase != (Phase::TrialReady { play_pending: false }) {
                debug!(phase = ?state.phase, "Play ignored.");
                return;
            }
            let Some(recall) = state.recall.clone() else {
                return;
            };
            state.phase = Phase::TrialReady { play_pending: true };

            let pending = state.series_pending.take();
            let (options, source) = match pending {
                Some(trial) => (recall.options.clone(), Source::Prepared(trial)),
                None => {
                    let excluded = state.exclusions();
                    let mut rng = rand::thread_rng();
                    let options =
                        build_recall_options(recall.target, recall.precision, &excluded, &mut rng);
                    let chroma = options.choose(&mut rng).copied().unwrap_or(recall.target);
                    (
                        options,
                        Source::Sample {
                            chroma,
                            context: self.sampling_context(&state),
                            excluded_note: state.last_note,
                        },
                    )
                }
            };
            (state.epoch, state.settings.mode, recall.target, options, source)
        };

        let trial = match source {
            Source::Prepared(trial) => Some(trial),
            Source::Sample {
                chroma,
                context,
                excluded_note,
            } => {
                self.inner
                    .sampler
                    .sample_for_chroma(chroma, excluded_note, &context)
                    .await
            }
        };

        let trial = {
            let mut state = self.inner.state.lock();
            if state.epoch != epoch {
                debug!(epoch, "Recall play superseded.");
                return;
            }
            let Some(trial) = trial else {
                state.phase = Phase::Exhausted;
                drop(state);
                self.no_playable_trial();
                return;
            };
            if let Some(recall) = state.recall.as_mut() {
                recall.options = options.clone();
                recall.played = Some(trial.chroma());
            }
            state.last_target = Some(target);
            state.last_played = Some(trial.chroma());
            state.last_note = Some(trial.midi_note());
            state.current = Some(trial.clone());
            state.phase = Phase::AwaitingGuess;
            trial
        };

        self.inner.playback.play(&trial);
        info!(
            target = %target,
            played = %trial.chroma(),
            note = trial.midi_note(),
            instrument = %trial.instrument(),
            "Recall trial played."
        );
        self.notify(Notification::TrialStarted { mode, options });
    }

    /// Plays the current trial again. With a recall target armed and nothing
    /// played yet this is the same as [`Trainer::play`].
    pub async fn replay(&self) {
        let trial = {
            let mut state = self.inner.state.lock();
            match state.phase {
                Phase::AwaitingGuess => {
                    let Some(trial) = state.current.clone() else {
                        return;
                    };
                    state.replay_count += 1;
                    Some(trial)
                }
                Phase::TrialReady {
                    play_pending: false,
                } => None,
                phase => {
                    debug!(?phase, "Replay ignored.");
                    return;
                }
            }
        };

        match trial {
            Some(trial) => {
                debug!(note = trial.midi_note(), "Replaying trial.");
                self.inner.playback.replay(&trial);
            }
            None => self.play().await,
        }
    }

    pub async fn answer(&self, chosen: Chroma) -> Option<bool> {
        self.answer_with(chosen, AnswerOptions::default()).await
    }

    /// Scores an answer against the chroma that sounded, logs it, gives feedback
    /// and schedules the next trial. Returns whether the answer was correct, or
    /// `None` when no answer was expected.
    pub async fn answer_with(&self, chosen: Chroma, options: AnswerOptions) -> Option<bool> {
        let drones: Vec<String> = self
            .inner
            .drones
            .active_chromas()
            .iter()
            .map(|chroma| chroma.label().to_string())
            .collect();
        let response_time = self.inner.playback.response_time();

        let (entry, feedback, epoch, refill) = {
            let mut state = self.inner.state.lock();
            if state.phase != Phase::AwaitingGuess {
                debug!(phase = ?state.phase, "Answer ignored.");
                return None;
            }
            let trial = state.current.take()?;
            let settings = &state.settings;
            let set = self.active_set(settings);
            let recall = state.recall.as_ref();
            let presented = trial.chroma();

            let entry = TrialLogEntry {
                trial_number: state.next_trial_number,
                timestamp_ms: Utc::now().timestamp_millis(),
                chroma_set: set.label(),
                exercise_type: if settings.mode.is_recall_family() {
                    settings.mode.label().to_string()
                } else {
                    set.exercise_type().to_string()
                },
                mode: settings.mode,
                feedback_mode: settings.effective_feedback(),
                presented_chroma: presented,
                chosen_chroma: chosen,
                correct: chosen == presented,
                midi_note: trial.midi_note(),
                instrument: trial.instrument(),
                recall_target: recall.map(|recall| recall.target),
                recall_precision: recall.map(|recall| recall.precision),
                reduced_range: settings.reduced_range,
                drones,
                response_time_ms: response_time.map(|elapsed| elapsed.as_millis() as u64),
                replay_count: state.replay_count,
                series: state.series.as_ref().and_then(SeriesPlayback::log_context),
            };
            let feedback = settings.effective_feedback();
            let refill = settings.mode == Mode::Recognize && state.series.is_none();

            state.next_trial_number += 1;
            state.phase = Phase::Feedback;
            (entry, feedback, state.epoch, refill)
        };

        let correct = entry.correct;
        let presented = entry.presented_chroma;
        info!(
            trial = entry.trial_number,
            chosen = %chosen,
            presented = %presented,
            correct,
            replays = entry.replay_count,
            "Answered."
        );
        self.append_log(entry);

        let timing = self.inner.timing;
        let feedback_duration = if correct {
            timing.correct_feedback
        } else {
            timing.incorrect_feedback
        };
        if options.fade_out && feedback != FeedbackMode::None {
            self.inner
                .playback
                .fade_out_after(feedback_duration.saturating_sub(timing.fade), timing.fade);
        }
        if feedback == FeedbackMode::Limited && !correct {
            self.inner.playback.play_feedback_tone();
        }
        self.notify(Notification::Feedback {
            chosen,
            presented,
            correct,
            feedback,
        });

        if refill {
            let _ = self.inner.queue.ensure_filled();
        }
        let delay = match feedback {
            FeedbackMode::None => Duration::ZERO,
            _ => feedback_duration,
        };
        self.schedule_next(epoch, delay);
        Some(correct)
    }

    fn append_log(&self, entry: TrialLogEntry) {
        let log = self.inner.stores.trials.clone();
        tokio::spawn(async move {
            if let Err(e) = log.append(&entry).await {
                error!(trial = entry.trial_number, err = %e, "Unable to log trial.");
            }
        });
    }

    /// Replaces any pending next-trial timer.
    fn schedule_next(&self, epoch: u64, feedback_delay: Duration) {
        let trainer = self.clone();
        let next_delay = self.inner.timing.next_trial_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(feedback_delay).await;
            {
                let mut state = trainer.inner.state.lock();
                if state.epoch != epoch {
                    return;
                }
                state.phase = Phase::NextScheduled;
            }

            tokio::time::sleep(next_delay).await;
            {
                let mut state = trainer.inner.state.lock();
                if state.epoch != epoch {
                    return;
                }
                // This task's own handle; starting must not abort it.
                state.next_trial.take();
            }
            trainer.start().await;
        });

        if let Some(previous) = self.inner.state.lock().next_trial.replace(handle) {
            previous.abort();
        }
    }

    /// Handles raw MIDI input. Note-on plays an armed recall target, resets the
    /// drones below C3, and answers otherwise.
    pub async fn handle_midi(&self, raw: &[u8]) {
        let event = match LiveEvent::parse(raw) {
            Ok(event) => event,
            Err(e) => {
                debug!(err = %e, "Ignoring unparseable MIDI.");
                return;
            }
        };
        let LiveEvent::Midi {
            message: MidiMessage::NoteOn { key, vel },
            ..
        } = event
        else {
            return;
        };
        if vel.as_int() == 0 {
            return;
        }

        let note = key.as_int();
        let armed = self.phase() == Phase::TrialReady {
            play_pending: false,
        };
        debug!(note, armed, "MIDI note on.");
        if armed {
            self.play().await;
        } else if note < MIDI_DRONE_RESET_BELOW {
            self.reset_drones().await;
        } else {
            self.answer(Chroma::from_note(note)).await;
        }
    }

    /// Fades the drones out and restarts them with fresh chromas.
    pub async fn reset_drones(&self) -> Vec<Chroma> {
        let (pool, count) = {
            let state = self.inner.state.lock();
            (
                state.settings.drone_pool(&self.inner.chroma_sets),
                state.settings.drone_count,
            )
        };
        let drones = self.inner.drones.reset(&pool, count, DRONE_FADE).await;
        self.notify(Notification::DronesChanged(drones.clone()));
        drones
    }

    /// Updates settings unless a series holds them, and persists the changed keys.
    fn change_settings<F>(
        &self,
        options: ChangeOptions,
        key: SettingsKey,
        update: F,
    ) -> Result<Settings, TrainerError>
    where
        F: FnOnce(&mut Settings),
    {
        let (settings, keys) = {
            let mut state = self.inner.state.lock();
            if state.series.is_some() {
                return Err(TrainerError::SettingsLocked);
            }
            let drone_count = state.settings.drone_count;
            update(&mut state.settings);
            state.settings.clamp_drone_count(&self.inner.chroma_sets);

            let mut keys = vec![key];
            if state.settings.drone_count != drone_count && key != SettingsKey::DroneCount {
                keys.push(SettingsKey::DroneCount);
            }
            (state.settings.clone(), keys)
        };
        debug!(key = key.name(), skip_save = options.skip_save, "Setting changed.");

        if !options.skip_save {
            let store = self.inner.stores.settings.clone();
            let saved = settings.clone();
            tokio::spawn(async move {
                for key in keys {
                    if let Err(e) = saved.save(store.as_ref(), key).await {
                        error!(key = key.name(), err = %e, "Unable to save setting.");
                    }
                }
            });
        }
        Ok(settings)
    }

    pub async fn set_mode(&self, mode: Mode, options: ChangeOptions) -> Result<(), TrainerError> {
        self.change_settings(options, SettingsKey::Mode, |s| s.mode = mode)?;
        self.reconfigure().await;
        Ok(())
    }

    pub async fn set_chroma_set(
        &self,
        choice: ChromaSetChoice,
        options: ChangeOptions,
    ) -> Result<(), TrainerError> {
        self.change_settings(options, SettingsKey::ChromaSet, |s| s.chroma_set = choice)?;
        self.reconfigure().await;
        Ok(())
    }

    /// Replaces the custom selection. Applies immediately if the custom set is active.
    pub async fn set_custom_chromas(
        &self,
        chromas: &[Chroma],
        options: ChangeOptions,
    ) -> Result<(), TrainerError> {
        let indices: Vec<u8> = chromas.iter().map(|c| c.index()).collect();
        let normalized = ChromaSet::custom(&indices).chromas().to_vec();
        let settings = self.change_settings(options, SettingsKey::CustomChromas, |s| {
            s.custom_chromas = normalized
        })?;
        if settings.chroma_set == ChromaSetChoice::Custom {
            self.reconfigure().await;
        }
        Ok(())
    }

    /// Takes effect with the next recall target.
    pub fn set_precision(
        &self,
        precision: RecallPrecision,
        options: ChangeOptions,
    ) -> Result<(), TrainerError> {
        self.change_settings(options, SettingsKey::Precision, |s| s.precision = precision)?;
        Ok(())
    }

    pub async fn set_reduced_range(
        &self,
        reduced: bool,
        options: ChangeOptions,
    ) -> Result<(), TrainerError> {
        self.change_settings(options, SettingsKey::ReducedRange, |s| s.reduced_range = reduced)?;
        self.reconfigure().await;
        Ok(())
    }

    pub fn set_feedback_mode(
        &self,
        feedback: FeedbackMode,
        options: ChangeOptions,
    ) -> Result<(), TrainerError> {
        let settings =
            self.change_settings(options, SettingsKey::Feedback, |s| s.feedback = feedback)?;
        self.notify(Notification::SettingsChanged(settings));
        Ok(())
    }

    pub async fn set_audio_format(
        &self,
        format: AudioFormat,
        options: ChangeOptions,
    ) -> Result<(), TrainerError> {
        self.change_settings(options, SettingsKey::AudioFormat, |s| s.audio_format = format)?;
        self.reconfigure().await;
        Ok(())
    }

    pub fn set_series_randomize_start(
        &self,
        randomize: bool,
        options: ChangeOptions,
    ) -> Result<(), TrainerError> {
        self.change_settings(options, SettingsKey::SeriesRandomizeStart, |s| {
            s.series_randomize_start = randomize
        })?;
        Ok(())
    }

    /// Changes the drone count, clamped to the drone pool. Returns the sounding drones.
    pub async fn set_drone_count(
        &self,
        count: usize,
        options: ChangeOptions,
    ) -> Result<Vec<Chroma>, TrainerError> {
        let settings =
            self.change_settings(options, SettingsKey::DroneCount, |s| s.drone_count = count)?;
        let pool = settings.drone_pool(&self.inner.chroma_sets);
        let drones = self
            .inner
            .drones
            .set_count(&pool, settings.drone_count, DRONE_FADE)
            .await;
        self.notify(Notification::DronesChanged(drones.clone()));
        Ok(drones)
    }

    /// Generates a series under the current settings and saves it.
    pub async fn generate_series(
        &self,
        length: usize,
        name: Option<String>,
    ) -> Result<Series, TrainerError> {
        if length == 0 {
            return Err(TrainerError::InvalidSeriesLength);
        }
        let (context, settings) = {
            let state = self.inner.state.lock();
            if state.series.is_some() {
                return Err(TrainerError::SeriesActive);
            }
            (self.sampling_context(&state), state.settings.clone())
        };
        if context.pool.is_empty() {
            return Err(TrainerError::EmptyChromaSet);
        }

        let trials = generate_trials(
            &self.inner.sampler,
            &context,
            settings.mode,
            settings.precision.semitones(),
            length,
        )
        .await;
        if trials.is_empty() {
            return Err(TrainerError::NothingGenerated);
        }

        let series = Series {
            id: generate_series_id(),
            created_at: Utc::now().timestamp_millis(),
            name: name.unwrap_or_else(|| {
                format!(
                    "{} {}",
                    settings.mode.label(),
                    Local::now().format("%Y-%m-%d %H:%M")
                )
            }),
            settings_snapshot: settings,
            trials,
        };
        if let Err(e) = self.inner.stores.series.save(&series).await {
            error!(id = series.id, err = %e, "Unable to save series.");
        }
        info!(id = series.id, trials = series.trials.len(), "Series generated.");
        self.notify(Notification::SeriesStatus(format!(
            "Generated series with {} trials.",
            series.trials.len()
        )));
        Ok(series)
    }

    /// Loads a saved series and plays it.
    pub async fn play_saved_series(
        &self,
        id: &str,
        total: Option<usize>,
    ) -> Result<(), TrainerError> {
        let series = self
            .inner
            .stores
            .series
            .get_by_id(id)
            .await?
            .ok_or_else(|| TrainerError::SeriesNotFound(id.to_string()))?;
        self.play_series(series, total).await
    }

    /// Applies the series' settings snapshot, locks settings and starts playing
    /// its trials in order. `total` defaults to one pass.
    pub async fn play_series(&self, series: Series, total: Option<usize>) -> Result<(), TrainerError> {
        if series.trials.is_empty() {
            self.notify(Notification::SeriesStatus("Series is empty.".to_string()));
            return Err(TrainerError::EmptySeries);
        }

        let span = span!(Level::INFO, "series playback", id = series.id.as_str());
        {
            let mut state = self.inner.state.lock();
            if state.series.is_some() {
                return Err(TrainerError::SeriesActive);
            }
            let randomize = state.settings.series_randomize_start;
            let mut snapshot = series.settings_snapshot.clone();
            snapshot.series_randomize_start = randomize;
            snapshot.clamp_drone_count(&self.inner.chroma_sets);

            let playback = SeriesPlayback::new(series, total, randomize);
            info!(
                parent: &span,
                run = playback.run_id(),
                trials = playback.series().trials.len(),
                total = playback.progress().1,
                "Series playback started."
            );
            state.saved_settings = Some(std::mem::replace(&mut state.settings, snapshot));
            state.series = Some(playback);
        }

        use tracing::Instrument as _;
        async {
            self.reconfigure().await;
            self.notify(Notification::SettingsLocked(true));
            self.notify(Notification::SeriesStatus(
                "Series playback started.".to_string(),
            ));
            self.start().await;
        }
        .instrument(span)
        .await;
        Ok(())
    }

    /// Stops series playback and restores the learner's settings. Returns
    /// whether a series was playing.
    pub async fn stop_series(&self) -> bool {
        self.end_series(SeriesEnd::Stopped).await
    }

    async fn end_series(&self, end: SeriesEnd) -> bool {
        {
            let mut state = self.inner.state.lock();
            let Some(playback) = state.series.take() else {
                return false;
            };
            state.reset_trial();
            if let Some(saved) = state.saved_settings.take() {
                state.settings = saved;
            }
            let (count, total) = playback.progress();
            info!(
                id = playback.series().id,
                run = playback.run_id(),
                count,
                total,
                reason = %end,
                "Series playback ended."
            );
        }

        self.inner.playback.stop();
        self.reconfigure().await;
        self.notify(Notification::SettingsLocked(false));
        self.notify(Notification::SeriesStatus(end.to_string()));
        true
    }

    async fn start_series_trial(&self, epoch: u64) {
        let next = {
            let mut state = self.inner.state.lock();
            if state.epoch != epoch {
                return;
            }
            let format = state.settings.audio_format;
            let Some(playback) = state.series.as_mut() else {
                return;
            };
            playback.next_slot().map(|(index, slot)| (index, slot, format))
        };
        let (index, slot, format) = match next {
            Ok(next) => next,
            Err(end) => {
                self.end_series(end).await;
                return;
            }
        };

        let Some(trial) = self
            .inner
            .sampler
            .prepare(slot.midi_note, slot.instrument, format)
            .await
        else {
            warn!(index, note = slot.midi_note, instrument = %slot.instrument, "Series slot unavailable.");
            self.end_series(SeriesEnd::AudioUnavailable).await;
            return;
        };

        let (mode, options) = {
            let mut state = self.inner.state.lock();
            if state.epoch != epoch {
                return;
            }
            let mode = state.settings.mode;
            state.last_note = Some(trial.midi_note());
            if mode.is_recall_family() {
                let target = slot.target.unwrap_or(slot.chroma);
                let precision = state.settings.precision.semitones();
                let options = if slot.options.is_empty() {
                    recall_options(target, precision)
                } else {
                    slot.options.clone()
                };
                state.recall = Some(RecallState {
                    target,
                    options,
                    played: None,
                    precision,
                });
                state.series_pending = Some(trial.clone());
                state.phase = Phase::TrialReady {
                    play_pending: false,
                };
                (mode, None)
            } else {
                state.current = Some(trial.clone());
                state.phase = Phase::AwaitingGuess;
                (mode, Some(self.active_set(&state.settings).chromas().to_vec()))
            }
        };

        debug!(index, note = trial.midi_note(), "Series trial.");
        match options {
            Some(options) => {
                self.inner.playback.play(&trial);
                self.notify(Notification::TrialStarted { mode, options });
            }
            None => {
                let target = slot.target.unwrap_or(slot.chroma);
                self.notify(Notification::RecallArmed { target });
                if mode == Mode::Discrimination {
                    self.play().await;
                }
            }
        }
    }

    /// Stops all audio and pending timers.
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            state.reset_trial();
        }
        self.inner.queue.configure(None);
        self.inner.playback.stop();
        self.inner.drones.stop(Duration::ZERO);
        info!("Trainer stopped.");
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    pub fn settings(&self) -> Settings {
        self.inner.state.lock().settings.clone()
    }

    pub fn chroma_sets(&self) -> &[ChromaSet] {
        &self.inner.chroma_sets
    }

    pub fn current_trial(&self) -> Option<Trial> {
        self.inner.state.lock().current.clone()
    }

    pub fn recall_state(&self) -> Option<RecallState> {
        self.inner.state.lock().recall.clone()
    }

    pub fn replay_count(&self) -> u32 {
        self.inner.state.lock().replay_count
    }

    pub fn active_drones(&self) -> Vec<Chroma> {
        self.inner.drones.active_chromas()
    }

    pub fn is_series_active(&self) -> bool {
        self.inner.state.lock().series.is_some()
    }

    /// Trials played and the total of the running series.
    pub fn series_progress(&self) -> Option<(usize, usize)> {
        self.inner
            .state
            .lock()
            .series
            .as_ref()
            .map(SeriesPlayback::progress)
    }

    pub fn prefetched(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn stores(&self) -> &Stores {
        &self.inner.stores
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::Value;

    use super::*;
    use crate::audio::{mock, Voice as _};
    use crate::music::Instrument;
    use crate::trial::SeriesLogContext;
    use crate::testutil::{eventually, test_layout, MockAssets};

    struct Harness {
        trainer: Trainer,
        device: mock::Device,
        store: Arc<MemoryStore>,
    }

    fn full_assets() -> MockAssets {
        let assets = MockAssets::new();
        assets.add_all_instruments(AudioFormat::Mp3);
        assets.add_drones();
        assets
    }

    async fn harness_with(assets: MockAssets, store: Arc<MemoryStore>) -> Harness {
        let device = mock::Device::get("mock-device");
        let stores = Stores {
            settings: store.clone(),
            trials: store.clone(),
            series: store.clone(),
        };
        let trainer = Trainer::new(
            Arc::new(device.clone()),
            Arc::new(assets),
            test_layout(),
            stores,
            TrainerOptions::default(),
        )
        .await;
        trainer.hydrate().await;
        Harness {
            trainer,
            device,
            store,
        }
    }

    async fn harness() -> Harness {
        harness_with(full_assets(), Arc::new(MemoryStore::new())).await
    }

    /// Trial and feedback voices; drones loop.
    fn trial_voices(device: &mock::Device) -> Vec<mock::Voice> {
        device
            .started()
            .into_iter()
            .filter(|voice| !voice.options().looping)
            .collect()
    }

    fn drone_voices(device: &mock::Device) -> Vec<mock::Voice> {
        device
            .active()
            .into_iter()
            .filter(|voice| voice.options().looping)
            .collect()
    }

    /// Lets spawned tasks run.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
        let mut notifications = Vec::new();
        while let Ok(notification) = rx.try_recv() {
            notifications.push(notification);
        }
        notifications
    }

    #[tokio::test(start_paused = true)]
    async fn recognize_trial_flow() {
        let h = harness().await;
        h.trainer
            .set_chroma_set(ChromaSetChoice::Builtin(1), ChangeOptions::default())
            .await
            .unwrap();
        let mut rx = h.trainer.subscribe();
        let pair = [Chroma::ALL[0], Chroma::ALL[6]];

        h.trainer.start().await;
        assert_eq!(Phase::AwaitingGuess, h.trainer.phase());
        let trial = h.trainer.current_trial().expect("no trial");
        assert!(pair.contains(&trial.chroma()));
        assert_eq!(1, trial_voices(&h.device).len());
        assert!(drain(&mut rx).contains(&Notification::TrialStarted {
            mode: Mode::Recognize,
            options: pair.to_vec(),
        }));

        assert_eq!(Some(true), h.trainer.answer(trial.chroma()).await);
        assert_eq!(Phase::Feedback, h.trainer.phase());
        assert_eq!(None, h.trainer.answer(trial.chroma()).await);
        assert!(drain(&mut rx).contains(&Notification::Feedback {
            chosen: trial.chroma(),
            presented: trial.chroma(),
            correct: true,
            feedback: FeedbackMode::Feedback,
        }));

        tokio::time::sleep(Duration::from_millis(390)).await;
        assert_eq!(Phase::Feedback, h.trainer.phase());
        eventually(
            || h.trainer.phase() == Phase::AwaitingGuess,
            "Next trial never started",
        )
        .await;
        assert_eq!(2, trial_voices(&h.device).len());

        let entries = h.store.get_all().await.unwrap();
        assert_eq!(1, entries.len());
        let entry = &entries[0];
        assert_eq!(1, entry.trial_number);
        assert!(entry.correct);
        assert_eq!(trial.chroma(), entry.presented_chroma);
        assert_eq!(trial.midi_note(), entry.midi_note);
        assert_eq!("Tritones 1: C, F♯", entry.chroma_set);
        assert_eq!(None, entry.recall_target);
        assert_eq!(None, entry.series);
    }

    #[tokio::test(start_paused = true)]
    async fn incorrect_answer_holds_feedback_longer() {
        let h = harness().await;
        h.trainer
            .set_chroma_set(ChromaSetChoice::Builtin(1), ChangeOptions::default())
            .await
            .unwrap();
        h.trainer.start().await;
        let trial = h.trainer.current_trial().unwrap();
        let wrong = trial.chroma().transpose(6);

        assert_eq!(Some(false), h.trainer.answer(wrong).await);
        tokio::time::sleep(Duration::from_millis(1400)).await;
        assert_eq!(Phase::Feedback, h.trainer.phase());
        eventually(
            || h.trainer.phase() == Phase::AwaitingGuess,
            "Next trial never started",
        )
        .await;

        let entries = h.store.get_all().await.unwrap();
        assert!(!entries[0].correct);
        assert_eq!(wrong, entries[0].chosen_chroma);
    }

    #[tokio::test(start_paused = true)]
    async fn replays_do_not_resample() {
        let h = harness().await;
        h.trainer.start().await;
        let trial = h.trainer.current_trial().unwrap();

        for _ in 0..3 {
            h.trainer.replay().await;
        }
        let replayed = h.trainer.current_trial().unwrap();
        assert_eq!(trial.chroma(), replayed.chroma());
        assert_eq!(trial.midi_note(), replayed.midi_note());
        assert_eq!(trial.instrument(), replayed.instrument());
        assert_eq!(3, h.trainer.replay_count());

        let voices = trial_voices(&h.device);
        assert_eq!(4, voices.len());
        assert_eq!(1, voices.iter().filter(|voice| !voice.is_stopped()).count());

        h.trainer.answer(trial.chroma()).await.unwrap();
        settle().await;
        let entries = h.store.get_all().await.unwrap();
        assert_eq!(3, entries[0].replay_count);
        assert!(entries[0].response_time_ms.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn trial_numbers_continue_across_sessions() {
        let store = Arc::new(MemoryStore::new());
        for _ in 0..2 {
            let h = harness_with(full_assets(), store.clone()).await;
            h.trainer.start().await;
            let trial = h.trainer.current_trial().unwrap();
            h.trainer.answer(trial.chroma()).await.unwrap();
            settle().await;
            h.trainer.shutdown();
        }

        let numbers: Vec<u64> = store
            .get_all()
            .await
            .unwrap()
            .iter()
            .map(|entry| entry.trial_number)
            .collect();
        assert_eq!(vec![1, 2], numbers);
    }

    #[tokio::test(start_paused = true)]
    async fn settings_change_discards_the_trial() {
        let h = harness().await;
        h.trainer.start().await;
        let trial = h.trainer.current_trial().unwrap();
        h.trainer.answer(trial.chroma()).await.unwrap();

        h.trainer
            .set_mode(Mode::Recall, ChangeOptions::default())
            .await
            .unwrap();
        assert_eq!(Phase::Idle, h.trainer.phase());
        assert!(h.trainer.current_trial().is_none());
        assert!(trial_voices(&h.device).iter().all(|voice| voice.is_stopped()));

        // The pending next trial was cancelled.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(Phase::Idle, h.trainer.phase());
        assert_eq!(0, h.trainer.prefetched());
    }

    #[tokio::test(start_paused = true)]
    async fn settings_are_persisted_unless_skipped() {
        let h = harness().await;
        h.trainer
            .set_mode(Mode::Recall, ChangeOptions::default())
            .await
            .unwrap();
        h.trainer
            .set_reduced_range(true, ChangeOptions { skip_save: true })
            .await
            .unwrap();
        settle().await;

        assert_eq!(
            Some(Value::from("recall")),
            h.store.get("last-mode").await.unwrap()
        );
        assert_eq!(None, h.store.get("reduced-range-enabled").await.unwrap());
        assert!(h.trainer.settings().reduced_range);
    }

    #[tokio::test(start_paused = true)]
    async fn hydrate_restores_settings() {
        let store = Arc::new(MemoryStore::new());
        store.set("last-mode", Value::from("recall")).await.unwrap();
        store.set("drone-count", Value::from(2)).await.unwrap();
        store.set("last-recall-precision", Value::from("minor-third")).await.unwrap();

        let h = harness_with(full_assets(), store).await;
        let settings = h.trainer.settings();
        assert_eq!(Mode::Recall, settings.mode);
        assert_eq!(RecallPrecision::MinorThird, settings.precision);
        assert_eq!(2, h.trainer.active_drones().len());
        assert_eq!(2, drone_voices(&h.device).len());
        // Recall never prefetches.
        assert_eq!(0, h.trainer.prefetched());
    }

    #[tokio::test(start_paused = true)]
    async fn store_failures_are_swallowed() {
        let h = harness().await;
        h.store.fail_writes(true);

        h.trainer
            .set_feedback_mode(FeedbackMode::Limited, ChangeOptions::default())
            .unwrap();
        h.trainer.start().await;
        let trial = h.trainer.current_trial().unwrap();
        assert_eq!(Some(true), h.trainer.answer(trial.chroma()).await);
        settle().await;

        assert_eq!(Phase::Feedback, h.trainer.phase());
        assert!(h.store.get_all().await.unwrap().is_empty());
        assert_eq!(FeedbackMode::Limited, h.trainer.settings().feedback);
    }

    #[tokio::test(start_paused = true)]
    async fn drone_count_is_clamped_to_the_pool() {
        let h = harness().await;
        h.trainer
            .set_chroma_set(ChromaSetChoice::Builtin(1), ChangeOptions::default())
            .await
            .unwrap();

        let drones = h
            .trainer
            .set_drone_count(5, ChangeOptions::default())
            .await
            .unwrap();
        assert_eq!(2, drones.len());
        assert_eq!(2, h.trainer.settings().drone_count);
        assert_eq!(2, drone_voices(&h.device).len());

        let drones = h
            .trainer
            .set_drone_count(0, ChangeOptions::default())
            .await
            .unwrap();
        assert!(drones.is_empty());
        tokio::time::sleep(Duration::from_millis(101)).await;
        assert!(drone_voices(&h.device).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_pool_disables_guessing() {
        let assets = MockAssets::new();
        assets.add_drones();
        let h = harness_with(assets, Arc::new(MemoryStore::new())).await;
        let mut rx = h.trainer.subscribe();

        h.trainer.start().await;
        assert_eq!(Phase::Exhausted, h.trainer.phase());
        assert!(drain(&mut rx).contains(&Notification::NoPlayableTrial));
        assert_eq!(None, h.trainer.answer(Chroma::ALL[0]).await);
        assert!(trial_voices(&h.device).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn limited_feedback_sounds_only_on_mistakes() {
        let h = harness().await;
        h.trainer
            .set_feedback_mode(FeedbackMode::Limited, ChangeOptions::default())
            .unwrap();

        h.trainer.start().await;
        let trial = h.trainer.current_trial().unwrap();
        h.trainer.answer(trial.chroma().transpose(1)).await.unwrap();
        assert_eq!(2, trial_voices(&h.device).len());

        eventually(
            || h.trainer.phase() == Phase::AwaitingGuess,
            "Next trial never started",
        )
        .await;
        let trial = h.trainer.current_trial().unwrap();
        h.trainer.answer(trial.chroma()).await.unwrap();
        assert_eq!(3, trial_voices(&h.device).len());
    }

    #[tokio::test(start_paused = true)]
    async fn no_feedback_moves_on_immediately() {
        let h = harness().await;
        h.trainer
            .set_feedback_mode(FeedbackMode::None, ChangeOptions::default())
            .unwrap();

        h.trainer.start().await;
        let first = h.trainer.current_trial().unwrap();
        h.trainer.answer(first.chroma()).await.unwrap();
        settle().await;
        assert_eq!(Phase::AwaitingGuess, h.trainer.phase());
        assert_eq!(2, trial_voices(&h.device).len());
    }

    #[tokio::test(start_paused = true)]
    async fn recall_trial_flow() {
        let h = harness().await;
        h.trainer
            .set_mode(Mode::Recall, ChangeOptions::default())
            .await
            .unwrap();

        h.trainer.start().await;
        assert_eq!(
            Phase::TrialReady {
                play_pending: false
            },
            h.trainer.phase()
        );
        let armed = h.trainer.recall_state().unwrap();
        assert_eq!(None, armed.played);
        assert!(trial_voices(&h.device).is_empty());
        assert_eq!(None, h.trainer.answer(armed.target).await);

        h.trainer.play().await;
        assert_eq!(Phase::AwaitingGuess, h.trainer.phase());
        let recall = h.trainer.recall_state().unwrap();
        assert_eq!(armed.target, recall.target);
        assert!(recall.options.contains(&recall.target));
        assert!(recall.options.len() <= 3);
        let played = recall.played.unwrap();
        assert!(recall.options.contains(&played));
        assert_eq!(played, h.trainer.current_trial().unwrap().chroma());

        // Already playing.
        h.trainer.play().await;
        assert_eq!(1, trial_voices(&h.device).len());

        assert_eq!(Some(true), h.trainer.answer(played).await);
        settle().await;
        let entries = h.store.get_all().await.unwrap();
        let entry = &entries[0];
        assert_eq!(Some(recall.target), entry.recall_target);
        assert_eq!(played, entry.presented_chroma);
        assert_eq!(Some(5), entry.recall_precision);
        assert_eq!("Recall", entry.exercise_type);
        assert_eq!(FeedbackMode::Feedback, entry.feedback_mode);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_recall_targets_differ() {
        let h = harness().await;
        h.trainer
            .set_mode(Mode::Recall, ChangeOptions::default())
            .await
            .unwrap();

        let mut previous: Option<Chroma> = None;
        for _ in 0..5 {
            h.trainer.start().await;
            let target = h.trainer.recall_state().unwrap().target;
            assert_ne!(previous, Some(target));
            h.trainer.play().await;
            previous = Some(target);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn replay_before_play_plays() {
        let h = harness().await;
        h.trainer
            .set_mode(Mode::Recall, ChangeOptions::default())
            .await
            .unwrap();
        h.trainer.start().await;

        h.trainer.replay().await;
        assert_eq!(Phase::AwaitingGuess, h.trainer.phase());
        assert_eq!(0, h.trainer.replay_count());
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_plays_start_one_trial() {
        let assets = MockAssets::with_latency(Duration::from_millis(50));
        assets.add_all_instruments(AudioFormat::Mp3);
        assets.add_drones();
        let h = harness_with(assets, Arc::new(MemoryStore::new())).await;
        h.trainer
            .set_mode(Mode::Recall, ChangeOptions::default())
            .await
            .unwrap();
        h.trainer.start().await;

        tokio::join!(h.trainer.play(), h.trainer.play());
        assert_eq!(Phase::AwaitingGuess, h.trainer.phase());
        assert_eq!(1, trial_voices(&h.device).len());
    }

    #[tokio::test(start_paused = true)]
    async fn discrimination_plays_automatically() {
        let h = harness().await;
        h.trainer
            .set_mode(Mode::Discrimination, ChangeOptions::default())
            .await
            .unwrap();

        h.trainer.start().await;
        assert_eq!(Phase::AwaitingGuess, h.trainer.phase());
        assert_eq!(1, trial_voices(&h.device).len());
        let recall = h.trainer.recall_state().unwrap();
        assert!(recall.played.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn midi_plays_answers_and_resets_drones() {
        let h = harness().await;
        h.trainer
            .set_mode(Mode::Recall, ChangeOptions::default())
            .await
            .unwrap();
        h.trainer
            .set_drone_count(2, ChangeOptions::default())
            .await
            .unwrap();

        // Any key plays an armed target.
        h.trainer.start().await;
        h.trainer.handle_midi(&[0x90, 60, 100]).await;
        assert_eq!(Phase::AwaitingGuess, h.trainer.phase());
        let played = h.trainer.recall_state().unwrap().played.unwrap();

        // Zero velocity and note off are ignored.
        h.trainer.handle_midi(&[0x90, 48 + played.index(), 0]).await;
        h.trainer.handle_midi(&[0x80, 48 + played.index(), 64]).await;
        assert_eq!(Phase::AwaitingGuess, h.trainer.phase());

        h.trainer.handle_midi(&[0x90, 48 + played.index(), 100]).await;
        assert_eq!(Phase::Feedback, h.trainer.phase());
        settle().await;
        assert!(h.store.get_all().await.unwrap()[0].correct);

        // Low keys reset the drones.
        let before = h.device.started().iter().filter(|v| v.options().looping).count();
        h.trainer.handle_midi(&[0x90, 40, 100]).await;
        let after = h.device.started().iter().filter(|v| v.options().looping).count();
        assert_eq!(before + 2, after);
        tokio::time::sleep(Duration::from_millis(101)).await;
        assert_eq!(2, drone_voices(&h.device).len());
    }

    #[tokio::test(start_paused = true)]
    async fn settings_are_locked_during_a_series() {
        let h = harness().await;
        let series = h.trainer.generate_series(5, None).await.unwrap();
        assert_eq!(5, series.trials.len());
        assert!(h.store.get_by_id(&series.id).await.unwrap().is_some());

        h.trainer.play_series(series.clone(), None).await.unwrap();
        assert!(h.trainer.is_series_active());
        assert!(matches!(
            h.trainer.set_mode(Mode::Recall, ChangeOptions::default()).await,
            Err(TrainerError::SettingsLocked)
        ));
        assert!(matches!(
            h.trainer.set_drone_count(3, ChangeOptions::default()).await,
            Err(TrainerError::SettingsLocked)
        ));
        assert!(matches!(
            h.trainer.play_series(series, None).await,
            Err(TrainerError::SeriesActive)
        ));
        assert!(matches!(
            h.trainer.generate_series(5, None).await,
            Err(TrainerError::SeriesActive)
        ));

        assert!(h.trainer.stop_series().await);
        assert!(!h.trainer.stop_series().await);
        assert!(!h.trainer.is_series_active());
        h.trainer
            .set_mode(Mode::Recall, ChangeOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn series_replays_identical_trials() {
        let h = harness().await;
        let series = h.trainer.generate_series(5, Some("Warmup".to_string())).await.unwrap();
        assert_eq!("Warmup", series.name);
        h.trainer
            .set_feedback_mode(FeedbackMode::Limited, ChangeOptions::default())
            .unwrap();
        let mut rx = h.trainer.subscribe();

        h.trainer.play_series(series.clone(), Some(10)).await.unwrap();
        assert_eq!(FeedbackMode::Feedback, h.trainer.settings().feedback);
        assert!(drain(&mut rx).contains(&Notification::SettingsLocked(true)));

        let mut played = Vec::new();
        for _ in 0..10 {
            eventually(
                || h.trainer.phase() == Phase::AwaitingGuess,
                "Series trial never started",
            )
            .await;
            let trial = h.trainer.current_trial().unwrap();
            played.push((trial.chroma(), trial.midi_note(), trial.instrument()));
            h.trainer.answer(trial.chroma()).await.unwrap();
        }
        eventually(|| !h.trainer.is_series_active(), "Series never ended").await;

        let expected: Vec<(Chroma, u8, Instrument)> = series
            .trials
            .iter()
            .map(|slot| (slot.chroma, slot.midi_note, slot.instrument))
            .collect();
        assert_eq!(expected, played[..5]);
        assert_eq!(expected, played[5..]);
        assert_eq!(FeedbackMode::Limited, h.trainer.settings().feedback);

        let notifications = drain(&mut rx);
        assert!(notifications.contains(&Notification::SettingsLocked(false)));
        assert!(notifications.contains(&Notification::SeriesStatus("Series complete.".to_string())));

        settle().await;
        let entries = h.store.get_all().await.unwrap();
        assert_eq!(10, entries.len());
        let contexts: Vec<SeriesLogContext> = entries
            .iter()
            .map(|entry| entry.series.clone().unwrap())
            .collect();
        assert_eq!(1, contexts[0].index);
        assert_eq!(5, contexts[4].index);
        assert_eq!(1, contexts[5].index);
        let runs: HashSet<&str> = contexts.iter().map(|c| c.run_id.as_str()).collect();
        assert_eq!(1, runs.len());
        assert!(contexts.iter().all(|c| c.series_id == series.id));
    }

    #[tokio::test(start_paused = true)]
    async fn recall_series_waits_for_play() {
        let h = harness().await;
        h.trainer
            .set_mode(Mode::Recall, ChangeOptions::default())
            .await
            .unwrap();
        let series = h.trainer.generate_series(3, None).await.unwrap();

        h.trainer.play_series(series.clone(), None).await.unwrap();
        assert_eq!(
            Phase::TrialReady {
                play_pending: false
            },
            h.trainer.phase()
        );
        let slot = &series.trials[0];
        let armed = h.trainer.recall_state().unwrap();
        assert_eq!(slot.target, Some(armed.target));
        assert!(trial_voices(&h.device).is_empty());

        h.trainer.play().await;
        let trial = h.trainer.current_trial().unwrap();
        assert_eq!(slot.midi_note, trial.midi_note());
        assert_eq!(slot.instrument, trial.instrument());
        assert_eq!(Some(slot.chroma), h.trainer.recall_state().unwrap().played);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_series_is_rejected() {
        let h = harness().await;
        let mut series = h.trainer.generate_series(1, None).await.unwrap();
        series.trials.clear();

        assert!(matches!(
            h.trainer.play_series(series, None).await,
            Err(TrainerError::EmptySeries)
        ));
        assert!(matches!(
            h.trainer.generate_series(0, None).await,
            Err(TrainerError::InvalidSeriesLength)
        ));
        assert!(matches!(
            h.trainer.play_saved_series("missing", None).await,
            Err(TrainerError::SeriesNotFound(_))
        ));
        assert!(!h.trainer.is_series_active());
    }
}
