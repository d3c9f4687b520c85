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
use std::io;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{error, info, span, Instrument as _, Level};

use crate::music::Chroma;
use crate::samples::AudioFormat;
use crate::settings::{ChromaSetChoice, FeedbackMode, Mode, RecallPrecision};
use crate::trial::{ChangeOptions, Trainer, TrainerError};

pub mod keyboard;
pub mod midi;

/// Controller events that will trigger behavior in the trainer.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Starts the next trial, discarding the current one.
    Start,

    /// Plays an armed recall target.
    Play,

    /// Plays the current trial again.
    Replay,

    Answer(Chroma),

    /// Restarts the drones with fresh chromas.
    ResetDrones,

    DroneCount(usize),
    Mode(Mode),
    ChromaSet(ChromaSetChoice),
    CustomChromas(Vec<Chroma>),
    Precision(RecallPrecision),
    Feedback(FeedbackMode),
    ReducedRange(bool),
    AudioFormat(AudioFormat),
    RandomizeStart(bool),

    /// Generates and saves a series under the current settings.
    GenerateSeries { length: usize, name: Option<String> },

    /// Plays a saved series, optionally for a total number of trials.
    PlaySeries { id: String, total: Option<usize> },

    StopSeries,

    /// Raw MIDI input.
    Midi(Vec<u8>),
}

pub trait Driver: Send + Sync + 'static {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>>;
}

/// Feeds driver events to a trainer.
pub struct Controller {
    handle: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller with the given drivers. The controller runs until
    /// the first driver stops.
    pub fn new(trainer: Trainer, drivers: Vec<Arc<dyn Driver>>) -> Controller {
        let span = span!(Level::INFO, "controller");
        Controller {
            handle: tokio::spawn(Controller::trigger_events(trainer, drivers).instrument(span)),
        }
    }

    /// Join will block until the controller finishes.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        (&mut self.handle).await
    }

    async fn trigger_events(trainer: Trainer, drivers: Vec<Arc<dyn Driver>>) {
        if drivers.is_empty() {
            info!("No drivers, controller closing.");
            return;
        }

        let (events_tx, mut events_rx) = mpsc::channel(10);
        let join_handles: Vec<JoinHandle<Result<(), io::Error>>> = drivers
            .iter()
            .map(|driver| driver.monitor_events(events_tx.clone()))
            .collect();
        drop(events_tx);

        info!(drivers = join_handles.len(), "Controller started.");

        let mut monitors = futures_util::future::select_all(join_handles);
        loop {
            tokio::select! {
                biased;
                event = events_rx.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    info!(event = ?event, "Received event.");
                    if let Err(e) = Controller::dispatch(&trainer, event).await {
                        error!(err = %e, "Error talking to trainer.");
                    }
                }
                (result, _, remaining) = &mut monitors => {
                    match result {
                        Ok(Err(e)) => error!(err = %e, "Event monitor failed."),
                        Err(e) => error!(err = %e, "Error waiting for event monitor to stop."),
                        Ok(Ok(())) => {}
                    }
                    for handle in remaining {
                        handle.abort();
                    }
                    break;
                }
            }
        }

        info!("Controller closing.");
    }

    async fn dispatch(trainer: &Trainer, event: Event) -> Result<(), TrainerError> {
        let options = ChangeOptions::default();
        match event {
            Event::Start => trainer.start().await,
            Event::Play => trainer.play().await,
            Event::Replay => trainer.replay().await,
            Event::Answer(chroma) => {
                trainer.answer(chroma).await;
            }
            Event::ResetDrones => {
                trainer.reset_drones().await;
            }
            Event::DroneCount(count) => {
                trainer.set_drone_count(count, options).await?;
            }
            Event::Mode(mode) => trainer.set_mode(mode, options).await?,
            Event::ChromaSet(choice) => trainer.set_chroma_set(choice, options).await?,
            Event::CustomChromas(chromas) => trainer.set_custom_chromas(&chromas, options).await?,
            Event::Precision(precision) => trainer.set_precision(precision, options)?,
            Event::Feedback(feedback) => trainer.set_feedback_mode(feedback, options)?,
            Event::ReducedRange(reduced) => trainer.set_reduced_range(reduced, options).await?,
            Event::AudioFormat(format) => trainer.set_audio_format(format, options).await?,
            Event::RandomizeStart(randomize) => {
                trainer.set_series_randomize_start(randomize, options)?
            }
            Event::GenerateSeries { length, name } => {
                let series = trainer.generate_series(length, name).await?;
                info!(id = series.id, name = series.name, "Series saved.");
            }
            Event::PlaySeries { id, total } => trainer.play_saved_series(&id, total).await?,
            Event::StopSeries => {
                trainer.stop_series().await;
            }
            Event::Midi(raw) => trainer.handle_midi(&raw).await,
        }
        Ok(())
    }
}
