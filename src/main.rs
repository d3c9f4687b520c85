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
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chromadrill::controller::{self, Controller, Driver};
use chromadrill::samples::{AssetLayout, AssetSource, FileAssetSource, SampleLoader};
use chromadrill::settings::FeedbackMode;
use chromadrill::store::{FileStore, SeriesStore};
use chromadrill::trial::{
    export_series, import_series, Notification, SeriesImportError, Stores, Trainer, TrainerOptions,
};
use chromadrill::{audio, config, midi};
use clap::{crate_version, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "An ear-training drill for pitch-class recognition."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Lists the available MIDI input devices.
    MidiDevices {},
    /// Starts an interactive training session.
    Start {
        /// The path to the trainer config.
        config_path: String,
        /// Keep settings, trial history and series in memory only.
        #[arg(long)]
        no_persist: bool,
    },
    /// Manages saved series.
    Series {
        /// The path to the trainer config.
        config_path: String,
        #[clap(subcommand)]
        command: SeriesCommands,
    },
}

#[derive(Subcommand)]
enum SeriesCommands {
    /// Lists saved series.
    List {},
    /// Writes a saved series to a JSON file.
    Export {
        /// The series id.
        id: String,
        /// Where to write the series.
        path: PathBuf,
    },
    /// Imports every valid series from a JSON file.
    Import {
        /// The file to import.
        path: PathBuf,
    },
    /// Deletes a saved series.
    Delete {
        /// The series id.
        id: String,
    },
}

fn print_notification(notification: &Notification) {
    match notification {
        Notification::TrialStarted { mode, options } => {
            let labels: Vec<&str> = options.iter().map(|chroma| chroma.label()).collect();
            println!("Trial started ({}). Answers: {}", mode.label(), labels.join(", "));
        }
        Notification::RecallArmed { target } => {
            println!("Target: {}. Type 'play' when ready.", target);
        }
        Notification::Feedback {
            chosen,
            presented,
            correct,
            feedback,
        } => match (feedback, correct) {
            (FeedbackMode::Feedback, true) => println!("Correct: {}", presented),
            (FeedbackMode::Feedback, false) => {
                println!("Incorrect: you chose {}, it was {}", chosen, presented)
            }
            (FeedbackMode::Limited, false) => println!("Incorrect."),
            _ => {}
        },
        Notification::NoPlayableTrial => {
            println!("No playable trial for the current settings.");
        }
        Notification::DronesChanged(drones) if drones.is_empty() => println!("Drones off."),
        Notification::DronesChanged(drones) => {
            let labels: Vec<&str> = drones.iter().map(|chroma| chroma.label()).collect();
            println!("Drones: {}", labels.join(", "));
        }
        Notification::SettingsChanged(_) => {}
        Notification::SettingsLocked(true) => println!("Settings locked for series playback."),
        Notification::SettingsLocked(false) => println!("Settings unlocked."),
        Notification::SeriesStatus(status) => println!("{}", status),
    }
}

async fn start(config_path: &Path, no_persist: bool) -> Result<(), Box<dyn Error>> {
    let config = config::load(config_path)?;
    let device = audio::get_device(config.audio())?;
    let assets: Arc<dyn AssetSource> = Arc::new(FileAssetSource::new(SampleLoader::new(
        config.audio().sample_rate(),
    )));
    let stores = if no_persist {
        Stores::memory()
    } else {
        Stores::file(config.data_dir())
    };
    let options = TrainerOptions {
        timing: config.trainer_timing()?,
        drones: config.drone_timing()?,
        prefetch: config.prefetch(),
    };

    let trainer = Trainer::new(device, assets, AssetLayout::new(config.assets()), stores, options).await;
    trainer.hydrate().await;

    let mut drivers: Vec<Arc<dyn Driver>> = vec![Arc::new(controller::keyboard::Driver::new())];
    if let Some(midi_config) = config.midi() {
        drivers.push(controller::midi::Driver::new(midi::get_device(midi_config)?));
    }

    let mut notifications = trainer.subscribe();
    tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(notification) => print_notification(&notification),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return,
            }
        }
    });

    println!("Type 'help' for commands, 'start' to begin.");
    Controller::new(trainer.clone(), drivers).join().await?;
    trainer.shutdown();
    Ok(())
}

async fn series(config_path: &Path, command: SeriesCommands) -> Result<(), Box<dyn Error>> {
    let config = config::load(config_path)?;
    let store = FileStore::new(config.data_dir());

    match command {
        SeriesCommands::List {} => {
            let series = store.list().await?;

            if series.is_empty() {
                println!("No series found.");
                return Ok(());
            }

            println!("Series:");
            for series in series {
                println!("- {} ({})", series.label(), series.id);
            }
        }
        SeriesCommands::Export { id, path } => {
            let series = store
                .get_by_id(&id)
                .await?
                .ok_or_else(|| format!("no series with id {}", id))?;
            tokio::fs::write(&path, export_series(&series)?).await?;
            println!("Exported {} to {}.", series.label(), path.display());
        }
        SeriesCommands::Import { path } => {
            let text = tokio::fs::read_to_string(&path).await?;
            match import_series(&store, &text).await {
                Ok(report) => {
                    for skipped in report.skipped.iter() {
                        println!("Skipped {}", skipped);
                    }
                    for (series, e) in report.failed.iter() {
                        println!("Unable to save {}: {}", series.label(), e);
                    }
                    println!("{}", report.status());
                }
                Err(SeriesImportError::NoValidSeries { skipped }) => {
                    for skipped in skipped.iter() {
                        println!("Skipped {}", skipped);
                    }
                    println!("{}", SeriesImportError::NoValidSeries { skipped });
                }
                Err(e) => println!("{}", e),
            }
        }
        SeriesCommands::Delete { id } => {
            if store.delete(&id).await? {
                println!("Deleted {}.", id);
            } else {
                println!("No series with id {}.", id);
            }
        }
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::MidiDevices {} => {
            let devices = midi::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Start {
            config_path,
            no_persist,
        } => start(Path::new(&config_path), no_persist).await?,
        Commands::Series {
            config_path,
            command,
        } => series(Path::new(&config_path), command).await?,
    }

    Ok(())
}
