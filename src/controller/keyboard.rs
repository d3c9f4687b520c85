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

use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{info, span, warn, Level};

use super::Event;
use crate::music::Chroma;
use crate::settings::ChromaSetChoice;

const HELP: &str = "\
Commands:
  start | next             start the next trial
  play | p                 play an armed recall target
  replay | r               replay the current trial
  <chroma>                 answer, e.g. c, f#, Bb, 7
  drones reset | <n>       restart drones or set their count
  mode <recognize|recall|discrimination>
  set <index>|custom       pick a built-in set or the custom one
  custom <chroma>...       choose the custom set's chromas
  precision <fourth|major-third|minor-third|second|minor-second>
  feedback <feedback|limited|none>
  range <full|reduced>
  format <mp3|wav>
  randomize <on|off>       randomize where series playback starts
  generate <n> [name]      generate and save a series
  series play <id> [total] play a saved series
  series stop              stop series playback
  help
  quit";

/// What a line of keyboard input asks for.
#[derive(Debug, PartialEq)]
enum Command {
    Event(Event),
    Help,
    Quit,
}

/// A driver that reads commands from stdin.
pub struct Driver {}

impl Driver {
    pub fn new() -> Driver {
        Driver {}
    }

    /// Reads and handles one line. Returns false once input is exhausted or the
    /// user quits.
    fn monitor_io<R, W>(events_tx: &Sender<Event>, mut reader: R, mut writer: W) -> io::Result<bool>
    where
        R: io::BufRead,
        W: io::Write,
    {
        write!(writer, "> ")?;
        writer.flush()?;
        let mut input = String::default();
        if reader.read_line(&mut input)? == 0 {
            return Ok(false);
        }
        if input.trim().is_empty() {
            return Ok(true);
        }

        match parse_command(&input) {
            Ok(Command::Event(event)) => {
                events_tx.blocking_send(event).map_err(io::Error::other)?;
            }
            Ok(Command::Help) => writeln!(writer, "{}", HELP)?,
            Ok(Command::Quit) => return Ok(false),
            Err(e) => {
                warn!(input = input.trim(), "Unrecognized input");
                writeln!(writer, "{} (try 'help')", e)?;
            }
        }
        Ok(true)
    }
}

impl Default for Driver {
    fn default() -> Self {
        Driver::new()
    }
}

fn on_off(value: Option<&str>) -> Result<bool, String> {
    match value {
        Some("on") | Some("true") | Some("yes") => Ok(true),
        Some("off") | Some("false") | Some("no") => Ok(false),
        _ => Err("expected on or off".to_string()),
    }
}

fn parse_number(value: Option<&str>, what: &str) -> Result<usize, String> {
    value
        .ok_or_else(|| format!("missing {}", what))?
        .parse()
        .map_err(|_| format!("invalid {}", what))
}

fn parse_command(input: &str) -> Result<Command, String> {
    let lowered = input.trim().to_lowercase();
    let mut words = lowered.split_whitespace();
    let Some(command) = words.next() else {
        return Err("empty command".to_string());
    };
    let argument = words.next();

    let event = match command {
        "start" | "next" => Event::Start,
        "play" | "p" => Event::Play,
        "replay" | "r" => Event::Replay,
        "help" | "?" => return Ok(Command::Help),
        "quit" | "exit" | "q" => return Ok(Command::Quit),
        "drones" => match argument {
            Some("reset") => Event::ResetDrones,
            _ => Event::DroneCount(parse_number(argument, "drone count")?),
        },
        "mode" => Event::Mode(argument.unwrap_or_default().parse()?),
        "set" => match argument {
            Some("custom") => Event::ChromaSet(ChromaSetChoice::Custom),
            _ => Event::ChromaSet(ChromaSetChoice::Builtin(parse_number(argument, "set index")?)),
        },
        "custom" => {
            let chromas = argument
                .into_iter()
                .chain(words.by_ref())
                .map(|word| word.parse::<Chroma>())
                .collect::<Result<Vec<Chroma>, String>>()?;
            Event::CustomChromas(chromas)
        }
        "precision" => Event::Precision(argument.unwrap_or_default().parse()?),
        "feedback" => Event::Feedback(argument.unwrap_or_default().parse()?),
        "range" => match argument {
            Some("full") => Event::ReducedRange(false),
            Some("reduced") => Event::ReducedRange(true),
            _ => return Err("expected full or reduced".to_string()),
        },
        "format" => Event::AudioFormat(argument.unwrap_or_default().parse()?),
        "randomize" => Event::RandomizeStart(on_off(argument)?),
        "generate" => {
            let length = parse_number(argument, "series length")?;
            let name: Vec<&str> = input.split_whitespace().skip(2).collect();
            Event::GenerateSeries {
                length,
                name: (!name.is_empty()).then(|| name.join(" ")),
            }
        }
        "series" => match argument {
            Some("stop") => Event::StopSeries,
            Some("play") => {
                // Ids are case sensitive.
                let mut original = input.split_whitespace().skip(2);
                let id = original.next().ok_or("missing series id")?.to_string();
                let total = original
                    .next()
                    .map(|total| parse_number(Some(total), "total"))
                    .transpose()?;
                Event::PlaySeries { id, total }
            }
            _ => return Err("expected series play or series stop".to_string()),
        },
        _ => Event::Answer(input.trim().parse()?),
    };
    Ok(Command::Event(event))
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "keyboard driver");
            let _enter = span.enter();

            info!("Keyboard driver started.");

            while Self::monitor_io(&events_tx, io::stdin().lock(), io::stdout())? {}

            info!("Keyboard driver stopped.");
            Ok(())
        })
    }
}
