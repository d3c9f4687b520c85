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
use std::{error::Error, fmt, mem};

use midir::{MidiInput, MidiInputConnection, MidiInputPort};
use parking_lot::Mutex;
use tokio::sync::mpsc::Sender;
use tracing::{debug, error, info, span, Level};

pub struct Device {
    name: String,
    input_port: MidiInputPort,
    event_connection: Mutex<Option<MidiInputConnection<()>>>,
}

impl super::Device for Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn watch_events(&self, sender: Sender<Vec<u8>>) -> Result<(), Box<dyn Error>> {
        let span = span!(Level::INFO, "wait for event (midir)");
        let _enter = span.enter();

        let mut event_connection = self.event_connection.lock();
        if event_connection.is_some() {
            return Err("Already watching events.".into());
        }

        info!(device = self.name, "Watching MIDI events.");

        let input = MidiInput::new("chromadrill input")?;
        *event_connection = Some(input.connect(
            &self.input_port,
            "chromadrill input watcher",
            move |_, raw_event, _| {
                debug!(event = ?raw_event, "Received MIDI event.");
                if let Err(e) = sender.blocking_send(Vec::from(raw_event)) {
                    error!(err = %e, "Error sending MIDI event to receiver.");
                }
            },
            (),
        )?);

        Ok(())
    }

    fn stop_watch_events(&self) {
        // Dropping the connection closes the port.
        let event_connection = self.event_connection.lock().take();
        mem::drop(event_connection);
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Input)", self.name)
    }
}

/// Lists midir input devices and produces the Device trait.
pub fn list() -> Result<Vec<Box<dyn super::Device>>, Box<dyn Error>> {
    Ok(list_midir_devices()?
        .into_iter()
        .map(|device| {
            let device: Box<dyn super::Device> = Box::new(device);
            device
        })
        .collect())
}

fn list_midir_devices() -> Result<Vec<Device>, Box<dyn Error>> {
    let input = MidiInput::new("chromadrill input listing")?;

    let mut devices: Vec<Device> = Vec::new();
    for port in input.ports() {
        let name = input.port_name(&port)?;
        if devices.iter().any(|device| device.name == name) {
            continue;
        }
        devices.push(Device {
            name,
            input_port: port,
            event_connection: Mutex::new(None),
        });
    }

    devices.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(devices)
}

/// Gets the midir input device whose name contains the given name.
pub fn get(name: &str) -> Result<Device, Box<dyn Error>> {
    let mut matches = list_midir_devices()?
        .into_iter()
        .filter(|device| device.name.contains(name))
        .collect::<Vec<Device>>();

    if matches.len() > 1 {
        return Err(format!(
            "found too many devices that match ({}), use a less ambiguous device name",
            matches
                .iter()
                .map(|device| device.name.clone())
                .collect::<Vec<String>>()
                .join(", ")
        )
        .into());
    }

    matches
        .pop()
        .ok_or_else(|| format!("no device found with name {}", name).into())
}
