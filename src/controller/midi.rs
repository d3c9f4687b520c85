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
use std::{io, sync::Arc};

use tokio::{
    sync::mpsc::{self, Sender},
    task::JoinHandle,
};
use tracing::{debug, info, span, Instrument as _, Level};

use super::Event;
use crate::midi::Device;

/// A driver that forwards MIDI input to the trainer.
pub struct Driver {
    midi_device: Arc<dyn Device>,
}

impl Driver {
    pub fn new(midi_device: Arc<dyn Device>) -> Arc<Self> {
        Arc::new(Driver { midi_device })
    }
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        let (midi_events_tx, mut midi_events_rx) = mpsc::channel::<Vec<u8>>(10);
        let device = self.midi_device.clone();
        let span = span!(Level::INFO, "MIDI driver");

        tokio::spawn(
            async move {
                device
                    .watch_events(midi_events_tx)
                    .map_err(|e| io::Error::other(e.to_string()))?;
                info!(device = device.name(), "MIDI driver started.");

                while let Some(raw_event) = midi_events_rx.recv().await {
                    debug!(event = ?raw_event, "Forwarding MIDI event.");
                    if events_tx.send(Event::Midi(raw_event)).await.is_err() {
                        break;
                    }
                }

                info!("MIDI watcher closed.");
                device.stop_watch_events();
                Ok(())
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use tokio::sync::mpsc;

    use crate::controller::{Driver as _, Event};
    use crate::midi::mock;
    use crate::testutil::eventually;

    #[tokio::test]
    async fn test_midi_driver() {
        let device = mock::Device::get("mock-midi-device");
        let driver = super::Driver::new(Arc::new(device.clone()));
        let (events_tx, mut events_rx) = mpsc::channel(10);

        let handle = driver.monitor_events(events_tx);
        eventually(|| device.is_watching(), "Driver never started watching").await;

        assert!(device.mock_event(&[0x90, 61, 100]));
        assert!(device.mock_event(&[1, 2, 3]));
        assert_eq!(Some(Event::Midi(vec![0x90, 61, 100])), events_rx.recv().await);
        assert_eq!(Some(Event::Midi(vec![1, 2, 3])), events_rx.recv().await);

        // Closing the controller side stops the watcher.
        drop(events_rx);
        assert!(device.mock_event(&[0x80, 61, 0]));
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("driver never stopped")
            .unwrap()
            .unwrap();
        assert!(!device.is_watching());
    }
}
