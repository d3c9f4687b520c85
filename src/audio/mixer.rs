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
// Core audio mixing logic, independent of the output backend.
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;

use super::GainParam;

/// Control state shared between a voice handle and the mixer.
pub(super) struct VoiceControls {
    volume: AtomicU32,
    stopped: AtomicBool,
}

impl VoiceControls {
    pub fn new() -> VoiceControls {
        VoiceControls {
            volume: AtomicU32::new(1.0f32.to_bits()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}

/// A voice as seen by the mixer.
pub(super) struct MixerVoice {
    data: Arc<Vec<f32>>,
    channels: usize,
    /// Current frame within the sample.
    position: usize,
    looping: bool,
    gain: GainParam,
    controls: Arc<VoiceControls>,
}

impl MixerVoice {
    pub fn new(
        data: Arc<Vec<f32>>,
        channels: u16,
        start_frame: usize,
        looping: bool,
        gain: GainParam,
        controls: Arc<VoiceControls>,
    ) -> MixerVoice {
        MixerVoice {
            data,
            channels: usize::from(channels.max(1)),
            position: start_frame,
            looping,
            gain,
            controls,
        }
    }

    fn frames(&self) -> usize {
        self.data.len() / self.channels
    }

    /// Adds this voice to the block. The gain is evaluated at both block edges and
    /// interpolated in between.
    fn mix_into(&mut self, output: &mut [f32], out_channels: usize, start: Duration, end: Duration) {
        let frames = output.len() / out_channels;
        let total = self.frames();
        let volume = self.controls.volume();
        let g0 = self.gain.value_at(start) * volume;
        let g1 = self.gain.value_at(end) * volume;

        for frame in 0..frames {
            if self.position >= total {
                if self.looping && total > 0 {
                    self.position = 0;
                } else {
                    self.controls.stop();
                    return;
                }
            }

            let gain = g0 + (g1 - g0) * (frame as f32 / frames as f32);
            let base = self.position * self.channels;
            for channel in 0..out_channels {
                let source = channel.min(self.channels - 1);
                output[frame * out_channels + channel] += self.data[base + source] * gain;
            }
            self.position += 1;
        }
    }
}

/// Mixes every live voice into interleaved output blocks and advances the device clock.
pub(super) struct Mixer {
    voices: Vec<MixerVoice>,
    incoming: Receiver<MixerVoice>,
    channels: usize,
    sample_rate: u32,
    frames_rendered: Arc<AtomicU64>,
}

impl Mixer {
    pub fn new(
        incoming: Receiver<MixerVoice>,
        channels: u16,
        sample_rate: u32,
        frames_rendered: Arc<AtomicU64>,
    ) -> Mixer {
        Mixer {
            voices: Vec::new(),
            incoming,
            channels: usize::from(channels.max(1)),
            sample_rate,
            frames_rendered,
        }
    }

    pub fn render(&mut self, output: &mut [f32]) {
        while let Ok(voice) = self.incoming.try_recv() {
            self.voices.push(voice);
        }

        output.fill(0.0);
        let frames = (output.len() / self.channels) as u64;
        let first = self.frames_rendered.load(Ordering::Relaxed);
        let start = frames_to_duration(first, self.sample_rate);
        let end = frames_to_duration(first + frames, self.sample_rate);

        self.voices.retain(|voice| !voice.controls.is_stopped());
        for voice in self.voices.iter_mut() {
            voice.mix_into(output, self.channels, start, end);
        }

        self.frames_rendered.fetch_add(frames, Ordering::Relaxed);
    }
}

pub(super) fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(frames as f64 / f64::from(sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(data: Vec<f32>, looping: bool, gain: GainParam) -> (MixerVoice, Arc<VoiceControls>) {
        let controls = Arc::new(VoiceControls::new());
        (
            MixerVoice::new(Arc::new(data), 1, 0, looping, gain, controls.clone()),
            controls,
        )
    }

    fn mixer() -> (Mixer, crossbeam_channel::Sender<MixerVoice>, Arc<AtomicU64>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let clock = Arc::new(AtomicU64::new(0));
        (Mixer::new(rx, 2, 100, clock.clone()), tx, clock)
    }

    #[test]
    fn mono_voice_fills_both_channels() {
        let (mut mixer, tx, clock) = mixer();
        let (v, controls) = voice(vec![0.5; 3], false, GainParam::new(1.0));
        tx.send(v).unwrap();

        let mut out = vec![0.0; 8];
        mixer.render(&mut out);
        assert_eq!(vec![0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.0, 0.0], out);
        assert!(controls.is_stopped());
        assert_eq!(4, clock.load(Ordering::Relaxed));
    }

    #[test]
    fn looping_voice_wraps() {
        let (mut mixer, tx, _) = mixer();
        let (v, controls) = voice(vec![1.0, 0.0], true, GainParam::new(1.0));
        tx.send(v).unwrap();

        let mut out = vec![0.0; 10];
        mixer.render(&mut out);
        assert_eq!(vec![1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0], out);
        assert!(!controls.is_stopped());

        controls.stop();
        mixer.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn gain_and_volume_apply() {
        let (mut mixer, tx, _) = mixer();
        let gain = GainParam::new(0.5);
        let (v, controls) = voice(vec![1.0; 100], false, gain);
        controls.set_volume(0.5);
        tx.send(v).unwrap();

        let mut out = vec![0.0; 4];
        mixer.render(&mut out);
        assert!(out.iter().all(|s| (*s - 0.25).abs() < 1e-6));
    }
}
