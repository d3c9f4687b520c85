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
//! Gain automation.
//!
//! A [`GainParam`] holds a timeline of scheduled changes against the device clock:
//! immediate value changes, linear ramps and sampled curves. The mixer evaluates
//! the timeline while rendering, so fades happen sample-accurately without any
//! timer on the control side.

use std::{f32::consts::FRAC_PI_2, sync::Arc, time::Duration};

use parking_lot::Mutex;

/// The resolution of the equal-power curves.
pub const EQUAL_POWER_STEPS: usize = 32;

#[derive(Clone, Debug)]
enum GainEvent {
    SetValue {
        at: Duration,
        value: f32,
    },
    /// Ramps linearly from the previous event's value, ending at `end`.
    LinearRamp {
        end: Duration,
        value: f32,
    },
    Curve {
        start: Duration,
        duration: Duration,
        values: Arc<[f32]>,
    },
}

impl GainEvent {
    fn time(&self) -> Duration {
        match self {
            GainEvent::SetValue { at, .. } => *at,
            GainEvent::LinearRamp { end, .. } => *end,
            GainEvent::Curve { start, .. } => *start,
        }
    }
}

struct Timeline {
    initial: f32,
    events: Vec<GainEvent>,
}

impl Timeline {
    fn insert(&mut self, event: GainEvent) {
        let time = event.time();
        let index = self.events.partition_point(|e| e.time() <= time);
        self.events.insert(index, event);
    }

    /// Drops every event at or after `at`. A curve still running at `at` is cut
    /// there: its elapsed points are kept and a ramp finishes the partial step.
    fn truncate_at(&mut self, at: Duration) {
        self.events.retain(|e| e.time() < at);

        let mut ramps = Vec::new();
        for event in self.events.iter_mut() {
            let GainEvent::Curve {
                start,
                duration,
                values,
            } = event
            else {
                continue;
            };
            if *start + *duration <= at || values.len() < 2 {
                continue;
            }

            let step = duration.as_secs_f64() / (values.len() - 1) as f64;
            let position = (at - *start).as_secs_f64() / step;
            let kept = (position.floor() as usize).min(values.len() - 2);
            let frac = (position - kept as f64) as f32;
            ramps.push(GainEvent::LinearRamp {
                end: at,
                value: values[kept] + (values[kept + 1] - values[kept]) * frac,
            });

            *duration = Duration::from_secs_f64(step * kept as f64);
            *values = Arc::from(&values[..=kept]);
        }

        for ramp in ramps {
            self.insert(ramp);
        }
    }

    fn value_at(&self, t: Duration) -> f32 {
        let mut value = self.initial;
        let mut since = Duration::ZERO;

        for event in &self.events {
            match event {
                GainEvent::SetValue { at, value: v } => {
                    if *at > t {
                        break;
                    }
                    value = *v;
                    since = *at;
                }
                GainEvent::LinearRamp { end, value: target } => {
                    if *end <= t {
                        value = *target;
                        since = *end;
                        continue;
                    }
                    if t > since {
                        let progress = (t - since).as_secs_f32() / (*end - since).as_secs_f32();
                        value += (target - value) * progress;
                    }
                    break;
                }
                GainEvent::Curve {
                    start,
                    duration,
                    values,
                } => {
                    if *start > t {
                        break;
                    }
                    let end = *start + *duration;
                    if t >= end || values.len() < 2 {
                        value = values[values.len() - 1];
                        since = end;
                        continue;
                    }
                    let position = (t - *start).as_secs_f32() / duration.as_secs_f32()
                        * (values.len() - 1) as f32;
                    let index = (position.floor() as usize).min(values.len() - 2);
                    let frac = position - index as f32;
                    value = values[index] + (values[index + 1] - values[index]) * frac;
                    break;
                }
            }
        }

        value
    }
}

/// A shareable, automatable gain value.
#[derive(Clone)]
pub struct GainParam {
    timeline: Arc<Mutex<Timeline>>,
}

impl GainParam {
    pub fn new(value: f32) -> GainParam {
        GainParam {
            timeline: Arc::new(Mutex::new(Timeline {
                initial: value,
                events: Vec::new(),
            })),
        }
    }

    pub fn set_value_at(&self, value: f32, at: Duration) {
        self.timeline
            .lock()
            .insert(GainEvent::SetValue { at, value });
    }

    /// Ramps linearly from the value at the previous event to `value` at `end`.
    pub fn linear_ramp_to(&self, value: f32, end: Duration) {
        self.timeline
            .lock()
            .insert(GainEvent::LinearRamp { end, value });
    }

    /// Follows the given values, evenly spread over `duration`.
    pub fn set_value_curve_at(&self, values: &[f32], start: Duration, duration: Duration) {
        if values.is_empty() {
            return;
        }
        self.timeline.lock().insert(GainEvent::Curve {
            start,
            duration,
            values: Arc::from(values),
        });
    }

    /// Drops every event at or after `from`. A curve in progress at `from` stops
    /// there and holds its value.
    pub fn cancel_scheduled(&self, from: Duration) {
        self.timeline.lock().truncate_at(from);
    }

    /// Cancels everything from `now` and pins the current value there, so that
    /// new automation starts from what is actually sounding.
    pub fn hold_at(&self, now: Duration) -> f32 {
        let mut timeline = self.timeline.lock();
        let current = timeline.value_at(now);
        timeline.truncate_at(now);
        timeline.insert(GainEvent::SetValue {
            at: now,
            value: current,
        });
        current
    }

    pub fn value_at(&self, t: Duration) -> f32 {
        self.timeline.lock().value_at(t)
    }
}

/// A sine/cosine taper whose squared sum stays constant across a crossfade.
pub fn equal_power_curve(fade_in: bool, steps: usize, target: f32) -> Vec<f32> {
    let steps = steps.max(2);
    (0..steps)
        .map(|i| {
            let ratio = i as f32 / (steps - 1) as f32;
            let shape = if fade_in {
                (ratio * FRAC_PI_2).sin()
            } else {
                (ratio * FRAC_PI_2).cos()
            };
            shape * target
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn linear_ramp() {
        let gain = GainParam::new(1.0);
        gain.set_value_at(1.0, ms(100));
        gain.linear_ramp_to(0.0, ms(200));

        assert!(close(1.0, gain.value_at(ms(50))));
        assert!(close(1.0, gain.value_at(ms(100))));
        assert!(close(0.5, gain.value_at(ms(150))));
        assert!(close(0.0, gain.value_at(ms(200))));
        assert!(close(0.0, gain.value_at(ms(5000))));
    }

    #[test]
    fn curve_interpolates() {
        let gain = GainParam::new(0.0);
        gain.set_value_curve_at(&[0.0, 1.0, 0.5], ms(0), ms(100));

        assert!(close(0.5, gain.value_at(ms(25))));
        assert!(close(1.0, gain.value_at(ms(50))));
        assert!(close(0.75, gain.value_at(ms(75))));
        assert!(close(0.5, gain.value_at(ms(150))));
    }

    #[test]
    fn cancel_and_hold() {
        let gain = GainParam::new(1.0);
        gain.set_value_at(1.0, ms(0));
        gain.linear_ramp_to(0.0, ms(100));

        assert!(close(0.5, gain.hold_at(ms(50))));
        assert!(close(0.5, gain.value_at(ms(1000))));

        gain.linear_ramp_to(0.0, ms(150));
        assert!(close(0.25, gain.value_at(ms(100))));

        gain.cancel_scheduled(ms(50));
        assert!(close(1.0, gain.value_at(ms(1000))));
    }

    #[test]
    fn hold_cuts_running_curve() {
        let gain = GainParam::new(0.0);
        let fade_in = equal_power_curve(true, EQUAL_POWER_STEPS, 0.3);
        gain.set_value_curve_at(&fade_in, ms(2000), ms(300));
        let before = gain.value_at(ms(2049));

        let held = gain.hold_at(ms(2050));
        assert!(held > before);
        assert!(close(held, gain.value_at(ms(2050))));
        assert!(close(held, gain.value_at(ms(3000))));

        // Elapsed part of the curve is unchanged.
        assert!(close(before, gain.value_at(ms(2049))));

        let fade_out = equal_power_curve(false, EQUAL_POWER_STEPS, held);
        gain.set_value_curve_at(&fade_out, ms(2050), ms(100));
        let mut previous = held;
        for t in (2050..=2150).step_by(5) {
            let value = gain.value_at(ms(t));
            assert!(value <= previous + 1e-6, "gain rose at {t}ms");
            previous = value;
        }
        assert!(close(0.0, gain.value_at(ms(2150))));
        assert!(close(0.0, gain.value_at(ms(2300))));
    }

    #[test]
    fn cancel_stops_running_curve() {
        let gain = GainParam::new(0.0);
        gain.set_value_curve_at(&[0.0, 1.0], ms(0), ms(100));

        gain.cancel_scheduled(ms(40));
        assert!(close(0.2, gain.value_at(ms(20))));
        assert!(close(0.4, gain.value_at(ms(40))));
        assert!(close(0.4, gain.value_at(ms(90))));
    }

    #[test]
    fn equal_power_keeps_loudness() {
        let target = 0.3;
        let fade_in = equal_power_curve(true, EQUAL_POWER_STEPS, target);
        let fade_out = equal_power_curve(false, EQUAL_POWER_STEPS, target);

        assert_eq!(EQUAL_POWER_STEPS, fade_in.len());
        assert!(close(0.0, fade_in[0]));
        assert!(close(target, fade_in[EQUAL_POWER_STEPS - 1]));
        assert!(close(target, fade_out[0]));
        assert!(close(0.0, fade_out[EQUAL_POWER_STEPS - 1]));
        for (a, b) in fade_in.iter().zip(fade_out.iter()) {
            assert!(close(target * target, a * a + b * b));
        }
    }
}
