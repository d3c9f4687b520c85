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
use std::time::Duration;

use duration_string::DurationString;
use serde::Deserialize;

use super::ConfigError;
use crate::drones::DroneTiming;
use crate::trial::TrainerTiming;

/// Parses an optional duration string, falling back to the given default.
fn duration_or(
    field: &'static str,
    value: &Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        Some(value) => Ok(DurationString::from_string(value.clone())
            .map_err(|e| ConfigError::Duration {
                field,
                reason: e.to_string(),
            })?
            .into()),
        None => Ok(default),
    }
}

/// A YAML representation of the trial timing.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Timing {
    /// How long feedback is shown after a correct answer.
    correct_feedback: Option<String>,
    /// How long feedback is shown after an incorrect answer.
    incorrect_feedback: Option<String>,
    /// Extra delay before the next trial starts.
    next_trial_delay: Option<String>,
    /// The fade applied to the trial tone once answered.
    fade: Option<String>,
}

impl Timing {
    pub fn to_trainer_timing(&self) -> Result<TrainerTiming, ConfigError> {
        let defaults = TrainerTiming::default();
        Ok(TrainerTiming {
            correct_feedback: duration_or(
                "correct_feedback",
                &self.correct_feedback,
                defaults.correct_feedback,
            )?,
            incorrect_feedback: duration_or(
                "incorrect_feedback",
                &self.incorrect_feedback,
                defaults.incorrect_feedback,
            )?,
            next_trial_delay: duration_or(
                "next_trial_delay",
                &self.next_trial_delay,
                defaults.next_trial_delay,
            )?,
            fade: duration_or("fade", &self.fade, defaults.fade)?,
        })
    }
}

/// A YAML representation of the drone settings.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Drones {
    /// How long after a voice starts its crossfade begins.
    crossfade_start: Option<String>,
    crossfade_duration: Option<String>,
    /// Where in the sample the incoming instance starts.
    restart_offset: Option<String>,
    /// The gain of a single drone, in dB.
    base_gain_db: Option<f32>,
}

impl Drones {
    pub fn to_drone_timing(&self) -> Result<DroneTiming, ConfigError> {
        let defaults = DroneTiming::default();
        let timing = DroneTiming {
            crossfade_start: duration_or(
                "crossfade_start",
                &self.crossfade_start,
                defaults.crossfade_start,
            )?,
            crossfade_duration: duration_or(
                "crossfade_duration",
                &self.crossfade_duration,
                defaults.crossfade_duration,
            )?,
            restart_offset: duration_or(
                "restart_offset",
                &self.restart_offset,
                defaults.restart_offset,
            )?,
            base_gain_db: self.base_gain_db.unwrap_or(defaults.base_gain_db),
        };

        if timing.crossfade_start.is_zero() {
            return Err(ConfigError::Invalid(
                "drones.crossfade_start must be greater than zero".to_string(),
            ));
        }
        if timing.crossfade_duration > timing.crossfade_start {
            return Err(ConfigError::Invalid(
                "drones.crossfade_duration must not exceed drones.crossfade_start".to_string(),
            ));
        }
        Ok(timing)
    }
}
