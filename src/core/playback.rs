//! Playback controller: Stopped ↔ Playing.
//!
//! Ticks are polled against a caller-supplied clock; the controller never
//! spawns threads and knows nothing about rendering.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
}

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("Invalid state transition: cannot {action} while {state:?}")]
    InvalidState { state: PlaybackState, action: String },
}

#[derive(Debug, Clone)]
pub struct PlaybackController {
    state: PlaybackState,
    interval: Duration,
    next_tick: Option<Instant>,
}

impl PlaybackController {
    pub fn new(interval: Duration) -> Self {
        Self {
            state: PlaybackState::Stopped,
            interval,
            next_tick: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start ticking; the first tick is due one interval after `now`.
    pub fn play(&mut self, now: Instant) -> Result<(), PlaybackError> {
        if self.state != PlaybackState::Stopped {
            return Err(PlaybackError::InvalidState {
                state: self.state,
                action: "play".into(),
            });
        }
        self.state = PlaybackState::Playing;
        self.next_tick = Some(now + self.interval);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), PlaybackError> {
        if self.state != PlaybackState::Playing {
            return Err(PlaybackError::InvalidState {
                state: self.state,
                action: "pause".into(),
            });
        }
        self.state = PlaybackState::Stopped;
        self.next_tick = None;
        Ok(())
    }

    /// Returns true when a tick is due at `now` and schedules the next one.
    ///
    /// At most one tick fires per poll. If the caller fell behind by more
    /// than an interval, the schedule restarts from `now` instead of
    /// bursting through missed ticks.
    pub fn poll(&mut self, now: Instant) -> bool {
        let Some(due) = self.next_tick else {
            return false;
        };
        if now < due {
            return false;
        }
        let next = due + self.interval;
        self.next_tick = Some(if next <= now { now + self.interval } else { next });
        true
    }

    /// Time left until the next tick, if playing.
    pub fn time_until_tick(&self, now: Instant) -> Option<Duration> {
        self.next_tick.map(|due| due.saturating_duration_since(now))
    }
}
