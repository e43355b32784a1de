use log::{debug, warn};
use noteflow_ports::time::TimeSource;
use noteflow_ports::types::Seconds;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Time source advanced by hand, for replays and tests.
#[derive(Default)]
pub struct ManualTimeSource {
    now_ms: Mutex<f64>,
}

impl ManualTimeSource {
    pub fn new(start_ms: f64) -> Self {
        Self {
            now_ms: Mutex::new(start_ms),
        }
    }

    pub fn advance(&self, ms: f64) {
        *self.now_ms.lock() += ms;
    }

    pub fn set(&self, ms: f64) {
        *self.now_ms.lock() = ms;
    }
}

impl TimeSource for ManualTimeSource {
    fn now_ms(&self) -> f64 {
        *self.now_ms.lock()
    }
}

/// Handle of the one frame the clock is waiting for.
///
/// Pausing, stopping or restarting the clock invalidates it, so a frame that
/// was already in flight is ignored when it finally arrives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameToken(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockState {
    Stopped,
    CountingDown,
    Playing,
    Paused,
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClockTick {
    pub current_time: Seconds,
    pub finished: bool,
}

/// Logical playback clock with a lead-in countdown and variable speed.
///
/// Time below zero always runs at 1x; from zero on it runs at `speed`. The
/// clock keeps an anchor on the wall clock and recomputes it on every resume
/// and speed change, so pause/resume cycles never accumulate drift.
pub struct PlaybackClock {
    time_source: Arc<dyn TimeSource>,
    initial_time: Seconds,
    duration: Seconds,
    current_time: Seconds,
    speed: f64,
    is_playing: bool,
    anchor_ms: f64,
    next_token: u64,
    pending_frame: Option<FrameToken>,
}

impl PlaybackClock {
    pub fn new(time_source: Arc<dyn TimeSource>, initial_time: Seconds, duration: Seconds) -> Self {
        Self {
            time_source,
            initial_time,
            duration,
            current_time: initial_time,
            speed: 1.0,
            is_playing: false,
            anchor_ms: 0.0,
            next_token: 0,
            pending_frame: None,
        }
    }

    /// Stops the clock and installs a new time range.
    pub fn configure(&mut self, initial_time: Seconds, duration: Seconds) {
        self.initial_time = initial_time;
        self.duration = duration;
        self.stop();
    }

    pub fn play(&mut self) -> Option<FrameToken> {
        if self.is_playing {
            return self.pending_frame;
        }
        let now = self.time_source.now_ms();
        self.anchor_ms = now - self.unscaled_ms(self.current_time);
        self.is_playing = true;
        debug!("clock play at {:.3}s (speed {})", self.current_time, self.speed);
        Some(self.schedule_frame())
    }

    pub fn pause(&mut self) {
        if !self.is_playing {
            return;
        }
        self.current_time = self.time_now();
        self.is_playing = false;
        self.pending_frame = None;
        debug!("clock paused at {:.3}s", self.current_time);
    }

    pub fn stop(&mut self) {
        self.is_playing = false;
        self.pending_frame = None;
        self.current_time = self.initial_time;
    }

    pub fn set_speed(&mut self, speed: f64) {
        if !speed.is_finite() || speed <= 0.0 {
            warn!("ignoring invalid playback speed {speed}");
            return;
        }
        if self.is_playing && self.current_time >= 0.0 {
            let now = self.time_source.now_ms();
            self.current_time = self.time_at(now);
            self.speed = speed;
            self.anchor_ms = now - self.unscaled_ms(self.current_time);
        } else {
            // the countdown ignores speed, so the anchor stays valid
            self.speed = speed;
        }
    }

    /// Delivers a scheduled frame. Returns the tick to report, or `None` for a
    /// stale token.
    pub fn on_frame(&mut self, token: FrameToken) -> Option<ClockTick> {
        if !self.is_playing || self.pending_frame != Some(token) {
            return None;
        }
        self.pending_frame = None;

        let time = self.time_at(self.time_source.now_ms());
        if time >= self.duration {
            self.current_time = self.duration;
            self.is_playing = false;
            debug!("clock finished at {:.3}s", self.duration);
            return Some(ClockTick {
                current_time: self.duration,
                finished: true,
            });
        }

        self.current_time = time;
        self.schedule_frame();
        Some(ClockTick {
            current_time: time,
            finished: false,
        })
    }

    /// Clock time at this wall-clock instant, between frames.
    pub fn time_now(&self) -> Seconds {
        if !self.is_playing {
            return self.current_time;
        }
        self.time_at(self.time_source.now_ms()).min(self.duration)
    }

    pub fn pending_frame(&self) -> Option<FrameToken> {
        self.pending_frame
    }

    pub fn current_time(&self) -> Seconds {
        self.current_time
    }

    pub fn initial_time(&self) -> Seconds {
        self.initial_time
    }

    pub fn duration(&self) -> Seconds {
        self.duration
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn state(&self) -> ClockState {
        if self.is_playing {
            if self.current_time < 0.0 {
                ClockState::CountingDown
            } else {
                ClockState::Playing
            }
        } else if self.current_time >= self.duration && self.duration > self.initial_time {
            ClockState::Finished
        } else if self.current_time == self.initial_time {
            ClockState::Stopped
        } else {
            ClockState::Paused
        }
    }

    pub fn is_countdown_active(&self) -> bool {
        self.is_playing && self.current_time < 0.0
    }

    pub fn countdown_remaining(&self) -> u32 {
        if self.is_countdown_active() {
            self.current_time.abs().ceil() as u32
        } else {
            0
        }
    }

    fn schedule_frame(&mut self) -> FrameToken {
        self.next_token += 1;
        let token = FrameToken(self.next_token);
        self.pending_frame = Some(token);
        token
    }

    fn unscaled_ms(&self, time: Seconds) -> f64 {
        if time < 0.0 {
            time * 1000.0
        } else {
            time * 1000.0 / self.speed
        }
    }

    fn time_at(&self, now_ms: f64) -> Seconds {
        let elapsed = (now_ms - self.anchor_ms) / 1000.0;
        let time = if elapsed < 0.0 {
            elapsed
        } else {
            elapsed * self.speed
        };
        // never run backwards, never before the lead-in start
        time.max(self.current_time).max(self.initial_time)
    }
}

/// Display label for a countdown value: 4 → "3", 3 → "2", 2 → "1", 1 → "GO!".
pub fn countdown_label(remaining: u32) -> Option<&'static str> {
    match remaining {
        4 => Some("3"),
        3 => Some("2"),
        2 => Some("1"),
        1 => Some("GO!"),
        _ => None,
    }
}
