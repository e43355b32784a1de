use noteflow_domain_track::{weigh_notes, MidiEvent, MidiEventKind, NoteWeights};
use noteflow_ports::types::Seconds;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A press earns this share of a note's points, the release the rest.
const PRESS_SHARE: f64 = 0.5;
const RELEASE_SHARE: f64 = 0.5;

/// Upper bounds of |delta| per tier, in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimingWindows {
    pub perfect: Seconds,
    pub great: Seconds,
    pub good: Seconds,
    pub poor: Seconds,
}

impl Default for TimingWindows {
    fn default() -> Self {
        Self {
            perfect: 0.15,
            great: 0.30,
            good: 0.45,
            poor: 0.60,
        }
    }
}

impl TimingWindows {
    pub fn classify(&self, delta: Seconds) -> Accuracy {
        let delta = delta.abs();
        if delta <= self.perfect {
            Accuracy::Perfect
        } else if delta <= self.great {
            Accuracy::Great
        } else if delta <= self.good {
            Accuracy::Good
        } else if delta <= self.poor {
            Accuracy::Poor
        } else {
            Accuracy::Miss
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JudgeConfig {
    pub windows: TimingWindows,
    /// Releases holding less than this fraction of the note break the combo.
    pub min_hold_ratio: f64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            windows: TimingWindows::default(),
            min_hold_ratio: 0.8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Accuracy {
    Perfect,
    Great,
    Good,
    Poor,
    Miss,
}

impl Accuracy {
    pub fn multiplier(self) -> f64 {
        match self {
            Accuracy::Perfect => 1.0,
            Accuracy::Great => 0.8,
            Accuracy::Good => 0.5,
            Accuracy::Poor => 0.2,
            Accuracy::Miss => 0.0,
        }
    }

    /// GOOD or better.
    pub fn keeps_combo(self) -> bool {
        self.multiplier() > Accuracy::Poor.multiplier()
    }

    pub fn label(self) -> &'static str {
        match self {
            Accuracy::Perfect => "PERFECT",
            Accuracy::Great => "GREAT",
            Accuracy::Good => "GOOD",
            Accuracy::Poor => "POOR",
            Accuracy::Miss => "MISS",
        }
    }
}

/// A note pressed in time and still held, awaiting its release judgment.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActiveHit {
    pub start_time: Seconds,
    pub note: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub perfect: u32,
    pub great: u32,
    pub good: u32,
    pub poor: u32,
    pub miss: u32,
}

impl TierCounts {
    fn record(&mut self, accuracy: Accuracy) {
        match accuracy {
            Accuracy::Perfect => self.perfect += 1,
            Accuracy::Great => self.great += 1,
            Accuracy::Good => self.good += 1,
            Accuracy::Poor => self.poor += 1,
            Accuracy::Miss => self.miss += 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum JudgeEvent {
    Press {
        event_index: usize,
        note: u8,
        accuracy: Accuracy,
        delta: Seconds,
        points: f64,
    },
    /// A press that matched no expected note of that pitch.
    Unmatched { note: u8, time: Seconds },
    Release {
        event_index: usize,
        note: u8,
        accuracy: Accuracy,
        delta: Seconds,
        hold_ratio: f64,
        points: f64,
    },
    Miss { event_index: usize, note: u8 },
    Stats {
        score: f64,
        combo: u32,
        max_combo: u32,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub score: f64,
    pub combo: u32,
    pub max_combo: u32,
    pub last_accuracy: Option<Accuracy>,
    pub counts: TierCounts,
}

#[derive(Default, Debug)]
struct StatsState {
    score: f64,
    combo: u32,
    max_combo: u32,
    last_accuracy: Option<Accuracy>,
    counts: TierCounts,
}

/// Matches live presses and releases against a track's expected events.
///
/// `events` must be sorted by time, as produced by `parse_events`.
pub struct Judge {
    cfg: JudgeConfig,
    events: Vec<MidiEvent>,
    weights: NoteWeights,
    processed: HashSet<usize>,
    active_hits: BTreeMap<usize, ActiveHit>,
    miss_cursor: usize,
    stats: StatsState,
}

impl Judge {
    pub fn new(cfg: JudgeConfig) -> Self {
        Self {
            cfg,
            events: Vec::new(),
            weights: NoteWeights::new(),
            processed: HashSet::new(),
            active_hits: BTreeMap::new(),
            miss_cursor: 0,
            stats: StatsState::default(),
        }
    }

    /// Loads a track, weighting it with `weigh_notes`.
    pub fn load_track(&mut self, events: Vec<MidiEvent>) -> Vec<JudgeEvent> {
        let weights = weigh_notes(&events);
        self.load_weighted(events, weights)
    }

    pub fn load_weighted(&mut self, events: Vec<MidiEvent>, weights: NoteWeights) -> Vec<JudgeEvent> {
        self.events = events;
        self.weights = weights;
        self.reset();
        vec![self.stats_event()]
    }

    pub fn reset(&mut self) {
        self.processed.clear();
        self.active_hits.clear();
        self.miss_cursor = 0;
        self.stats = StatsState::default();
    }

    pub fn on_press(&mut self, note: u8, time: Seconds) -> Vec<JudgeEvent> {
        if !time.is_finite() || time < 0.0 {
            return Vec::new();
        }

        let mut events = Vec::new();
        let Some((event_index, delta)) = self.closest_unprocessed(note, time) else {
            self.stats.combo = 0;
            events.push(JudgeEvent::Unmatched { note, time });
            events.push(self.stats_event());
            return events;
        };

        self.processed.insert(event_index);
        let accuracy = self.cfg.windows.classify(delta);
        let points = self.weight(event_index) * accuracy.multiplier() * PRESS_SHARE;

        self.stats.score += points;
        self.stats.last_accuracy = Some(accuracy);
        self.stats.counts.record(accuracy);
        if accuracy.keeps_combo() {
            self.stats.combo += 1;
            self.stats.max_combo = self.stats.max_combo.max(self.stats.combo);
            self.active_hits.insert(
                event_index,
                ActiveHit {
                    start_time: time,
                    note,
                },
            );
        } else {
            self.stats.combo = 0;
        }

        events.push(JudgeEvent::Press {
            event_index,
            note,
            accuracy,
            delta,
            points,
        });
        events.push(self.stats_event());
        events
    }

    pub fn on_release(&mut self, note: u8, time: Seconds) -> Vec<JudgeEvent> {
        let Some((event_index, hit)) = self
            .active_hits
            .iter()
            .find(|(_, hit)| hit.note == note)
            .map(|(idx, hit)| (*idx, *hit))
        else {
            return Vec::new();
        };
        self.active_hits.remove(&event_index);

        let note_on = self.events[event_index];
        let Some(note_off) = self.events[event_index + 1..]
            .iter()
            .find(|e| e.kind == MidiEventKind::NoteOff && e.note == note)
            .copied()
        else {
            return Vec::new();
        };

        let delta = (time - note_off.time).abs();
        let accuracy = self.cfg.windows.classify(delta);
        let expected = note_off.time - note_on.time;
        let held = time - hit.start_time;
        let hold_ratio = if expected > 0.0 {
            (held / expected).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let points =
            self.weight(event_index) * accuracy.multiplier() * RELEASE_SHARE * hold_ratio;

        self.stats.score += points;
        if hold_ratio < self.cfg.min_hold_ratio {
            self.stats.combo = 0;
        }

        vec![
            JudgeEvent::Release {
                event_index,
                note,
                accuracy,
                delta,
                hold_ratio,
                points,
            },
            self.stats_event(),
        ]
    }

    /// Resolves every note whose window closed before `now` as a miss.
    pub fn advance_to(&mut self, now: Seconds) -> Vec<JudgeEvent> {
        let poor = self.cfg.windows.poor;
        let mut events = Vec::new();

        while let Some(event) = self.events.get(self.miss_cursor) {
            if event.time + poor >= now {
                break;
            }
            if event.is_note_on() && self.processed.insert(self.miss_cursor) {
                self.stats.combo = 0;
                self.stats.last_accuracy = Some(Accuracy::Miss);
                self.stats.counts.record(Accuracy::Miss);
                events.push(JudgeEvent::Miss {
                    event_index: self.miss_cursor,
                    note: event.note,
                });
            }
            self.miss_cursor += 1;
        }

        if !events.is_empty() {
            events.push(self.stats_event());
        }
        events
    }

    /// Closes the run at `end`: held notes are released there and every note
    /// still unjudged becomes a miss. Afterwards `is_complete` holds.
    pub fn settle(&mut self, end: Seconds) -> Vec<JudgeEvent> {
        let held: Vec<u8> = self.active_hits.values().map(|hit| hit.note).collect();
        let mut events = Vec::new();
        for note in held {
            events.extend(self.on_release(note, end));
        }
        // stale hits without a matching NoteOff
        self.active_hits.clear();
        events.extend(self.advance_to(f64::INFINITY));
        events
    }

    pub fn snapshot(&self) -> ScoreSnapshot {
        ScoreSnapshot {
            score: self.stats.score,
            combo: self.stats.combo,
            max_combo: self.stats.max_combo,
            last_accuracy: self.stats.last_accuracy,
            counts: self.stats.counts,
        }
    }

    pub fn score(&self) -> f64 {
        self.stats.score
    }

    pub fn combo(&self) -> u32 {
        self.stats.combo
    }

    pub fn max_combo(&self) -> u32 {
        self.stats.max_combo
    }

    pub fn last_accuracy(&self) -> Option<Accuracy> {
        self.stats.last_accuracy
    }

    pub fn is_processed(&self, event_index: usize) -> bool {
        self.processed.contains(&event_index)
    }

    pub fn active_hits(&self) -> &BTreeMap<usize, ActiveHit> {
        &self.active_hits
    }

    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    pub fn weight(&self, event_index: usize) -> f64 {
        self.weights.get(&event_index).copied().unwrap_or(0.0)
    }

    /// Every expected note has been judged and nothing is held.
    pub fn is_complete(&self) -> bool {
        self.active_hits.is_empty()
            && self
                .events
                .iter()
                .enumerate()
                .all(|(idx, e)| !e.is_note_on() || self.processed.contains(&idx))
    }

    fn closest_unprocessed(&self, note: u8, time: Seconds) -> Option<(usize, Seconds)> {
        let poor = self.cfg.windows.poor;
        // slack so the exact |delta| check below decides the boundary
        let earliest = time - poor - 1e-9;
        let start = self.events.partition_point(|e| e.time < earliest);

        let mut best: Option<(usize, Seconds)> = None;
        for (offset, event) in self.events[start..].iter().enumerate() {
            if event.time > time + poor + 1e-9 {
                break;
            }
            let idx = start + offset;
            if !event.is_note_on() || event.note != note || self.processed.contains(&idx) {
                continue;
            }
            let delta = (time - event.time).abs();
            if delta > poor {
                continue;
            }
            if best.map_or(true, |(_, best_delta)| delta < best_delta) {
                best = Some((idx, delta));
            }
        }
        best
    }

    fn stats_event(&self) -> JudgeEvent {
        JudgeEvent::Stats {
            score: self.stats.score,
            combo: self.stats.combo,
            max_combo: self.stats.max_combo,
        }
    }
}
