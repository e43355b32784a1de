use crate::selection::SessionResult;
use noteflow_domain_eval::Accuracy;
use noteflow_domain_track::{NoteRange, NoteSpan};
use noteflow_ports::storage::SettingsDto;
use noteflow_ports::types::{DeviceId, MidiDevice, Seconds, TrackId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Command {
    ListMidiInputs,
    SelectMidiInput { device_id: DeviceId },
    ListMidiOutputs,
    SelectMidiOutput { device_id: DeviceId },
    LoadTrack { track_id: TrackId, path: String },
    Play,
    Pause,
    Stop,
    SetSpeed { speed: f64 },
    SetLeadIn { seconds: f64 },
    SetInstrumentFilter { filter: String },
    SetInputOffsetMs { ms: i32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Ready,
    Running,
    Paused,
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JudgeKind {
    Press,
    Release,
    Miss,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    MidiInputsUpdated { devices: Vec<MidiDevice> },
    MidiOutputsUpdated { devices: Vec<MidiDevice> },
    SessionStateUpdated { state: SessionState, settings: SettingsDto },
    TrackLoaded {
        track_id: TrackId,
        duration: Seconds,
        spans: Vec<NoteSpan>,
        bar_lines: Vec<Seconds>,
        note_range: Option<NoteRange>,
    },
    ClockUpdated {
        current_time: Seconds,
        playing: bool,
        speed: f64,
    },
    Countdown { remaining: u32, label: Option<String> },
    Judged {
        kind: JudgeKind,
        note: u8,
        accuracy: Accuracy,
        delta: Seconds,
        points: f64,
    },
    ScoreUpdated {
        score: f64,
        combo: u32,
        max_combo: u32,
        last_accuracy: Option<Accuracy>,
    },
    HeldNotesUpdated { notes: Vec<u8> },
    SessionFinished { result: SessionResult },
}
