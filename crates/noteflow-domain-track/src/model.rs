use crate::tempo::TempoMap;
use noteflow_ports::types::Seconds;
use serde::{Deserialize, Serialize};

pub type Tick = i64; // musical time, monotonic within a file

/// General MIDI instrument family, plus `Drums` for the percussion channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentFamily {
    Piano,
    ChromaticPercussion,
    Organ,
    Guitar,
    Bass,
    Strings,
    Ensemble,
    Brass,
    Reed,
    Pipe,
    SynthLead,
    SynthPad,
    SynthEffects,
    World,
    Percussion,
    SoundEffects,
    Drums,
}

const GM_FAMILIES: [InstrumentFamily; 16] = [
    InstrumentFamily::Piano,
    InstrumentFamily::ChromaticPercussion,
    InstrumentFamily::Organ,
    InstrumentFamily::Guitar,
    InstrumentFamily::Bass,
    InstrumentFamily::Strings,
    InstrumentFamily::Ensemble,
    InstrumentFamily::Brass,
    InstrumentFamily::Reed,
    InstrumentFamily::Pipe,
    InstrumentFamily::SynthLead,
    InstrumentFamily::SynthPad,
    InstrumentFamily::SynthEffects,
    InstrumentFamily::World,
    InstrumentFamily::Percussion,
    InstrumentFamily::SoundEffects,
];

const PERCUSSION_CHANNEL: u8 = 9;

impl InstrumentFamily {
    pub fn from_program(program: u8, channel: u8) -> Self {
        if channel == PERCUSSION_CHANNEL {
            return InstrumentFamily::Drums;
        }
        GM_FAMILIES[(program & 0x7F) as usize / 8]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstrumentFamily::Piano => "piano",
            InstrumentFamily::ChromaticPercussion => "chromatic percussion",
            InstrumentFamily::Organ => "organ",
            InstrumentFamily::Guitar => "guitar",
            InstrumentFamily::Bass => "bass",
            InstrumentFamily::Strings => "strings",
            InstrumentFamily::Ensemble => "ensemble",
            InstrumentFamily::Brass => "brass",
            InstrumentFamily::Reed => "reed",
            InstrumentFamily::Pipe => "pipe",
            InstrumentFamily::SynthLead => "synth lead",
            InstrumentFamily::SynthPad => "synth pad",
            InstrumentFamily::SynthEffects => "synth effects",
            InstrumentFamily::World => "world",
            InstrumentFamily::Percussion => "percussion",
            InstrumentFamily::SoundEffects => "sound effects",
            InstrumentFamily::Drums => "drums",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        GM_FAMILIES
            .iter()
            .copied()
            .chain(std::iter::once(InstrumentFamily::Drums))
            .find(|family| family.as_str().eq_ignore_ascii_case(name))
    }
}

/// Which tracks of a file are playable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentFilter {
    Family(InstrumentFamily),
    Any,
}

impl InstrumentFilter {
    /// Accepts a family name or "any".
    pub fn parse(name: &str) -> Option<Self> {
        if name.trim().eq_ignore_ascii_case("any") {
            return Some(InstrumentFilter::Any);
        }
        InstrumentFamily::from_name(name).map(InstrumentFilter::Family)
    }

    pub fn matches(self, family: InstrumentFamily) -> bool {
        match self {
            InstrumentFilter::Family(wanted) => wanted == family,
            InstrumentFilter::Any => true,
        }
    }
}

impl Default for InstrumentFilter {
    fn default() -> Self {
        InstrumentFilter::Family(InstrumentFamily::Piano)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoPoint {
    pub tick: Tick,
    pub us_per_quarter: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub tick: Tick,
    pub numerator: u8,
    /// 0 when the encoded power of two does not fit.
    pub denominator: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub program: u8,
    pub family: InstrumentFamily,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MidiNote {
    pub midi: u8,
    /// 0..1
    pub velocity: f32,
    pub ticks: Tick,
    pub duration_ticks: Tick,
    pub time: Seconds,
    pub duration: Seconds,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MidiTrack {
    pub name: String,
    pub channel: u8,
    pub instrument: Instrument,
    pub notes: Vec<MidiNote>,
}

#[derive(Clone, Debug)]
pub struct MidiHeader {
    pub ppq: u16,
    pub tempo_map: TempoMap,
    pub time_signatures: Vec<TimeSignature>,
}

impl MidiHeader {
    pub fn ticks_to_seconds(&self, ticks: f64) -> Seconds {
        self.tempo_map.ticks_to_seconds(ticks)
    }
}

/// A decoded MIDI file: the raw material the track model is derived from.
#[derive(Clone, Debug)]
pub struct MidiFile {
    /// End of the last note, in seconds.
    pub duration: Seconds,
    pub header: MidiHeader,
    pub tracks: Vec<MidiTrack>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MidiEventKind {
    NoteOn,
    NoteOff,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MidiEvent {
    pub time: Seconds,
    pub kind: MidiEventKind,
    pub note: u8,
    /// 0..1
    pub velocity: f32,
}

impl MidiEvent {
    pub fn note_on(time: Seconds, note: u8, velocity: f32) -> Self {
        Self {
            time,
            kind: MidiEventKind::NoteOn,
            note,
            velocity,
        }
    }

    pub fn note_off(time: Seconds, note: u8) -> Self {
        Self {
            time,
            kind: MidiEventKind::NoteOff,
            note,
            velocity: 0.0,
        }
    }

    pub fn is_note_on(&self) -> bool {
        self.kind == MidiEventKind::NoteOn
    }
}

/// One sounding note laid out for rendering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoteSpan {
    pub id: String,
    pub note: u8,
    pub start_time: Seconds,
    pub duration: Seconds,
    pub velocity: f32,
    pub is_black: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteRange {
    pub min: u8,
    pub max: u8,
}

pub fn is_black_key(note: u8) -> bool {
    matches!(note % 12, 1 | 3 | 6 | 8 | 10)
}
