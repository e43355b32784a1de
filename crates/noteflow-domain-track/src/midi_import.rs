use crate::model::{
    Instrument, InstrumentFamily, MidiFile, MidiHeader, MidiNote, MidiTrack, TempoPoint, Tick,
    TimeSignature,
};
use crate::tempo::TempoMap;
use midly::{Fps, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum MidiImportError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Notes collected for one channel of one SMF track.
#[derive(Default)]
struct ChannelNotes {
    program: Option<u8>,
    open: HashMap<u8, VecDeque<(Tick, u8)>>,
    notes: Vec<PendingNote>,
}

struct PendingNote {
    key: u8,
    velocity: u8,
    start: Tick,
    end: Tick,
}

impl ChannelNotes {
    fn open(&mut self, key: u8, velocity: u8, tick: Tick) {
        self.open.entry(key).or_default().push_back((tick, velocity));
    }

    // FIFO: the oldest sounding note of this key ends first.
    fn close(&mut self, key: u8, tick: Tick) {
        let Some((start, velocity)) = self.open.get_mut(&key).and_then(|q| q.pop_front()) else {
            return;
        };
        self.notes.push(PendingNote {
            key,
            velocity,
            start,
            end: tick,
        });
    }
}

pub fn import_midi_path(path: &Path) -> Result<MidiFile, MidiImportError> {
    let data = std::fs::read(path).map_err(|e| MidiImportError::Io(e.to_string()))?;
    import_midi_bytes(&data)
}

pub fn import_midi_bytes(data: &[u8]) -> Result<MidiFile, MidiImportError> {
    let smf = Smf::parse(data).map_err(|e| MidiImportError::Parse(e.to_string()))?;
    let (ppq, tempo_override) = match smf.header.timing {
        Timing::Metrical(ticks) => (ticks.as_int().max(1), None),
        Timing::Timecode(fps, ticks_per_frame) => {
            let (ppq, us_per_quarter) = timecode_ppq_and_tempo(fps, ticks_per_frame);
            (ppq, Some(us_per_quarter))
        }
    };

    let mut tempo_points: BTreeMap<Tick, u32> = BTreeMap::new();
    let mut time_signatures: BTreeMap<Tick, TimeSignature> = BTreeMap::new();
    let mut collected: Vec<(String, u8, ChannelNotes)> = Vec::new();

    for track in &smf.tracks {
        let mut tick: Tick = 0;
        let mut name: Option<String> = None;
        let mut channels: BTreeMap<u8, ChannelNotes> = BTreeMap::new();

        for event in track {
            tick += event.delta.as_int() as Tick;
            match &event.kind {
                TrackEventKind::Midi { channel, message } => {
                    let state = channels.entry(channel.as_int()).or_default();
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            state.open(key.as_int(), vel.as_int(), tick);
                        }
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            state.close(key.as_int(), tick);
                        }
                        MidiMessage::ProgramChange { program } => {
                            if state.program.is_none() {
                                state.program = Some(program.as_int());
                            }
                        }
                        _ => {}
                    }
                }
                TrackEventKind::Meta(MetaMessage::Tempo(us_per_quarter)) => {
                    tempo_points.insert(tick, us_per_quarter.as_int());
                }
                TrackEventKind::Meta(MetaMessage::TimeSignature(numerator, denom_pow, _, _)) => {
                    time_signatures.insert(
                        tick,
                        TimeSignature {
                            tick,
                            numerator: *numerator,
                            denominator: 1u32.checked_shl(*denom_pow as u32).unwrap_or(0),
                        },
                    );
                }
                TrackEventKind::Meta(MetaMessage::TrackName(raw)) => {
                    if name.is_none() {
                        name = Some(String::from_utf8_lossy(raw).trim().to_string());
                    }
                }
                _ => {}
            }
        }

        for (channel, notes) in channels {
            if !notes.notes.is_empty() {
                collected.push((name.clone().unwrap_or_default(), channel, notes));
            }
        }
    }

    let tempo_map = match tempo_override {
        Some(us_per_quarter) => TempoMap::constant(ppq, us_per_quarter),
        None => TempoMap::new(
            ppq,
            tempo_points
                .into_iter()
                .map(|(tick, us_per_quarter)| TempoPoint {
                    tick,
                    us_per_quarter,
                })
                .collect(),
        ),
    };

    let tracks: Vec<MidiTrack> = collected
        .into_iter()
        .map(|(name, channel, notes)| build_track(&tempo_map, name, channel, notes))
        .collect();

    let duration = tracks
        .iter()
        .flat_map(|track| track.notes.iter())
        .map(|note| note.time + note.duration)
        .fold(0.0_f64, f64::max);

    Ok(MidiFile {
        duration,
        header: MidiHeader {
            ppq,
            tempo_map,
            time_signatures: time_signatures.into_values().collect(),
        },
        tracks,
    })
}

fn build_track(tempo_map: &TempoMap, name: String, channel: u8, state: ChannelNotes) -> MidiTrack {
    let program = state.program.unwrap_or(0);
    let mut pending = state.notes;
    pending.sort_by(|a, b| a.start.cmp(&b.start).then(a.key.cmp(&b.key)));

    let notes = pending
        .into_iter()
        .map(|note| {
            let time = tempo_map.ticks_to_seconds(note.start as f64);
            let end = tempo_map.ticks_to_seconds(note.end as f64);
            MidiNote {
                midi: note.key,
                velocity: note.velocity as f32 / 127.0,
                ticks: note.start,
                duration_ticks: note.end - note.start,
                time,
                duration: end - time,
            }
        })
        .collect();

    MidiTrack {
        name,
        channel,
        instrument: Instrument {
            program,
            family: InstrumentFamily::from_program(program, channel),
        },
        notes,
    }
}

fn timecode_ppq_and_tempo(fps: Fps, ticks_per_frame: u8) -> (u16, u32) {
    let ticks_per_frame = ticks_per_frame.max(1) as u16;
    match fps {
        Fps::Fps24 => (24 * ticks_per_frame, 1_000_000),
        Fps::Fps25 => (25 * ticks_per_frame, 1_000_000),
        Fps::Fps30 => (30 * ticks_per_frame, 1_000_000),
        Fps::Fps29 => (30 * ticks_per_frame, 1_001_000),
    }
}
