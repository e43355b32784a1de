use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Instant;

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiveNoteKind {
    NoteOn,
    NoteOff,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LiveNoteEvent {
    pub kind: LiveNoteKind,
    pub note: u8,
    /// 0..1, always 0 for NoteOff
    pub velocity: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimedLiveEvent {
    pub at: Instant,
    pub event: LiveNoteEvent,
}

/// Decodes the Note-On/Note-Off subset of a channel message.
///
/// Channel bits are ignored. Note-On with velocity 0 is a Note-Off.
pub fn decode_message(data: &[u8]) -> Option<LiveNoteEvent> {
    if data.len() < 3 {
        return None;
    }
    let note = data[1] & 0x7F;
    let velocity = data[2] & 0x7F;
    match data[0] & 0xF0 {
        NOTE_ON if velocity > 0 => Some(LiveNoteEvent {
            kind: LiveNoteKind::NoteOn,
            note,
            velocity: velocity as f32 / 127.0,
        }),
        NOTE_ON | NOTE_OFF => Some(LiveNoteEvent {
            kind: LiveNoteKind::NoteOff,
            note,
            velocity: 0.0,
        }),
        _ => None,
    }
}

/// Orders a drained batch by arrival; events sharing an instant put note ends
/// before note starts so a re-struck key is released before it sounds again.
pub fn order_batch(batch: &mut [TimedLiveEvent]) {
    batch.sort_by(|a, b| {
        a.at.cmp(&b.at)
            .then_with(|| kind_rank(a.event.kind).cmp(&kind_rank(b.event.kind)))
    });
}

fn kind_rank(kind: LiveNoteKind) -> u8 {
    match kind {
        LiveNoteKind::NoteOff => 0,
        LiveNoteKind::NoteOn => 1,
    }
}

/// The set of keys currently held on the input device.
#[derive(Clone, Debug, Default)]
pub struct LiveNoteTracker {
    held: BTreeSet<u8>,
}

impl LiveNoteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: LiveNoteEvent) -> LiveNoteEvent {
        match event.kind {
            LiveNoteKind::NoteOn => {
                self.held.insert(event.note);
            }
            LiveNoteKind::NoteOff => {
                self.held.remove(&event.note);
            }
        }
        event
    }

    pub fn handle_message(&mut self, data: &[u8]) -> Option<LiveNoteEvent> {
        decode_message(data).map(|event| self.apply(event))
    }

    pub fn held_notes(&self) -> &BTreeSet<u8> {
        &self.held
    }

    pub fn is_held(&self, note: u8) -> bool {
        self.held.contains(&note)
    }

    pub fn clear(&mut self) {
        self.held.clear();
    }
}
