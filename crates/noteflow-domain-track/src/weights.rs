use crate::model::MidiEvent;
use std::collections::HashMap;

/// Points per NoteOn event, keyed by index into the event slice.
pub type NoteWeights = HashMap<usize, f64>;

pub const TOTAL_POINTS: f64 = 100.0;
const CHORD_BONUS_PER_NOTE: f64 = 0.1;

/// Distributes 100 points over the NoteOn events, boosting chord members.
///
/// Notes form a chord only when their onset times are bitwise equal.
pub fn weigh_notes(events: &[MidiEvent]) -> NoteWeights {
    let mut chord_sizes: HashMap<u64, usize> = HashMap::new();
    for event in events.iter().filter(|e| e.is_note_on()) {
        *chord_sizes.entry(onset_key(event)).or_default() += 1;
    }

    let raw: Vec<(usize, f64)> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_note_on())
        .map(|(idx, e)| {
            let size = chord_sizes.get(&onset_key(e)).copied().unwrap_or(1);
            (idx, 1.0 + (size - 1) as f64 * CHORD_BONUS_PER_NOTE)
        })
        .collect();

    let total: f64 = raw.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return NoteWeights::new();
    }

    raw.into_iter()
        .map(|(idx, weight)| (idx, weight * TOTAL_POINTS / total))
        .collect()
}

fn onset_key(event: &MidiEvent) -> u64 {
    // +0.0 folds -0.0 into 0.0
    (event.time + 0.0).to_bits()
}
