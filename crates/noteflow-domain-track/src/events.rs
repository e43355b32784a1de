use crate::model::{
    is_black_key, InstrumentFilter, MidiEvent, MidiEventKind, MidiFile, NoteRange, NoteSpan,
};
use noteflow_ports::types::Seconds;

/// Flattens the matching tracks into one time-sorted NoteOn/NoteOff sequence.
///
/// Notes without a positive duration are skipped. Ties keep the order in which
/// the events were produced (tracks in file order, notes in track order).
pub fn parse_events(file: &MidiFile, filter: InstrumentFilter) -> Vec<MidiEvent> {
    let mut events = Vec::new();
    for track in file
        .tracks
        .iter()
        .filter(|track| filter.matches(track.instrument.family))
    {
        for note in &track.notes {
            if !(note.duration > 0.0) {
                continue;
            }
            events.push(MidiEvent::note_on(note.time, note.midi, note.velocity));
            events.push(MidiEvent::note_off(note.time + note.duration, note.midi));
        }
    }
    // stable: equal times keep encounter order
    events.sort_by(|a, b| a.time.total_cmp(&b.time));
    events
}

/// Pairs NoteOn/NoteOff events into spans, one open note per pitch.
///
/// A NoteOn on an already open pitch replaces the earlier open note, which is
/// dropped. A NoteOff without an open note is ignored.
pub fn build_spans(events: &[MidiEvent]) -> Vec<NoteSpan> {
    let mut open: [Option<(Seconds, f32)>; 128] = [None; 128];
    let mut spans = Vec::new();

    for event in events {
        let idx = (event.note & 0x7F) as usize;
        match event.kind {
            MidiEventKind::NoteOn => open[idx] = Some((event.time, event.velocity)),
            MidiEventKind::NoteOff => {
                let Some((start_time, velocity)) = open[idx].take() else {
                    continue;
                };
                let duration = event.time - start_time;
                if duration > 0.0 {
                    spans.push(NoteSpan {
                        id: span_id(event.note, start_time),
                        note: event.note,
                        start_time,
                        duration,
                        velocity,
                        is_black: is_black_key(event.note),
                    });
                }
            }
        }
    }

    spans.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    spans
}

pub fn note_range(events: &[MidiEvent]) -> Option<NoteRange> {
    let first = events.first()?.note;
    let (min, max) = events
        .iter()
        .fold((first, first), |(min, max), e| (min.min(e.note), max.max(e.note)));
    Some(NoteRange { min, max })
}

fn span_id(note: u8, start_time: Seconds) -> String {
    format!("{note}-{start_time}")
}
