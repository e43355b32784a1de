use crate::model::{MidiHeader, TimeSignature};
use noteflow_ports::types::Seconds;

pub const MAX_BAR_LINES: usize = 5000;

/// Bar boundary timestamps up to `duration`.
///
/// Each time signature applies from its tick until the next one. Segments with
/// a non-positive or non-finite bar length contribute nothing.
pub fn bar_lines(header: &MidiHeader, duration: Seconds) -> Vec<Seconds> {
    let default_signature = [TimeSignature {
        tick: 0,
        numerator: 4,
        denominator: 4,
    }];
    let signatures: &[TimeSignature] = if header.time_signatures.is_empty() {
        &default_signature
    } else {
        &header.time_signatures
    };

    let ppq = header.ppq as f64;
    let mut lines = Vec::new();

    for (idx, signature) in signatures.iter().enumerate() {
        let ticks_per_bar =
            signature.numerator as f64 * ppq * 4.0 / signature.denominator as f64;
        if !ticks_per_bar.is_finite() || ticks_per_bar <= 0.0 {
            continue;
        }

        let segment_end = signatures
            .get(idx + 1)
            .map(|next| next.tick as f64)
            .unwrap_or(f64::INFINITY);

        let mut tick = signature.tick as f64;
        while tick < segment_end {
            let seconds = header.ticks_to_seconds(tick);
            if seconds > duration {
                return lines;
            }
            lines.push(seconds);
            if lines.len() >= MAX_BAR_LINES {
                return lines;
            }
            tick += ticks_per_bar;
        }
    }

    lines
}
