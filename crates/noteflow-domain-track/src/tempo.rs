use crate::model::{Tick, TempoPoint};
use noteflow_ports::types::Seconds;

const DEFAULT_US_PER_QUARTER: u32 = 500_000;

#[derive(Clone, Debug)]
pub struct TempoMap {
    ppq: u16,
    segments: Vec<TempoSegment>,
}

#[derive(Clone, Copy, Debug)]
struct TempoSegment {
    start_tick: Tick,
    start_seconds: Seconds,
    us_per_quarter: u32,
}

impl TempoMap {
    pub fn new(ppq: u16, mut points: Vec<TempoPoint>) -> Self {
        let ppq = ppq.max(1);
        points.sort_by_key(|p| p.tick);
        if points.is_empty() || points[0].tick > 0 {
            points.insert(
                0,
                TempoPoint {
                    tick: 0,
                    us_per_quarter: DEFAULT_US_PER_QUARTER,
                },
            );
        }

        let mut segments: Vec<TempoSegment> = Vec::with_capacity(points.len());
        for point in &points {
            let start_seconds = match segments.last() {
                Some(prev) => {
                    prev.start_seconds
                        + ticks_to_seconds(
                            (point.tick - prev.start_tick) as f64,
                            prev.us_per_quarter,
                            ppq,
                        )
                }
                None => 0.0,
            };
            segments.push(TempoSegment {
                start_tick: point.tick,
                start_seconds,
                us_per_quarter: point.us_per_quarter.max(1),
            });
        }

        Self { ppq, segments }
    }

    /// A constant-tempo map, used for SMPTE-timed files.
    pub fn constant(ppq: u16, us_per_quarter: u32) -> Self {
        Self::new(
            ppq,
            vec![TempoPoint {
                tick: 0,
                us_per_quarter,
            }],
        )
    }

    pub fn ppq(&self) -> u16 {
        self.ppq
    }

    pub fn points(&self) -> Vec<TempoPoint> {
        self.segments
            .iter()
            .map(|seg| TempoPoint {
                tick: seg.start_tick,
                us_per_quarter: seg.us_per_quarter,
            })
            .collect()
    }

    pub fn ticks_to_seconds(&self, ticks: f64) -> Seconds {
        let seg = self.segment_for_tick(ticks);
        let delta_ticks = ticks - seg.start_tick as f64;
        seg.start_seconds + ticks_to_seconds(delta_ticks, seg.us_per_quarter, self.ppq)
    }

    fn segment_for_tick(&self, ticks: f64) -> TempoSegment {
        let mut current = self.segments[0];
        for seg in &self.segments {
            if seg.start_tick as f64 > ticks {
                break;
            }
            current = *seg;
        }
        current
    }
}

fn ticks_to_seconds(ticks: f64, us_per_quarter: u32, ppq: u16) -> Seconds {
    ticks * us_per_quarter as f64 / ppq as f64 / 1_000_000.0
}
