use noteflow_domain_eval::TierCounts;
use noteflow_ports::types::{DeviceId, TrackId};
use serde::{Deserialize, Serialize};

/// Outcome of one completed playthrough.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    pub track_id: TrackId,
    pub score: f64,
    pub max_combo: u32,
    pub counts: TierCounts,
    pub new_high_score: bool,
}

/// Choices that outlive a single playthrough.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub midi_input: Option<DeviceId>,
    pub track: Option<TrackId>,
    pub last_result: Option<SessionResult>,
}
