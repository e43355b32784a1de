use crate::types::*;
use serde::{Deserialize, Serialize};

fn default_instrument_filter() -> String {
    "piano".to_string()
}

fn default_lead_in_seconds() -> f64 {
    4.0
}

fn default_speed() -> f64 {
    1.0
}

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsDto {
    pub selected_midi_in: Option<DeviceId>,
    pub selected_midi_out: Option<DeviceId>,
    /// Instrument family name, or "any".
    #[serde(default = "default_instrument_filter")]
    pub instrument_filter: String,
    #[serde(default = "default_lead_in_seconds")]
    pub lead_in_seconds: f64,
    #[serde(default = "default_speed")]
    pub default_speed: f64,
    pub input_offset_ms: i32,
}

impl Default for SettingsDto {
    fn default() -> Self {
        Self {
            selected_midi_in: None,
            selected_midi_out: None,
            instrument_filter: default_instrument_filter(),
            lead_in_seconds: default_lead_in_seconds(),
            default_speed: default_speed(),
            input_offset_ms: 0,
        }
    }
}

/// Best results stored per track.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreRecord {
    pub high_score: f64,
    pub best_combo: u32,
}

pub trait StoragePort: Send + Sync {
    fn load_settings(&self) -> Result<SettingsDto, StorageError>;
    fn save_settings(&self, s: &SettingsDto) -> Result<(), StorageError>;
}

/// Absent records load as `ScoreRecord::default()`.
pub trait ScoreStoragePort: Send + Sync {
    fn load_record(&self, track_id: &TrackId) -> Result<ScoreRecord, StorageError>;
    fn save_record(&self, track_id: &TrackId, record: &ScoreRecord) -> Result<(), StorageError>;
}
