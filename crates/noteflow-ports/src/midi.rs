use crate::types::*;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Instant};

/// Raw bytes from a MIDI device, not decoded yet.
#[derive(Clone, Debug)]
pub struct RawMidiMessage {
    pub at: Instant,
    pub data: Vec<u8>,
}

/// Messages the core may send to an output device.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum OutgoingMessage {
    /// velocity: 0..1
    NoteOn { note: u8, velocity: f32 },
    NoteOff { note: u8 },
    /// CC123 on channel 1.
    AllNotesOff,
}

impl OutgoingMessage {
    pub fn to_bytes(self) -> [u8; 3] {
        match self {
            OutgoingMessage::NoteOn { note, velocity } => {
                let velocity = (velocity.clamp(0.0, 1.0) * 127.0).round() as u8;
                [0x90, note & 0x7F, velocity]
            }
            OutgoingMessage::NoteOff { note } => [0x80, note & 0x7F, 0],
            OutgoingMessage::AllNotesOff => [0xB0, 123, 0],
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MidiError {
    #[error("MIDI is not supported in this environment: {0}")]
    Unsupported(String),
    #[error("MIDI access denied: {0}")]
    AccessDenied(String),
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// MIDI input stream handle: closing it unsubscribes the callback.
pub trait MidiInputStream: Send {
    fn close(self: Box<Self>);
}

pub type RawMidiCallback = Arc<dyn Fn(RawMidiMessage) + Send + Sync + 'static>;

pub trait MidiInputPort: Send + Sync {
    fn list_inputs(&self) -> Result<Vec<MidiDevice>, MidiError>;

    /// Open input stream: implementation may invoke cb from a background thread.
    fn open_input(
        &self,
        device_id: &DeviceId,
        cb: RawMidiCallback,
    ) -> Result<Box<dyn MidiInputStream>, MidiError>;
}

pub trait MidiOutputConnection: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<(), MidiError>;

    fn send_message(&mut self, message: OutgoingMessage) -> Result<(), MidiError> {
        self.send(&message.to_bytes())
    }

    fn close(self: Box<Self>);
}

pub trait MidiOutputPort: Send + Sync {
    fn list_outputs(&self) -> Result<Vec<MidiDevice>, MidiError>;

    fn open_output(&self, device_id: &DeviceId) -> Result<Box<dyn MidiOutputConnection>, MidiError>;
}
