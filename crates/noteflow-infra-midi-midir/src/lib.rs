use log::{debug, info};
use midir::{Ignore, MidiIO, MidiInput, MidiOutput};
use noteflow_ports::midi::{
    MidiError, MidiInputPort, MidiInputStream, MidiOutputConnection, MidiOutputPort,
    RawMidiCallback, RawMidiMessage,
};
use noteflow_ports::types::{DeviceId, MidiDevice};
use std::time::Instant;

fn device_id(index: usize, name: &str) -> DeviceId {
    DeviceId(format!("midir:{}:{}", index, name))
}

fn port_name<T: MidiIO>(io: &T, port: &T::Port, fallback: &str) -> String {
    io.port_name(port).unwrap_or_else(|_| fallback.to_string())
}

fn list_devices<T: MidiIO>(io: &T, fallback: &str) -> Vec<MidiDevice> {
    io.ports()
        .iter()
        .enumerate()
        .map(|(index, port)| {
            let name = port_name(io, port, fallback);
            MidiDevice {
                id: device_id(index, &name),
                name,
                manufacturer: None,
            }
        })
        .collect()
}

fn find_port<T: MidiIO>(io: &T, wanted: &DeviceId, fallback: &str) -> Option<T::Port> {
    io.ports().into_iter().enumerate().find_map(|(index, port)| {
        let name = port_name(io, &port, fallback);
        (device_id(index, &name) == *wanted).then_some(port)
    })
}

pub struct MidirMidiInputPort {
    client_name: String,
}

impl MidirMidiInputPort {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    fn create_midi_in(&self) -> Result<MidiInput, MidiError> {
        MidiInput::new(&self.client_name).map_err(|e| MidiError::Unsupported(e.to_string()))
    }
}

impl Default for MidirMidiInputPort {
    fn default() -> Self {
        Self::new("Noteflow")
    }
}

pub struct MidirMidiInputStream {
    connection: Option<midir::MidiInputConnection<RawMidiCallback>>,
}

impl MidiInputStream for MidirMidiInputStream {
    fn close(mut self: Box<Self>) {
        if let Some(connection) = self.connection.take() {
            let _ = connection.close();
            debug!("midi input closed");
        }
    }
}

impl MidiInputPort for MidirMidiInputPort {
    fn list_inputs(&self) -> Result<Vec<MidiDevice>, MidiError> {
        let midi_in = self.create_midi_in()?;
        Ok(list_devices(&midi_in, "Unknown Input"))
    }

    fn open_input(
        &self,
        device_id: &DeviceId,
        cb: RawMidiCallback,
    ) -> Result<Box<dyn MidiInputStream>, MidiError> {
        let mut midi_in = self.create_midi_in()?;
        // sysex, clock and active sensing never reach the game
        midi_in.ignore(Ignore::All);

        let port = find_port(&midi_in, device_id, "Unknown Input")
            .ok_or_else(|| MidiError::DeviceNotFound(device_id.to_string()))?;

        let connection = midi_in
            .connect(
                &port,
                "noteflow-midi-input",
                move |_stamp, message, callback| {
                    (callback)(RawMidiMessage {
                        at: Instant::now(),
                        data: message.to_vec(),
                    });
                },
                cb,
            )
            .map_err(|e| MidiError::Backend(e.to_string()))?;
        info!("opened midi input {device_id}");

        Ok(Box::new(MidirMidiInputStream {
            connection: Some(connection),
        }))
    }
}

pub struct MidirMidiOutputPort {
    client_name: String,
}

impl MidirMidiOutputPort {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    fn create_midi_out(&self) -> Result<MidiOutput, MidiError> {
        MidiOutput::new(&self.client_name).map_err(|e| MidiError::Unsupported(e.to_string()))
    }
}

impl Default for MidirMidiOutputPort {
    fn default() -> Self {
        Self::new("Noteflow")
    }
}

pub struct MidirMidiOutputConnection {
    connection: midir::MidiOutputConnection,
}

impl MidiOutputConnection for MidirMidiOutputConnection {
    fn send(&mut self, bytes: &[u8]) -> Result<(), MidiError> {
        self.connection
            .send(bytes)
            .map_err(|e| MidiError::Backend(e.to_string()))
    }

    fn close(self: Box<Self>) {
        let _ = self.connection.close();
        debug!("midi output closed");
    }
}

impl MidiOutputPort for MidirMidiOutputPort {
    fn list_outputs(&self) -> Result<Vec<MidiDevice>, MidiError> {
        let midi_out = self.create_midi_out()?;
        Ok(list_devices(&midi_out, "Unknown Output"))
    }

    fn open_output(&self, device_id: &DeviceId) -> Result<Box<dyn MidiOutputConnection>, MidiError> {
        let midi_out = self.create_midi_out()?;
        let port = find_port(&midi_out, device_id, "Unknown Output")
            .ok_or_else(|| MidiError::DeviceNotFound(device_id.to_string()))?;

        let connection = midi_out
            .connect(&port, "noteflow-midi-output")
            .map_err(|e| MidiError::Backend(e.to_string()))?;
        info!("opened midi output {device_id}");

        Ok(Box::new(MidirMidiOutputConnection { connection }))
    }
}
