use midly::num::{u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use noteflow_core::{
    Command, Event, GameSession, JudgeKind, ManualTimeSource, SessionError, SessionResult,
    SessionState,
};
use noteflow_domain_eval::Accuracy;
use noteflow_domain_track::{
    Instrument, InstrumentFamily, MidiFile, MidiHeader, MidiNote, MidiTrack, TempoMap,
};
use noteflow_ports::midi::{
    MidiError, MidiInputPort, MidiInputStream, MidiOutputConnection, MidiOutputPort,
    RawMidiCallback, RawMidiMessage,
};
use noteflow_ports::storage::{
    ScoreRecord, ScoreStoragePort, SettingsDto, StorageError, StoragePort,
};
use noteflow_ports::types::{DeviceId, MidiDevice, TrackId};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone, Default)]
struct FakeMidiPort {
    callback: Arc<Mutex<Option<RawMidiCallback>>>,
}

struct FakeStream;

impl MidiInputStream for FakeStream {
    fn close(self: Box<Self>) {}
}

impl MidiInputPort for FakeMidiPort {
    fn list_inputs(&self) -> Result<Vec<MidiDevice>, MidiError> {
        Ok(vec![MidiDevice {
            id: DeviceId("keys".to_string()),
            name: "Test Keys".to_string(),
            manufacturer: None,
        }])
    }

    fn open_input(
        &self,
        device_id: &DeviceId,
        cb: RawMidiCallback,
    ) -> Result<Box<dyn MidiInputStream>, MidiError> {
        if device_id.0 != "keys" {
            return Err(MidiError::DeviceNotFound(device_id.0.clone()));
        }
        *self.callback.lock() = Some(cb);
        Ok(Box::new(FakeStream))
    }
}

impl FakeMidiPort {
    fn send(&self, data: [u8; 3]) {
        let cb = self.callback.lock().clone().expect("input not opened");
        cb(RawMidiMessage {
            at: Instant::now(),
            data: data.to_vec(),
        });
    }
}

#[derive(Clone, Default)]
struct FakeOutputPort {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

struct FakeOutput {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MidiOutputConnection for FakeOutput {
    fn send(&mut self, bytes: &[u8]) -> Result<(), MidiError> {
        self.sent.lock().push(bytes.to_vec());
        Ok(())
    }

    fn close(self: Box<Self>) {}
}

impl MidiOutputPort for FakeOutputPort {
    fn list_outputs(&self) -> Result<Vec<MidiDevice>, MidiError> {
        Ok(vec![MidiDevice {
            id: DeviceId("synth".to_string()),
            name: "Test Synth".to_string(),
            manufacturer: Some("Acme".to_string()),
        }])
    }

    fn open_output(&self, _device_id: &DeviceId) -> Result<Box<dyn MidiOutputConnection>, MidiError> {
        Ok(Box::new(FakeOutput {
            sent: self.sent.clone(),
        }))
    }
}

#[derive(Clone)]
struct MemoryStorage {
    settings: Arc<Mutex<SettingsDto>>,
    records: Arc<Mutex<HashMap<TrackId, ScoreRecord>>>,
    record_writes: Arc<Mutex<u32>>,
}

impl MemoryStorage {
    fn with_lead_in(seconds: f64) -> Self {
        Self {
            settings: Arc::new(Mutex::new(SettingsDto {
                lead_in_seconds: seconds,
                ..SettingsDto::default()
            })),
            records: Arc::default(),
            record_writes: Arc::default(),
        }
    }
}

impl StoragePort for MemoryStorage {
    fn load_settings(&self) -> Result<SettingsDto, StorageError> {
        Ok(self.settings.lock().clone())
    }

    fn save_settings(&self, s: &SettingsDto) -> Result<(), StorageError> {
        *self.settings.lock() = s.clone();
        Ok(())
    }
}

impl ScoreStoragePort for MemoryStorage {
    fn load_record(&self, track_id: &TrackId) -> Result<ScoreRecord, StorageError> {
        Ok(self.records.lock().get(track_id).copied().unwrap_or_default())
    }

    fn save_record(&self, track_id: &TrackId, record: &ScoreRecord) -> Result<(), StorageError> {
        *self.record_writes.lock() += 1;
        self.records.lock().insert(track_id.clone(), *record);
        Ok(())
    }
}

struct BrokenStorage;

impl StoragePort for BrokenStorage {
    fn load_settings(&self) -> Result<SettingsDto, StorageError> {
        Err(StorageError::Io("disk gone".to_string()))
    }

    fn save_settings(&self, _s: &SettingsDto) -> Result<(), StorageError> {
        Err(StorageError::Io("disk gone".to_string()))
    }
}

impl ScoreStoragePort for BrokenStorage {
    fn load_record(&self, _track_id: &TrackId) -> Result<ScoreRecord, StorageError> {
        Err(StorageError::Serde("corrupt".to_string()))
    }

    fn save_record(&self, _track_id: &TrackId, _record: &ScoreRecord) -> Result<(), StorageError> {
        Err(StorageError::Io("disk gone".to_string()))
    }
}

fn note(midi: u8, time: f64, duration: f64) -> MidiNote {
    MidiNote {
        midi,
        velocity: 0.8,
        ticks: 0,
        duration_ticks: 0,
        time,
        duration,
    }
}

fn track(family: InstrumentFamily, notes: Vec<MidiNote>) -> MidiTrack {
    MidiTrack {
        name: String::new(),
        channel: 0,
        instrument: Instrument { program: 0, family },
        notes,
    }
}

fn midi_file(duration: f64, tracks: Vec<MidiTrack>) -> MidiFile {
    MidiFile {
        duration,
        header: MidiHeader {
            ppq: 480,
            tempo_map: TempoMap::new(480, Vec::new()),
            time_signatures: Vec::new(),
        },
        tracks,
    }
}

/// One piano note on middle C from 1s to 2s, track ends at 3s.
fn single_note_file() -> MidiFile {
    midi_file(3.0, vec![track(InstrumentFamily::Piano, vec![note(60, 1.0, 1.0)])])
}

struct Rig {
    session: GameSession,
    time: Arc<ManualTimeSource>,
    port: FakeMidiPort,
    storage: MemoryStorage,
}

fn rig(storage: MemoryStorage) -> Rig {
    let time = Arc::new(ManualTimeSource::new(0.0));
    let port = FakeMidiPort::default();
    let mut session = GameSession::new(
        Box::new(port.clone()),
        time.clone(),
        Some(Box::new(storage.clone())),
        Some(Box::new(storage.clone())),
    );
    session
        .handle_command(Command::SelectMidiInput {
            device_id: DeviceId("keys".to_string()),
        })
        .expect("select input");
    Rig {
        session,
        time,
        port,
        storage,
    }
}

fn judged(events: &[Event]) -> Vec<(JudgeKind, u8, Accuracy)> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Judged {
                kind,
                note,
                accuracy,
                ..
            } => Some((*kind, *note, *accuracy)),
            _ => None,
        })
        .collect()
}

#[test]
fn perfect_press_and_release_score_full_points() {
    let mut rig = rig(MemoryStorage::with_lead_in(1.0));
    rig.session
        .load_track_data(TrackId::from("song"), single_note_file())
        .expect("load");
    rig.session.handle_command(Command::Play).expect("play");
    rig.session.drain_events();

    rig.time.advance(2000.0);
    rig.port.send([0x90, 60, 100]);
    rig.session.tick();
    assert_eq!(rig.session.judge().score(), 50.0);
    assert_eq!(rig.session.held_notes(), vec![60]);
    rig.session.drain_events();

    rig.time.advance(1000.0);
    rig.port.send([0x80, 60, 0]);
    rig.session.tick();
    let events = rig.session.drain_events();

    assert_eq!(rig.session.judge().score(), 100.0);
    assert_eq!(rig.session.judge().max_combo(), 1);
    assert_eq!(
        judged(&events),
        vec![(JudgeKind::Release, 60, Accuracy::Perfect)]
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::HeldNotesUpdated { notes } if notes.is_empty())));
}

#[test]
fn finishing_a_run_reports_and_stores_the_record() {
    let mut rig = rig(MemoryStorage::with_lead_in(1.0));
    let id = TrackId::from("song");
    rig.session
        .load_track_data(id.clone(), single_note_file())
        .expect("load");
    rig.session.handle_command(Command::Play).expect("play");

    rig.time.advance(2000.0);
    rig.port.send([0x90, 60, 100]);
    rig.session.tick();
    rig.time.advance(1000.0);
    rig.port.send([0x80, 60, 0]);
    rig.session.tick();
    rig.time.advance(1500.0);
    rig.session.tick();
    let events = rig.session.drain_events();

    assert_eq!(rig.session.state(), SessionState::Finished);
    let result = events
        .iter()
        .find_map(|e| match e {
            Event::SessionFinished { result } => Some(result.clone()),
            _ => None,
        })
        .expect("session finished");
    assert_eq!(result.score, 100.0);
    assert!(result.new_high_score);
    assert_eq!(result.counts.perfect, 1);
    assert_eq!(
        rig.storage.records.lock().get(&id).copied(),
        Some(ScoreRecord {
            high_score: 100.0,
            best_combo: 1,
        })
    );
    assert_eq!(rig.session.selection().last_result, Some(result));
}

#[test]
fn record_is_not_rewritten_when_not_beaten() {
    let storage = MemoryStorage::with_lead_in(0.0);
    let id = TrackId::from("song");
    storage.records.lock().insert(
        id.clone(),
        ScoreRecord {
            high_score: 80.0,
            best_combo: 5,
        },
    );
    let mut rig = rig(storage);
    rig.session.load_track_data(id.clone(), single_note_file()).expect("load");
    rig.session.handle_command(Command::Play).expect("play");

    // nothing pressed: the note is missed and the run ends with 0 points
    rig.time.advance(1000.0);
    rig.session.tick();
    rig.time.advance(2500.0);
    rig.session.tick();
    let events = rig.session.drain_events();

    assert_eq!(judged(&events), vec![(JudgeKind::Miss, 60, Accuracy::Miss)]);
    assert_eq!(*rig.storage.record_writes.lock(), 0);
    assert_eq!(rig.session.stored_record().high_score, 80.0);
    assert_eq!(rig.session.state(), SessionState::Finished);
}

#[test]
fn presses_during_the_countdown_are_not_judged() {
    let mut rig = rig(MemoryStorage::with_lead_in(2.0));
    rig.session
        .load_track_data(TrackId::from("song"), single_note_file())
        .expect("load");
    rig.session.handle_command(Command::Play).expect("play");
    rig.session.drain_events();

    rig.time.advance(1500.0);
    rig.port.send([0x90, 60, 100]);
    rig.session.tick();
    let events = rig.session.drain_events();

    assert!(judged(&events).is_empty());
    assert_eq!(rig.session.judge().score(), 0.0);
    assert_eq!(rig.session.held_notes(), vec![60]);
    assert!(events.iter().any(|e| matches!(
        e,
        Event::Countdown { remaining: 1, label: Some(label) } if label == "GO!"
    )));
}

#[test]
fn presses_while_paused_are_not_judged() {
    let mut rig = rig(MemoryStorage::with_lead_in(0.0));
    rig.session
        .load_track_data(TrackId::from("song"), single_note_file())
        .expect("load");
    rig.session.handle_command(Command::Play).expect("play");
    rig.time.advance(1000.0);
    rig.session.tick();
    rig.session.handle_command(Command::Pause).expect("pause");
    rig.session.drain_events();

    rig.port.send([0x90, 60, 100]);
    rig.session.tick();

    assert_eq!(rig.session.state(), SessionState::Paused);
    assert_eq!(rig.session.judge().score(), 0.0);
    assert!(!rig.session.judge().is_processed(0));
}

#[test]
fn input_offset_shifts_judged_time() {
    let mut rig = rig(MemoryStorage::with_lead_in(0.0));
    rig.session
        .handle_command(Command::SetInputOffsetMs { ms: -200 })
        .expect("offset");
    rig.session
        .load_track_data(TrackId::from("song"), single_note_file())
        .expect("load");
    rig.session.handle_command(Command::Play).expect("play");

    // pressed 0.2s late on the wall clock, on time after the offset
    rig.time.advance(1200.0);
    rig.port.send([0x90, 60, 100]);
    rig.session.tick();

    assert_eq!(rig.session.judge().last_accuracy(), Some(Accuracy::Perfect));
    assert_eq!(rig.storage.settings.lock().input_offset_ms, -200);
}

#[test]
fn stop_resets_score_and_clock() {
    let mut rig = rig(MemoryStorage::with_lead_in(1.0));
    rig.session
        .load_track_data(TrackId::from("song"), single_note_file())
        .expect("load");
    rig.session.handle_command(Command::Play).expect("play");
    rig.time.advance(2000.0);
    rig.port.send([0x90, 60, 100]);
    rig.session.tick();
    rig.session.drain_events();

    rig.session.handle_command(Command::Stop).expect("stop");
    let events = rig.session.drain_events();

    assert_eq!(rig.session.state(), SessionState::Ready);
    assert_eq!(rig.session.judge().score(), 0.0);
    assert_eq!(rig.session.clock().current_time(), -1.0);
    assert!(!rig.session.clock().is_playing());
    assert!(events.iter().any(|e| matches!(
        e,
        Event::ScoreUpdated { score, combo: 0, max_combo: 0, .. } if *score == 0.0
    )));
}

#[test]
fn play_after_finish_restarts_from_the_lead_in() {
    let mut rig = rig(MemoryStorage::with_lead_in(1.0));
    rig.session
        .load_track_data(TrackId::from("song"), single_note_file())
        .expect("load");
    rig.session.handle_command(Command::Play).expect("play");
    rig.time.advance(5000.0);
    rig.session.tick();
    assert_eq!(rig.session.state(), SessionState::Finished);

    rig.session.handle_command(Command::Play).expect("replay");

    assert_eq!(rig.session.state(), SessionState::Running);
    assert_eq!(rig.session.clock().current_time(), -1.0);
    assert!(!rig.session.judge().is_processed(0));
}

#[test]
fn play_without_track_fails() {
    let mut rig = rig(MemoryStorage::with_lead_in(1.0));

    let err = rig.session.handle_command(Command::Play).unwrap_err();

    assert!(matches!(err, SessionError::NoTrack));
    assert_eq!(rig.session.state(), SessionState::Idle);
}

#[test]
fn instrument_filter_reloads_the_track() {
    let mut rig = rig(MemoryStorage::with_lead_in(1.0));
    let file = midi_file(
        3.0,
        vec![
            track(InstrumentFamily::Piano, vec![note(60, 1.0, 1.0)]),
            track(InstrumentFamily::Guitar, vec![note(52, 1.5, 0.5)]),
        ],
    );
    rig.session.load_track_data(TrackId::from("duet"), file).expect("load");
    assert_eq!(rig.session.track().map(|t| t.events.len()), Some(2));

    rig.session
        .handle_command(Command::SetInstrumentFilter {
            filter: "any".to_string(),
        })
        .expect("filter");

    let track = rig.session.track().expect("track stays loaded");
    assert_eq!(track.events.len(), 4);
    assert_eq!(track.spans.len(), 2);
    assert_eq!(rig.storage.settings.lock().instrument_filter, "any");
}

#[test]
fn unknown_instrument_filter_is_rejected() {
    let mut rig = rig(MemoryStorage::with_lead_in(1.0));

    let err = rig
        .session
        .handle_command(Command::SetInstrumentFilter {
            filter: "kazoo".to_string(),
        })
        .unwrap_err();

    assert!(matches!(err, SessionError::InvalidFilter(name) if name == "kazoo"));
    assert_eq!(rig.session.settings().instrument_filter, "piano");
}

#[test]
fn lists_midi_inputs() {
    let mut rig = rig(MemoryStorage::with_lead_in(1.0));
    rig.session.drain_events();

    rig.session.handle_command(Command::ListMidiInputs).expect("list");
    let events = rig.session.drain_events();

    assert!(matches!(
        events.as_slice(),
        [Event::MidiInputsUpdated { devices }] if devices.len() == 1 && devices[0].name == "Test Keys"
    ));
}

#[test]
fn unknown_device_is_an_error() {
    let mut rig = rig(MemoryStorage::with_lead_in(1.0));

    let err = rig
        .session
        .handle_command(Command::SelectMidiInput {
            device_id: DeviceId("nope".to_string()),
        })
        .unwrap_err();

    assert!(matches!(err, SessionError::Midi(MidiError::DeviceNotFound(_))));
}

#[test]
fn broken_storage_falls_back_to_defaults() {
    let time = Arc::new(ManualTimeSource::new(0.0));
    let mut session = GameSession::new(
        Box::new(FakeMidiPort::default()),
        time.clone(),
        Some(Box::new(BrokenStorage)),
        Some(Box::new(BrokenStorage)),
    );

    assert_eq!(session.settings(), &SettingsDto::default());
    session
        .load_track_data(TrackId::from("song"), single_note_file())
        .expect("load despite storage errors");
    assert_eq!(session.stored_record(), ScoreRecord::default());

    session.handle_command(Command::Play).expect("play");
    time.advance(10_000.0);
    session.tick();

    assert_eq!(session.state(), SessionState::Finished);
}

#[test]
fn loads_a_track_from_disk() {
    let smf = Smf {
        header: Header {
            format: Format::SingleTrack,
            timing: Timing::Metrical(480.into()),
        },
        tracks: vec![vec![
            TrackEvent {
                delta: u28::new(480),
                kind: TrackEventKind::Midi {
                    channel: u4::new(0),
                    message: MidiMessage::NoteOn {
                        key: u7::new(64),
                        vel: u7::new(100),
                    },
                },
            },
            TrackEvent {
                delta: u28::new(480),
                kind: TrackEventKind::Midi {
                    channel: u4::new(0),
                    message: MidiMessage::NoteOff {
                        key: u7::new(64),
                        vel: u7::new(0),
                    },
                },
            },
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            },
        ]],
    };
    let path = std::env::temp_dir().join(format!("noteflow-session-{}.mid", std::process::id()));
    smf.save(&path).expect("write midi");

    let mut rig = rig(MemoryStorage::with_lead_in(1.0));
    rig.session
        .handle_command(Command::LoadTrack {
            track_id: TrackId::from("disk"),
            path: path.to_string_lossy().into_owned(),
        })
        .expect("load from disk");
    let _ = std::fs::remove_file(&path);
    let events = rig.session.drain_events();

    let loaded = events.iter().find_map(|e| match e {
        Event::TrackLoaded {
            duration, spans, ..
        } => Some((*duration, spans.clone())),
        _ => None,
    });
    let (duration, spans) = loaded.expect("track loaded event");
    assert_eq!(duration, 1.0);
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].note, 64);
    assert_eq!(spans[0].start_time, 0.5);
    assert_eq!(rig.session.state(), SessionState::Ready);
}

#[test]
fn missing_file_is_a_load_error() {
    let mut rig = rig(MemoryStorage::with_lead_in(1.0));

    let err = rig
        .session
        .handle_command(Command::LoadTrack {
            track_id: TrackId::from("ghost"),
            path: "/definitely/not/here.mid".to_string(),
        })
        .unwrap_err();

    assert!(matches!(err, SessionError::TrackLoad(_)));
    assert!(rig.session.track().is_none());
}

#[test]
fn live_notes_are_echoed_to_the_output() {
    let storage = MemoryStorage::with_lead_in(0.0);
    let output = FakeOutputPort::default();
    let time = Arc::new(ManualTimeSource::new(0.0));
    let port = FakeMidiPort::default();
    let mut session = GameSession::new(
        Box::new(port.clone()),
        time.clone(),
        Some(Box::new(storage.clone())),
        Some(Box::new(storage.clone())),
    )
    .with_midi_output(Box::new(output.clone()));
    session
        .handle_command(Command::SelectMidiInput {
            device_id: DeviceId("keys".to_string()),
        })
        .expect("select input");
    session
        .handle_command(Command::SelectMidiOutput {
            device_id: DeviceId("synth".to_string()),
        })
        .expect("select output");
    session
        .load_track_data(TrackId::from("song"), single_note_file())
        .expect("load");
    session.handle_command(Command::Play).expect("play");

    port.send([0x91, 60, 127]);
    session.tick();
    port.send([0x81, 60, 0]);
    session.tick();
    session.handle_command(Command::Stop).expect("stop");

    assert_eq!(
        *output.sent.lock(),
        vec![vec![0x90, 60, 127], vec![0x80, 60, 0], vec![0xB0, 123, 0]]
    );
    assert_eq!(
        storage.settings.lock().selected_midi_out,
        Some(DeviceId("synth".to_string()))
    );
}

#[test]
fn output_commands_fail_without_an_output_backend() {
    let mut rig = rig(MemoryStorage::with_lead_in(1.0));

    let err = rig.session.handle_command(Command::ListMidiOutputs).unwrap_err();

    assert!(matches!(err, SessionError::Midi(MidiError::Unsupported(_))));
}

/// One piano note from 2.0s to 2.5s; the track ends with it.
fn closing_note_file() -> MidiFile {
    midi_file(2.5, vec![track(InstrumentFamily::Piano, vec![note(60, 2.0, 0.5)])])
}

fn finished_result(events: &[Event]) -> SessionResult {
    events
        .iter()
        .find_map(|e| match e {
            Event::SessionFinished { result } => Some(result.clone()),
            _ => None,
        })
        .expect("session finished")
}

#[test]
fn unplayed_closing_note_counts_as_a_miss() {
    let mut rig = rig(MemoryStorage::with_lead_in(0.0));
    rig.session
        .load_track_data(TrackId::from("coda"), closing_note_file())
        .expect("load");
    rig.session.handle_command(Command::Play).expect("play");

    rig.time.advance(3000.0);
    rig.session.tick();
    let events = rig.session.drain_events();

    let result = finished_result(&events);
    assert_eq!(result.counts.miss, 1);
    assert_eq!(judged(&events), vec![(JudgeKind::Miss, 60, Accuracy::Miss)]);
    assert_eq!(rig.session.judge().last_accuracy(), Some(Accuracy::Miss));
    assert!(rig.session.judge().is_complete());
}

#[test]
fn closing_note_held_to_the_end_is_in_the_result() {
    let mut rig = rig(MemoryStorage::with_lead_in(0.0));
    let id = TrackId::from("coda");
    rig.session
        .load_track_data(id.clone(), closing_note_file())
        .expect("load");
    rig.session.handle_command(Command::Play).expect("play");

    rig.time.advance(2000.0);
    rig.port.send([0x90, 60, 100]);
    rig.session.tick();
    rig.time.advance(500.0);
    rig.session.tick();
    let result = finished_result(&rig.session.drain_events());

    // lifted after the final frame
    rig.time.advance(50.0);
    rig.port.send([0x80, 60, 0]);
    rig.session.tick();

    assert_eq!(result.score, 100.0);
    assert_eq!(rig.session.judge().score(), result.score);
    assert_eq!(
        rig.storage.records.lock().get(&id).map(|r| r.high_score),
        Some(result.score)
    );
}

#[test]
fn pausing_past_the_end_finishes_the_run() {
    let mut rig = rig(MemoryStorage::with_lead_in(0.0));
    rig.session
        .load_track_data(TrackId::from("song"), single_note_file())
        .expect("load");
    rig.session.handle_command(Command::Play).expect("play");
    rig.time.advance(1000.0);
    rig.session.tick();
    rig.session.drain_events();

    // no frame arrives between the end of the track and the pause
    rig.time.advance(5000.0);
    rig.session.handle_command(Command::Pause).expect("pause");
    let events = rig.session.drain_events();

    assert_eq!(rig.session.state(), SessionState::Finished);
    assert_eq!(rig.session.clock().current_time(), 3.0);
    assert_eq!(finished_result(&events).counts.miss, 1);
}
