use crate::clock::{countdown_label, ClockState, PlaybackClock};
use crate::ipc::{Command, Event, JudgeKind, SessionState};
use crate::live_notes::{
    decode_message, order_batch, LiveNoteEvent, LiveNoteKind, LiveNoteTracker, TimedLiveEvent,
};
use crate::selection::{SessionResult, Selection};
use log::{debug, info, warn};
use noteflow_domain_eval::{Accuracy, Judge, JudgeConfig, JudgeEvent};
use noteflow_domain_track::{
    bar_lines, build_spans, import_midi_path, note_range, parse_events, InstrumentFilter,
    MidiEvent, MidiFile, NoteRange, NoteSpan,
};
use noteflow_ports::midi::{
    MidiError, MidiInputPort, MidiInputStream, MidiOutputConnection, MidiOutputPort,
    OutgoingMessage, RawMidiMessage,
};
use noteflow_ports::storage::{
    ScoreRecord, ScoreStoragePort, SettingsDto, StorageError, StoragePort,
};
use noteflow_ports::time::TimeSource;
use noteflow_ports::types::{DeviceId, Seconds, TrackId};
use parking_lot::Mutex;
use rtrb::{Consumer, RingBuffer};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("midi error: {0}")]
    Midi(#[from] MidiError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("track load failed: {0}")]
    TrackLoad(String),
    #[error("no track loaded")]
    NoTrack,
    #[error("unknown instrument filter: {0}")]
    InvalidFilter(String),
}

/// Everything derived from one track load; read-only while it is selected.
#[derive(Clone, Debug)]
pub struct LoadedTrack {
    pub id: TrackId,
    pub file: MidiFile,
    pub events: Vec<MidiEvent>,
    pub spans: Vec<NoteSpan>,
    pub bar_lines: Vec<Seconds>,
    pub note_range: Option<NoteRange>,
}

/// One player's game: clock, judge, live input and persistence wired together.
///
/// The host calls [`GameSession::tick`] once per frame (or on a fixed timer)
/// and drains the resulting events.
pub struct GameSession {
    midi_port: Box<dyn MidiInputPort>,
    midi_out_port: Option<Box<dyn MidiOutputPort>>,
    midi_out: Option<Box<dyn MidiOutputConnection>>,
    storage: Option<Box<dyn StoragePort>>,
    score_storage: Option<Box<dyn ScoreStoragePort>>,
    settings: SettingsDto,
    session_state: SessionState,
    selection: Selection,
    clock: PlaybackClock,
    judge: Judge,
    tracker: LiveNoteTracker,
    track: Option<LoadedTrack>,
    stored_record: ScoreRecord,
    /// High score as it stood when the current run started.
    run_baseline: f64,
    midi_stream: Option<Box<dyn MidiInputStream>>,
    midi_queue_rx: Option<Consumer<RawMidiMessage>>,
    events: VecDeque<Event>,
    last_countdown: u32,
}

impl GameSession {
    pub fn new(
        midi_port: Box<dyn MidiInputPort>,
        time_source: Arc<dyn TimeSource>,
        storage: Option<Box<dyn StoragePort>>,
        score_storage: Option<Box<dyn ScoreStoragePort>>,
    ) -> Self {
        let settings = match storage.as_ref().map(|s| s.load_settings()) {
            Some(Ok(settings)) => settings,
            Some(Err(err)) => {
                warn!("failed to load settings, using defaults: {err}");
                SettingsDto::default()
            }
            None => SettingsDto::default(),
        };

        let mut clock = PlaybackClock::new(time_source, -lead_in(&settings), 0.0);
        clock.set_speed(settings.default_speed);

        Self {
            midi_port,
            midi_out_port: None,
            midi_out: None,
            storage,
            score_storage,
            settings,
            session_state: SessionState::Idle,
            selection: Selection::default(),
            clock,
            judge: Judge::new(JudgeConfig::default()),
            tracker: LiveNoteTracker::new(),
            track: None,
            stored_record: ScoreRecord::default(),
            run_baseline: 0.0,
            midi_stream: None,
            midi_queue_rx: None,
            events: VecDeque::new(),
            last_countdown: 0,
        }
    }

    /// Adds an output device port; live notes are echoed to the selected output.
    pub fn with_midi_output(mut self, port: Box<dyn MidiOutputPort>) -> Self {
        self.midi_out_port = Some(port);
        self
    }

    pub fn handle_command(&mut self, cmd: Command) -> Result<(), SessionError> {
        match cmd {
            Command::ListMidiInputs => {
                let devices = self.midi_port.list_inputs()?;
                self.events.push_back(Event::MidiInputsUpdated { devices });
            }
            Command::SelectMidiInput { device_id } => {
                self.open_midi_input(device_id)?;
            }
            Command::ListMidiOutputs => {
                let devices = self.output_port()?.list_outputs()?;
                self.events.push_back(Event::MidiOutputsUpdated { devices });
            }
            Command::SelectMidiOutput { device_id } => {
                self.open_midi_output(device_id)?;
            }
            Command::LoadTrack { track_id, path } => {
                let file = import_midi_path(Path::new(&path))
                    .map_err(|e| SessionError::TrackLoad(e.to_string()))?;
                self.load_track_data(track_id, file)?;
            }
            Command::Play => self.play()?,
            Command::Pause => {
                if self.clock.is_playing() {
                    self.clock.pause();
                    if self.clock.state() == ClockState::Finished {
                        // the end passed before the next frame could report it
                        self.finish();
                    } else {
                        self.send_out(OutgoingMessage::AllNotesOff);
                        self.session_state = SessionState::Paused;
                        self.emit_session_state();
                    }
                    self.emit_clock();
                }
            }
            Command::Stop => self.stop(),
            Command::SetSpeed { speed } => {
                self.clock.set_speed(speed);
                if self.clock.speed() == speed {
                    self.settings.default_speed = speed;
                    self.save_settings();
                }
                self.emit_clock();
            }
            Command::SetLeadIn { seconds } => {
                self.settings.lead_in_seconds = seconds;
                if self.clock.state() == ClockState::Stopped {
                    let duration = self.clock.duration();
                    self.clock.configure(-lead_in(&self.settings), duration);
                    self.emit_clock();
                }
                self.save_settings();
            }
            Command::SetInstrumentFilter { filter } => {
                if InstrumentFilter::parse(&filter).is_none() {
                    return Err(SessionError::InvalidFilter(filter));
                }
                self.settings.instrument_filter = filter;
                self.save_settings();
                if let Some(track) = self.track.take() {
                    self.load_track_data(track.id, track.file)?;
                }
            }
            Command::SetInputOffsetMs { ms } => {
                self.settings.input_offset_ms = ms;
                self.save_settings();
            }
        }
        Ok(())
    }

    /// Installs a parsed track, replacing the current one and resetting scores.
    pub fn load_track_data(&mut self, track_id: TrackId, file: MidiFile) -> Result<(), SessionError> {
        self.persist_record();
        let filter = InstrumentFilter::parse(&self.settings.instrument_filter).unwrap_or_else(|| {
            warn!(
                "unknown instrument filter {:?}, falling back to piano",
                self.settings.instrument_filter
            );
            InstrumentFilter::default()
        });

        let events = parse_events(&file, filter);
        let spans = build_spans(&events);
        let bars = bar_lines(&file.header, file.duration);
        let range = note_range(&events);
        info!(
            "loaded track {track_id}: {} events, {} spans, {:.2}s",
            events.len(),
            spans.len(),
            file.duration
        );

        let judge_events = self.judge.load_track(events.clone());
        self.clock.configure(-lead_in(&self.settings), file.duration);
        self.last_countdown = 0;
        self.stored_record = self.load_record(&track_id);
        self.run_baseline = self.stored_record.high_score;
        self.selection.track = Some(track_id.clone());

        self.events.push_back(Event::TrackLoaded {
            track_id: track_id.clone(),
            duration: file.duration,
            spans: spans.clone(),
            bar_lines: bars.clone(),
            note_range: range,
        });
        self.track = Some(LoadedTrack {
            id: track_id,
            file,
            events,
            spans,
            bar_lines: bars,
            note_range: range,
        });
        for event in judge_events {
            self.handle_judge_event(event);
        }

        self.session_state = SessionState::Ready;
        self.emit_session_state();
        self.emit_clock();
        Ok(())
    }

    /// One frame: advance the clock, judge live input, sweep misses, persist.
    pub fn tick(&mut self) {
        let finished = self.advance_clock();
        self.process_midi_inputs();
        self.advance_judge();
        if finished {
            self.finish();
        }
        self.persist_record();
    }

    /// Judges one decoded live event at the current clock time.
    pub fn handle_live_event(&mut self, event: LiveNoteEvent) {
        self.tracker.apply(event);
        self.send_out(match event.kind {
            LiveNoteKind::NoteOn => OutgoingMessage::NoteOn {
                note: event.note,
                velocity: event.velocity,
            },
            LiveNoteKind::NoteOff => OutgoingMessage::NoteOff { note: event.note },
        });
        let time = self.clock.time_now() + self.settings.input_offset_ms as f64 / 1000.0;
        let judge_events = match event.kind {
            LiveNoteKind::NoteOn if self.clock.is_playing() => self.judge.on_press(event.note, time),
            LiveNoteKind::NoteOn => Vec::new(),
            LiveNoteKind::NoteOff => self.judge.on_release(event.note, time),
        };
        for event in judge_events {
            self.handle_judge_event(event);
        }
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    pub fn judge(&self) -> &Judge {
        &self.judge
    }

    pub fn track(&self) -> Option<&LoadedTrack> {
        self.track.as_ref()
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn settings(&self) -> &SettingsDto {
        &self.settings
    }

    pub fn state(&self) -> SessionState {
        self.session_state
    }

    pub fn held_notes(&self) -> Vec<u8> {
        self.tracker.held_notes().iter().copied().collect()
    }

    pub fn stored_record(&self) -> ScoreRecord {
        self.stored_record
    }

    fn play(&mut self) -> Result<(), SessionError> {
        if self.track.is_none() {
            return Err(SessionError::NoTrack);
        }
        let state = self.clock.state();
        if state == ClockState::Finished {
            // a finished run restarts from the lead-in
            self.clock.stop();
            self.judge.reset();
        }
        if matches!(state, ClockState::Stopped | ClockState::Finished) {
            self.run_baseline = self.stored_record.high_score;
        }
        self.clock.play();
        self.session_state = SessionState::Running;
        self.emit_session_state();
        self.emit_clock();
        Ok(())
    }

    fn stop(&mut self) {
        self.persist_record();
        self.clock.stop();
        self.send_out(OutgoingMessage::AllNotesOff);
        self.judge.reset();
        self.last_countdown = 0;
        if self.track.is_some() {
            self.session_state = SessionState::Ready;
        }
        self.handle_judge_event(JudgeEvent::Stats {
            score: 0.0,
            combo: 0,
            max_combo: 0,
        });
        self.emit_session_state();
        self.emit_clock();
    }

    /// Delivers the pending frame; true when it was the final one.
    fn advance_clock(&mut self) -> bool {
        let Some(token) = self.clock.pending_frame() else {
            return false;
        };
        let Some(tick) = self.clock.on_frame(token) else {
            return false;
        };

        self.events.push_back(Event::ClockUpdated {
            current_time: tick.current_time,
            playing: self.clock.is_playing(),
            speed: self.clock.speed(),
        });

        let remaining = self.clock.countdown_remaining();
        if remaining != self.last_countdown {
            self.last_countdown = remaining;
            self.events.push_back(Event::Countdown {
                remaining,
                label: countdown_label(remaining).map(str::to_string),
            });
        }

        tick.finished
    }

    fn finish(&mut self) {
        let Some(track_id) = self.selection.track.clone() else {
            return;
        };
        let settled = self.judge.settle(self.clock.duration());
        for event in settled {
            self.handle_judge_event(event);
        }
        self.persist_record();

        let snapshot = self.judge.snapshot();
        let result = SessionResult {
            track_id,
            score: snapshot.score,
            max_combo: snapshot.max_combo,
            counts: snapshot.counts,
            new_high_score: snapshot.score > self.run_baseline,
        };
        info!(
            "session finished: score {:.1}, max combo {}",
            result.score, result.max_combo
        );
        self.send_out(OutgoingMessage::AllNotesOff);
        self.selection.last_result = Some(result.clone());
        self.session_state = SessionState::Finished;
        self.events.push_back(Event::SessionFinished { result });
        self.emit_session_state();
    }

    fn open_midi_input(&mut self, device_id: DeviceId) -> Result<(), SessionError> {
        if let Some(stream) = self.midi_stream.take() {
            stream.close();
        }

        let (producer, consumer) = RingBuffer::new(2048);
        let producer = Arc::new(Mutex::new(producer));
        let cb = Arc::new(move |message: RawMidiMessage| {
            if let Some(mut guard) = producer.try_lock() {
                let _ = guard.push(message);
            }
        });

        let stream = self.midi_port.open_input(&device_id, cb)?;
        info!("listening on MIDI input {device_id}");
        self.midi_stream = Some(stream);
        self.midi_queue_rx = Some(consumer);
        self.tracker.clear();
        self.selection.midi_input = Some(device_id.clone());
        self.settings.selected_midi_in = Some(device_id);
        self.emit_session_state();
        self.save_settings();
        Ok(())
    }

    fn output_port(&self) -> Result<&dyn MidiOutputPort, SessionError> {
        self.midi_out_port
            .as_deref()
            .ok_or_else(|| MidiError::Unsupported("no MIDI output backend".to_string()).into())
    }

    fn open_midi_output(&mut self, device_id: DeviceId) -> Result<(), SessionError> {
        if let Some(connection) = self.midi_out.take() {
            connection.close();
        }
        let connection = self.output_port()?.open_output(&device_id)?;
        info!("sending to MIDI output {device_id}");
        self.midi_out = Some(connection);
        self.settings.selected_midi_out = Some(device_id);
        self.emit_session_state();
        self.save_settings();
        Ok(())
    }

    fn send_out(&mut self, message: OutgoingMessage) {
        let Some(connection) = self.midi_out.as_mut() else {
            return;
        };
        if let Err(err) = connection.send_message(message) {
            warn!("failed to send {message:?}: {err}");
        }
    }

    fn process_midi_inputs(&mut self) {
        let Some(consumer) = self.midi_queue_rx.as_mut() else {
            return;
        };

        let mut batch = Vec::new();
        while let Ok(message) = consumer.pop() {
            if let Some(event) = decode_message(&message.data) {
                batch.push(TimedLiveEvent {
                    at: message.at,
                    event,
                });
            }
        }
        if batch.is_empty() {
            return;
        }

        order_batch(&mut batch);
        // `at` only orders the batch; every event is judged at the drain time,
        // so timing error is bounded by one frame interval
        for timed in batch {
            self.handle_live_event(timed.event);
        }
        self.events.push_back(Event::HeldNotesUpdated {
            notes: self.held_notes(),
        });
    }

    fn advance_judge(&mut self) {
        if !self.clock.is_playing() && self.clock.state() != ClockState::Finished {
            return;
        }
        let judge_events = self.judge.advance_to(self.clock.current_time());
        for event in judge_events {
            self.handle_judge_event(event);
        }
    }

    fn handle_judge_event(&mut self, event: JudgeEvent) {
        match event {
            JudgeEvent::Press {
                note,
                accuracy,
                delta,
                points,
                ..
            } => self.events.push_back(Event::Judged {
                kind: JudgeKind::Press,
                note,
                accuracy,
                delta,
                points,
            }),
            JudgeEvent::Release {
                note,
                accuracy,
                delta,
                points,
                ..
            } => self.events.push_back(Event::Judged {
                kind: JudgeKind::Release,
                note,
                accuracy,
                delta,
                points,
            }),
            JudgeEvent::Miss { note, .. } => self.events.push_back(Event::Judged {
                kind: JudgeKind::Miss,
                note,
                accuracy: Accuracy::Miss,
                delta: 0.0,
                points: 0.0,
            }),
            JudgeEvent::Unmatched { note, time } => {
                debug!("unmatched press of {note} at {time:.3}s");
            }
            JudgeEvent::Stats {
                score,
                combo,
                max_combo,
            } => self.events.push_back(Event::ScoreUpdated {
                score,
                combo,
                max_combo,
                last_accuracy: self.judge.last_accuracy(),
            }),
        }
    }

    fn load_record(&self, track_id: &TrackId) -> ScoreRecord {
        let Some(storage) = self.score_storage.as_ref() else {
            return ScoreRecord::default();
        };
        storage.load_record(track_id).unwrap_or_else(|err| {
            warn!("failed to read record for {track_id}: {err}");
            ScoreRecord::default()
        })
    }

    /// Writes the record through when this session beat it.
    fn persist_record(&mut self) {
        let Some(track_id) = self.selection.track.as_ref() else {
            return;
        };
        let snapshot = self.judge.snapshot();
        if snapshot.score <= self.stored_record.high_score
            && snapshot.max_combo <= self.stored_record.best_combo
        {
            return;
        }

        let record = ScoreRecord {
            high_score: snapshot.score.max(self.stored_record.high_score),
            best_combo: snapshot.max_combo.max(self.stored_record.best_combo),
        };
        self.stored_record = record;
        if let Some(storage) = self.score_storage.as_ref() {
            if let Err(err) = storage.save_record(track_id, &record) {
                warn!("failed to save record for {track_id}: {err}");
            }
        }
    }

    fn emit_session_state(&mut self) {
        self.events.push_back(Event::SessionStateUpdated {
            state: self.session_state,
            settings: self.settings.clone(),
        });
    }

    fn emit_clock(&mut self) {
        self.events.push_back(Event::ClockUpdated {
            current_time: self.clock.current_time(),
            playing: self.clock.is_playing(),
            speed: self.clock.speed(),
        });
    }

    fn save_settings(&self) {
        if let Some(storage) = self.storage.as_ref() {
            if let Err(err) = storage.save_settings(&self.settings) {
                warn!("failed to save settings: {err}");
            }
        }
    }
}

fn lead_in(settings: &SettingsDto) -> Seconds {
    if settings.lead_in_seconds.is_finite() {
        settings.lead_in_seconds.max(0.0)
    } else {
        0.0
    }
}
