mod timeline;

pub use timeline::{Timeline, TimelineMessage};

use bardic_ports::playback::{PlaybackScore, SoundOutputPort, SoundTransport, TransportError};
use bardic_ports::types::{DeviceId, MidiOutputDevice, TimeUs};
use midir::{MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const WORKER_PERIOD: Duration = Duration::from_millis(1);

pub struct MidirSoundOutputPort {
    client_name: String,
    device: Option<DeviceId>,
    channel: u8,
}

impl MidirSoundOutputPort {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            device: None,
            channel: 0,
        }
    }

    /// Plays to this device instead of the first available output.
    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel & 0x0F;
        self
    }

    fn create_midi_out(&self) -> Result<MidiOutput, TransportError> {
        MidiOutput::new(&self.client_name).map_err(|e| TransportError::Backend(e.to_string()))
    }

    fn device_id(index: usize, name: &str) -> DeviceId {
        DeviceId(format!("midir:{}:{}", index, name))
    }

    fn connect(&self) -> Result<MidiOutputConnection, TransportError> {
        let midi_out = self.create_midi_out()?;
        let ports = midi_out.ports();

        let mut selected = None;
        for (index, port) in ports.iter().enumerate() {
            let name = midi_out
                .port_name(port)
                .unwrap_or_else(|_| "Unknown Output".to_string());
            let matches = match self.device.as_ref() {
                Some(device) => Self::device_id(index, &name) == *device,
                None => true,
            };
            if matches {
                selected = Some(port.clone());
                break;
            }
        }

        let port = selected.ok_or_else(|| match self.device.as_ref() {
            Some(device) => TransportError::DeviceNotFound(device.to_string()),
            None => TransportError::DeviceNotFound("no midi output".to_string()),
        })?;

        midi_out
            .connect(&port, "bardic-midi-output")
            .map_err(|e| TransportError::DeviceUnavailable(e.to_string()))
    }
}

impl Default for MidirSoundOutputPort {
    fn default() -> Self {
        Self::new("Bardic")
    }
}

impl SoundOutputPort for MidirSoundOutputPort {
    fn list_outputs(&self) -> Result<Vec<MidiOutputDevice>, TransportError> {
        let midi_out = self.create_midi_out()?;
        let ports = midi_out.ports();
        let mut devices = Vec::new();

        for (index, port) in ports.iter().enumerate() {
            let name = midi_out
                .port_name(port)
                .unwrap_or_else(|_| "Unknown Output".to_string());
            devices.push(MidiOutputDevice {
                id: Self::device_id(index, &name),
                name,
            });
        }

        Ok(devices)
    }

    fn open_transport(&self, score: PlaybackScore) -> Result<Box<dyn SoundTransport>, TransportError> {
        let connection = self.connect()?;
        tracing::debug!(notes = score.notes.len(), channel = self.channel, "midi output opened");
        Ok(Box::new(MidirSoundTransport::new(
            connection,
            Timeline::new(&score),
            self.channel,
        )))
    }
}

struct OutputState {
    connection: MidiOutputConnection,
    channel: u8,
    timeline: Timeline,
    started: Option<Instant>,
    running: bool,
    finished: bool,
    last_position_us: TimeUs,
}

impl OutputState {
    fn wall_us(&self) -> i64 {
        self.started
            .map(|started| started.elapsed().as_micros() as i64)
            .unwrap_or(0)
    }

    fn position_us(&self) -> TimeUs {
        if self.running {
            self.timeline.position_at(self.wall_us())
        } else {
            self.last_position_us
        }
    }

    fn send(&mut self, message: TimelineMessage) {
        let bytes = match message {
            TimelineMessage::NoteOn { pitch, velocity } => [0x90 | self.channel, pitch, velocity],
            TimelineMessage::NoteOff { pitch } => [0x80 | self.channel, pitch, 0],
        };
        if let Err(err) = self.connection.send(&bytes) {
            tracing::warn!(%err, "midi send failed");
        }
    }

    /// All notes off and sustain released.
    fn silence(&mut self) {
        for bytes in [[0xB0 | self.channel, 123, 0], [0xB0 | self.channel, 64, 0]] {
            let _ = self.connection.send(&bytes);
        }
    }

    fn halt(&mut self) {
        if self.running {
            self.last_position_us = self.position_us();
            self.running = false;
        }
        self.silence();
    }
}

/// Plays a score from a worker thread. Track time is derived from wall
/// time on demand, so `current_time_us` stays exact between worker wakeups.
pub struct MidirSoundTransport {
    state: Arc<Mutex<OutputState>>,
    worker: Option<JoinHandle<()>>,
}

impl MidirSoundTransport {
    fn new(connection: MidiOutputConnection, timeline: Timeline, channel: u8) -> Self {
        let last_position_us = timeline.start_us();
        Self {
            state: Arc::new(Mutex::new(OutputState {
                connection,
                channel,
                timeline,
                started: None,
                running: false,
                finished: false,
                last_position_us,
            })),
            worker: None,
        }
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    fn spawn_worker(&mut self) -> Result<(), TransportError> {
        let state = self.state.clone();
        let worker = thread::Builder::new()
            .name("bardic-midi-out".to_string())
            .spawn(move || run_worker(state))
            .map_err(|e| TransportError::Backend(e.to_string()))?;
        self.worker = Some(worker);
        Ok(())
    }
}

fn run_worker(state: Arc<Mutex<OutputState>>) {
    loop {
        {
            let mut guard = state.lock();
            if !guard.running {
                break;
            }
            let wall_us = guard.wall_us();
            for message in guard.timeline.due(wall_us) {
                guard.send(message);
            }
            if guard.timeline.is_done(wall_us) {
                guard.halt();
                guard.finished = true;
                tracing::debug!("midi playback finished");
                break;
            }
        }
        thread::sleep(WORKER_PERIOD);
    }
}

impl SoundTransport for MidirSoundTransport {
    fn start(&mut self) -> Result<(), TransportError> {
        let start_us = self.state.lock().timeline.start_us();
        self.start_at(start_us)
    }

    fn start_at(&mut self, time_us: TimeUs) -> Result<(), TransportError> {
        self.stop();
        {
            let mut state = self.state.lock();
            state.timeline.seek(time_us, 0);
            state.started = Some(Instant::now());
            state.running = true;
            state.finished = false;
            state.last_position_us = time_us;
        }
        self.spawn_worker()
    }

    fn stop(&mut self) {
        self.state.lock().halt();
        self.join_worker();
    }

    fn set_speed(&mut self, ratio: f64) {
        let mut state = self.state.lock();
        let wall_us = state.wall_us();
        state.timeline.set_speed(ratio, wall_us);
    }

    fn current_time_us(&self) -> TimeUs {
        self.state.lock().position_us()
    }

    fn is_running(&self) -> bool {
        self.state.lock().running
    }

    fn poll_finished(&mut self) -> bool {
        std::mem::take(&mut self.state.lock().finished)
    }
}

impl Drop for MidirSoundTransport {
    fn drop(&mut self) {
        self.stop();
    }
}
