//! Test doubles: scripted modem, recording transports, fixed sources

use crate::security::{BinaryInput, Level};
use crate::telemetry::{MeasurementSource, PositionSource, Sources, SystemInfo};
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use wattscope_shared::codec::{CONNACK, CONNECT};
use wattscope_shared::ConnectionState;

/// How the fake modem answers
#[derive(Debug, Clone)]
pub struct ModemScript {
    /// Probes left unanswered before the modem replies
    pub silent_probes: u32,
    /// Registration polls answered as searching
    pub unregistered_polls: u32,
    pub bearer_error: bool,
    pub tcp_connect: bool,
    /// CONNACK return code sent after CONNECT, `None` for silence
    pub connack_code: Option<u8>,
    pub data_prompt: bool,
}

impl Default for ModemScript {
    fn default() -> Self {
        Self {
            silent_probes: 0,
            unregistered_polls: 0,
            bearer_error: false,
            tcp_connect: true,
            connack_code: Some(0x00),
            data_prompt: true,
        }
    }
}

/// Everything the device wrote to the fake modem
#[derive(Debug, Default)]
pub struct ModemLog {
    /// Command lines without the trailing CRLF
    pub commands: Vec<String>,
    /// Raw frames written after a data-entry prompt
    pub frames: Vec<Vec<u8>>,
}

impl ModemLog {
    pub fn count(&self, command: &str) -> usize {
        self.commands.iter().filter(|c| *c == command).count()
    }
}

/// Spawn a scripted modem on the far end of an in-memory serial link
pub fn spawn_fake_modem(script: ModemScript) -> (DuplexStream, Arc<Mutex<ModemLog>>) {
    let (device, modem) = duplex(4096);
    let log = Arc::new(Mutex::new(ModemLog::default()));
    tokio::spawn(run_fake_modem(modem, script, log.clone()));
    (device, log)
}

async fn run_fake_modem(mut port: DuplexStream, script: ModemScript, log: Arc<Mutex<ModemLog>>) {
    let mut probes = 0;
    let mut polls = 0;

    while let Some(line) = read_command(&mut port).await {
        log.lock().unwrap().commands.push(line.clone());

        let reply: Vec<u8> = if line == "AT" {
            probes += 1;
            if probes <= script.silent_probes {
                continue;
            }
            b"\r\nOK\r\n".to_vec()
        } else if line == "AT+CPIN?" {
            b"\r\n+CPIN: READY\r\n\r\nOK\r\n".to_vec()
        } else if line == "AT+CREG?" {
            polls += 1;
            if polls <= script.unregistered_polls {
                b"\r\n+CREG: 0,2\r\n\r\nOK\r\n".to_vec()
            } else {
                b"\r\n+CREG: 0,1\r\n\r\nOK\r\n".to_vec()
            }
        } else if line == "AT+SAPBR=1,1" && script.bearer_error {
            b"\r\nERROR\r\n".to_vec()
        } else if line == "AT+CIFSR" {
            b"\r\n10.64.12.7\r\n".to_vec()
        } else if line.starts_with("AT+CIPSTART") {
            if script.tcp_connect {
                b"\r\nOK\r\n\r\nCONNECT OK\r\n".to_vec()
            } else {
                b"\r\nOK\r\n\r\nCONNECT FAIL\r\n".to_vec()
            }
        } else if line == "AT+CIPSHUT" {
            b"\r\nSHUT OK\r\n".to_vec()
        } else if let Some(len) = line.strip_prefix("AT+CIPSEND=") {
            if !script.data_prompt {
                b"\r\nERROR\r\n".to_vec()
            } else {
                let len: usize = len.parse().unwrap();
                if port.write_all(b"\r\n> ").await.is_err() {
                    return;
                }
                let mut frame = vec![0u8; len];
                if port.read_exact(&mut frame).await.is_err() {
                    return;
                }
                let is_connect = frame.first() == Some(&CONNECT);
                log.lock().unwrap().frames.push(frame);

                let mut reply = b"\r\nSEND OK\r\n".to_vec();
                if is_connect {
                    if let Some(code) = script.connack_code {
                        reply.extend_from_slice(&[CONNACK, 0x02, 0x00, code]);
                    }
                }
                reply
            }
        } else {
            b"\r\nOK\r\n".to_vec()
        };

        if port.write_all(&reply).await.is_err() {
            return;
        }
    }
}

async fn read_command(port: &mut DuplexStream) -> Option<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    while !line.ends_with(b"\r\n") {
        port.read_exact(&mut byte).await.ok()?;
        line.push(byte[0]);
    }
    line.truncate(line.len() - 2);
    String::from_utf8(line).ok()
}

/// Shared record of what a [`MockTransport`] was asked to do
#[derive(Debug)]
pub struct MockState {
    pub connect_ok: bool,
    pub connected: bool,
    pub fail_publish: bool,
    pub rssi: Option<i32>,
    pub connects: u32,
    pub teardowns: u32,
    pub maintains: u32,
    pub keep_alives: u32,
    pub published: Vec<(String, Vec<u8>)>,
}

/// Transport double; clones share state so tests can inspect after boxing
#[derive(Clone)]
pub struct MockTransport {
    kind: ConnectionState,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new(kind: ConnectionState, connect_ok: bool) -> Self {
        let rssi = (kind == ConnectionState::Wireless).then_some(-58);
        Self {
            kind,
            state: Arc::new(Mutex::new(MockState {
                connect_ok,
                connected: false,
                fail_publish: false,
                rssi,
                connects: 0,
                teardowns: 0,
                maintains: 0,
                keep_alives: 0,
                published: Vec::new(),
            })),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        match self.kind {
            ConnectionState::Cellular => "MockCellular",
            _ => "MockWireless",
        }
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = self.state();
        state.connects += 1;
        state.connected = state.connect_ok;
        match (state.connect_ok, self.kind) {
            (true, _) => Ok(()),
            (false, ConnectionState::Cellular) => {
                Err(TransportError::NetworkRegistrationTimeout { polls: 15 })
            }
            (false, _) => Err(TransportError::WirelessAssociationFailure { attempts: 20 }),
        }
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.fail_publish {
            return Err(TransportError::PublishFailure("scripted".into()));
        }
        state.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }

    async fn teardown(&mut self) {
        let mut state = self.state();
        state.teardowns += 1;
        state.connected = false;
    }

    async fn maintain(&mut self) {
        self.state().maintains += 1;
    }

    async fn keep_alive(&mut self) -> Result<(), TransportError> {
        self.state().keep_alives += 1;
        Ok(())
    }

    async fn signal_strength(&mut self) -> Option<i32> {
        self.state().rssi
    }
}

/// Measurement source: channels 0-1 read 12.5 V, 2-3 read 2.0 A
pub struct FixedMeasurements;

impl MeasurementSource for FixedMeasurements {
    fn read_measurement(&mut self, channel: u8) -> io::Result<f32> {
        match channel {
            0 | 1 => Ok(12.5),
            2 | 3 => Ok(2.0),
            _ => Err(io::Error::new(io::ErrorKind::NotFound, "no such channel")),
        }
    }
}

/// Position source returning fixed values
#[derive(Debug, Default, Clone)]
pub struct FixedPosition {
    pub position: Option<(f64, f64)>,
    pub age_millis: Option<u64>,
    pub speed_kmh: Option<f64>,
    pub satellites: Option<u32>,
}

impl PositionSource for FixedPosition {
    fn poll(&mut self) {}

    fn has_fix(&self) -> bool {
        self.position.is_some()
    }

    fn position(&self) -> Option<(f64, f64)> {
        self.position
    }

    fn speed_kmh(&self) -> Option<f64> {
        self.speed_kmh
    }

    fn satellite_count(&self) -> Option<u32> {
        self.satellites
    }

    fn fix_age_millis(&self) -> Option<u64> {
        self.age_millis
    }
}

pub struct FixedMemory(pub u64);

impl SystemInfo for FixedMemory {
    fn free_memory(&mut self) -> u64 {
        self.0
    }
}

pub fn fixed_sources() -> Sources {
    Sources {
        measurements: Box::new(FixedMeasurements),
        position: Box::new(FixedPosition::default()),
        system: Box::new(FixedMemory(123_456)),
    }
}

/// Binary input that replays levels, then holds the last one
pub struct ScriptedInput {
    levels: VecDeque<Level>,
    last: Level,
}

impl ScriptedInput {
    pub fn new(levels: &[Level]) -> Self {
        Self {
            levels: levels.iter().copied().collect(),
            last: Level::High,
        }
    }
}

impl BinaryInput for ScriptedInput {
    fn read_level(&mut self) -> io::Result<Level> {
        if let Some(level) = self.levels.pop_front() {
            self.last = level;
        }
        Ok(self.last)
    }
}
