//! Mock x55 interrogator on local TCP listeners.
//!
//! The command listener answers `#Get*` queries from an in-memory table,
//! applies `#Set*` commands to that table and logs every request. The
//! streaming listener sends the configured frames once streaming is enabled
//! and, after streaming is disabled, a burst of trailing bytes.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use fbg_ingest::acquisition::ClientSettings;
use fbg_ingest::protocol::content::{encode_peaks, encode_u32_list, encode_utc_datetime};
use fbg_ingest::protocol::{Request, Response, REQUEST_HEADER_LENGTH};
use fbg_ingest::types::{PeakFrame, SensorMetadata, SensorType, StructuralGroup};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

#[derive(Debug)]
struct MockState {
    log: Mutex<Vec<Request>>,
    content: Mutex<HashMap<String, Vec<u8>>>,
    rejected: Mutex<HashSet<String>>,
    hang_up_on: Mutex<HashSet<String>>,
    frames: Mutex<Vec<PeakFrame>>,
    frame_delay: Mutex<Duration>,
    close_after_frames: Mutex<bool>,
    trailing_bytes: Mutex<usize>,
    streaming_closed_by_client: Mutex<usize>,
    streaming: watch::Sender<bool>,
}

pub struct MockInstrument {
    pub command_port: u16,
    pub streaming_port: u16,
    state: Arc<MockState>,
}

impl MockInstrument {
    pub async fn start() -> Self {
        let command = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let streaming = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let command_port = command.local_addr().unwrap().port();
        let streaming_port = streaming.local_addr().unwrap().port();

        let (streaming_tx, _) = watch::channel(false);
        let state = Arc::new(MockState {
            log: Mutex::new(Vec::new()),
            content: Mutex::new(default_content()),
            rejected: Mutex::new(HashSet::new()),
            hang_up_on: Mutex::new(HashSet::new()),
            frames: Mutex::new(Vec::new()),
            frame_delay: Mutex::new(Duration::ZERO),
            close_after_frames: Mutex::new(false),
            trailing_bytes: Mutex::new(0),
            streaming_closed_by_client: Mutex::new(0),
            streaming: streaming_tx,
        });

        let command_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((socket, _)) = command.accept().await {
                tokio::spawn(serve_commands(socket, Arc::clone(&command_state)));
            }
        });

        let streaming_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((socket, _)) = streaming.accept().await {
                tokio::spawn(serve_peaks(socket, Arc::clone(&streaming_state)));
            }
        });

        Self {
            command_port,
            streaming_port,
            state,
        }
    }

    pub fn settings(&self) -> ClientSettings {
        ClientSettings {
            command_port: self.command_port,
            streaming_port: self.streaming_port,
            drain_idle: Duration::from_millis(100),
            ..ClientSettings::for_host("127.0.0.1")
        }
    }

    /// Answer `command` with a rejection.
    pub fn reject(&self, command: &str) {
        self.state.rejected.lock().unwrap().insert(command.to_string());
    }

    /// Close the command connection instead of answering `command`.
    pub fn hang_up_on(&self, command: &str) {
        self.state.hang_up_on.lock().unwrap().insert(command.to_string());
    }

    pub fn set_content(&self, command: &str, content: Vec<u8>) {
        self.state
            .content
            .lock()
            .unwrap()
            .insert(command.to_string(), content);
    }

    pub fn set_frames(&self, frames: Vec<PeakFrame>, delay: Duration) {
        *self.state.frames.lock().unwrap() = frames;
        *self.state.frame_delay.lock().unwrap() = delay;
    }

    /// Close the streaming socket after the last frame.
    pub fn close_after_frames(&self) {
        *self.state.close_after_frames.lock().unwrap() = true;
    }

    /// Bytes sent on the streaming socket after streaming is disabled.
    pub fn set_trailing_bytes(&self, count: usize) {
        *self.state.trailing_bytes.lock().unwrap() = count;
    }

    pub fn requests(&self) -> Vec<Request> {
        self.state.log.lock().unwrap().clone()
    }

    /// Logged requests rendered as `command argument`.
    pub fn commands(&self) -> Vec<String> {
        self.requests().iter().map(ToString::to_string).collect()
    }

    pub fn clear_log(&self) {
        self.state.log.lock().unwrap().clear();
    }

    pub fn is_streaming(&self) -> bool {
        *self.state.streaming.borrow()
    }

    /// Streaming connections the client has closed.
    pub fn streaming_sockets_closed(&self) -> usize {
        *self.state.streaming_closed_by_client.lock().unwrap()
    }
}

fn default_content() -> HashMap<String, Vec<u8>> {
    let u32_le = |v: u32| v.to_le_bytes().to_vec();
    HashMap::from([
        ("#GetFirmwareVersion".to_string(), b"1.2.3".to_vec()),
        ("#GetInstrumentName".to_string(), b"x55-test\0".to_vec()),
        ("#IsReady".to_string(), u32_le(1)),
        ("#GetDutChannelCount".to_string(), u32_le(4)),
        (
            "#GetAvailableLaserScanSpeeds".to_string(),
            encode_u32_list(&[1000, 5000]),
        ),
        ("#GetPeakDataStreamingStatus".to_string(), u32_le(0)),
        ("#GetLaserScanSpeed".to_string(), u32_le(1000)),
        ("#GetPeakDataStreamingDivider".to_string(), u32_le(10)),
        ("#GetPeakDataStreamingAvailableBuffer".to_string(), u32_le(100)),
        (
            "#GetInstrumentUtcDateTime".to_string(),
            encode_utc_datetime(instrument_clock()),
        ),
        ("#GetNtpEnabled".to_string(), u32_le(1)),
        ("#GetNtpServer".to_string(), b"10.0.0.1".to_vec()),
    ])
}

pub fn instrument_clock() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
}

async fn read_request(socket: &mut TcpStream) -> Option<Request> {
    let mut header = [0u8; REQUEST_HEADER_LENGTH];
    socket.read_exact(&mut header).await.ok()?;
    let body_length = usize::from(header[1]) + usize::from(u16::from_le_bytes([header[2], header[3]]));
    let mut bytes = header.to_vec();
    bytes.resize(REQUEST_HEADER_LENGTH + body_length, 0);
    socket.read_exact(&mut bytes[REQUEST_HEADER_LENGTH..]).await.ok()?;
    Request::decode(&bytes).ok().map(|(request, _)| request)
}

async fn serve_commands(mut socket: TcpStream, state: Arc<MockState>) {
    while let Some(request) = read_request(&mut socket).await {
        state.log.lock().unwrap().push(request.clone());
        if state.hang_up_on.lock().unwrap().contains(&request.command) {
            return;
        }
        let response = respond(&state, &request);
        let bytes = response.encode().unwrap();
        if socket.write_all(&bytes).await.is_err() {
            return;
        }
    }
}

fn respond(state: &MockState, request: &Request) -> Response {
    if state.rejected.lock().unwrap().contains(&request.command) {
        return Response::rejected("command rejected");
    }

    let mut content = state.content.lock().unwrap();
    let parse_u32 = || request.argument.trim().parse::<u32>().ok();
    match request.command.as_str() {
        "#EnablePeakDataStreaming" => {
            state.streaming.send_replace(true);
            Response::ok("streaming enabled", Vec::new())
        }
        "#DisablePeakDataStreaming" => {
            state.streaming.send_replace(false);
            Response::ok("streaming disabled", Vec::new())
        }
        "#SetLaserScanSpeed" | "#SetPeakDataStreamingDivider" | "#SetNtpEnabled" => {
            let Some(value) = parse_u32() else {
                return Response::rejected("invalid argument");
            };
            let getter = match request.command.as_str() {
                "#SetLaserScanSpeed" => "#GetLaserScanSpeed",
                "#SetPeakDataStreamingDivider" => "#GetPeakDataStreamingDivider",
                _ => "#GetNtpEnabled",
            };
            content.insert(getter.to_string(), value.to_le_bytes().to_vec());
            Response::ok("ok", Vec::new())
        }
        "#SetNtpServer" => {
            content.insert(
                "#GetNtpServer".to_string(),
                request.argument.as_bytes().to_vec(),
            );
            Response::ok("ok", Vec::new())
        }
        "#SetInstrumentUtcDateTime" => Response::ok("ok", Vec::new()),
        command => match content.get(command) {
            Some(bytes) => Response::ok("", bytes.clone()),
            None => Response::rejected("unknown command"),
        },
    }
}

async fn serve_peaks(mut socket: TcpStream, state: Arc<MockState>) {
    let mut streaming = state.streaming.subscribe();
    if streaming.wait_for(|on| *on).await.is_err() {
        return;
    }

    let frames = state.frames.lock().unwrap().clone();
    let delay = *state.frame_delay.lock().unwrap();
    for frame in &frames {
        if !*streaming.borrow() {
            break;
        }
        let response = Response::ok("", encode_peaks(frame).unwrap());
        if socket.write_all(&response.encode().unwrap()).await.is_err() {
            return;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    if *state.close_after_frames.lock().unwrap() {
        return;
    }

    if streaming.wait_for(|on| !*on).await.is_err() {
        return;
    }
    let trailing = *state.trailing_bytes.lock().unwrap();
    if trailing > 0 && socket.write_all(&vec![0xAB; trailing]).await.is_err() {
        return;
    }

    // Hold the socket until the client closes it.
    let mut buf = [0u8; 64];
    while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
    *state.streaming_closed_by_client.lock().unwrap() += 1;
}

// ============================================================================
// Fixtures
// ============================================================================

/// `count` frames one millisecond apart carrying the standard two-channel scenario.
pub fn scenario_frames(count: u32) -> Vec<PeakFrame> {
    (0..count)
        .map(|i| {
            PeakFrame::new(
                Utc.timestamp_opt(1_700_000_000, i * 1_000_000).unwrap(),
                vec![vec![1530.0, 1531.2], vec![1540.5]],
            )
        })
        .collect()
}

pub fn basement_sensors() -> Vec<SensorMetadata> {
    vec![
        SensorMetadata::new("A1", "B-S1", 0, 0)
            .with_band(1529.5, 1530.5)
            .with_type(SensorType::Strain)
            .with_corresponding_sensor("A2"),
        SensorMetadata::new("A2", "B-T1", 0, 1)
            .with_band(1531.0, 1531.5)
            .with_type(SensorType::Temperature),
    ]
}

pub fn frame_sensors() -> Vec<SensorMetadata> {
    vec![
        SensorMetadata::new("B1", "F-S1", 1, 0).with_band(1540.0, 1541.0),
        SensorMetadata::new("B2", "F-S2", 1, 1)
            .with_band(1545.0, 1546.0)
            .with_recording(false),
    ]
}

/// Poll `check` every 20 ms for up to five seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..250 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

pub const GROUPS: [StructuralGroup; 2] = [StructuralGroup::Basement, StructuralGroup::SteelFrame];
