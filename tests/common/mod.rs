//! In-process fake DVR device for integration tests.

use bytes::Bytes;
use dvrip_client::protocol::{codec, reassembly::StreamReassembler, ALARM_PUSH_ID};
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex, Once},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Behavior knobs for one [`FakeDevice`].
#[derive(Clone)]
pub struct FakeDeviceConfig {
    pub session_id: u32,
    pub alive_interval: u32,
    /// Per-request-command `Ret` overrides; anything absent replies 100.
    pub ret_overrides: HashMap<u16, i32>,
    /// Named config blocks served to get-config.
    pub configs: HashMap<String, Value>,
    /// Push one motion alarm right after acknowledging a guard command.
    pub push_alarm_after_guard: bool,
}

impl Default for FakeDeviceConfig {
    fn default() -> Self {
        Self {
            session_id: 0x64,
            alive_interval: 0,
            ret_overrides: HashMap::new(),
            configs: HashMap::new(),
            push_alarm_after_guard: false,
        }
    }
}

/// Minimal DVR-IP device: replies to every request on the same connection,
/// echoing the request's sequence number.
pub struct FakeDevice {
    pub addr: SocketAddr,
    pub set_configs: Arc<Mutex<Vec<(String, Value)>>>,
}

impl FakeDevice {
    pub async fn spawn(config: FakeDeviceConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let set_configs = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&set_configs);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, config.clone(), Arc::clone(&recorded)));
            }
        });
        Self { addr, set_configs }
    }
}

async fn serve(
    mut stream: TcpStream,
    config: FakeDeviceConfig,
    recorded: Arc<Mutex<Vec<(String, Value)>>>,
) {
    let mut reassembler = StreamReassembler::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        for frame in reassembler.push(&buf[..n]) {
            if handle_frame(&mut stream, &frame, &config, &recorded)
                .await
                .is_err()
            {
                return;
            }
        }
    }
}

async fn handle_frame(
    stream: &mut TcpStream,
    frame: &Bytes,
    config: &FakeDeviceConfig,
    recorded: &Arc<Mutex<Vec<(String, Value)>>>,
) -> std::io::Result<()> {
    let command = codec::peek_command_id(frame).unwrap();
    let sequence = codec::peek_sequence(frame).unwrap();
    let (payload, _) = codec::decode(frame, None, None).unwrap();
    let request: Value = serde_json::from_slice(&payload).unwrap_or_else(|_| json!({}));

    let ret = |default: i32| config.ret_overrides.get(&command).copied().unwrap_or(default);
    let session_hex = format!("0x{:X}", config.session_id);
    let session_hex = session_hex.as_str();

    match command {
        1000 => {
            let reply = json!({
                "Ret": ret(100),
                "SessionID": session_hex,
                "AliveInterval": config.alive_interval,
                "ChannelNum": 1,
                "ExtraChannel": 0,
                "DeviceType ": "HVR",
            });
            reply_with(stream, config.session_id, sequence, 1001, &reply).await?;
        }
        1006 => {
            let reply = json!({"Ret": ret(100), "Name": "KeepAlive", "SessionID": session_hex});
            reply_with(stream, config.session_id, sequence, 1007, &reply).await?;
        }
        1042 => {
            let name = request["Name"].as_str().unwrap_or_default().to_string();
            let reply = match config.configs.get(&name) {
                Some(data) => json!({
                    "Ret": ret(100),
                    "Name": name.as_str(),
                    "SessionID": session_hex,
                    (name.as_str()): data,
                }),
                None => json!({"Ret": ret(607), "Name": name, "SessionID": session_hex}),
            };
            reply_with(stream, config.session_id, sequence, 1043, &reply).await?;
        }
        1040 => {
            let name = request["Name"].as_str().unwrap_or_default().to_string();
            let data = request.get(&name).cloned().unwrap_or(Value::Null);
            recorded.lock().unwrap().push((name.clone(), data));
            let reply = json!({"Ret": ret(100), "Name": name, "SessionID": session_hex});
            reply_with(stream, config.session_id, sequence, 1041, &reply).await?;
        }
        1450 => {
            let reply = json!({"Ret": ret(100), "SessionID": session_hex});
            reply_with(stream, config.session_id, sequence, 1451, &reply).await?;
        }
        1500 => {
            let reply = json!({"Ret": ret(100), "SessionID": session_hex});
            reply_with(stream, config.session_id, sequence, 1501, &reply).await?;
            if config.push_alarm_after_guard {
                let push = json!({
                    "Name": "AlarmInfo",
                    "SessionID": session_hex,
                    "AlarmInfo": {
                        "Channel": 0,
                        "Event": "appEventHumanDetectAlarm",
                        "StartTime": "2024-05-01 12:30:00",
                        "Status": "Start",
                    },
                });
                reply_with(stream, config.session_id, 0, ALARM_PUSH_ID, &push).await?;
            }
        }
        1502 => {
            let reply = json!({"Ret": ret(100), "SessionID": session_hex});
            reply_with(stream, config.session_id, sequence, 1503, &reply).await?;
        }
        other => panic!("fake device received unexpected command {other}"),
    }
    Ok(())
}

async fn reply_with(
    stream: &mut TcpStream,
    session_id: u32,
    sequence: u32,
    command: u16,
    payload: &Value,
) -> std::io::Result<()> {
    let bytes = serde_json::to_vec(payload).unwrap();
    let frame = codec::encode(session_id, sequence, command, &bytes);
    stream.write_all(&frame).await
}
