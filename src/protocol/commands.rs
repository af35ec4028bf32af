//! Typed DVR-IP commands and the static command-id registry.
//!
//! Every request type names its reply type and its [`Command`] descriptor at
//! compile time; neither the codec nor the correlator ever inspects types at
//! runtime. Payloads are ASCII JSON with the device's PascalCase keys.

use serde::{
    de::DeserializeOwned,
    ser::{SerializeMap, Serializer},
    Deserialize, Serialize,
};
use serde_json::Value;

/// Command id of unsolicited alarm push frames. Push-only: there is no
/// paired request.
pub const ALARM_PUSH_ID: u16 = 1504;

/// Static mapping from each logical command to its numeric request/reply id
/// pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Login,
    KeepAlive,
    SetConfig,
    GetConfig,
    SystemOp,
    Guard,
    Unguard,
}

impl Command {
    pub const fn request_id(self) -> u16 {
        match self {
            Command::Login => 1000,
            Command::KeepAlive => 1006,
            Command::SetConfig => 1040,
            Command::GetConfig => 1042,
            Command::SystemOp => 1450,
            Command::Guard => 1500,
            Command::Unguard => 1502,
        }
    }

    pub const fn reply_id(self) -> u16 {
        match self {
            Command::Login => 1001,
            Command::KeepAlive => 1007,
            Command::SetConfig => 1041,
            Command::GetConfig => 1043,
            Command::SystemOp => 1451,
            Command::Guard => 1501,
            Command::Unguard => 1503,
        }
    }
}

/// A request the client can send. `NAME` labels command failures.
pub trait DvrRequest: Serialize + Send {
    type Reply: DvrReply;
    const COMMAND: Command;
    const NAME: &'static str;

    /// Stamp the current session, formatted as the device's `"0x..."` hex
    /// string. Login ignores it (no session exists yet).
    fn set_session_id(&mut self, session_id: String);
}

/// A reply the device can send back.
pub trait DvrReply: DeserializeOwned + Send {
    fn ret(&self) -> i32;
}

// ---------------------------------------------------------------------------
// Login 1000/1001
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    #[serde(rename = "EncryptType")]
    pub encrypt_type: &'static str,
    #[serde(rename = "LoginType")]
    pub login_type: &'static str,
    #[serde(rename = "UserName")]
    pub user_name: String,
    #[serde(rename = "PassWord")]
    pub pass_word: String,
}

impl LoginRequest {
    pub fn new(user_name: impl Into<String>, pass_word: impl Into<String>) -> Self {
        Self {
            encrypt_type: "MD5",
            login_type: "DVRIP-Web",
            user_name: user_name.into(),
            pass_word: pass_word.into(),
        }
    }
}

impl DvrRequest for LoginRequest {
    type Reply = LoginReply;
    const COMMAND: Command = Command::Login;
    const NAME: &'static str = "Login";

    fn set_session_id(&mut self, _session_id: String) {}
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoginReply {
    #[serde(rename = "Ret")]
    pub ret: i32,
    #[serde(rename = "SessionID")]
    pub session_id: Option<String>,
    #[serde(rename = "AliveInterval")]
    pub alive_interval: u32,
    #[serde(rename = "ChannelNum")]
    pub channel_num: u32,
    #[serde(rename = "ExtraChannel")]
    pub extra_channel: u32,
    // The device sends this key with a trailing space.
    #[serde(rename = "DeviceType ")]
    pub device_type: Option<String>,
}

impl DvrReply for LoginReply {
    fn ret(&self) -> i32 {
        self.ret
    }
}

// ---------------------------------------------------------------------------
// KeepAlive 1006/1007
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct KeepAliveRequest {
    #[serde(rename = "SessionID")]
    pub session_id: String,
    #[serde(rename = "Name")]
    pub name: &'static str,
}

impl KeepAliveRequest {
    pub fn new() -> Self {
        Self {
            session_id: String::new(),
            name: "KeepAlive",
        }
    }
}

impl Default for KeepAliveRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl DvrRequest for KeepAliveRequest {
    type Reply = KeepAliveReply;
    const COMMAND: Command = Command::KeepAlive;
    const NAME: &'static str = "KeepAlive";

    fn set_session_id(&mut self, session_id: String) {
        self.session_id = session_id;
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeepAliveReply {
    #[serde(rename = "Ret")]
    pub ret: i32,
    #[serde(rename = "SessionID")]
    pub session_id: Option<String>,
    #[serde(rename = "Name")]
    pub name: Option<String>,
}

impl DvrReply for KeepAliveReply {
    fn ret(&self) -> i32 {
        self.ret
    }
}

// ---------------------------------------------------------------------------
// GetConfig 1042/1043
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct GetConfigRequest {
    #[serde(rename = "SessionID")]
    pub session_id: String,
    #[serde(rename = "Name")]
    pub name: String,
}

impl GetConfigRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            session_id: String::new(),
            name: name.into(),
        }
    }
}

impl DvrRequest for GetConfigRequest {
    type Reply = GetConfigReply;
    const COMMAND: Command = Command::GetConfig;
    const NAME: &'static str = "GetConfig";

    fn set_session_id(&mut self, session_id: String) {
        self.session_id = session_id;
    }
}

/// Get-config reply with the irregular envelope: the config value lives
/// under a top-level key equal to the `Name` field, so the envelope is
/// parsed first and the named property re-read to get the actual value.
#[derive(Debug, Clone, Default)]
pub struct GetConfigReply {
    pub ret: i32,
    pub session_id: Option<String>,
    pub name: String,
    pub data: Value,
}

impl<'de> Deserialize<'de> for GetConfigReply {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let mut map = serde_json::Map::deserialize(deserializer)?;
        let ret = map
            .get("Ret")
            .and_then(Value::as_i64)
            .unwrap_or_default() as i32;
        let session_id = map
            .get("SessionID")
            .and_then(Value::as_str)
            .map(str::to_string);
        let name = map
            .get("Name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let data = map.remove(&name).unwrap_or(Value::Null);
        Ok(Self {
            ret,
            session_id,
            name,
            data,
        })
    }
}

impl DvrReply for GetConfigReply {
    fn ret(&self) -> i32 {
        self.ret
    }
}

// ---------------------------------------------------------------------------
// SetConfig 1040/1041
// ---------------------------------------------------------------------------

/// Set-config request with the irregular envelope: the already-serialized
/// config value is inlined under a key equal to the request's own `Name`.
#[derive(Debug, Clone)]
pub struct SetConfigRequest {
    pub session_id: String,
    pub name: String,
    pub data: Value,
}

impl SetConfigRequest {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            session_id: String::new(),
            name: name.into(),
            data,
        }
    }
}

impl Serialize for SetConfigRequest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("SessionID", &self.session_id)?;
        map.serialize_entry("Name", &self.name)?;
        map.serialize_entry(&self.name, &self.data)?;
        map.end()
    }
}

impl DvrRequest for SetConfigRequest {
    type Reply = SetConfigReply;
    const COMMAND: Command = Command::SetConfig;
    const NAME: &'static str = "SetConfig";

    fn set_session_id(&mut self, session_id: String) {
        self.session_id = session_id;
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SetConfigReply {
    #[serde(rename = "Ret")]
    pub ret: i32,
    #[serde(rename = "SessionID")]
    pub session_id: Option<String>,
    #[serde(rename = "Name")]
    pub name: Option<String>,
}

impl DvrReply for SetConfigReply {
    fn ret(&self) -> i32 {
        self.ret
    }
}

// ---------------------------------------------------------------------------
// SystemOp 1450/1451
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct OpMachine {
    #[serde(rename = "Action")]
    pub action: &'static str,
}

impl OpMachine {
    pub const REBOOT: &'static str = "Reboot";

    pub fn reboot() -> Self {
        Self {
            action: Self::REBOOT,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemRequest {
    #[serde(rename = "SessionID")]
    pub session_id: String,
    #[serde(rename = "Name")]
    pub name: &'static str,
    #[serde(rename = "OPMachine")]
    pub op_machine: OpMachine,
}

impl SystemRequest {
    pub fn new(op_machine: OpMachine) -> Self {
        Self {
            session_id: String::new(),
            name: "OPMachine",
            op_machine,
        }
    }
}

impl DvrRequest for SystemRequest {
    type Reply = SystemReply;
    const COMMAND: Command = Command::SystemOp;
    const NAME: &'static str = "SystemOp";

    fn set_session_id(&mut self, session_id: String) {
        self.session_id = session_id;
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SystemReply {
    #[serde(rename = "Ret")]
    pub ret: i32,
    #[serde(rename = "SessionID")]
    pub session_id: Option<String>,
}

impl DvrReply for SystemReply {
    fn ret(&self) -> i32 {
        self.ret
    }
}

// ---------------------------------------------------------------------------
// Guard 1500/1501, Unguard 1502/1503
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct GuardRequest {
    #[serde(rename = "SessionID")]
    pub session_id: String,
}

impl DvrRequest for GuardRequest {
    type Reply = GuardReply;
    const COMMAND: Command = Command::Guard;
    const NAME: &'static str = "Guard";

    fn set_session_id(&mut self, session_id: String) {
        self.session_id = session_id;
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GuardReply {
    #[serde(rename = "Ret")]
    pub ret: i32,
    #[serde(rename = "SessionID")]
    pub session_id: Option<String>,
}

impl DvrReply for GuardReply {
    fn ret(&self) -> i32 {
        self.ret
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UnguardRequest {
    #[serde(rename = "SessionID")]
    pub session_id: String,
}

impl DvrRequest for UnguardRequest {
    type Reply = UnguardReply;
    const COMMAND: Command = Command::Unguard;
    const NAME: &'static str = "Unguard";

    fn set_session_id(&mut self, session_id: String) {
        self.session_id = session_id;
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UnguardReply {
    #[serde(rename = "Ret")]
    pub ret: i32,
    #[serde(rename = "SessionID")]
    pub session_id: Option<String>,
}

impl DvrReply for UnguardReply {
    fn ret(&self) -> i32 {
        self.ret
    }
}

// ---------------------------------------------------------------------------
// Alarm push 1504
// ---------------------------------------------------------------------------

/// Envelope of an unsolicited alarm push frame.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AlarmNotify {
    #[serde(rename = "AlarmInfo")]
    pub alarm_info: Option<AlarmInfo>,
    #[serde(rename = "SessionID")]
    pub session_id: Option<String>,
    #[serde(rename = "Name")]
    pub name: Option<String>,
}

/// One pushed alarm event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmInfo {
    #[serde(rename = "Channel")]
    pub channel: i32,
    #[serde(rename = "Event")]
    pub event: Option<String>,
    #[serde(rename = "StartTime")]
    pub start_time: Option<String>,
    #[serde(rename = "Status")]
    pub status: Option<String>,
}

impl AlarmInfo {
    /// Event name the devices use for motion detection.
    pub const MOTION_DETECT_EVENT: &'static str = "appEventHumanDetectAlarm";
    pub const STATUS_START: &'static str = "Start";
    pub const STATUS_END: &'static str = "End";

    pub fn is_motion_detect(&self) -> bool {
        self.event.as_deref() == Some(Self::MOTION_DETECT_EVENT)
    }

    pub fn is_start(&self) -> bool {
        self.status.as_deref() == Some(Self::STATUS_START)
    }
}
