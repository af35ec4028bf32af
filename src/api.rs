//! Higher-level device operations built on the config and system commands.
//!
//! Each read-modify-write runs under the client's api lock so concurrent
//! callers cannot interleave their get/set pairs.

use crate::{
    client::DvrClient,
    error::{DvrError, Result},
    protocol::commands::{OpMachine, SystemRequest},
};
use serde_json::{json, Value};
use tracing::info;

/// Config block holding per-channel motion detection settings.
pub const MOTION_DETECT_CONFIG: &str = "Detect.MotionDetect";

/// Config block holding the first camera's image parameters.
pub const CAMERA_PARAM_CONFIG: &str = "Camera.Param.[0]";

/// Voice prompt the devices play for motion alarms.
const MOTION_VOICE_TYPE: i64 = 523;

/// `DayNightColor` mode: switch between color and black-and-white
/// automatically.
pub const DAY_NIGHT_COLOR_SMART: u32 = 3;

/// `DayNightColor` mode: always color.
pub const DAY_NIGHT_COLOR_FULL: u32 = 4;

/// Motion detection notification switches, folded over all channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionDetectState {
    /// True only when every channel has the voice prompt enabled.
    pub voice_enable: bool,
    /// True only when every channel has mail notification enabled.
    pub mail_enable: bool,
}

impl DvrClient {
    /// Read the motion detection notification state across all channels.
    pub async fn motion_detect_config(&self) -> Result<MotionDetectState> {
        let _guard = self.api_guard().await;
        let data = self.get_config(MOTION_DETECT_CONFIG).await?;
        let channels = motion_channels(&data)?;

        let mut state = MotionDetectState {
            voice_enable: true,
            mail_enable: true,
        };
        for channel in channels {
            let handler = event_handler(channel)?;
            state.voice_enable &= flag(handler, "VoiceEnable");
            state.mail_enable &= flag(handler, "MailEnable");
        }
        Ok(state)
    }

    /// Update motion detection notifications on every channel. `None` leaves
    /// the corresponding switch untouched.
    pub async fn set_motion_detect_config(
        &self,
        voice_enable: Option<bool>,
        mail_enable: Option<bool>,
    ) -> Result<()> {
        if voice_enable.is_none() && mail_enable.is_none() {
            return Ok(());
        }

        let _guard = self.api_guard().await;
        let mut data = self.get_config(MOTION_DETECT_CONFIG).await?;
        {
            let channels = motion_channels_mut(&mut data)?;
            for channel in channels {
                let handler = event_handler_mut(channel)?;
                if let Some(voice) = voice_enable {
                    handler.insert("VoiceEnable".to_string(), Value::Bool(voice));
                    if voice {
                        handler.insert("VoiceType".to_string(), json!(MOTION_VOICE_TYPE));
                    }
                }
                if let Some(mail) = mail_enable {
                    handler.insert("MailEnable".to_string(), Value::Bool(mail));
                }
            }
        }
        self.set_config(MOTION_DETECT_CONFIG, data).await?;
        info!(?voice_enable, ?mail_enable, "motion detect config updated");
        Ok(())
    }

    /// Read the first camera's `DayNightColor` mode.
    pub async fn camera_day_night_color(&self) -> Result<u32> {
        let _guard = self.api_guard().await;
        let data = self.get_config(CAMERA_PARAM_CONFIG).await?;
        let raw = data
            .get("DayNightColor")
            .and_then(Value::as_str)
            .ok_or_else(|| config_shape(CAMERA_PARAM_CONFIG))?;
        parse_hex_field(raw).ok_or_else(|| config_shape(CAMERA_PARAM_CONFIG))
    }

    /// Set the first camera's `DayNightColor` mode.
    pub async fn set_camera_day_night_color(&self, mode: u32) -> Result<()> {
        let _guard = self.api_guard().await;
        let mut data = self.get_config(CAMERA_PARAM_CONFIG).await?;
        let params = data
            .as_object_mut()
            .ok_or_else(|| config_shape(CAMERA_PARAM_CONFIG))?;
        params.insert(
            "DayNightColor".to_string(),
            Value::String(format!("0x{mode:x}")),
        );
        self.set_config(CAMERA_PARAM_CONFIG, data).await?;
        info!(mode, "day/night color mode updated");
        Ok(())
    }

    /// Reboot the device. The connection drops shortly after the device
    /// acknowledges.
    pub async fn reboot(&self) -> Result<()> {
        let _guard = self.api_guard().await;
        self.send(SystemRequest::new(OpMachine::reboot())).await?;
        info!("device reboot requested");
        Ok(())
    }
}

fn motion_channels(data: &Value) -> Result<&Vec<Value>> {
    data.as_array()
        .filter(|channels| !channels.is_empty())
        .ok_or_else(|| config_shape(MOTION_DETECT_CONFIG))
}

fn motion_channels_mut(data: &mut Value) -> Result<&mut Vec<Value>> {
    match data.as_array_mut() {
        Some(channels) if !channels.is_empty() => Ok(channels),
        _ => Err(config_shape(MOTION_DETECT_CONFIG)),
    }
}

fn event_handler(channel: &Value) -> Result<&serde_json::Map<String, Value>> {
    channel
        .get("EventHandler")
        .and_then(Value::as_object)
        .ok_or_else(|| config_shape(MOTION_DETECT_CONFIG))
}

fn event_handler_mut(channel: &mut Value) -> Result<&mut serde_json::Map<String, Value>> {
    channel
        .get_mut("EventHandler")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| config_shape(MOTION_DETECT_CONFIG))
}

fn flag(map: &serde_json::Map<String, Value>, key: &str) -> bool {
    map.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Parse the device's `"0x..."` hex-string config values.
fn parse_hex_field(raw: &str) -> Option<u32> {
    let digits = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X"))?;
    u32::from_str_radix(digits, 16).ok()
}

fn config_shape(name: &str) -> DvrError {
    DvrError::ConfigShape {
        name: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_field_parsing() {
        assert_eq!(parse_hex_field("0x3"), Some(3));
        assert_eq!(parse_hex_field("0X1A"), Some(26));
        assert_eq!(parse_hex_field("3"), None);
        assert_eq!(parse_hex_field("0xZZ"), None);
    }

    #[test]
    fn motion_channel_shape_checks() {
        assert!(motion_channels(&json!([])).is_err());
        assert!(motion_channels(&json!({"Enable": true})).is_err());
        let ok = json!([{"EventHandler": {"VoiceEnable": true}}]);
        assert_eq!(motion_channels(&ok).unwrap().len(), 1);
    }
}
