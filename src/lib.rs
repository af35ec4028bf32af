//! Async client for the DVR-IP ("Sofia") protocol spoken by low-cost XM
//! DVR/NVR recorders on TCP port 34567.
//!
//! The crate covers session login and keep-alive, typed configuration
//! get/set, system operations, alarm push subscription, and supervised
//! reconnection.

pub mod api;
pub mod client;
pub mod error;
pub mod hash;
pub mod protocol;
pub mod supervisor;
pub mod types;

pub use api::{
    MotionDetectState, CAMERA_PARAM_CONFIG, DAY_NIGHT_COLOR_FULL, DAY_NIGHT_COLOR_SMART,
    MOTION_DETECT_CONFIG,
};
pub use client::{AlarmStream, DvrClient, SessionLifecycleState};
pub use error::{DvrError, Result};
pub use hash::xm_hash;
pub use protocol::commands::{AlarmInfo, AlarmNotify};
pub use supervisor::supervise;
pub use types::{DvrOptions, DEFAULT_PORT, DEFAULT_RECONNECT_COOLDOWN};
