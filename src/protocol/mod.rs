//! DVR-IP wire protocol: framing, reassembly, typed commands, reply routing.

pub mod codec;
pub mod commands;
pub mod correlator;
pub mod reassembly;
pub mod ret;

pub use codec::{HEADER_SIZE, MAGIC, MAX_PAYLOAD_LEN, MIN_FRAME_SIZE, TERMINATOR};
pub use commands::{
    AlarmInfo, AlarmNotify, Command, DvrReply, DvrRequest, GetConfigReply, GetConfigRequest,
    GuardRequest, KeepAliveRequest, LoginReply, LoginRequest, OpMachine, SetConfigReply,
    SetConfigRequest, SystemRequest, UnguardRequest, ALARM_PUSH_ID,
};
pub use correlator::{FrameFilter, ReplyCorrelator};
pub use reassembly::StreamReassembler;
pub use ret::{ensure_success, RET_OK};
