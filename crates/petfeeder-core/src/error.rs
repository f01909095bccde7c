//! 错误类型
//!
//! 链路、编解码与命令层共用的错误定义。

use crate::protocol::Command;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, FeederError>;

/// 平台 BLE 栈返回的错误
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("No Bluetooth adapters found")]
    NoAdapter,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    #[error("Not connected")]
    NotConnected,

    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    #[error("{0}")]
    Other(String),
}

/// 非快速喂食前置检查发现的阻断原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// 设备报告故障码
    Fault(u8),
    /// 童锁已开启
    ChildLocked,
    /// 正在出粮
    Busy,
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precondition::Fault(code) => write!(f, "device reports fault code 0x{code:02X}"),
            Precondition::ChildLocked => write!(f, "child lock is engaged"),
            Precondition::Busy => write!(f, "a feed is already in progress"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeederError {
    /// 连接、服务发现或订阅失败（重试耗尽），或等待期间链路断开
    #[error("Link not ready: {0}")]
    LinkNotReady(String),

    #[error("Payload of {0} bytes does not fit the one-byte length field")]
    Encoding(usize),

    #[error("Could not decode {command:?} reply: {reason}")]
    DecodeFailure { command: Command, reason: String },

    #[error("No {command:?} reply within {timeout:?}")]
    ResponseTimeout { command: Command, timeout: Duration },

    #[error("Precondition failed: {0}")]
    PreconditionFailed(Precondition),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl FeederError {
    /// 是否为超时（布尔查询据此返回 `Unknown`）
    pub fn is_timeout(&self) -> bool {
        matches!(self, FeederError::ResponseTimeout { .. })
    }
}
