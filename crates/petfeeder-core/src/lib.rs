//! Petfeeder Core Library
//!
//! 蓝牙智能喂食器私有协议的客户端实现
//!
//! # 模块
//!
//! - **protocol**: 帧编解码、命令目录、喂食计划记录
//! - **link**: 传输抽象、通知缓冲、链路会话
//! - **ble**: 基于 btleplug 的扫描与 transport
//! - **feeder**: 面向调用方的设备操作
//! - **config**: 超时、扫描前缀等可调参数
//!
//! # 使用示例
//!
//! ```ignore
//! use petfeeder_core::{FeederConfig, FeederDevice, discover_feeders};
//!
//! // 1. 扫描附近的喂食器
//! let config = FeederConfig::load();
//! let devices = discover_feeders(config.scan_duration(), &config.name_prefixes).await?;
//!
//! // 2. 连接并验证
//! let mut feeder = FeederDevice::from_discovered(&devices[0], config)?;
//! feeder.connect().await?;
//!
//! // 3. 出粮两份（先做状态检查）
//! let outcome = feeder.feed(2, false).await?;
//! ```

pub mod ble;
pub mod config;
pub mod error;
pub mod feeder;
pub mod link;
pub mod protocol;

// BLE re-exports
pub use ble::{BtleTransport, DiscoveredFeeder, FeederScanner, ScanCallback, discover_feeders};

pub use config::FeederConfig;
pub use error::{FeederError, Precondition, Result, TransportError};
pub use feeder::{DeviceIdentity, FeederDevice};

// Link re-exports
pub use link::{GattService, LinkSession, LinkState, NotificationBuffer, NotificationHandler, Transport};

// Protocol re-exports
pub use protocol::catalog::{
    DeviceInfo, FaultCode, FeedKind, FeedOutcome, FeedRecord, FeedingStatus, PowerSupply,
    SwitchState,
};
pub use protocol::schedule::{FeedSchedule, Portions, TimeOfDay, Weekday, Weekdays};
pub use protocol::{Command, DeviceVariant};
