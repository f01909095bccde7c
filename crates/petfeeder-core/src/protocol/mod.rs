//! 喂食器 BLE 协议（Tuya 风格帧）
//!
//! # 帧格式
//!
//! ```text
//! 发送: EA | CMD | LEN | PAYLOAD[LEN] | 00  | AE
//! 接收: EB | CMD | LEN | PAYLOAD[LEN] | CRC | AE
//! ```
//!
//! CRC 字节在发送时固定为 `0x00`，接收时不做校验，设备固件就是这样工作的。
//!
//! # 设备变体
//!
//! 同一协议有三种硬件变体，仅 GATT 服务/特征 UUID 不同：
//!
//! | 变体       | Service | Write | Notify |
//! |------------|---------|-------|--------|
//! | `standard` | AE30    | AE01  | AE02   |
//! | `jk`       | FFF0    | FFF2  | FFF1   |
//! | `ali`      | FFFF    | FF01  | FF02   |

pub mod catalog;
pub mod frame;
pub mod schedule;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const OUTBOUND_HEADER: u8 = 0xEA;
pub const INBOUND_HEADER: u8 = 0xEB;
pub const FOOTER: u8 = 0xAE;
pub const CRC_SENTINEL: u8 = 0x00;

/// 出厂默认验证码
pub const DEFAULT_VERIFICATION_CODE: &str = "00000000";

/// 16-bit UUID 转为蓝牙基准 UUID
const fn base_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_1000_8000_0080_5f9b_34fb_u128)
}

pub const STANDARD_SERVICE_UUID: Uuid = base_uuid(0xAE30);
pub const STANDARD_WRITE_UUID: Uuid = base_uuid(0xAE01);
pub const STANDARD_NOTIFY_UUID: Uuid = base_uuid(0xAE02);

pub const JK_SERVICE_UUID: Uuid = base_uuid(0xFFF0);
pub const JK_WRITE_UUID: Uuid = base_uuid(0xFFF2);
pub const JK_NOTIFY_UUID: Uuid = base_uuid(0xFFF1);

pub const ALI_SERVICE_UUID: Uuid = base_uuid(0xFFFF);
pub const ALI_WRITE_UUID: Uuid = base_uuid(0xFF01);
pub const ALI_NOTIFY_UUID: Uuid = base_uuid(0xFF02);

/// 命令码
///
/// 封闭枚举；接收到未知命令码时记录日志并丢弃。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    QueryNameVersion = 0x00,
    SetName = 0x01,
    RestoreFactory = 0x02,
    Heartbeat = 0x03,
    QueryMac = 0x04,
    SyncTime = 0x05,
    SetFamilyId = 0x06,
    SetFeederPlan = 0x07,
    Feeding = 0x08,
    FeedingStatus = 0x09,
    Fault = 0x0A,
    PlanFeedResult = 0x0B,
    ManualFeedResult = 0x0C,
    ChildLock = 0x0D,
    PowerSupplyMethod = 0x0E,
    ControlLed = 0x0F,
    AutoLock = 0x10,
    QueryFeederPlan = 0x11,
    ReminderTone = 0x12,
    AtmosphereLight = 0x13,
}

impl Command {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0x00 => Command::QueryNameVersion,
            0x01 => Command::SetName,
            0x02 => Command::RestoreFactory,
            0x03 => Command::Heartbeat,
            0x04 => Command::QueryMac,
            0x05 => Command::SyncTime,
            0x06 => Command::SetFamilyId,
            0x07 => Command::SetFeederPlan,
            0x08 => Command::Feeding,
            0x09 => Command::FeedingStatus,
            0x0A => Command::Fault,
            0x0B => Command::PlanFeedResult,
            0x0C => Command::ManualFeedResult,
            0x0D => Command::ChildLock,
            0x0E => Command::PowerSupplyMethod,
            0x0F => Command::ControlLed,
            0x10 => Command::AutoLock,
            0x11 => Command::QueryFeederPlan,
            0x12 => Command::ReminderTone,
            0x13 => Command::AtmosphereLight,
            other => return Err(other),
        })
    }
}

/// 设备硬件变体，决定使用哪一组 GATT UUID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceVariant {
    #[default]
    Standard,
    Jk,
    Ali,
}

impl DeviceVariant {
    /// 根据广播名称推断变体
    ///
    /// 名称包含 `JK` 为 jk，包含 `ALI` 为 ali，其余均为 standard。
    pub fn from_name(name: &str) -> Self {
        let upper = name.to_uppercase();
        if upper.contains("JK") {
            DeviceVariant::Jk
        } else if upper.contains("ALI") {
            DeviceVariant::Ali
        } else {
            DeviceVariant::Standard
        }
    }

    pub fn service_uuid(self) -> Uuid {
        match self {
            DeviceVariant::Standard => STANDARD_SERVICE_UUID,
            DeviceVariant::Jk => JK_SERVICE_UUID,
            DeviceVariant::Ali => ALI_SERVICE_UUID,
        }
    }

    pub fn write_uuid(self) -> Uuid {
        match self {
            DeviceVariant::Standard => STANDARD_WRITE_UUID,
            DeviceVariant::Jk => JK_WRITE_UUID,
            DeviceVariant::Ali => ALI_WRITE_UUID,
        }
    }

    pub fn notify_uuid(self) -> Uuid {
        match self {
            DeviceVariant::Standard => STANDARD_NOTIFY_UUID,
            DeviceVariant::Jk => JK_NOTIFY_UUID,
            DeviceVariant::Ali => ALI_NOTIFY_UUID,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DeviceVariant::Standard => "standard",
            DeviceVariant::Jk => "jk",
            DeviceVariant::Ali => "ali",
        }
    }
}

impl fmt::Display for DeviceVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(DeviceVariant::Standard),
            "jk" => Ok(DeviceVariant::Jk),
            "ali" => Ok(DeviceVariant::Ali),
            other => Err(format!("unknown device variant '{other}'")),
        }
    }
}

/// 字节序列格式化为大写十六进制（日志用）
pub fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
