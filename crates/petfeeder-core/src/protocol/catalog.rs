//! 命令目录
//!
//! 每条命令描述三件事：命令码、载荷构造、应答解析。
//! 设备层 ([`crate::FeederDevice`]) 只负责发送-轮询-解析的通用流程，
//! 具体格式都在这里。
//!
//! 不同固件对同一应答的布局并不一致（例如计划查询有的带时段数前缀，
//! 有的没有），因此解析器是一组按顺序尝试的候选策略，
//! 每个策略要么给出结果，要么交给下一个。

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::FeederConfig;
use crate::error::{FeederError, Result};
use crate::protocol::frame::Frame;
use crate::protocol::schedule::{FeedSchedule, MAX_SCHEDULE_SLOTS, Portions, SLOT_RECORD_LEN};
use crate::protocol::{Command, hex};

/// 候选解析策略：成功返回 `Some`，否则尝试下一个
pub type ParseStrategy<T> = fn(&[u8]) -> Option<T>;

/// 按顺序尝试各策略，返回第一个成功的结果
pub fn parse_with<T>(payload: &[u8], strategies: &[ParseStrategy<T>]) -> Option<T> {
    strategies.iter().find_map(|parse| parse(payload))
}

/// 一条可发送给设备的命令
pub trait FeederCommand {
    type Reply;

    /// 出站命令码
    fn command(&self) -> Command;

    fn payload(&self) -> Vec<u8>;

    /// 该应答帧是否属于本命令
    fn accepts(&self, reply: Command) -> bool {
        reply == self.command()
    }

    fn parse_reply(&self, frame: &Frame) -> Result<Self::Reply>;

    fn timeout(&self, config: &FeederConfig) -> Duration {
        config.command_timeout()
    }
}

fn decode_failure(frame: &Frame, reason: impl Into<String>) -> FeederError {
    FeederError::DecodeFailure {
        command: frame.command,
        reason: format!("{} (payload: {})", reason.into(), hex(&frame.payload)),
    }
}

/// 单字节 0/1 状态
fn parse_flag(frame: &Frame) -> Result<bool> {
    match frame.payload.first() {
        Some(&value) => Ok(value == 1),
        None => Err(decode_failure(frame, "empty state reply")),
    }
}

/// 布尔查询的三值结果；`Unknown` 表示在时限内没有收到应答
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    Enabled,
    Disabled,
    Unknown,
}

impl From<bool> for SwitchState {
    fn from(on: bool) -> Self {
        if on {
            SwitchState::Enabled
        } else {
            SwitchState::Disabled
        }
    }
}

impl SwitchState {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            SwitchState::Enabled => Some(true),
            SwitchState::Disabled => Some(false),
            SwitchState::Unknown => None,
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SwitchState::Enabled => "on",
            SwitchState::Disabled => "off",
            SwitchState::Unknown => "unknown",
        })
    }
}

// ============================================================================
// 手动喂食
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Manual,
    Plan,
    Other(u8),
}

/// 出粮记录（0x0C 应答，每条 9 字节）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRecord {
    pub timestamp: Option<NaiveDateTime>,
    pub portions: u8,
    pub kind: FeedKind,
    pub success: bool,
}

const FEED_RECORD_LEN: usize = 9;

impl FeedRecord {
    fn from_record(r: &[u8]) -> Self {
        let timestamp = NaiveDate::from_ymd_opt(2000 + i32::from(r[0]), r[1].into(), r[2].into())
            .and_then(|d| d.and_hms_opt(r[3].into(), r[4].into(), r[5].into()));
        let kind = match r[7] {
            1 => FeedKind::Manual,
            2 => FeedKind::Plan,
            other => FeedKind::Other(other),
        };
        Self {
            timestamp,
            portions: r[6],
            kind,
            success: r[8] == 0,
        }
    }
}

/// 喂食命令的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status")]
pub enum FeedOutcome {
    /// 设备确认开始出粮
    Acknowledged,
    /// 设备拒绝，附带状态字节
    Refused { code: u8 },
    /// 直接收到出粮结果记录
    Completed { records: Vec<FeedRecord> },
}

#[derive(Debug, Clone, Copy)]
pub struct ManualFeed {
    pub portions: Portions,
}

impl FeederCommand for ManualFeed {
    type Reply = FeedOutcome;

    fn command(&self) -> Command {
        Command::Feeding
    }

    fn payload(&self) -> Vec<u8> {
        vec![self.portions.get()]
    }

    fn accepts(&self, reply: Command) -> bool {
        matches!(reply, Command::Feeding | Command::ManualFeedResult)
    }

    fn parse_reply(&self, frame: &Frame) -> Result<FeedOutcome> {
        match frame.command {
            Command::ManualFeedResult => Ok(FeedOutcome::Completed {
                records: frame
                    .payload
                    .chunks_exact(FEED_RECORD_LEN)
                    .map(FeedRecord::from_record)
                    .collect(),
            }),
            _ => match frame.payload.first() {
                Some(1) => Ok(FeedOutcome::Acknowledged),
                Some(&code) => Ok(FeedOutcome::Refused { code }),
                None => Err(decode_failure(frame, "empty feed reply")),
            },
        }
    }
}

// ============================================================================
// 喂食计划
// ============================================================================

#[derive(Debug, Clone)]
pub struct SetFeederPlan {
    slots: Vec<FeedSchedule>,
}

impl SetFeederPlan {
    pub fn new(slots: &[FeedSchedule]) -> Result<Self> {
        if slots.len() > MAX_SCHEDULE_SLOTS {
            return Err(FeederError::InvalidArgument(format!(
                "at most {MAX_SCHEDULE_SLOTS} schedule slots are supported, got {}",
                slots.len()
            )));
        }
        Ok(Self {
            slots: slots.to_vec(),
        })
    }
}

impl FeederCommand for SetFeederPlan {
    type Reply = ();

    fn command(&self) -> Command {
        Command::SetFeederPlan
    }

    fn payload(&self) -> Vec<u8> {
        self.slots.iter().flat_map(FeedSchedule::to_bytes).collect()
    }

    fn parse_reply(&self, _frame: &Frame) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueryFeederPlan;

/// `[n] + n × 记录`，要求长度严格匹配
fn plan_length_prefixed(payload: &[u8]) -> Option<Vec<FeedSchedule>> {
    let (&count, records) = payload.split_first()?;
    let count = count as usize;
    if count > MAX_SCHEDULE_SLOTS || records.len() != count * SLOT_RECORD_LEN {
        return None;
    }
    parse_slot_records(records)
}

/// 无前缀，直接是若干条记录
fn plan_bare(payload: &[u8]) -> Option<Vec<FeedSchedule>> {
    if payload.len() % SLOT_RECORD_LEN != 0 || payload.len() / SLOT_RECORD_LEN > MAX_SCHEDULE_SLOTS
    {
        return None;
    }
    parse_slot_records(payload)
}

fn parse_slot_records(records: &[u8]) -> Option<Vec<FeedSchedule>> {
    records
        .chunks_exact(SLOT_RECORD_LEN)
        .map(FeedSchedule::from_record)
        .collect()
}

impl QueryFeederPlan {
    pub const STRATEGIES: [ParseStrategy<Vec<FeedSchedule>>; 2] = [plan_length_prefixed, plan_bare];
}

impl FeederCommand for QueryFeederPlan {
    type Reply = Vec<FeedSchedule>;

    fn command(&self) -> Command {
        Command::QueryFeederPlan
    }

    fn payload(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_reply(&self, frame: &Frame) -> Result<Vec<FeedSchedule>> {
        parse_with(&frame.payload, &Self::STRATEGIES)
            .ok_or_else(|| decode_failure(frame, "unrecognised schedule layout"))
    }

    fn timeout(&self, config: &FeederConfig) -> Duration {
        config.schedule_timeout()
    }
}

// ============================================================================
// 童锁 / 提示音
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct SetChildLock(pub bool);

impl FeederCommand for SetChildLock {
    type Reply = ();

    fn command(&self) -> Command {
        Command::ChildLock
    }

    fn payload(&self) -> Vec<u8> {
        vec![u8::from(self.0)]
    }

    fn parse_reply(&self, _frame: &Frame) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueryChildLock;

impl FeederCommand for QueryChildLock {
    type Reply = bool;

    fn command(&self) -> Command {
        Command::ChildLock
    }

    fn payload(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_reply(&self, frame: &Frame) -> Result<bool> {
        parse_flag(frame)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SetReminderTone(pub bool);

impl FeederCommand for SetReminderTone {
    type Reply = ();

    fn command(&self) -> Command {
        Command::ReminderTone
    }

    fn payload(&self) -> Vec<u8> {
        vec![u8::from(self.0)]
    }

    fn parse_reply(&self, _frame: &Frame) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueryReminderTone;

impl FeederCommand for QueryReminderTone {
    type Reply = bool;

    fn command(&self) -> Command {
        Command::ReminderTone
    }

    fn payload(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_reply(&self, frame: &Frame) -> Result<bool> {
        parse_flag(frame)
    }
}

// ============================================================================
// 设备信息
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub version: String,
}

/// 旧固件的名称字段固定 12 字节
const LEGACY_NAME_FIELD_LEN: usize = 12;

fn clean_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches(char::from(0))
        .trim()
        .to_string()
}

/// `[n1] name [n2] version`
fn info_length_prefixed(payload: &[u8]) -> Option<DeviceInfo> {
    let (&name_len, rest) = payload.split_first()?;
    let name_len = name_len as usize;
    if rest.len() <= name_len {
        return None;
    }
    let (name, rest) = rest.split_at(name_len);
    let (&version_len, version) = rest.split_first()?;
    if version.len() != version_len as usize {
        return None;
    }
    Some(DeviceInfo {
        name: clean_string(name),
        version: clean_string(version),
    })
}

/// 12 字节名称字段，其后为版本号
fn info_fixed_name_field(payload: &[u8]) -> Option<DeviceInfo> {
    if payload.len() < LEGACY_NAME_FIELD_LEN {
        return None;
    }
    let (name, version) = payload.split_at(LEGACY_NAME_FIELD_LEN);
    Some(DeviceInfo {
        name: clean_string(name),
        version: clean_string(version),
    })
}

#[derive(Debug, Clone, Copy)]
pub struct QueryDeviceInfo;

impl QueryDeviceInfo {
    pub const STRATEGIES: [ParseStrategy<DeviceInfo>; 2] =
        [info_length_prefixed, info_fixed_name_field];
}

impl FeederCommand for QueryDeviceInfo {
    type Reply = DeviceInfo;

    fn command(&self) -> Command {
        Command::QueryNameVersion
    }

    fn payload(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_reply(&self, frame: &Frame) -> Result<DeviceInfo> {
        parse_with(&frame.payload, &Self::STRATEGIES)
            .ok_or_else(|| decode_failure(frame, "unrecognised device info layout"))
    }
}

// ============================================================================
// 时间同步
// ============================================================================

/// 载荷: `YY MM DD hh mm ss [WD]`，WD 为星期（周日 = 0）
#[derive(Debug, Clone, Copy)]
pub struct SyncTime {
    pub at: NaiveDateTime,
    pub include_weekday: bool,
}

impl FeederCommand for SyncTime {
    type Reply = ();

    fn command(&self) -> Command {
        Command::SyncTime
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn payload(&self) -> Vec<u8> {
        let at = self.at;
        let mut payload = vec![
            at.year().rem_euclid(100) as u8,
            at.month() as u8,
            at.day() as u8,
            at.hour() as u8,
            at.minute() as u8,
            at.second() as u8,
        ];
        if self.include_weekday {
            payload.push(at.weekday().num_days_from_sunday() as u8);
        }
        payload
    }

    fn parse_reply(&self, _frame: &Frame) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// 状态查询
// ============================================================================

/// 故障码，0 表示无故障
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultCode(pub u8);

impl FaultCode {
    pub fn is_fault(self) -> bool {
        self.0 != 0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueryFault;

impl FeederCommand for QueryFault {
    type Reply = FaultCode;

    fn command(&self) -> Command {
        Command::Fault
    }

    fn payload(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_reply(&self, frame: &Frame) -> Result<FaultCode> {
        frame
            .payload
            .first()
            .map(|&code| FaultCode(code))
            .ok_or_else(|| decode_failure(frame, "empty fault reply"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedingStatus {
    Idle,
    Feeding,
    Error,
    Other(u8),
}

impl From<u8> for FeedingStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => FeedingStatus::Idle,
            1 => FeedingStatus::Feeding,
            2 => FeedingStatus::Error,
            other => FeedingStatus::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueryFeedingStatus;

impl FeederCommand for QueryFeedingStatus {
    type Reply = FeedingStatus;

    fn command(&self) -> Command {
        Command::FeedingStatus
    }

    fn payload(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_reply(&self, frame: &Frame) -> Result<FeedingStatus> {
        frame
            .payload
            .first()
            .map(|&v| FeedingStatus::from(v))
            .ok_or_else(|| decode_failure(frame, "empty feeding status reply"))
    }
}

/// 供电方式，0 为电池，其余为外接直流电源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSupply {
    Battery,
    Dc,
}

impl From<u8> for PowerSupply {
    fn from(value: u8) -> Self {
        if value == 0 {
            PowerSupply::Battery
        } else {
            PowerSupply::Dc
        }
    }
}

impl fmt::Display for PowerSupply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerSupply::Battery => write!(f, "电池"),
            PowerSupply::Dc => write!(f, "外接电源"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueryPowerSupply;

impl FeederCommand for QueryPowerSupply {
    type Reply = PowerSupply;

    fn command(&self) -> Command {
        Command::PowerSupplyMethod
    }

    fn payload(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_reply(&self, frame: &Frame) -> Result<PowerSupply> {
        frame
            .payload
            .first()
            .map(|&v| PowerSupply::from(v))
            .ok_or_else(|| decode_failure(frame, "empty power supply reply"))
    }
}

// ============================================================================
// 验证码
// ============================================================================

/// 发送家庭 ID（验证码），8 位十六进制数字打包为 4 字节
#[derive(Debug, Clone, Copy)]
pub struct VerifyFamilyId {
    code: [u8; 4],
}

impl VerifyFamilyId {
    pub fn new(code: &str) -> Result<Self> {
        let invalid =
            || FeederError::InvalidArgument(format!("verification code must be 8 hex digits: '{code}'"));
        if code.len() != 8 || !code.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let mut bytes = [0u8; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&code[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
        }
        Ok(Self { code: bytes })
    }
}

impl FeederCommand for VerifyFamilyId {
    type Reply = bool;

    fn command(&self) -> Command {
        Command::SetFamilyId
    }

    fn payload(&self) -> Vec<u8> {
        self.code.to_vec()
    }

    fn parse_reply(&self, frame: &Frame) -> Result<bool> {
        parse_flag(frame)
    }

    fn timeout(&self, config: &FeederConfig) -> Duration {
        config.verification_timeout()
    }
}
