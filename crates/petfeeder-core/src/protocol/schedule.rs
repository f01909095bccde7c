//! 喂食计划
//!
//! 每个时段在线路上占 5 字节：`week, hour, minute, portions, enabled`。
//! `week` 为星期位掩码，周日 = 0x01，周一 = 0x02 …… 周六 = 0x40。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{FeederError, Result};

/// 单个时段在线路上的字节数
pub const SLOT_RECORD_LEN: usize = 5;
/// 设备支持的最大时段数
pub const MAX_SCHEDULE_SLOTS: usize = 15;
pub const MIN_PORTIONS: u8 = 1;
pub const MAX_PORTIONS: u8 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Sun,
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Sun,
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
    ];

    pub fn bit(self) -> u8 {
        1 << (self as u8)
    }

    pub fn name(self) -> &'static str {
        match self {
            Weekday::Sun => "sun",
            Weekday::Mon => "mon",
            Weekday::Tue => "tue",
            Weekday::Wed => "wed",
            Weekday::Thu => "thu",
            Weekday::Fri => "fri",
            Weekday::Sat => "sat",
        }
    }

    fn full_name(self) -> &'static str {
        match self {
            Weekday::Sun => "sunday",
            Weekday::Mon => "monday",
            Weekday::Tue => "tuesday",
            Weekday::Wed => "wednesday",
            Weekday::Thu => "thursday",
            Weekday::Fri => "friday",
            Weekday::Sat => "saturday",
        }
    }
}

impl FromStr for Weekday {
    type Err = FeederError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        Weekday::ALL
            .into_iter()
            .find(|d| lower == d.name() || lower == d.full_name())
            .ok_or_else(|| FeederError::InvalidArgument(format!("unknown weekday '{s}'")))
    }
}

/// 星期集合（位掩码）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "Vec<Weekday>", from = "Vec<Weekday>")]
pub struct Weekdays(u8);

impl Weekdays {
    pub const NONE: Weekdays = Weekdays(0);
    pub const ALL_DAYS: Weekdays = Weekdays(0x7F);
    /// 周一至周五
    pub const WEEKDAYS: Weekdays = Weekdays(0x3E);
    /// 周六、周日
    pub const WEEKEND: Weekdays = Weekdays(0x41);

    /// 从线路掩码构造，忽略最高位
    pub fn from_bits(bits: u8) -> Self {
        Weekdays(bits & 0x7F)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, day: Weekday) -> bool {
        self.0 & day.bit() != 0
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= day.bit();
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn days(self) -> Vec<Weekday> {
        Weekday::ALL
            .into_iter()
            .filter(|d| self.contains(*d))
            .collect()
    }
}

impl FromIterator<Weekday> for Weekdays {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = Weekdays::NONE;
        for day in iter {
            set.insert(day);
        }
        set
    }
}

impl From<Vec<Weekday>> for Weekdays {
    fn from(days: Vec<Weekday>) -> Self {
        days.into_iter().collect()
    }
}

impl From<Weekdays> for Vec<Weekday> {
    fn from(set: Weekdays) -> Self {
        set.days()
    }
}

impl fmt::Display for Weekdays {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Weekdays::ALL_DAYS => f.write_str("all"),
            Weekdays::WEEKDAYS => f.write_str("weekdays"),
            Weekdays::WEEKEND => f.write_str("weekend"),
            set => {
                let names: Vec<&str> = set.days().into_iter().map(Weekday::name).collect();
                f.write_str(&names.join(","))
            }
        }
    }
}

impl FromStr for Weekdays {
    type Err = FeederError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "all" | "daily" => Ok(Weekdays::ALL_DAYS),
            "weekdays" => Ok(Weekdays::WEEKDAYS),
            "weekend" => Ok(Weekdays::WEEKEND),
            list => list
                .split(',')
                .filter(|p| !p.trim().is_empty())
                .map(str::parse::<Weekday>)
                .collect::<Result<Weekdays>>(),
        }
    }
}

/// 一天中的时刻，保证为合法的 HH:MM
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(FeederError::InvalidArgument(format!(
                "invalid time {hour:02}:{minute:02}"
            )));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(self) -> u8 {
        self.hour
    }

    pub fn minute(self) -> u8 {
        self.minute
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = FeederError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || FeederError::InvalidArgument(format!("invalid time '{s}', expected HH:MM"));
        let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
        let hour = h.parse().map_err(|_| invalid())?;
        let minute = m.parse().map_err(|_| invalid())?;
        TimeOfDay::new(hour, minute)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = FeederError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

/// 出粮份数，范围 1..=15
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Portions(u8);

impl Portions {
    pub fn new(count: u8) -> Result<Self> {
        if (MIN_PORTIONS..=MAX_PORTIONS).contains(&count) {
            Ok(Portions(count))
        } else {
            Err(FeederError::InvalidArgument(format!(
                "portions must be between {MIN_PORTIONS} and {MAX_PORTIONS}, got {count}"
            )))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Portions {
    type Error = FeederError;

    fn try_from(count: u8) -> Result<Self> {
        Portions::new(count)
    }
}

impl From<Portions> for u8 {
    fn from(p: Portions) -> Self {
        p.0
    }
}

/// 单个喂食时段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedSchedule {
    pub weekdays: Weekdays,
    pub time: TimeOfDay,
    pub portions: Portions,
    pub enabled: bool,
}

impl FeedSchedule {
    pub fn new(weekdays: Weekdays, time: TimeOfDay, portions: Portions, enabled: bool) -> Self {
        Self {
            weekdays,
            time,
            portions,
            enabled,
        }
    }

    pub fn to_bytes(&self) -> [u8; SLOT_RECORD_LEN] {
        [
            self.weekdays.bits(),
            self.time.hour(),
            self.time.minute(),
            self.portions.get(),
            u8::from(self.enabled),
        ]
    }

    /// 解析一条 5 字节记录；时间或份数越界时返回 `None`
    pub fn from_record(record: &[u8]) -> Option<Self> {
        let [week, hour, minute, portions, enabled] = *record else {
            return None;
        };
        Some(Self {
            weekdays: Weekdays::from_bits(week),
            time: TimeOfDay::new(hour, minute).ok()?,
            portions: Portions::new(portions).ok()?,
            enabled: enabled != 0,
        })
    }
}

impl fmt::Display for FeedSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.time, self.portions.get(), self.weekdays)?;
        if !self.enabled {
            f.write_str("/off")?;
        }
        Ok(())
    }
}

/// 文本格式 `HH:MM/portions/days[/off]`，例如 `08:00/2/mon,wed,fri`
impl FromStr for FeedSchedule {
    type Err = FeederError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        let (time, portions, days, enabled) = match parts.as_slice() {
            [time, portions] => (time, portions, "all", true),
            [time, portions, days] => (time, portions, *days, true),
            [time, portions, days, state] => {
                let enabled = match state.trim().to_lowercase().as_str() {
                    "on" | "enabled" => true,
                    "off" | "disabled" => false,
                    other => {
                        return Err(FeederError::InvalidArgument(format!(
                            "invalid slot state '{other}', expected on/off"
                        )));
                    }
                };
                (time, portions, *days, enabled)
            }
            _ => {
                return Err(FeederError::InvalidArgument(format!(
                    "invalid slot '{s}', expected HH:MM/portions/days[/off]"
                )));
            }
        };

        let portions: u8 = portions
            .trim()
            .parse()
            .map_err(|_| FeederError::InvalidArgument(format!("invalid portions '{portions}'")))?;
        let weekdays: Weekdays = days.parse()?;
        if weekdays.is_empty() {
            return Err(FeederError::InvalidArgument(format!(
                "slot '{s}' has no weekdays"
            )));
        }

        Ok(FeedSchedule::new(
            weekdays,
            time.parse()?,
            Portions::new(portions)?,
            enabled,
        ))
    }
}
