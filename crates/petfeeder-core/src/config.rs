//! 配置和持久化
//!
//! 轮询间隔、超时、订阅重试等参数的存储和读取。
//! 配置文件位于 `~/.config/petfeeder/config.toml`，不存在时使用默认值。

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::{DEFAULT_VERIFICATION_CODE, DeviceVariant};

/// 扫描时识别喂食器的默认名称前缀
pub const DEFAULT_NAME_PREFIXES: [&str; 5] = ["Du", "JK", "ALI", "PET", "FEED"];

/// 客户端配置
///
/// 时间类字段以毫秒保存，便于手工编辑 TOML。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeederConfig {
    /// 通知缓冲轮询间隔
    pub poll_interval_ms: u64,
    /// 普通命令的应答时限
    pub command_timeout_ms: u64,
    /// 计划查询的应答时限（应答较长，部分固件分多次通知送达）
    pub schedule_timeout_ms: u64,
    /// 非快速喂食时每项前置查询的时限
    pub precheck_timeout_ms: u64,
    /// 验证码应答时限
    pub verification_timeout_ms: u64,
    /// 连接后服务发现的时限
    pub service_discovery_timeout_ms: u64,
    /// 订阅通知的最大尝试次数
    pub subscribe_attempts: u32,
    /// 订阅重试间隔
    pub subscribe_backoff_ms: u64,
    /// 通知缓冲最多保留的条目数
    pub notification_capacity: usize,
    /// 扫描时长（秒）
    pub scan_duration_secs: u64,
    /// 识别喂食器的名称前缀
    pub name_prefixes: Vec<String>,
    /// 连接后发送的验证码
    pub verification_code: String,
    /// 默认设备地址（CLI 未指定时使用）
    pub default_address: Option<String>,
    /// 默认设备变体
    pub default_variant: Option<DeviceVariant>,
    /// 时间同步载荷是否附带星期字节
    pub time_sync_weekday: bool,
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            command_timeout_ms: 4_000,
            schedule_timeout_ms: 6_000,
            precheck_timeout_ms: 1_500,
            verification_timeout_ms: 2_000,
            service_discovery_timeout_ms: 5_000,
            subscribe_attempts: 3,
            subscribe_backoff_ms: 2_000,
            notification_capacity: 64,
            scan_duration_secs: 10,
            name_prefixes: DEFAULT_NAME_PREFIXES.iter().map(ToString::to_string).collect(),
            verification_code: DEFAULT_VERIFICATION_CODE.to_string(),
            default_address: None,
            default_variant: None,
            time_sync_weekday: true,
        }
    }
}

impl FeederConfig {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("petfeeder")
            .join("config.toml")
    }

    /// 加载配置（如果文件不存在则使用默认值）
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => {
                        debug!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        warn!("Failed to parse config: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    warn!("Failed to read config file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存配置
    pub fn save(&self) -> std::io::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, content)?;
        debug!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn schedule_timeout(&self) -> Duration {
        Duration::from_millis(self.schedule_timeout_ms)
    }

    pub fn precheck_timeout(&self) -> Duration {
        Duration::from_millis(self.precheck_timeout_ms)
    }

    pub fn verification_timeout(&self) -> Duration {
        Duration::from_millis(self.verification_timeout_ms)
    }

    pub fn service_discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.service_discovery_timeout_ms)
    }

    pub fn subscribe_backoff(&self) -> Duration {
        Duration::from_millis(self.subscribe_backoff_ms)
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_duration_secs)
    }
}
