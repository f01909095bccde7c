//! Petfeeder CLI
//!
//! 命令行客户端，直接通过 BLE 控制喂食器

mod device;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use petfeeder_core::{
    BtleTransport, DeviceVariant, FeedOutcome, FeedSchedule, FeederConfig, FeederDevice,
    FeedingStatus, PowerSupply, SwitchState, discover_feeders,
};

#[derive(Parser)]
#[command(name = "petfeeder", version, about = "蓝牙智能喂食器命令行工具")]
struct Cli {
    /// 设备地址 (默认: 配置文件中的 default_address，否则扫描)
    #[arg(short, long, global = true)]
    address: Option<String>,
    /// 设备变体: standard / jk / ali
    #[arg(long, global = true)]
    variant: Option<DeviceVariant>,
    /// 8 位十六进制验证码
    #[arg(long, global = true)]
    code: Option<String>,
    /// 以 JSON 输出结果
    #[arg(long, global = true)]
    json: bool,
    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 扫描附近的喂食器
    Scan {
        /// 扫描时长 (秒)
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// 手动出粮
    Feed {
        /// 份数 (1-15)
        #[arg(default_value_t = 1)]
        portions: u8,
        /// 跳过故障/童锁/出粮状态检查
        #[arg(long)]
        fast: bool,
    },
    /// 喂食计划
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
    /// 童锁
    ChildLock {
        #[arg(value_enum, default_value_t = SwitchAction::Status)]
        action: SwitchAction,
    },
    /// 提示音
    Tone {
        #[arg(value_enum, default_value_t = SwitchAction::Status)]
        action: SwitchAction,
    },
    /// 设备名称与固件版本
    Info,
    /// 将设备时钟同步为本机时间
    SyncTime,
    /// 故障、出粮状态、供电方式与开关汇总
    Status,
    /// 配置文件
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// 读取当前计划
    Get,
    /// 覆盖写入计划，时段格式 HH:MM/份数/星期[/off]，例如 08:00/2/mon,wed,fri
    Set {
        #[arg(required = true)]
        slots: Vec<String>,
    },
    /// 清空计划
    Clear,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SwitchAction {
    On,
    Off,
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// 显示配置文件路径
    Path,
    /// 显示当前生效的配置
    Show,
    /// 写入默认配置
    Init,
}

#[derive(Serialize)]
struct StatusReport {
    address: String,
    variant: DeviceVariant,
    verified: Option<bool>,
    fault: Option<u8>,
    feeding: Option<FeedingStatus>,
    power_supply: Option<PowerSupply>,
    child_lock: SwitchState,
    reminder_tone: SwitchState,
}

/// 初始化日志系统
///
/// 日志写到 stderr，stdout 只留给命令结果。
fn init_logging(verbose: bool) {
    // 桥接 log crate（petfeeder-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("info,petfeeder_core=debug")
        } else {
            EnvFilter::new("warn")
        }
    });

    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(verbose)
        .compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .try_init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// 超时视为未知
fn known<T>(result: petfeeder_core::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_timeout() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = FeederConfig::load();
    debug!("Config: {}", FeederConfig::config_path().display());

    match cli.command {
        Commands::Scan { timeout } => scan(&config, timeout, cli.json).await,
        Commands::Config { action } => config_command(&config, &action, cli.json),
        command => {
            let target = device::Target {
                address: cli.address,
                variant: cli.variant,
                code: cli.code,
            };
            let mut feeder = device::open(&target, &config).await?;
            let result = run(&mut feeder, command, cli.json).await;
            if let Err(e) = feeder.disconnect().await {
                debug!("Disconnect failed: {}", e);
            }
            result
        }
    }
}

async fn scan(config: &FeederConfig, timeout: Option<u64>, json: bool) -> Result<()> {
    let duration = timeout.map_or_else(|| config.scan_duration(), std::time::Duration::from_secs);
    if !json {
        println!("🔍 扫描喂食器 ({}s)...", duration.as_secs());
    }

    let devices = discover_feeders(duration, &config.name_prefixes).await?;

    if json {
        return print_json(&devices);
    }
    if devices.is_empty() {
        println!("   未发现设备");
    } else {
        for (i, dev) in devices.iter().enumerate() {
            let rssi = dev.rssi.map_or_else(|| "?".to_string(), |r| r.to_string());
            println!(
                "   [{}] {} ({}, {}, rssi {})",
                i, dev.name, dev.address, dev.variant, rssi
            );
        }
    }
    Ok(())
}

fn config_command(config: &FeederConfig, action: &ConfigAction, json: bool) -> Result<()> {
    let path = FeederConfig::config_path();
    match action {
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Show => {
            if json {
                print_json(config)?;
            } else {
                print!("{}", toml::to_string_pretty(config)?);
            }
        }
        ConfigAction::Init => {
            FeederConfig::default()
                .save()
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("已写入默认配置: {}", path.display());
        }
    }
    Ok(())
}

async fn run(feeder: &mut FeederDevice<BtleTransport>, command: Commands, json: bool) -> Result<()> {
    if feeder.is_verified() == Some(false) {
        eprintln!("⚠️  设备拒绝了验证码，部分命令可能无效");
    }

    match command {
        Commands::Feed { portions, fast } => {
            let outcome = feeder.feed(portions, fast).await?;
            if json {
                return print_json(&outcome);
            }
            match outcome {
                FeedOutcome::Acknowledged => println!("🍽️  已出粮 {} 份", portions),
                FeedOutcome::Refused { code } => println!("设备拒绝出粮 (状态码 {})", code),
                FeedOutcome::Completed { records } => {
                    for r in records {
                        let when = r
                            .timestamp
                            .map_or_else(|| "?".to_string(), |t| t.to_string());
                        let result = if r.success { "成功" } else { "失败" };
                        println!("🍽️  {} 出粮 {} 份: {}", when, r.portions, result);
                    }
                }
            }
        }
        Commands::Schedule { action } => schedule(feeder, action, json).await?,
        Commands::ChildLock { action } => {
            let state = switch(feeder, action, true).await?;
            if json {
                return print_json(&state);
            }
            println!("童锁: {}", state);
        }
        Commands::Tone { action } => {
            let state = switch(feeder, action, false).await?;
            if json {
                return print_json(&state);
            }
            println!("提示音: {}", state);
        }
        Commands::Info => {
            let info = feeder.get_device_info().await?;
            if json {
                return print_json(&info);
            }
            println!("名称: {}", info.name);
            println!("版本: {}", info.version);
        }
        Commands::SyncTime => {
            feeder.sync_time_now().await?;
            if !json {
                println!("⏰ 已同步设备时间");
            }
        }
        Commands::Status => {
            let report = StatusReport {
                address: feeder.address().to_string(),
                variant: feeder.variant(),
                verified: feeder.is_verified(),
                fault: known(feeder.query_fault().await)?.map(|f| f.0),
                feeding: known(feeder.query_feeding_status().await)?,
                power_supply: known(feeder.query_power_supply().await)?,
                child_lock: feeder.get_child_lock_status().await?,
                reminder_tone: feeder.get_prompt_sound_status().await?,
            };
            if json {
                return print_json(&report);
            }
            println!("设备: {} ({})", report.address, report.variant);
            match report.fault {
                Some(0) => println!("故障: 无"),
                Some(code) => println!("故障: 0x{:02X}", code),
                None => println!("故障: 未知"),
            }
            match report.feeding {
                Some(status) => println!("出粮状态: {:?}", status),
                None => println!("出粮状态: 未知"),
            }
            match report.power_supply {
                Some(power) => println!("供电: {}", power),
                None => println!("供电: 未知"),
            }
            println!("童锁: {}", report.child_lock);
            println!("提示音: {}", report.reminder_tone);
        }
        Commands::Scan { .. } | Commands::Config { .. } => unreachable!("handled before connecting"),
    }
    Ok(())
}

async fn schedule(
    feeder: &mut FeederDevice<BtleTransport>,
    action: ScheduleAction,
    json: bool,
) -> Result<()> {
    let slots = match action {
        ScheduleAction::Get => feeder.query_schedule().await?,
        ScheduleAction::Set { slots } => {
            let slots = slots
                .iter()
                .map(|s| s.parse::<FeedSchedule>())
                .collect::<petfeeder_core::Result<Vec<_>>>()?;
            feeder.set_schedule(&slots).await?;
            slots
        }
        ScheduleAction::Clear => {
            feeder.set_schedule(&[]).await?;
            Vec::new()
        }
    };

    if json {
        return print_json(&slots);
    }
    if slots.is_empty() {
        println!("📅 无喂食计划");
    } else {
        for (i, slot) in slots.iter().enumerate() {
            println!("📅 [{}] {}", i, slot);
        }
    }
    Ok(())
}

/// 开关类命令；`child_lock` 为 `false` 时操作提示音
async fn switch(
    feeder: &mut FeederDevice<BtleTransport>,
    action: SwitchAction,
    child_lock: bool,
) -> Result<SwitchState> {
    let desired = match action {
        SwitchAction::On => Some(true),
        SwitchAction::Off => Some(false),
        SwitchAction::Status => None,
    };

    if let Some(on) = desired {
        if child_lock {
            feeder.set_child_lock(on).await?;
        } else {
            feeder.set_sound(on).await?;
        }
        return Ok(SwitchState::from(on));
    }

    Ok(if child_lock {
        feeder.get_child_lock_status().await?
    } else {
        feeder.get_prompt_sound_status().await?
    })
}
