//! 目标设备解析与连接
//!
//! 地址优先取命令行，其次取配置文件；都没有时扫描并选信号最强的一台。

use anyhow::{Context, Result, bail};
use tracing::info;

use petfeeder_core::{
    BtleTransport, DeviceVariant, DiscoveredFeeder, FeederConfig, FeederDevice, discover_feeders,
};

/// 命令行中与目标设备相关的参数
pub struct Target {
    pub address: Option<String>,
    pub variant: Option<DeviceVariant>,
    pub code: Option<String>,
}

/// 扫描并挑选信号最强的喂食器
async fn pick_nearest(config: &FeederConfig) -> Result<DiscoveredFeeder> {
    let devices = discover_feeders(config.scan_duration(), &config.name_prefixes)
        .await
        .context("scan failed")?;
    let Some(device) = devices
        .into_iter()
        .max_by_key(|d| d.rssi.unwrap_or(i16::MIN))
    else {
        bail!(
            "no feeder found within {}s, pass --address or set default_address in {}",
            config.scan_duration_secs,
            FeederConfig::config_path().display()
        );
    };
    info!("Using {} ({}, {})", device.address, device.name, device.variant);
    Ok(device)
}

pub async fn open(target: &Target, config: &FeederConfig) -> Result<FeederDevice<BtleTransport>> {
    let address = target
        .address
        .clone()
        .or_else(|| config.default_address.clone());

    // 命令行验证码覆盖配置文件，构造设备时统一校验
    let mut config = config.clone();
    if let Some(code) = &target.code {
        config.verification_code = code.clone();
    }

    let mut feeder = match address {
        Some(address) => {
            let variant = target.variant.or(config.default_variant).unwrap_or_else(|| {
                info!("No variant given for {}, assuming standard", address);
                DeviceVariant::Standard
            });
            FeederDevice::new(address, variant, config)?
        }
        None => {
            let device = pick_nearest(&config).await?;
            match target.variant {
                Some(variant) => FeederDevice::new(device.address, variant, config)?,
                None => FeederDevice::from_discovered(&device, config)?,
            }
        }
    };

    feeder
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", feeder.address()))?;
    Ok(feeder)
}
