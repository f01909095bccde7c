//! BLE Scanner - 发现喂食器
//!
//! 不使用服务 UUID 过滤（很多设备不广播服务 UUID），
//! 而是扫描全部外设，按广播名称前缀识别喂食器，
//! 并根据名称推断设备变体。

use btleplug::api::{Central, CentralEvent, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Peripheral as PlatformPeripheral};
use futures_util::StreamExt;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::ble::transport::default_adapter;
use crate::error::TransportError;
use crate::protocol::DeviceVariant;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredFeeder {
    pub address: String,
    pub name: String,
    pub variant: DeviceVariant,
    pub rssi: Option<i16>,
}

/// 扫描回调接口，用于实时汇报发现的设备
#[async_trait::async_trait]
pub trait ScanCallback: Send + Sync {
    async fn on_device_found(&self, device: DiscoveredFeeder);
}

/// 名称是否匹配任一前缀（忽略大小写与首尾空白）
pub fn is_feeder_name<S: AsRef<str>>(name: &str, prefixes: &[S]) -> bool {
    let name = name.trim().to_uppercase();
    !name.is_empty()
        && prefixes
            .iter()
            .any(|p| name.starts_with(&p.as_ref().to_uppercase()))
}

/// 统一地址格式为大写冒号分隔
///
/// 部分平台返回不带分隔符或以 `-` 分隔的地址。
pub fn normalize_address(address: &str) -> String {
    let upper = address.trim().to_uppercase();
    let digits: String = upper.chars().filter(|c| !matches!(c, ':' | '-')).collect();
    if digits.len() == 12 && digits.chars().all(|c| c.is_ascii_hexdigit()) {
        digits
            .as_bytes()
            .chunks(2)
            .map(|pair| String::from_utf8_lossy(pair).into_owned())
            .collect::<Vec<_>>()
            .join(":")
    } else {
        upper
    }
}

pub struct FeederScanner {
    adapter: Adapter,
}

impl FeederScanner {
    pub async fn new() -> Result<Self, TransportError> {
        Ok(Self {
            adapter: default_adapter().await?,
        })
    }

    pub fn with_adapter(adapter: Adapter) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    pub async fn scan<S: AsRef<str> + Sync>(
        &self,
        duration: Duration,
        prefixes: &[S],
        callback: Option<Arc<dyn ScanCallback>>,
    ) -> Result<Vec<DiscoveredFeeder>, TransportError> {
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        info!("Starting BLE scan for {} seconds", duration.as_secs());

        let mut found: HashMap<String, DiscoveredFeeder> = HashMap::new();
        let timeout_fut = tokio::time::sleep(duration);
        tokio::pin!(timeout_fut);

        loop {
            tokio::select! {
                () = &mut timeout_fut => {
                    break;
                }
                event = events.next() => {
                    match event {
                        Some(CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) => {
                            if let Ok(peripheral) = self.adapter.peripheral(&id).await {
                                self.consider(&peripheral, prefixes, &mut found, callback.as_ref()).await;
                            }
                        }
                        None => break,
                        _ => {}
                    }
                }
            }
        }

        // 也检查扫描开始前就已缓存的设备
        let cached = self.adapter.peripherals().await?;
        debug!("Checking {} cached peripherals", cached.len());
        for peripheral in cached {
            self.consider(&peripheral, prefixes, &mut found, callback.as_ref())
                .await;
        }

        if let Err(e) = self.adapter.stop_scan().await {
            debug!("Failed to stop scan: {}", e);
        }

        let mut devices: Vec<DiscoveredFeeder> = found.into_values().collect();
        devices.sort_by(|a, b| a.address.cmp(&b.address));
        info!("Scan complete: found {} feeder(s)", devices.len());
        Ok(devices)
    }

    async fn consider<S: AsRef<str>>(
        &self,
        peripheral: &PlatformPeripheral,
        prefixes: &[S],
        found: &mut HashMap<String, DiscoveredFeeder>,
        callback: Option<&Arc<dyn ScanCallback>>,
    ) {
        let Ok(Some(props)) = peripheral.properties().await else {
            return;
        };
        let name = props.local_name.unwrap_or_default().trim().to_string();
        if !is_feeder_name(&name, prefixes) {
            return;
        }

        let address = normalize_address(&props.address.to_string());
        if found.contains_key(&address) {
            return;
        }

        let device = DiscoveredFeeder {
            variant: DeviceVariant::from_name(&name),
            address: address.clone(),
            name,
            rssi: props.rssi,
        };
        info!(
            "Discovered feeder: name='{}', addr={}, variant={}, rssi={:?}",
            device.name, device.address, device.variant, device.rssi
        );

        // 实时汇报
        if let Some(cb) = callback {
            cb.on_device_found(device.clone()).await;
        }
        found.insert(address, device);
    }
}

/// 使用默认适配器扫描喂食器
pub async fn discover_feeders<S: AsRef<str> + Sync>(
    duration: Duration,
    prefixes: &[S],
) -> Result<Vec<DiscoveredFeeder>, TransportError> {
    FeederScanner::new().await?.scan(duration, prefixes, None).await
}
