//! btleplug 实现的 [`Transport`]
//!
//! 通知通过 `Peripheral::notifications()` 流送达，
//! 由一个后台任务按特征 UUID 过滤后交给回调。

use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral as PlatformPeripheral};
use futures_util::StreamExt;
use log::{debug, info, trace};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use uuid::Uuid;

use crate::ble::scanner::normalize_address;
use crate::error::TransportError;
use crate::link::{GattService, NotificationHandler, Transport};

/// 查找设备时轮询外设列表的间隔
const FIND_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// 获取第一个蓝牙适配器
pub async fn default_adapter() -> Result<Adapter, TransportError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(TransportError::NoAdapter)
}

pub struct BtleTransport {
    peripheral: PlatformPeripheral,
    notify_task: Mutex<Option<JoinHandle<()>>>,
}

impl BtleTransport {
    /// 包装一个已有的外设句柄（例如由外部重连逻辑提供）
    pub fn new(peripheral: PlatformPeripheral) -> Self {
        Self {
            peripheral,
            notify_task: Mutex::new(None),
        }
    }

    /// 扫描并按地址查找设备
    pub async fn find(
        adapter: &Adapter,
        address: &str,
        scan_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let wanted = normalize_address(address);
        adapter.start_scan(ScanFilter::default()).await?;
        info!("Looking for {} (up to {:?})", wanted, scan_timeout);

        let deadline = Instant::now() + scan_timeout;
        let found = loop {
            if let Some(peripheral) = Self::find_cached(adapter, &wanted).await? {
                break Some(peripheral);
            }
            if Instant::now() >= deadline {
                break None;
            }
            time::sleep(FIND_POLL_INTERVAL).await;
        };

        if let Err(e) = adapter.stop_scan().await {
            debug!("Failed to stop scan: {}", e);
        }

        found
            .map(Self::new)
            .ok_or(TransportError::DeviceNotFound(wanted))
    }

    async fn find_cached(
        adapter: &Adapter,
        wanted: &str,
    ) -> Result<Option<PlatformPeripheral>, TransportError> {
        for peripheral in adapter.peripherals().await? {
            if normalize_address(&peripheral.address().to_string()) == wanted {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }

    pub fn peripheral(&self) -> &PlatformPeripheral {
        &self.peripheral
    }

    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }

    fn stop_notify_task(&self) {
        if let Some(task) = self.notify_task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for BtleTransport {
    fn drop(&mut self) {
        self.stop_notify_task();
    }
}

#[async_trait::async_trait]
impl Transport for BtleTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        info!("Connecting to {}", self.peripheral.address());
        self.peripheral.connect().await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.stop_notify_task();
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn discover_services(&self) -> Result<Vec<GattService>, TransportError> {
        self.peripheral.discover_services().await?;
        Ok(self
            .peripheral
            .services()
            .into_iter()
            .map(|s| GattService {
                uuid: s.uuid,
                characteristics: s.characteristics.iter().map(|c| c.uuid).collect(),
            })
            .collect())
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<(), TransportError> {
        let characteristic = self.characteristic(characteristic)?;
        // 设备普遍只支持无应答写
        let write_type = if characteristic
            .properties
            .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
        {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };
        self.peripheral
            .write(&characteristic, data, write_type)
            .await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        characteristic: Uuid,
        handler: NotificationHandler,
    ) -> Result<(), TransportError> {
        let target = self.characteristic(characteristic)?;
        self.peripheral.subscribe(&target).await?;
        let mut stream = self.peripheral.notifications().await?;

        let task = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid == characteristic {
                    handler(&notification.value);
                } else {
                    trace!("Ignoring notification from {}", notification.uuid);
                }
            }
            debug!("Notification stream for {} ended", characteristic);
        });

        if let Some(previous) = self.notify_task.lock().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), TransportError> {
        self.stop_notify_task();
        let target = self.characteristic(characteristic)?;
        self.peripheral.unsubscribe(&target).await?;
        Ok(())
    }
}
