//! 链路会话
//!
//! 状态流转:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Ready -> Disconnected
//! ```
//!
//! `Ready` 要求服务发现完成且回复特征的通知订阅已生效。
//! 订阅在每条连接上只建立一次，不会按命令反复 stop/start
//! （部分平台 BLE 栈会因此变得不稳定）。

use log::{debug, info, trace, warn};
use std::fmt;
use std::sync::Arc;

use crate::config::FeederConfig;
use crate::error::{FeederError, Result};
use crate::link::{NotificationBuffer, NotificationHandler, Transport};
use crate::protocol::{DeviceVariant, hex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    /// 已连接，尚未完成就绪校验
    Connected,
    Ready,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Ready => "ready",
        })
    }
}

pub struct LinkSession<T: Transport> {
    transport: T,
    variant: DeviceVariant,
    state: LinkState,
    buffer: Arc<NotificationBuffer>,
    config: FeederConfig,
}

impl<T: Transport> LinkSession<T> {
    pub fn new(transport: T, variant: DeviceVariant, config: &FeederConfig) -> Self {
        Self {
            transport,
            variant,
            state: LinkState::Disconnected,
            buffer: Arc::new(NotificationBuffer::new(config.notification_capacity)),
            config: config.clone(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn variant(&self) -> DeviceVariant {
        self.variant
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn notifications(&self) -> &NotificationBuffer {
        &self.buffer
    }

    /// 建立连接并校验就绪
    ///
    /// 传入的 transport 若已连接（外部重连框架交付的句柄），跳过连接步骤。
    /// 就绪校验通过一次服务发现往返完成，而不是固定延时。
    pub async fn connect(&mut self) -> Result<()> {
        if self.state == LinkState::Ready && self.transport.is_connected().await {
            debug!("Link already ready, keeping existing subscription");
            return Ok(());
        }

        self.state = LinkState::Connecting;
        match self.establish().await {
            Ok(()) => {
                self.state = LinkState::Ready;
                info!("Link ready ({} variant)", self.variant);
                Ok(())
            }
            Err(e) => {
                self.state = LinkState::Disconnected;
                Err(e)
            }
        }
    }

    async fn establish(&mut self) -> Result<()> {
        if self.transport.is_connected().await {
            debug!("Transport already connected, skipping connect");
        } else {
            debug!("Connecting transport");
            self.transport
                .connect()
                .await
                .map_err(|e| FeederError::LinkNotReady(format!("connect failed: {e}")))?;
        }
        self.state = LinkState::Connected;

        self.verify_services().await?;
        self.subscribe_with_retry().await
    }

    async fn verify_services(&self) -> Result<()> {
        let timeout = self.config.service_discovery_timeout();
        debug!("Discovering services (timeout {:?})", timeout);

        let services = tokio::time::timeout(timeout, self.transport.discover_services())
            .await
            .map_err(|_| {
                FeederError::LinkNotReady(format!("service discovery timed out after {timeout:?}"))
            })?
            .map_err(|e| FeederError::LinkNotReady(format!("service discovery failed: {e}")))?;

        let service_uuid = self.variant.service_uuid();
        let service = services
            .iter()
            .find(|s| s.uuid == service_uuid)
            .ok_or_else(|| {
                FeederError::LinkNotReady(format!(
                    "service {service_uuid} not found ({} services discovered), wrong variant?",
                    services.len()
                ))
            })?;

        for uuid in [self.variant.write_uuid(), self.variant.notify_uuid()] {
            if !service.has_characteristic(uuid) {
                return Err(FeederError::LinkNotReady(format!(
                    "characteristic {uuid} missing from service {service_uuid}"
                )));
            }
        }
        Ok(())
    }

    /// 订阅回复特征，失败时退避重试
    ///
    /// 两次尝试之间检查链路是否仍然存活；对端已断开时立即失败。
    async fn subscribe_with_retry(&self) -> Result<()> {
        let attempts = self.config.subscribe_attempts.max(1);
        let notify_uuid = self.variant.notify_uuid();

        for attempt in 1..=attempts {
            let buffer = Arc::clone(&self.buffer);
            let handler: NotificationHandler = Arc::new(move |data: &[u8]| buffer.push(data));

            match self.transport.subscribe(notify_uuid, handler).await {
                Ok(()) => {
                    debug!("Subscribed to {} (attempt {}/{})", notify_uuid, attempt, attempts);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Subscribe attempt {}/{} failed: {}", attempt, attempts, e);
                    if attempt == attempts {
                        break;
                    }
                    if !self.transport.is_connected().await {
                        return Err(FeederError::LinkNotReady(
                            "peripheral dropped the link during subscription".to_string(),
                        ));
                    }
                    tokio::time::sleep(self.config.subscribe_backoff()).await;
                }
            }
        }

        Err(FeederError::LinkNotReady(format!(
            "notification subscription failed after {attempts} attempts"
        )))
    }

    /// 替换持有的 transport，返回旧句柄
    ///
    /// 会话回到 `Disconnected`，需再次 [`connect`](Self::connect) 校验新句柄。
    pub fn replace_client(&mut self, transport: T) -> T {
        debug!("Replacing transport (was {})", self.state);
        self.buffer.clear();
        self.state = LinkState::Disconnected;
        std::mem::replace(&mut self.transport, transport)
    }

    /// 丢弃未消费的通知
    pub fn clear_notifications(&self) {
        let stale = self.buffer.len();
        if stale > 0 {
            trace!("Discarding {} stale notification(s)", stale);
        }
        self.buffer.clear();
    }

    pub async fn write(&self, frame: &[u8]) -> Result<()> {
        if self.state != LinkState::Ready {
            return Err(FeederError::LinkNotReady(format!(
                "cannot write while link is {}",
                self.state
            )));
        }
        trace!(">> {}", hex(frame));
        self.transport.write(self.variant.write_uuid(), frame).await?;
        Ok(())
    }

    /// 会话就绪且底层连接仍然存活
    pub async fn is_alive(&self) -> bool {
        self.state == LinkState::Ready && self.transport.is_connected().await
    }

    /// 断开连接（尽力而为）
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.state == LinkState::Ready {
            if let Err(e) = self.transport.unsubscribe(self.variant.notify_uuid()).await {
                debug!("Unsubscribe failed: {}", e);
            }
        }
        self.state = LinkState::Disconnected;
        self.buffer.clear();

        if self.transport.is_connected().await {
            self.transport.disconnect().await?;
        }
        info!("Link disconnected");
        Ok(())
    }
}
