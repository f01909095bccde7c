//! 链路层
//!
//! - [`Transport`]: 平台 BLE 栈需要提供的最小能力集
//! - [`LinkSession`]: 持有一条连接，负责就绪校验、订阅重试与通知缓冲
//! - [`NotificationBuffer`]: 通知回调与命令等待之间共享的有界队列

pub mod buffer;
pub mod session;

pub use buffer::NotificationBuffer;
pub use session::{LinkSession, LinkState};

use std::sync::Arc;
use uuid::Uuid;

use crate::error::TransportError;

/// 通知回调，收到的原始字节原样传入
pub type NotificationHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// 服务发现结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

impl GattService {
    pub fn has_characteristic(&self, uuid: Uuid) -> bool {
        self.characteristics.contains(&uuid)
    }
}

/// 平台 BLE 能力接口
///
/// 实现可以由本库自行创建（见 [`crate::ble::BtleTransport`]），
/// 也可以由外部重连框架构造后交给 [`LinkSession`]。
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// 连接到构造时指定的设备地址
    async fn connect(&self) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    async fn is_connected(&self) -> bool;

    /// 执行一次 GATT 服务发现往返
    async fn discover_services(&self) -> Result<Vec<GattService>, TransportError>;

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<(), TransportError>;

    async fn subscribe(
        &self,
        characteristic: Uuid,
        handler: NotificationHandler,
    ) -> Result<(), TransportError>;

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), TransportError>;
}
