//! 测试用的脚本化 transport
//!
//! 写入的命令由 responder 映射为应答帧，通过订阅回调同步送回，
//! 链路断开、订阅失败等情况由测试直接控制。

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

use petfeeder_core::protocol::frame::encode_reply;
use petfeeder_core::{
    Command, DeviceVariant, FeederConfig, GattService, NotificationHandler, Transport,
    TransportError,
};

/// 由 (命令, 出站载荷) 得到要送回的通知
pub type Responder = Box<dyn Fn(Command, &[u8]) -> Vec<Vec<u8>> + Send + Sync>;

#[derive(Default)]
struct State {
    connected: bool,
    connect_calls: usize,
    disconnect_calls: usize,
    services: Vec<GattService>,
    stall_discovery: bool,
    subscribe_failures: usize,
    drop_link_on_subscribe_failure: bool,
    subscribe_attempts: usize,
    unsubscribe_calls: usize,
    writes: Vec<Vec<u8>>,
    handler: Option<NotificationHandler>,
    responder: Option<Responder>,
}

#[derive(Clone)]
pub struct ScriptedTransport {
    state: Arc<Mutex<State>>,
}

pub fn services_for(variant: DeviceVariant) -> Vec<GattService> {
    vec![GattService {
        uuid: variant.service_uuid(),
        characteristics: vec![variant.write_uuid(), variant.notify_uuid()],
    }]
}

/// 设备应答帧
pub fn reply(command: Command, payload: &[u8]) -> Vec<u8> {
    encode_reply(command, payload).unwrap()
}

/// 测试中把轮询间隔之外的参数保持默认
pub fn test_config() -> FeederConfig {
    FeederConfig::default()
}

/// 所有查询都回复“正常/关闭”，设置类命令回显
pub fn cooperative(command: Command, payload: &[u8]) -> Vec<Vec<u8>> {
    let body: Vec<u8> = match command {
        Command::SetFamilyId | Command::Feeding => vec![1],
        Command::Fault | Command::FeedingStatus => vec![0],
        Command::PowerSupplyMethod => vec![1],
        Command::ChildLock | Command::ReminderTone if payload.is_empty() => vec![0],
        _ => payload.to_vec(),
    };
    vec![reply(command, &body)]
}

impl ScriptedTransport {
    pub fn new(variant: DeviceVariant) -> Self {
        let state = State {
            services: services_for(variant),
            ..State::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// 使用 [`cooperative`] 作为应答脚本
    pub fn cooperative(variant: DeviceVariant) -> Self {
        let transport = Self::new(variant);
        transport.respond_with(cooperative);
        transport
    }

    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(Command, &[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static,
    {
        self.state.lock().responder = Some(Box::new(responder));
    }

    pub fn set_services(&self, services: Vec<GattService>) {
        self.state.lock().services = services;
    }

    pub fn stall_discovery(&self) {
        self.state.lock().stall_discovery = true;
    }

    pub fn fail_subscribe(&self, times: usize) {
        self.state.lock().subscribe_failures = times;
    }

    pub fn drop_link_on_subscribe_failure(&self) {
        self.state.lock().drop_link_on_subscribe_failure = true;
    }

    /// 模拟对端断开或外部已连接
    pub fn set_connected(&self, connected: bool) {
        self.state.lock().connected = connected;
    }

    /// 不经过命令直接投递一条通知
    pub fn inject(&self, data: &[u8]) {
        let handler = self.state.lock().handler.clone();
        if let Some(handler) = handler {
            handler(data);
        }
    }

    pub fn connect_calls(&self) -> usize {
        self.state.lock().connect_calls
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state.lock().disconnect_calls
    }

    pub fn subscribe_attempts(&self) -> usize {
        self.state.lock().subscribe_attempts
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.state.lock().unsubscribe_calls
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().writes.clone()
    }

    /// 已写入帧的命令码序列
    pub fn written_commands(&self) -> Vec<Command> {
        self.writes()
            .iter()
            .filter_map(|frame| Command::try_from(frame[1]).ok())
            .collect()
    }

    /// 某命令最近一次写入的载荷
    pub fn last_payload(&self, command: Command) -> Option<Vec<u8>> {
        self.writes()
            .iter()
            .rev()
            .find(|frame| frame[1] == command.code())
            .map(|frame| frame[3..3 + frame[2] as usize].to_vec())
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.connect_calls += 1;
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.disconnect_calls += 1;
        state.connected = false;
        state.handler = None;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    async fn discover_services(&self) -> Result<Vec<GattService>, TransportError> {
        let stall = self.state.lock().stall_discovery;
        if stall {
            std::future::pending::<()>().await;
        }
        let state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        Ok(state.services.clone())
    }

    async fn write(&self, _characteristic: Uuid, data: &[u8]) -> Result<(), TransportError> {
        let (handler, replies) = {
            let mut state = self.state.lock();
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            state.writes.push(data.to_vec());

            let replies = match (&state.responder, Command::try_from(data[1])) {
                (Some(responder), Ok(command)) => {
                    let payload = &data[3..3 + data[2] as usize];
                    responder(command, payload)
                }
                _ => Vec::new(),
            };
            (state.handler.clone(), replies)
        };

        if let Some(handler) = handler {
            for notification in replies {
                handler(&notification);
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        _characteristic: Uuid,
        handler: NotificationHandler,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.subscribe_attempts += 1;
        if state.subscribe_failures > 0 {
            state.subscribe_failures -= 1;
            if state.drop_link_on_subscribe_failure {
                state.connected = false;
            }
            return Err(TransportError::Other("scripted subscribe failure".to_string()));
        }
        state.handler = Some(handler);
        Ok(())
    }

    async fn unsubscribe(&self, _characteristic: Uuid) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.unsubscribe_calls += 1;
        state.handler = None;
        Ok(())
    }
}
