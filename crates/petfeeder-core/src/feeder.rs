//! 喂食器设备
//!
//! 每条命令的执行流程：
//!
//! 1. 清空旧通知
//! 2. （非快速模式）查询故障、童锁、出粮状态做前置检查
//! 3. 编码并写入命令
//! 4. 按固定间隔轮询通知缓冲，直到收到可解析的应答或超时
//!
//! 同一设备同一时刻只允许一条命令在途，所有命令方法都需要 `&mut self`。
//! 命令层不做重试，失败时整条操作由调用方决定是否重来。

use chrono::{Local, NaiveDateTime};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::time::Instant;

use crate::ble::{BtleTransport, DiscoveredFeeder, default_adapter};
use crate::config::FeederConfig;
use crate::error::{FeederError, Precondition, Result};
use crate::link::{LinkSession, LinkState, Transport};
use crate::protocol::DeviceVariant;
use crate::protocol::catalog::{
    DeviceInfo, FaultCode, FeedOutcome, FeederCommand, FeedingStatus, ManualFeed, PowerSupply,
    QueryChildLock, QueryDeviceInfo, QueryFault, QueryFeederPlan, QueryFeedingStatus,
    QueryPowerSupply, QueryReminderTone, SetChildLock, SetFeederPlan, SetReminderTone, SwitchState, SyncTime,
    VerifyFamilyId,
};
use crate::protocol::frame::{self, FrameAssembler};
use crate::protocol::schedule::{FeedSchedule, Portions};

/// 设备身份，构造后不变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub address: String,
    pub variant: DeviceVariant,
}

/// 跨连接保留的验证状态
#[derive(Debug, Clone)]
struct Credentials {
    code: String,
    /// `None` 表示尚未得到设备答复
    verified: Option<bool>,
}

/// 超时转为 `None`，其余错误原样返回
fn timeout_as_none<R>(result: Result<R>) -> Result<Option<R>> {
    match result {
        Ok(reply) => Ok(Some(reply)),
        Err(e) if e.is_timeout() => Ok(None),
        Err(e) => Err(e),
    }
}

pub struct FeederDevice<T: Transport> {
    identity: DeviceIdentity,
    credentials: Credentials,
    config: FeederConfig,
    session: Option<LinkSession<T>>,
}

impl<T: Transport> FeederDevice<T> {
    /// 配置中的验证码在这里校验，格式不对时不会进入连接流程
    pub fn new(
        address: impl Into<String>,
        variant: DeviceVariant,
        config: FeederConfig,
    ) -> Result<Self> {
        VerifyFamilyId::new(&config.verification_code)?;
        Ok(Self {
            identity: DeviceIdentity {
                address: address.into(),
                variant,
            },
            credentials: Credentials {
                code: config.verification_code.clone(),
                verified: None,
            },
            config,
            session: None,
        })
    }

    /// 从扫描结果构造，变体取自广播名称
    pub fn from_discovered(device: &DiscoveredFeeder, config: FeederConfig) -> Result<Self> {
        Self::new(device.address.clone(), device.variant, config)
    }

    pub fn with_verification_code(mut self, code: &str) -> Result<Self> {
        VerifyFamilyId::new(code)?;
        self.credentials.code = code.to_string();
        Ok(self)
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn address(&self) -> &str {
        &self.identity.address
    }

    pub fn variant(&self) -> DeviceVariant {
        self.identity.variant
    }

    pub fn config(&self) -> &FeederConfig {
        &self.config
    }

    pub fn link_state(&self) -> LinkState {
        self.session
            .as_ref()
            .map_or(LinkState::Disconnected, LinkSession::state)
    }

    /// 最近一次验证码交换的结果
    pub fn is_verified(&self) -> Option<bool> {
        self.credentials.verified
    }

    pub async fn is_connected(&self) -> bool {
        match &self.session {
            Some(session) => session.is_alive().await,
            None => false,
        }
    }

    /// 使用外部提供的 transport 建立连接
    ///
    /// 已有会话时等同于 [`reconnect`](Self::reconnect)。
    pub async fn connect_with(&mut self, transport: T) -> Result<()> {
        if self.session.is_some() {
            return self.reconnect(transport).await;
        }
        info!(
            "Connecting to {} ({} variant)",
            self.identity.address, self.identity.variant
        );
        self.session = Some(LinkSession::new(
            transport,
            self.identity.variant,
            &self.config,
        ));
        self.establish().await
    }

    /// 在新的 transport 上恢复会话，保留身份与验证码
    pub async fn reconnect(&mut self, transport: T) -> Result<()> {
        info!("Reconnecting {} with a new transport", self.identity.address);
        match self.session.as_mut() {
            Some(session) => {
                let old = session.replace_client(transport);
                if old.is_connected().await {
                    if let Err(e) = old.disconnect().await {
                        debug!("Failed to close replaced transport: {}", e);
                    }
                }
            }
            None => {
                self.session = Some(LinkSession::new(
                    transport,
                    self.identity.variant,
                    &self.config,
                ));
            }
        }
        self.establish().await
    }

    async fn establish(&mut self) -> Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| FeederError::LinkNotReady("no link session".to_string()))?;
        session.connect().await?;
        self.verify().await
    }

    /// 发送验证码
    ///
    /// 设备未应答时仅记录警告，部分固件从不回复该命令。
    async fn verify(&mut self) -> Result<()> {
        let cmd = VerifyFamilyId::new(&self.credentials.code)?;
        match timeout_as_none(self.execute(&cmd).await)? {
            Some(true) => {
                debug!("Verification code accepted");
                self.credentials.verified = Some(true);
            }
            Some(false) => {
                warn!("Device rejected the verification code");
                self.credentials.verified = Some(false);
            }
            None => warn!("No reply to verification code, continuing"),
        }
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        match self.session.take() {
            Some(mut session) => session.disconnect().await,
            None => Ok(()),
        }
    }

    fn ready_session(&self) -> Result<&LinkSession<T>> {
        match &self.session {
            Some(session) if session.state() == LinkState::Ready => Ok(session),
            Some(session) => Err(FeederError::LinkNotReady(format!(
                "link is {}, call connect() first",
                session.state()
            ))),
            None => Err(FeederError::LinkNotReady(
                "not connected, call connect() first".to_string(),
            )),
        }
    }

    async fn execute<C: FeederCommand>(&self, cmd: &C) -> Result<C::Reply> {
        self.execute_within(cmd, cmd.timeout(&self.config)).await
    }

    async fn execute_within<C: FeederCommand>(
        &self,
        cmd: &C,
        timeout: Duration,
    ) -> Result<C::Reply> {
        let session = self.ready_session()?;
        session.clear_notifications();

        let bytes = frame::encode(cmd.command(), &cmd.payload())?;
        debug!("Sending {:?} ({} bytes)", cmd.command(), bytes.len());
        session.write(&bytes).await?;

        self.await_reply(session, cmd, timeout).await
    }

    /// 轮询通知缓冲直到得到应答
    ///
    /// 缓冲有新数据时立即唤醒，否则每个轮询间隔检查一次链路状态。
    async fn await_reply<C: FeederCommand>(
        &self,
        session: &LinkSession<T>,
        cmd: &C,
        timeout: Duration,
    ) -> Result<C::Reply> {
        let deadline = Instant::now() + timeout;
        let poll_interval = self.config.poll_interval();
        let mut assembler = FrameAssembler::new();

        loop {
            for chunk in session.notifications().drain() {
                assembler.push(&chunk);
            }

            while let Some(frame) = assembler.next_frame() {
                if !cmd.accepts(frame.command) {
                    debug!(
                        "Ignoring {:?} frame while waiting for {:?}",
                        frame.command,
                        cmd.command()
                    );
                    continue;
                }
                match cmd.parse_reply(&frame) {
                    Ok(reply) => return Ok(reply),
                    Err(e) => warn!("{}", e),
                }
            }

            if !session.is_alive().await {
                return Err(FeederError::LinkNotReady(format!(
                    "link dropped while waiting for {:?} reply",
                    cmd.command()
                )));
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(FeederError::ResponseTimeout {
                    command: cmd.command(),
                    timeout,
                });
            }
            session
                .notifications()
                .wait(poll_interval.min(deadline - now))
                .await;
        }
    }

    /// 手动喂食
    ///
    /// `fast` 为 `true` 时直接发送（约 0.5–2 秒）；为 `false` 时先查询
    /// 故障、童锁和出粮状态（约 2–4 秒），任一阻断则在写入前失败。
    pub async fn feed(&mut self, portions: u8, fast: bool) -> Result<FeedOutcome> {
        let portions = Portions::new(portions)?;
        if !fast {
            self.check_feed_preconditions().await?;
        }

        let outcome = self.execute(&ManualFeed { portions }).await?;
        info!("Feed of {} portion(s): {:?}", portions.get(), outcome);
        Ok(outcome)
    }

    /// 查询超时视为状态未知，不阻断喂食
    async fn check_feed_preconditions(&self) -> Result<()> {
        let timeout = self.config.precheck_timeout();

        match timeout_as_none(self.execute_within(&QueryFault, timeout).await)? {
            Some(code) if code.is_fault() => {
                return Err(FeederError::PreconditionFailed(Precondition::Fault(code.0)));
            }
            Some(_) => {}
            None => warn!("Fault state unknown, continuing"),
        }

        match timeout_as_none(self.execute_within(&QueryChildLock, timeout).await)? {
            Some(true) => return Err(FeederError::PreconditionFailed(Precondition::ChildLocked)),
            Some(false) => {}
            None => warn!("Child lock state unknown, continuing"),
        }

        match timeout_as_none(self.execute_within(&QueryFeedingStatus, timeout).await)? {
            Some(FeedingStatus::Feeding) => {
                return Err(FeederError::PreconditionFailed(Precondition::Busy));
            }
            Some(_) => {}
            None => warn!("Feeding status unknown, continuing"),
        }

        Ok(())
    }

    pub async fn set_schedule(&mut self, slots: &[FeedSchedule]) -> Result<()> {
        let cmd = SetFeederPlan::new(slots)?;
        self.execute(&cmd).await?;
        info!("Schedule updated ({} slot(s))", slots.len());
        Ok(())
    }

    pub async fn query_schedule(&mut self) -> Result<Vec<FeedSchedule>> {
        self.execute(&QueryFeederPlan).await
    }

    pub async fn set_child_lock(&mut self, locked: bool) -> Result<()> {
        self.execute(&SetChildLock(locked)).await
    }

    pub async fn get_child_lock_status(&mut self) -> Result<SwitchState> {
        self.query_switch(&QueryChildLock).await
    }

    pub async fn set_sound(&mut self, enabled: bool) -> Result<()> {
        self.execute(&SetReminderTone(enabled)).await
    }

    pub async fn get_prompt_sound_status(&mut self) -> Result<SwitchState> {
        self.query_switch(&QueryReminderTone).await
    }

    async fn query_switch<C: FeederCommand<Reply = bool>>(&self, cmd: &C) -> Result<SwitchState> {
        Ok(timeout_as_none(self.execute(cmd).await)?
            .map_or(SwitchState::Unknown, SwitchState::from))
    }

    pub async fn get_device_info(&mut self) -> Result<DeviceInfo> {
        self.execute(&QueryDeviceInfo).await
    }

    /// 同步设备时钟
    pub async fn sync_time(&mut self, at: NaiveDateTime) -> Result<()> {
        let cmd = SyncTime {
            at,
            include_weekday: self.config.time_sync_weekday,
        };
        self.execute(&cmd).await?;
        info!("Device clock set to {}", at);
        Ok(())
    }

    /// 同步为本机当前时间
    pub async fn sync_time_now(&mut self) -> Result<()> {
        self.sync_time(Local::now().naive_local()).await
    }

    pub async fn query_fault(&mut self) -> Result<FaultCode> {
        self.execute(&QueryFault).await
    }

    pub async fn query_feeding_status(&mut self) -> Result<FeedingStatus> {
        self.execute(&QueryFeedingStatus).await
    }

    pub async fn query_power_supply(&mut self) -> Result<PowerSupply> {
        self.execute(&QueryPowerSupply).await
    }
}

impl FeederDevice<BtleTransport> {
    /// 通过 btleplug 查找设备并连接
    pub async fn connect(&mut self) -> Result<()> {
        let adapter = default_adapter().await?;
        let transport =
            BtleTransport::find(&adapter, &self.identity.address, self.config.scan_duration())
                .await?;
        self.connect_with(transport).await
    }
}
