//! 设备层集成测试
//!
//! 使用脚本化 transport 模拟喂食器应答，时钟暂停以便精确断言超时。

mod common;

use chrono::NaiveDate;
use std::time::Duration;
use tokio::time::Instant;

use common::{ScriptedTransport, cooperative, reply, test_config};
use petfeeder_core::{
    Command, DeviceInfo, DeviceVariant, FaultCode, FeedKind, FeedOutcome, FeedRecord,
    FeedSchedule, FeederDevice, FeederError, FeedingStatus, LinkState, PowerSupply, Precondition,
    SwitchState,
};

const ADDRESS: &str = "E6:C0:07:09:A3:D3";

async fn connected(transport: &ScriptedTransport) -> FeederDevice<ScriptedTransport> {
    let mut feeder = FeederDevice::new(ADDRESS, DeviceVariant::Standard, test_config()).unwrap();
    feeder.connect_with(transport.clone()).await.unwrap();
    feeder
}

fn slots(specs: &[&str]) -> Vec<FeedSchedule> {
    specs.iter().map(|s| s.parse().unwrap()).collect()
}

// ============================================================================
// 连接与验证
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_connect_sends_verification_code() {
    let transport = ScriptedTransport::cooperative(DeviceVariant::Standard);
    let feeder = connected(&transport).await;

    assert_eq!(feeder.link_state(), LinkState::Ready);
    assert!(feeder.is_connected().await);
    assert_eq!(feeder.is_verified(), Some(true));
    assert_eq!(transport.written_commands(), vec![Command::SetFamilyId]);
    assert_eq!(
        transport.last_payload(Command::SetFamilyId),
        Some(vec![0, 0, 0, 0])
    );
}

#[tokio::test(start_paused = true)]
async fn test_rejected_verification_does_not_fail_connect() {
    let transport = ScriptedTransport::new(DeviceVariant::Standard);
    transport.respond_with(|cmd, payload| match cmd {
        Command::SetFamilyId => vec![reply(cmd, &[0])],
        _ => cooperative(cmd, payload),
    });
    let feeder = connected(&transport).await;

    assert_eq!(feeder.link_state(), LinkState::Ready);
    assert_eq!(feeder.is_verified(), Some(false));
}

#[tokio::test(start_paused = true)]
async fn test_silent_verification_leaves_state_unknown() {
    let transport = ScriptedTransport::new(DeviceVariant::Standard);
    let started = Instant::now();
    let feeder = connected(&transport).await;

    assert_eq!(feeder.is_verified(), None);
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[test]
fn test_invalid_verification_code() {
    let feeder: Result<FeederDevice<ScriptedTransport>, _> =
        FeederDevice::new(ADDRESS, DeviceVariant::Standard, test_config())
            .unwrap()
            .with_verification_code("12345");
    assert!(matches!(feeder, Err(FeederError::InvalidArgument(_))));
}

#[test]
fn test_invalid_config_code_rejected_at_construction() {
    for code in ["", "1234567", "00000000a", "zzzzzzzz"] {
        let mut config = test_config();
        config.verification_code = code.to_string();
        let feeder = FeederDevice::<ScriptedTransport>::new(ADDRESS, DeviceVariant::Standard, config);
        assert!(
            matches!(feeder, Err(FeederError::InvalidArgument(_))),
            "code {:?}",
            code
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_commands_require_connection() {
    let mut feeder: FeederDevice<ScriptedTransport> =
        FeederDevice::new(ADDRESS, DeviceVariant::Standard, test_config()).unwrap();

    assert!(matches!(
        feeder.query_fault().await,
        Err(FeederError::LinkNotReady(_))
    ));
    assert_eq!(feeder.link_state(), LinkState::Disconnected);
    assert!(!feeder.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_keeps_identity_and_code() {
    let first = ScriptedTransport::cooperative(DeviceVariant::Standard);
    let mut feeder: FeederDevice<ScriptedTransport> =
        FeederDevice::new(ADDRESS, DeviceVariant::Standard, test_config())
            .and_then(|f| f.with_verification_code("1a2b3c4d"))
            .unwrap();
    feeder.connect_with(first.clone()).await.unwrap();

    let second = ScriptedTransport::cooperative(DeviceVariant::Standard);
    feeder.reconnect(second.clone()).await.unwrap();

    assert_eq!(first.disconnect_calls(), 1);
    assert_eq!(feeder.address(), ADDRESS);
    assert_eq!(feeder.variant(), DeviceVariant::Standard);
    assert_eq!(feeder.link_state(), LinkState::Ready);
    assert_eq!(feeder.is_verified(), Some(true));
    assert_eq!(
        second.last_payload(Command::SetFamilyId),
        Some(vec![0x1A, 0x2B, 0x3C, 0x4D])
    );

    let writes_before = first.writes().len();
    feeder.feed(1, true).await.unwrap();
    assert_eq!(first.writes().len(), writes_before);
    assert_eq!(second.written_commands().last(), Some(&Command::Feeding));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect() {
    let transport = ScriptedTransport::cooperative(DeviceVariant::Standard);
    let mut feeder = connected(&transport).await;

    feeder.disconnect().await.unwrap();

    assert_eq!(feeder.link_state(), LinkState::Disconnected);
    assert!(!feeder.is_connected().await);
    assert_eq!(transport.disconnect_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_subscription_established_once_per_connection() {
    let transport = ScriptedTransport::cooperative(DeviceVariant::Standard);
    let mut feeder = connected(&transport).await;

    feeder.feed(1, false).await.unwrap();
    feeder.query_schedule().await.unwrap();
    feeder.get_child_lock_status().await.unwrap();
    feeder.set_sound(true).await.unwrap();
    feeder.query_power_supply().await.unwrap();

    assert_eq!(transport.subscribe_attempts(), 1);
    assert_eq!(transport.unsubscribe_calls(), 0);
    assert_eq!(transport.connect_calls(), 1);
}

// ============================================================================
// 喂食
// ============================================================================

fn child_locked(cmd: Command, payload: &[u8]) -> Vec<Vec<u8>> {
    match cmd {
        Command::ChildLock if payload.is_empty() => vec![reply(cmd, &[1])],
        _ => cooperative(cmd, payload),
    }
}

#[tokio::test(start_paused = true)]
async fn test_fast_feed_skips_prechecks() {
    let transport = ScriptedTransport::new(DeviceVariant::Standard);
    transport.respond_with(child_locked);
    let mut feeder = connected(&transport).await;

    let outcome = feeder.feed(2, true).await.unwrap();

    assert_eq!(outcome, FeedOutcome::Acknowledged);
    assert_eq!(
        transport.written_commands(),
        vec![Command::SetFamilyId, Command::Feeding]
    );
    assert_eq!(transport.last_payload(Command::Feeding), Some(vec![2]));
}

#[tokio::test(start_paused = true)]
async fn test_checked_feed_refuses_when_child_locked() {
    let transport = ScriptedTransport::new(DeviceVariant::Standard);
    transport.respond_with(child_locked);
    let mut feeder = connected(&transport).await;

    let err = feeder.feed(2, false).await.unwrap_err();

    assert!(matches!(
        err,
        FeederError::PreconditionFailed(Precondition::ChildLocked)
    ));
    assert!(!transport.written_commands().contains(&Command::Feeding));
}

#[tokio::test(start_paused = true)]
async fn test_checked_feed_refuses_on_fault() {
    let transport = ScriptedTransport::new(DeviceVariant::Standard);
    transport.respond_with(|cmd, payload| match cmd {
        Command::Fault => vec![reply(cmd, &[3])],
        _ => cooperative(cmd, payload),
    });
    let mut feeder = connected(&transport).await;

    let err = feeder.feed(1, false).await.unwrap_err();

    assert!(matches!(
        err,
        FeederError::PreconditionFailed(Precondition::Fault(3))
    ));
    assert!(!transport.written_commands().contains(&Command::Feeding));
}

#[tokio::test(start_paused = true)]
async fn test_checked_feed_refuses_while_feeding() {
    let transport = ScriptedTransport::new(DeviceVariant::Standard);
    transport.respond_with(|cmd, payload| match cmd {
        Command::FeedingStatus => vec![reply(cmd, &[1])],
        _ => cooperative(cmd, payload),
    });
    let mut feeder = connected(&transport).await;

    let err = feeder.feed(1, false).await.unwrap_err();

    assert!(matches!(
        err,
        FeederError::PreconditionFailed(Precondition::Busy)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_checked_feed_runs_all_prechecks_in_order() {
    let transport = ScriptedTransport::cooperative(DeviceVariant::Standard);
    let mut feeder = connected(&transport).await;

    let outcome = feeder.feed(3, false).await.unwrap();

    assert_eq!(outcome, FeedOutcome::Acknowledged);
    assert_eq!(
        transport.written_commands(),
        vec![
            Command::SetFamilyId,
            Command::Fault,
            Command::ChildLock,
            Command::FeedingStatus,
            Command::Feeding,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_silent_prechecks_do_not_block_feed() {
    let transport = ScriptedTransport::new(DeviceVariant::Standard);
    transport.respond_with(|cmd, payload| match cmd {
        Command::Fault | Command::ChildLock | Command::FeedingStatus => Vec::new(),
        _ => cooperative(cmd, payload),
    });
    let mut feeder = connected(&transport).await;

    let started = Instant::now();
    let outcome = feeder.feed(1, false).await.unwrap();

    assert_eq!(outcome, FeedOutcome::Acknowledged);
    // 三项检查各自等满 1.5 秒
    assert!(started.elapsed() >= Duration::from_millis(4500));
}

#[tokio::test(start_paused = true)]
async fn test_feed_timeout() {
    let transport = ScriptedTransport::new(DeviceVariant::Standard);
    transport.respond_with(|cmd, payload| match cmd {
        Command::Feeding => Vec::new(),
        _ => cooperative(cmd, payload),
    });
    let mut feeder = connected(&transport).await;

    let started = Instant::now();
    let err = feeder.feed(1, true).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(
        matches!(
            err,
            FeederError::ResponseTimeout {
                command: Command::Feeding,
                ..
            }
        ),
        "{err:?}"
    );
    assert!(elapsed >= Duration::from_secs(4));
    assert!(elapsed < Duration::from_millis(4250));
}

#[tokio::test(start_paused = true)]
async fn test_feed_refused() {
    let transport = ScriptedTransport::new(DeviceVariant::Standard);
    transport.respond_with(|cmd, payload| match cmd {
        Command::Feeding => vec![reply(cmd, &[4])],
        _ => cooperative(cmd, payload),
    });
    let mut feeder = connected(&transport).await;

    assert_eq!(
        feeder.feed(1, true).await.unwrap(),
        FeedOutcome::Refused { code: 4 }
    );
}

#[tokio::test(start_paused = true)]
async fn test_feed_completion_record() {
    let transport = ScriptedTransport::new(DeviceVariant::Standard);
    transport.respond_with(|cmd, payload| match cmd {
        Command::Feeding => vec![reply(
            Command::ManualFeedResult,
            &[24, 5, 1, 8, 30, 0, 2, 1, 0],
        )],
        _ => cooperative(cmd, payload),
    });
    let mut feeder = connected(&transport).await;

    let outcome = feeder.feed(2, true).await.unwrap();

    let expected = FeedRecord {
        timestamp: NaiveDate::from_ymd_opt(2024, 5, 1).and_then(|d| d.and_hms_opt(8, 30, 0)),
        portions: 2,
        kind: FeedKind::Manual,
        success: true,
    };
    assert_eq!(
        outcome,
        FeedOutcome::Completed {
            records: vec![expected]
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_feed_rejects_invalid_portions() {
    let transport = ScriptedTransport::cooperative(DeviceVariant::Standard);
    let mut feeder = connected(&transport).await;

    assert!(matches!(
        feeder.feed(0, true).await,
        Err(FeederError::InvalidArgument(_))
    ));
    assert!(matches!(
        feeder.feed(16, true).await,
        Err(FeederError::InvalidArgument(_))
    ));
    assert_eq!(transport.written_commands(), vec![Command::SetFamilyId]);
}

#[tokio::test(start_paused = true)]
async fn test_link_drop_while_waiting() {
    let transport = ScriptedTransport::new(DeviceVariant::Standard);
    transport.respond_with(|cmd, payload| match cmd {
        Command::Feeding => Vec::new(),
        _ => cooperative(cmd, payload),
    });
    let mut feeder = connected(&transport).await;

    let link = transport.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(600)).await;
        link.set_connected(false);
    });

    let started = Instant::now();
    let err = feeder.feed(1, true).await.unwrap_err();

    assert!(matches!(err, FeederError::LinkNotReady(_)), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(1));
}

// ============================================================================
// 应答匹配
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stale_notifications_are_discarded() {
    let transport = ScriptedTransport::cooperative(DeviceVariant::Standard);
    let mut feeder = connected(&transport).await;

    // 上一条命令的迟到应答
    transport.inject(&reply(Command::ChildLock, &[1]));

    assert_eq!(
        feeder.get_child_lock_status().await.unwrap(),
        SwitchState::Disabled
    );
}

#[tokio::test(start_paused = true)]
async fn test_unrelated_frames_are_skipped() {
    let transport = ScriptedTransport::new(DeviceVariant::Standard);
    transport.respond_with(|cmd, payload| match cmd {
        Command::Fault => vec![
            reply(Command::ChildLock, &[1]),
            reply(Command::Fault, &[3]),
        ],
        _ => cooperative(cmd, payload),
    });
    let mut feeder = connected(&transport).await;

    assert_eq!(feeder.query_fault().await.unwrap(), FaultCode(3));
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_reply_keeps_waiting() {
    let transport = ScriptedTransport::new(DeviceVariant::Standard);
    transport.respond_with(|cmd, payload| match cmd {
        Command::QueryNameVersion => vec![
            reply(cmd, &[5]),
            reply(cmd, &[3, b'F', b'D', b'1', 3, b'1', b'.', b'2']),
        ],
        _ => cooperative(cmd, payload),
    });
    let mut feeder = connected(&transport).await;

    assert_eq!(
        feeder.get_device_info().await.unwrap(),
        DeviceInfo {
            name: "FD1".to_string(),
            version: "1.2".to_string(),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_reply_split_across_notifications() {
    let transport = ScriptedTransport::new(DeviceVariant::Standard);
    transport.respond_with(|cmd, payload| match cmd {
        Command::FeedingStatus => {
            let frame = reply(cmd, &[2]);
            let (head, tail) = frame.split_at(2);
            vec![head.to_vec(), tail.to_vec()]
        }
        _ => cooperative(cmd, payload),
    });
    let mut feeder = connected(&transport).await;

    assert_eq!(
        feeder.query_feeding_status().await.unwrap(),
        FeedingStatus::Error
    );
}

#[tokio::test(start_paused = true)]
async fn test_truncated_fragment_before_feed_ack() {
    let transport = ScriptedTransport::new(DeviceVariant::Standard);
    transport.respond_with(|cmd, payload| match cmd {
        // 上一条出粮记录只到了一半
        Command::Feeding => vec![vec![0xEB, 0x0B, 0x09, 0x18, 0x05], reply(cmd, &[1])],
        _ => cooperative(cmd, payload),
    });
    let mut feeder = connected(&transport).await;

    let started = Instant::now();
    let outcome = feeder.feed(1, true).await.unwrap();

    assert_eq!(outcome, FeedOutcome::Acknowledged);
    assert!(started.elapsed() < Duration::from_secs(1));
}

// ============================================================================
// 喂食计划
// ============================================================================

const TWO_SLOTS: [u8; 10] = [0x7F, 8, 0, 2, 1, 0x41, 18, 30, 1, 0];

#[tokio::test(start_paused = true)]
async fn test_set_schedule_payload() {
    let transport = ScriptedTransport::cooperative(DeviceVariant::Standard);
    let mut feeder = connected(&transport).await;

    feeder
        .set_schedule(&slots(&["08:00/2/all", "18:30/1/weekend/off"]))
        .await
        .unwrap();

    assert_eq!(
        transport.last_payload(Command::SetFeederPlan),
        Some(TWO_SLOTS.to_vec())
    );
}

#[tokio::test(start_paused = true)]
async fn test_set_schedule_rejects_too_many_slots() {
    let transport = ScriptedTransport::cooperative(DeviceVariant::Standard);
    let mut feeder = connected(&transport).await;

    let too_many = vec!["08:00/1/all"; 16];
    assert!(matches!(
        feeder.set_schedule(&slots(&too_many)).await,
        Err(FeederError::InvalidArgument(_))
    ));
    assert!(!transport.written_commands().contains(&Command::SetFeederPlan));
}

#[tokio::test(start_paused = true)]
async fn test_query_schedule_length_prefixed() {
    let transport = ScriptedTransport::new(DeviceVariant::Standard);
    transport.respond_with(|cmd, payload| match cmd {
        Command::QueryFeederPlan => {
            let mut body = vec![2];
            body.extend_from_slice(&TWO_SLOTS);
            vec![reply(cmd, &body)]
        }
        _ => cooperative(cmd, payload),
    });
    let mut feeder = connected(&transport).await;

    assert_eq!(
        feeder.query_schedule().await.unwrap(),
        slots(&["08:00/2/all", "18:30/1/weekend/off"])
    );
}

#[tokio::test(start_paused = true)]
async fn test_query_schedule_bare_records() {
    let transport = ScriptedTransport::new(DeviceVariant::Standard);
    transport.respond_with(|cmd, payload| match cmd {
        Command::QueryFeederPlan => vec![reply(cmd, &TWO_SLOTS)],
        _ => cooperative(cmd, payload),
    });
    let mut feeder = connected(&transport).await;

    assert_eq!(
        feeder.query_schedule().await.unwrap(),
        slots(&["08:00/2/all", "18:30/1/weekend/off"])
    );
}

#[tokio::test(start_paused = true)]
async fn test_query_schedule_uses_longer_timeout() {
    let transport = ScriptedTransport::new(DeviceVariant::Standard);
    transport.respond_with(|cmd, payload| match cmd {
        Command::QueryFeederPlan => Vec::new(),
        _ => cooperative(cmd, payload),
    });
    let mut feeder = connected(&transport).await;

    let started = Instant::now();
    let err = feeder.query_schedule().await.unwrap_err();

    assert!(err.is_timeout());
    assert!(started.elapsed() >= Duration::from_secs(6));
}

// ============================================================================
// 开关与状态
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_child_lock_roundtrip() {
    let transport = ScriptedTransport::new(DeviceVariant::Standard);
    transport.respond_with(child_locked);
    let mut feeder = connected(&transport).await;

    feeder.set_child_lock(true).await.unwrap();
    assert_eq!(transport.last_payload(Command::ChildLock), Some(vec![1]));
    assert_eq!(
        feeder.get_child_lock_status().await.unwrap(),
        SwitchState::Enabled
    );
}

#[tokio::test(start_paused = true)]
async fn test_switch_query_timeout_is_unknown() {
    let transport = ScriptedTransport::new(DeviceVariant::Standard);
    transport.respond_with(|cmd, payload| match cmd {
        Command::ReminderTone if payload.is_empty() => Vec::new(),
        _ => cooperative(cmd, payload),
    });
    let mut feeder = connected(&transport).await;

    let started = Instant::now();
    let state = feeder.get_prompt_sound_status().await.unwrap();

    assert_eq!(state, SwitchState::Unknown);
    assert!(started.elapsed() >= Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_set_sound() {
    let transport = ScriptedTransport::cooperative(DeviceVariant::Standard);
    let mut feeder = connected(&transport).await;

    feeder.set_sound(false).await.unwrap();

    assert_eq!(transport.last_payload(Command::ReminderTone), Some(vec![0]));
}

#[tokio::test(start_paused = true)]
async fn test_query_power_supply() {
    let transport = ScriptedTransport::new(DeviceVariant::Standard);
    transport.respond_with(|cmd, payload| match cmd {
        Command::PowerSupplyMethod => vec![reply(cmd, &[0])],
        _ => cooperative(cmd, payload),
    });
    let mut feeder = connected(&transport).await;

    assert_eq!(feeder.query_power_supply().await.unwrap(), PowerSupply::Battery);
    assert_eq!(transport.last_payload(Command::PowerSupplyMethod), Some(Vec::new()));
}

#[tokio::test(start_paused = true)]
async fn test_device_info_legacy_layout() {
    let transport = ScriptedTransport::new(DeviceVariant::Standard);
    transport.respond_with(|cmd, payload| match cmd {
        Command::QueryNameVersion => {
            let mut body = b"PETFEEDER\0\0\0".to_vec();
            body.extend_from_slice(b"V1.0.3");
            vec![reply(cmd, &body)]
        }
        _ => cooperative(cmd, payload),
    });
    let mut feeder = connected(&transport).await;

    let info = feeder.get_device_info().await.unwrap();

    assert_eq!(info.name, "PETFEEDER");
    assert_eq!(info.version, "V1.0.3");
}

#[tokio::test(start_paused = true)]
async fn test_sync_time_payload() {
    let transport = ScriptedTransport::cooperative(DeviceVariant::Standard);
    let mut feeder = connected(&transport).await;
    // 2024-05-05 是星期日
    let at = NaiveDate::from_ymd_opt(2024, 5, 5)
        .and_then(|d| d.and_hms_opt(7, 8, 9))
        .unwrap();

    feeder.sync_time(at).await.unwrap();

    assert_eq!(
        transport.last_payload(Command::SyncTime),
        Some(vec![24, 5, 5, 7, 8, 9, 0])
    );
}

#[tokio::test(start_paused = true)]
async fn test_sync_time_without_weekday() {
    let transport = ScriptedTransport::cooperative(DeviceVariant::Standard);
    let mut config = test_config();
    config.time_sync_weekday = false;
    let mut feeder = FeederDevice::new(ADDRESS, DeviceVariant::Standard, config).unwrap();
    feeder.connect_with(transport.clone()).await.unwrap();
    let at = NaiveDate::from_ymd_opt(2024, 12, 31)
        .and_then(|d| d.and_hms_opt(23, 59, 0))
        .unwrap();

    feeder.sync_time(at).await.unwrap();

    assert_eq!(
        transport.last_payload(Command::SyncTime),
        Some(vec![24, 12, 31, 23, 59, 0])
    );
}
