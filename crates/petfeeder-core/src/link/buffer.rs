//! 通知缓冲
//!
//! 通知回调（生产者）追加原始数据，命令等待方（消费者）取走。
//! 每条命令开始前清空，旧应答不会被当成新命令的结果。

use log::warn;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug)]
pub struct NotificationBuffer {
    queue: Mutex<VecDeque<Vec<u8>>>,
    capacity: usize,
    notify: Notify,
}

impl NotificationBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            notify: Notify::new(),
        }
    }

    /// 追加一条通知，超出容量时丢弃最旧的条目
    pub fn push(&self, data: &[u8]) {
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                queue.pop_front();
                warn!(
                    "Notification buffer full ({} entries), dropped oldest",
                    self.capacity
                );
            }
            queue.push_back(data.to_vec());
        }
        self.notify.notify_one();
    }

    /// 取走全部已缓冲的通知
    pub fn drain(&self) -> Vec<Vec<u8>> {
        self.queue.lock().drain(..).collect()
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// 等待新通知到达，最多等待 `max_wait`
    ///
    /// 返回 `true` 表示被追加唤醒。`notify_one` 会保存一个许可，
    /// 所以在两次等待之间到达的通知不会丢失唤醒。
    pub async fn wait(&self, max_wait: Duration) -> bool {
        tokio::time::timeout(max_wait, self.notify.notified())
            .await
            .is_ok()
    }
}
