#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use domain::{PointTable, PointValue};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uns_ingest::{
    HealthStatus, Notification, PublishError, Publisher, SessionId, SourceTransport,
    SubscriptionId, SubscriptionRequest, TransportError,
};

pub fn wire(name: &str) -> String {
    PointTable::default()
        .get(name)
        .expect("known point")
        .id()
        .wire_id()
}

/// 可编排的数据源：记录每次调用，按需注入失败。
#[derive(Default)]
pub struct ScriptedTransport {
    health: Mutex<Option<mpsc::UnboundedSender<HealthStatus>>>,
    open_failures: AtomicU32,
    resume_failures: AtomicU32,
    next_session: AtomicU64,
    next_subscription: AtomicU64,
    open_attempts: Mutex<Vec<Instant>>,
    resume_attempts: AtomicU32,
    closed_sessions: AtomicU32,
    subscriptions: Mutex<HashMap<SubscriptionId, (Vec<String>, mpsc::Sender<Notification>)>>,
    created: Mutex<Vec<SubscriptionRequest>>,
    deleted: Mutex<Vec<SubscriptionId>>,
    values: Mutex<HashMap<String, PointValue>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_opens(&self, count: u32) {
        self.open_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_resumes(&self, count: u32) {
        self.resume_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_value(&self, name: &str, value: PointValue) {
        self.values
            .lock()
            .expect("values")
            .insert(wire(name), value);
    }

    pub fn send_health(&self, status: HealthStatus) {
        let guard = self.health.lock().expect("health");
        guard
            .as_ref()
            .expect("health handler installed")
            .send(status)
            .expect("health channel open");
    }

    /// 向所有包含该点位的订阅推送一条通知。
    pub async fn notify(&self, name: &str, value: PointValue) {
        let wire_id = wire(name);
        let targets: Vec<(SubscriptionId, mpsc::Sender<Notification>)> = self
            .subscriptions
            .lock()
            .expect("subscriptions")
            .iter()
            .filter(|(_, (items, _))| items.contains(&wire_id))
            .map(|(id, (_, sender))| (*id, sender.clone()))
            .collect();
        for (subscription_id, sender) in targets {
            sender
                .send(Notification {
                    subscription_id,
                    wire_id: wire_id.clone(),
                    value: value.clone(),
                    source_timestamp: Utc::now(),
                })
                .await
                .expect("notification channel open");
        }
    }

    pub fn open_attempts(&self) -> Vec<Instant> {
        self.open_attempts.lock().expect("attempts").clone()
    }

    pub fn resume_attempts(&self) -> u32 {
        self.resume_attempts.load(Ordering::SeqCst)
    }

    pub fn closed_sessions(&self) -> u32 {
        self.closed_sessions.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<SubscriptionRequest> {
        self.created.lock().expect("created").clone()
    }

    pub fn deleted(&self) -> Vec<SubscriptionId> {
        self.deleted.lock().expect("deleted").clone()
    }

    pub fn live_subscriptions(&self) -> usize {
        self.subscriptions.lock().expect("subscriptions").len()
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl SourceTransport for ScriptedTransport {
    fn install_health_handler(&self, handler: mpsc::UnboundedSender<HealthStatus>) {
        *self.health.lock().expect("health") = Some(handler);
    }

    async fn open_session(&self) -> Result<SessionId, TransportError> {
        self.open_attempts
            .lock()
            .expect("attempts")
            .push(Instant::now());
        if take_failure(&self.open_failures) {
            return Err(TransportError::Connection("connection refused".to_string()));
        }
        Ok(self.next_session.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn resume_session(&self, session: SessionId) -> Result<SessionId, TransportError> {
        self.resume_attempts.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.resume_failures) {
            return Err(TransportError::Connection("session resume failed".to_string()));
        }
        Ok(session)
    }

    async fn close_session(&self) -> Result<(), TransportError> {
        self.closed_sessions.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.lock().expect("subscriptions").clear();
        Ok(())
    }

    async fn read(
        &self,
        wire_ids: &[String],
    ) -> Result<HashMap<String, PointValue>, TransportError> {
        let values = self.values.lock().expect("values");
        Ok(wire_ids
            .iter()
            .filter_map(|id| values.get(id).map(|value| (id.clone(), value.clone())))
            .collect())
    }

    async fn create_subscription(
        &self,
        request: SubscriptionRequest,
        notifications: mpsc::Sender<Notification>,
    ) -> Result<SubscriptionId, TransportError> {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst) + 1;
        let items = request.items.iter().map(|item| item.wire_id.clone()).collect();
        self.subscriptions
            .lock()
            .expect("subscriptions")
            .insert(id, (items, notifications));
        self.created.lock().expect("created").push(request);
        Ok(id)
    }

    async fn delete_subscription(&self, id: SubscriptionId) -> Result<(), TransportError> {
        self.deleted.lock().expect("deleted").push(id);
        match self.subscriptions.lock().expect("subscriptions").remove(&id) {
            Some(_) => Ok(()),
            None => Err(TransportError::Subscription(format!("no subscription {id}"))),
        }
    }
}

/// 记录发布内容；topic 含指定片段时返回失败。
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, serde_json::Value)>>,
    fail_when_contains: Mutex<Vec<String>>,
    closed: AtomicU32,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_topics_containing(&self, fragment: &str) {
        self.fail_when_contains
            .lock()
            .expect("failures")
            .push(fragment.to_string());
    }

    pub fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.published.lock().expect("published").clone()
    }

    pub fn close_calls(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        let failing = self
            .fail_when_contains
            .lock()
            .expect("failures")
            .iter()
            .any(|fragment| topic.contains(fragment.as_str()));
        if failing {
            return Err(PublishError::Publish("broker unavailable".to_string()));
        }
        let json = serde_json::from_slice(&payload).expect("json payload");
        self.published
            .lock()
            .expect("published")
            .push((topic.to_string(), json));
        Ok(())
    }

    async fn close(&self) -> Result<(), PublishError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 发布与关闭都永不返回，模拟卡住的 broker 连接。
#[derive(Default)]
pub struct StallingPublisher {
    publish_calls: AtomicU32,
    close_calls: AtomicU32,
}

impl StallingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_calls(&self) -> u32 {
        self.publish_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for StallingPublisher {
    async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> Result<(), PublishError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn close(&self) -> Result<(), PublishError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// 轮询直到条件成立（最多 120 秒，覆盖完整的重连退避序列）。
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..12_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
