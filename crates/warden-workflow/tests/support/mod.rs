//! 监听器集成测试的替身：事件由测试推送，回写被记录，不触网。

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use warden_client::{
    AccessEvent, AccessEventStream, AccessRequest, Cancellation, Client, ClientOptions, Connector,
    CoreError, Credential, PingResponse, RequestFilter, RequestId, RpcConnection, StaticSource,
    WardenError,
};
use warden_core::version::CompatibilityOptions;

type EventSender = mpsc::UnboundedSender<Result<AccessEvent, CoreError>>;

/// 一次回写调用。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation {
    Approve(String),
    Deny(String),
}

/// 可控的访问请求服务端。
pub struct FakeServer {
    subscribers: Mutex<Vec<EventSender>>,
    subscription_opened: watch::Sender<usize>,
    subscribe_attempts: watch::Sender<usize>,
    hold_subscriptions: watch::Sender<bool>,
    mutations: Mutex<Vec<Mutation>>,
    fail_subscribe: AtomicBool,
    fail_mutations: AtomicBool,
    hold_mutations: watch::Sender<bool>,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: Mutex::new(Vec::new()),
            subscription_opened: watch::Sender::new(0),
            subscribe_attempts: watch::Sender::new(0),
            hold_subscriptions: watch::Sender::new(false),
            mutations: Mutex::new(Vec::new()),
            fail_subscribe: AtomicBool::new(false),
            fail_mutations: AtomicBool::new(false),
            hold_mutations: watch::Sender::new(false),
        })
    }

    /// 向第 `index` 个订阅推送事件。
    pub fn push(&self, index: usize, event: AccessEvent) {
        let subscribers = self.subscribers.lock();
        let _ = subscribers[index].send(Ok(event));
    }

    /// 向全部订阅推送同一个事件。
    pub fn broadcast(&self, event: AccessEvent) {
        for subscriber in self.subscribers.lock().iter() {
            let _ = subscriber.send(Ok(event.clone()));
        }
    }

    /// 在第 `index` 个订阅上注入流错误。
    pub fn break_stream(&self, index: usize) {
        let subscribers = self.subscribers.lock();
        let _ = subscribers[index].send(Err(CoreError::new("test.stream", "connection reset")));
    }

    /// 结束第 `index` 个订阅。
    pub fn end_stream(&self, index: usize) {
        let mut subscribers = self.subscribers.lock();
        let (replacement, _) = mpsc::unbounded_channel();
        drop(std::mem::replace(&mut subscribers[index], replacement));
    }

    /// 订阅是否已被监听器释放。
    pub fn is_released(&self, index: usize) -> bool {
        self.subscribers.lock()[index].is_closed()
    }

    pub async fn wait_subscriptions(&self, count: usize) {
        let mut opened = self.subscription_opened.subscribe();
        let _ = opened.wait_for(|opened| *opened >= count).await;
    }

    /// 等待订阅请求到达服务端（无论是否完成）。
    pub async fn wait_subscribe_attempts(&self, count: usize) {
        let mut attempts = self.subscribe_attempts.subscribe();
        let _ = attempts.wait_for(|attempts| *attempts >= count).await;
    }

    pub fn subscription_count(&self) -> usize {
        *self.subscription_opened.borrow()
    }

    /// 让后续订阅一直挂起，直到 [`release_subscriptions`](Self::release_subscriptions)。
    pub fn hold_subscriptions(&self) {
        self.hold_subscriptions.send_replace(true);
    }

    pub fn release_subscriptions(&self) {
        self.hold_subscriptions.send_replace(false);
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::Release);
    }

    pub fn fail_mutations(&self, fail: bool) {
        self.fail_mutations.store(fail, Ordering::Release);
    }

    /// 让后续回写一直挂起，直到 [`release_mutations`](Self::release_mutations)。
    pub fn hold_mutations(&self) {
        self.hold_mutations.send_replace(true);
    }

    pub fn release_mutations(&self) {
        self.hold_mutations.send_replace(false);
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.mutations.lock().clone()
    }

    /// 等待回写记录达到 `count` 条，超时返回当前记录。
    pub async fn wait_mutations(&self, count: usize) -> Vec<Mutation> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let mutations = self.mutations();
            if mutations.len() >= count || tokio::time::Instant::now() >= deadline {
                return mutations;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn mutate(&self, mutation: Mutation) -> Result<(), CoreError> {
        let mut hold = self.hold_mutations.subscribe();
        let _ = hold.wait_for(|held| !*held).await;
        if self.fail_mutations.load(Ordering::Acquire) {
            return Err(CoreError::new("test.mutation", "mutation rejected"));
        }
        self.mutations.lock().push(mutation);
        Ok(())
    }
}

struct FakeRpc {
    server: Arc<FakeServer>,
}

#[async_trait]
impl RpcConnection for FakeRpc {
    async fn ping(&self) -> Result<PingResponse, CoreError> {
        Ok(PingResponse::new("2.1.0").with_capability("access-requests"))
    }

    async fn list_access_requests(
        &self,
        _filter: &RequestFilter,
    ) -> Result<Vec<AccessRequest>, CoreError> {
        Ok(Vec::new())
    }

    async fn watch_access_requests(&self) -> Result<AccessEventStream, CoreError> {
        self.server.subscribe_attempts.send_modify(|attempts| *attempts += 1);
        let mut hold = self.server.hold_subscriptions.subscribe();
        let _ = hold.wait_for(|held| !*held).await;
        if self.server.fail_subscribe.load(Ordering::Acquire) {
            return Err(CoreError::new("test.subscribe", "watch not permitted"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.server.subscribers.lock().push(tx);
        self.server.subscription_opened.send_modify(|opened| *opened += 1);
        Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }

    async fn approve(&self, id: &RequestId, _reason: Option<&str>) -> Result<(), CoreError> {
        self.server.mutate(Mutation::Approve(id.to_string())).await
    }

    async fn deny(&self, id: &RequestId, _reason: Option<&str>) -> Result<(), CoreError> {
        self.server.mutate(Mutation::Deny(id.to_string())).await
    }

    async fn close(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

struct FakeConnector {
    server: Arc<FakeServer>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        _credential: &Credential,
        _cancellation: &Cancellation,
    ) -> Result<Arc<dyn RpcConnection>, WardenError> {
        Ok(Arc::new(FakeRpc {
            server: Arc::clone(&self.server),
        }))
    }
}

fn credential() -> Credential {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()])
        .expect("生成自签名证书");
    let cert_pem = cert.cert.pem();
    Credential::from_pem(
        cert_pem.as_bytes(),
        cert.key_pair.serialize_pem().as_bytes(),
        cert_pem.as_bytes(),
    )
    .expect("合法材料")
}

/// 以替身服务端构造客户端。
pub async fn client(server: &Arc<FakeServer>) -> Client {
    let options = ClientOptions {
        credential_poll_interval: Duration::from_secs(3600),
        compatibility: CompatibilityOptions {
            client_version: Some("2.0.0".to_owned()),
            ..CompatibilityOptions::default()
        },
        ..ClientOptions::with_addresses(["fake:1"])
    };
    Client::with_connector(
        Arc::new(StaticSource::new(credential())),
        Arc::new(FakeConnector {
            server: Arc::clone(server),
        }),
        &options,
    )
    .await
    .expect("替身客户端构造成功")
}
