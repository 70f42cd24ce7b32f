//! 单元测试用替身：可控的凭据来源与不触网的连接器。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use tokio::sync::watch;
use warden_core::access::{AccessRequest, RequestFilter, RequestId};
use warden_core::contract::Cancellation;
use warden_core::error::{CoreError, DialAttempt, WardenError};
use warden_core::rpc::{AccessEventStream, PingResponse, RpcConnection};
use warden_transport_tls::{Credential, CredentialSource};

pub(crate) fn self_signed_credential() -> Credential {
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

/// 变化标记可由测试拨动的凭据来源；成功产出即确认变化。
pub(crate) struct FakeSource {
    credential: Credential,
    changed: AtomicBool,
    fail: AtomicBool,
    polls: Arc<AtomicUsize>,
}

impl FakeSource {
    pub(crate) fn new() -> Arc<Self> {
        Self::counting(Arc::new(AtomicUsize::new(0)))
    }

    pub(crate) fn counting(polls: Arc<AtomicUsize>) -> Arc<Self> {
        Arc::new(Self {
            credential: self_signed_credential(),
            changed: AtomicBool::new(false),
            fail: AtomicBool::new(false),
            polls,
        })
    }

    pub(crate) fn mark_changed(&self) {
        self.changed.store(true, Ordering::Release);
    }

    pub(crate) fn fail_produce(&self, fail: bool) {
        self.fail.store(fail, Ordering::Release);
    }
}

impl CredentialSource for FakeSource {
    fn name(&self) -> &str {
        "fake"
    }

    fn produce(&self) -> Result<Credential, WardenError> {
        if self.fail.load(Ordering::Acquire) {
            return Err(WardenError::CredentialUnavailable {
                source_name: "fake".to_owned(),
                reason: "disabled by test".to_owned(),
            });
        }
        self.changed.store(false, Ordering::Release);
        Ok(self.credential.clone())
    }

    fn changed(&self) -> bool {
        self.polls.fetch_add(1, Ordering::AcqRel);
        self.changed.load(Ordering::Acquire)
    }
}

/// 卡住 `ping` 的闸门：测试可等待调用进入，再决定何时放行。
pub(crate) struct PingGate {
    entered: watch::Sender<bool>,
    open: watch::Sender<bool>,
}

impl PingGate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: watch::Sender::new(false),
            open: watch::Sender::new(false),
        })
    }

    async fn pass(&self) {
        self.entered.send_replace(true);
        let mut open = self.open.subscribe();
        let _ = open.wait_for(|open| *open).await;
    }

    pub(crate) async fn wait_entered(&self) {
        let mut entered = self.entered.subscribe();
        let _ = entered.wait_for(|entered| *entered).await;
    }

    pub(crate) fn release(&self) {
        self.open.send_replace(true);
    }
}

struct FakeRpc {
    version: String,
    closed: AtomicBool,
    closed_counter: Arc<AtomicUsize>,
    gate: Mutex<Option<Arc<PingGate>>>,
    unresponsive: bool,
}

#[async_trait]
impl RpcConnection for FakeRpc {
    async fn ping(&self) -> Result<PingResponse, CoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoreError::new("test.closed", "connection closed"));
        }
        if self.unresponsive {
            std::future::pending::<()>().await;
        }
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        Ok(PingResponse::new(self.version.clone()).with_capability("access-requests"))
    }

    async fn list_access_requests(
        &self,
        _filter: &RequestFilter,
    ) -> Result<Vec<AccessRequest>, CoreError> {
        Ok(Vec::new())
    }

    async fn watch_access_requests(&self) -> Result<AccessEventStream, CoreError> {
        Ok(Box::pin(stream::empty()))
    }

    async fn approve(&self, _id: &RequestId, _reason: Option<&str>) -> Result<(), CoreError> {
        Ok(())
    }

    async fn deny(&self, _id: &RequestId, _reason: Option<&str>) -> Result<(), CoreError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), CoreError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.closed_counter.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }
}

/// 记录建连次数的连接器，可切换服务端版本或模拟拨号失败。
pub(crate) struct FakeConnector {
    version: Mutex<String>,
    fail: AtomicBool,
    unresponsive: AtomicBool,
    connections: Mutex<Vec<Arc<FakeRpc>>>,
    closed: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub(crate) fn new(version: &str) -> Arc<Self> {
        Arc::new(Self {
            version: Mutex::new(version.to_owned()),
            fail: AtomicBool::new(false),
            unresponsive: AtomicBool::new(false),
            connections: Mutex::new(Vec::new()),
            closed: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub(crate) fn set_version(&self, version: &str) {
        *self.version.lock() = version.to_owned();
    }

    pub(crate) fn fail_connect(&self, fail: bool) {
        self.fail.store(fail, Ordering::Release);
    }

    /// 之后新建的连接对 `ping` 永不应答；已建立的连接不受影响。
    pub(crate) fn unresponsive_pings(&self, unresponsive: bool) {
        self.unresponsive.store(unresponsive, Ordering::Release);
    }

    pub(crate) fn connections(&self) -> usize {
        self.connections.lock().len()
    }

    pub(crate) fn closed_connections(&self) -> usize {
        self.closed.load(Ordering::Acquire)
    }

    /// 对已建立的连接安装 `ping` 闸门；之后新建的连接不受影响。
    pub(crate) fn hold_pings(&self) -> Arc<PingGate> {
        let gate = PingGate::new();
        for rpc in self.connections.lock().iter() {
            *rpc.gate.lock() = Some(gate.clone());
        }
        gate
    }
}

#[async_trait]
impl crate::connector::Connector for FakeConnector {
    async fn connect(
        &self,
        _credential: &Credential,
        _cancellation: &Cancellation,
    ) -> Result<Arc<dyn RpcConnection>, WardenError> {
        if self.fail.load(Ordering::Acquire) {
            return Err(WardenError::DialFailed {
                attempts: vec![DialAttempt {
                    address: "fake:1".to_owned(),
                    error: CoreError::new("test.unreachable", "fake dial failure"),
                }],
            });
        }
        let rpc = Arc::new(FakeRpc {
            version: self.version.lock().clone(),
            closed: AtomicBool::new(false),
            closed_counter: self.closed.clone(),
            gate: Mutex::new(None),
            unresponsive: self.unresponsive.load(Ordering::Acquire),
        });
        self.connections.lock().push(rpc.clone());
        Ok(rpc)
    }
}
