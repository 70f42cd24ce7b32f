use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use semver::Version;
use tokio::task::JoinHandle;
use warden_core::access::{AccessRequest, RequestFilter, RequestId};
use warden_core::config::ClientOptions;
use warden_core::contract::Cancellation;
use warden_core::error::{CoreError, ErrorCategory, WardenError, codes};
use warden_core::rpc::{AccessEventStream, PingResponse, RpcConnection};
use warden_core::version::CompatibilityPolicy;
use warden_transport_tcp::DialSpec;
use warden_transport_tls::{CredentialChain, CredentialSource, ProfileSource};

use crate::connector::{Connector, RpcBinder, SecureConnector};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 握手时缓存的服务端元数据。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerMetadata {
    /// 服务端上报的版本。
    pub version: Version,
    /// 集群名称。
    pub cluster_name: String,
    /// 能力标记。
    pub capabilities: BTreeSet<String>,
    /// 建立该连接所用凭据的叶证书指纹。
    pub credential_fingerprint: String,
}

impl ServerMetadata {
    /// 是否声明了指定能力。
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// 一次 `reload` 的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// 凭据未变化，也没有待重试的失败，未创建新连接。
    Unchanged,
    /// 已切换到新连接。
    Reloaded { generation: u64 },
}

/// 当前生效的连接及其元数据。
struct ActiveConnection {
    rpc: Arc<dyn RpcConnection>,
    metadata: ServerMetadata,
    generation: u64,
}

struct ClientInner {
    credentials: Arc<dyn CredentialSource>,
    connector: Arc<dyn Connector>,
    policy: CompatibilityPolicy,
    current: ArcSwapOption<ActiveConnection>,
    reload_lock: tokio::sync::Mutex<()>,
    retry_pending: AtomicBool,
    generation: AtomicU64,
    closed: AtomicBool,
    shutdown: Cancellation,
    reload_task: Mutex<Option<JoinHandle<()>>>,
    drain_timeout: Duration,
    ping_timeout: Duration,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        // 未显式 close 时也要让后台轮询尽快退出，并释放仍在生效的连接。
        self.shutdown.cancel();
        let Some(active) = self.current.swap(None) else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(release(active, "connection of dropped client"));
            }
            Err(_) => tracing::warn!(
                generation = active.generation,
                "client dropped outside a runtime, connection not closed"
            ),
        }
    }
}

/// 访问审批服务的客户端门面。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把凭据链、拨号器与 RPC 绑定组合成一个开箱即用的连接，调用方只面对 RPC 方法；
/// - 凭据在磁盘上轮换时自动切换到新连接，调用方无感知。
///
/// ## 逻辑（How）
/// - 构造：产出凭据 → 拨号并握手 → `ping`（受 `ping_timeout` 与关闭信号约束）→ 版本兼容判定 → 发布连接 → 启动后台轮询；
/// - 重载：仅当凭据链报告变化（或上次重载失败待重试）时，建立新连接并以 `ArcSwap` 原子发布，
///   旧连接在在途调用结束后关闭，等待时长受 `drain_timeout` 约束；
/// - 关闭：取消并等待后台轮询任务，再释放当前连接；重复关闭直接返回；
/// - 最后一个句柄被释放而未调用 `close` 时，在当前运行时上异步关闭生效连接，不等待其完成。
///
/// ## 契约（What）
/// - 任意时刻至多一条生效连接；RPC 调用在调用时刻读取当前连接，并持有它直到调用结束；
/// - `reload` 失败返回 `ReloadFailed` 并记录 warn 日志，旧连接保持可用；
/// - 构造期的 `IncompatibleVersion` 直接失败，不重试。
///
/// ## 风险与权衡（Trade-offs）
/// - `Client` 是共享句柄，克隆体共享同一连接，任一克隆体 `close` 对全部生效；
/// - 事件订阅流不阻止旧连接关闭；订阅方在连接切换后会观测到流结束，需要重新订阅。
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// 以凭据链与拨号规格构造客户端，RPC 通道由 `binder` 在 TLS 会话上建立。
    pub async fn new(
        credentials: CredentialChain,
        spec: DialSpec,
        binder: Arc<dyn RpcBinder>,
        options: &ClientOptions,
    ) -> Result<Self, WardenError> {
        options.validate()?;
        let connector = SecureConnector::new(spec, binder)
            .with_backoff(options.dial_backoff)
            .with_server_name(options.server_name.clone());
        Self::with_connector(Arc::new(credentials), Arc::new(connector), options).await
    }

    /// 完全由选项描述地址与代理的构造方式。
    pub async fn from_options(
        credentials: CredentialChain,
        binder: Arc<dyn RpcBinder>,
        options: &ClientOptions,
    ) -> Result<Self, WardenError> {
        let spec = DialSpec::from_options(options)?;
        Self::new(credentials, spec, binder, options).await
    }

    /// 由外部登录流程写出的 profile 构造：凭据与拨号提示均来自 profile。
    ///
    /// 选项中的 `server_name` 优先于 profile 中的同名字段；`addresses` 与代理设置被 profile 取代。
    pub async fn from_profile(
        path: impl AsRef<Path>,
        binder: Arc<dyn RpcBinder>,
        options: &ClientOptions,
    ) -> Result<Self, WardenError> {
        let source = ProfileSource::new(path.as_ref());
        let profile = source.profile()?;
        let spec = profile.dial_spec()?.with_timeout(options.dial_timeout);
        let server_name = options.server_name.clone().or(profile.server_name);
        let options = ClientOptions {
            server_name,
            ..options.clone()
        };
        Self::new(CredentialChain::single(source), spec, binder, &options).await
    }

    /// 以任意凭据来源与连接器构造；其余构造函数最终都汇聚到这里。
    pub async fn with_connector(
        credentials: Arc<dyn CredentialSource>,
        connector: Arc<dyn Connector>,
        options: &ClientOptions,
    ) -> Result<Self, WardenError> {
        options.validate()?;
        let policy = options
            .compatibility
            .build(env!("CARGO_PKG_VERSION"))?;
        let inner = Arc::new(ClientInner {
            credentials,
            connector,
            policy,
            current: ArcSwapOption::empty(),
            reload_lock: tokio::sync::Mutex::new(()),
            retry_pending: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            shutdown: Cancellation::new(),
            reload_task: Mutex::new(None),
            drain_timeout: options.drain_timeout,
            ping_timeout: options.ping_timeout,
        });
        let client = Self { inner };

        let active = client.establish().await?;
        tracing::info!(
            server_version = %active.metadata.version,
            cluster = %active.metadata.cluster_name,
            "client connected"
        );
        client.inner.current.store(Some(active));

        let task = tokio::spawn(reload_loop(
            Arc::downgrade(&client.inner),
            client.inner.shutdown.child(),
            options.credential_poll_interval,
        ));
        *client.inner.reload_task.lock() = Some(task);
        Ok(client)
    }

    /// 产出凭据并建立一条经过版本判定的新连接。
    async fn establish(&self) -> Result<Arc<ActiveConnection>, WardenError> {
        let inner = &self.inner;
        let credential = inner.credentials.produce()?;
        let rpc = inner
            .connector
            .connect(&credential, &inner.shutdown)
            .await?;
        let metadata = match verify_server(&rpc, &inner.policy, inner.ping_timeout, &inner.shutdown)
            .await
        {
            Ok((version, ping)) => ServerMetadata {
                version,
                cluster_name: ping.cluster_name,
                capabilities: ping.capabilities,
                credential_fingerprint: credential.fingerprint().to_owned(),
            },
            Err(err) => {
                if let Err(close_err) = rpc.close().await {
                    tracing::debug!(error = %close_err, "closing rejected connection failed");
                }
                return Err(err);
            }
        };
        let generation = inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(Arc::new(ActiveConnection {
            rpc,
            metadata,
            generation,
        }))
    }

    /// 凭据变化时切换到新连接。
    ///
    /// - 凭据未变化且没有待重试的失败时，不创建连接，返回 [`ReloadOutcome::Unchanged`]；
    /// - 新连接建立或版本判定失败时返回 `ReloadFailed`，旧连接继续服务，下一次调用会重试；
    /// - 与 RPC 调用并发安全：发布是一次原子交换，旧连接在在途调用结束后关闭。
    pub async fn reload(&self) -> Result<ReloadOutcome, WardenError> {
        self.ensure_open()?;
        let _guard = self.inner.reload_lock.lock().await;
        self.ensure_open()?;

        let retry = self.inner.retry_pending.load(Ordering::Acquire);
        if !retry && !self.inner.credentials.changed() {
            return Ok(ReloadOutcome::Unchanged);
        }

        let next = match self.establish().await {
            Ok(next) => next,
            Err(err) => {
                self.inner.retry_pending.store(true, Ordering::Release);
                tracing::warn!(error = %err, retry, "credential reload failed, keeping current connection");
                return Err(WardenError::ReloadFailed {
                    source: Box::new(err),
                });
            }
        };
        self.inner.retry_pending.store(false, Ordering::Release);

        if self.inner.closed.load(Ordering::Acquire) {
            release(next, "connection established during close").await;
            return Err(WardenError::Closed);
        }

        let generation = next.generation;
        let previous = self.inner.current.swap(Some(next));
        tracing::info!(generation, "credential reload completed");
        if let Some(previous) = previous {
            self.retire(previous).await;
        }
        Ok(ReloadOutcome::Reloaded { generation })
    }

    /// 等待旧连接上的在途调用结束后关闭它。
    async fn retire(&self, previous: Arc<ActiveConnection>) {
        let started = Instant::now();
        while Arc::strong_count(&previous) > 1 {
            if started.elapsed() >= self.inner.drain_timeout {
                tracing::warn!(
                    generation = previous.generation,
                    in_flight = Arc::strong_count(&previous) - 1,
                    "drain timeout elapsed, closing retired connection"
                );
                break;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
        release(previous, "retired connection").await;
    }

    /// 关闭客户端：停止后台轮询并释放当前连接。重复调用直接返回 `Ok(())`。
    pub async fn close(&self) -> Result<(), WardenError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.shutdown.cancel();
        let task = self.inner.reload_task.lock().take();
        if let Some(task) = task
            && let Err(err) = task.await
        {
            tracing::warn!(error = %err, "reload task terminated abnormally");
        }
        // 等待进行中的 reload 结束，避免其发布的新连接被遗漏。
        let _guard = self.inner.reload_lock.lock().await;
        if let Some(active) = self.inner.current.swap(None) {
            active
                .rpc
                .close()
                .await
                .map_err(|err| WardenError::rpc("close", err))?;
        }
        tracing::info!("client closed");
        Ok(())
    }

    /// 是否已关闭。
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// 当前连接的代数，每次成功建立连接递增。
    pub fn generation(&self) -> Option<u64> {
        self.inner
            .current
            .load()
            .as_ref()
            .map(|active| active.generation)
    }

    /// 当前连接握手时缓存的服务端元数据。
    pub fn server_metadata(&self) -> Result<ServerMetadata, WardenError> {
        Ok(self.active()?.metadata.clone())
    }

    /// 向服务端发起 `ping`。
    pub async fn ping(&self) -> Result<PingResponse, WardenError> {
        let active = self.active()?;
        active
            .rpc
            .ping()
            .await
            .map_err(|err| WardenError::rpc("ping", err))
    }

    /// 列举访问请求。
    pub async fn list_access_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<AccessRequest>, WardenError> {
        let active = self.active()?;
        active
            .rpc
            .list_access_requests(filter)
            .await
            .map_err(|err| WardenError::rpc("list_access_requests", err))
    }

    /// 订阅访问请求生命周期事件。
    pub async fn watch_access_requests(&self) -> Result<AccessEventStream, WardenError> {
        let active = self.active()?;
        active
            .rpc
            .watch_access_requests()
            .await
            .map_err(|err| WardenError::rpc("watch_access_requests", err))
    }

    /// 批准访问请求。
    pub async fn approve(&self, id: &RequestId, reason: Option<&str>) -> Result<(), WardenError> {
        let active = self.active()?;
        active
            .rpc
            .approve(id, reason)
            .await
            .map_err(|err| WardenError::rpc("approve", err))
    }

    /// 拒绝访问请求。
    pub async fn deny(&self, id: &RequestId, reason: Option<&str>) -> Result<(), WardenError> {
        let active = self.active()?;
        active
            .rpc
            .deny(id, reason)
            .await
            .map_err(|err| WardenError::rpc("deny", err))
    }

    fn ensure_open(&self) -> Result<(), WardenError> {
        if self.is_closed() {
            return Err(WardenError::Closed);
        }
        Ok(())
    }

    fn active(&self) -> Result<Arc<ActiveConnection>, WardenError> {
        self.ensure_open()?;
        self.inner.current.load_full().ok_or(WardenError::Closed)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("credentials", &self.inner.credentials.name())
            .field("generation", &self.generation())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// 版本握手：`ping` 受超时与关闭信号约束，关闭优先于超时，超时优先于应答。
async fn verify_server(
    rpc: &Arc<dyn RpcConnection>,
    policy: &CompatibilityPolicy,
    timeout: Duration,
    shutdown: &Cancellation,
) -> Result<(Version, PingResponse), WardenError> {
    let reply = rpc.ping();
    let expiry = tokio::time::sleep(timeout);
    tokio::pin!(reply);
    tokio::pin!(expiry);
    let ping = tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(
            CoreError::new(codes::PING_CANCELLED, "client closed during version handshake")
                .with_category(ErrorCategory::Cancelled),
        ),
        _ = &mut expiry => Err(
            CoreError::new(codes::PING_TIMEOUT, format!("no ping reply within {timeout:?}"))
                .with_category(ErrorCategory::Timeout),
        ),
        reply = &mut reply => reply,
    }
    .map_err(|err| WardenError::rpc("ping", err))?;
    let version = policy.check(&ping.server_version)?;
    Ok((version, ping))
}

async fn release(connection: Arc<ActiveConnection>, what: &'static str) {
    if let Err(err) = connection.rpc.close().await {
        tracing::warn!(generation = connection.generation, error = %err, "closing {what} failed");
    }
}

/// 后台凭据轮询：按周期调用 `reload`，直到取消或客户端被释放。
async fn reload_loop(inner: Weak<ClientInner>, shutdown: Cancellation, interval: Duration) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let client = Client { inner };
        match client.reload().await {
            Ok(_) | Err(WardenError::ReloadFailed { .. }) => {}
            Err(WardenError::Closed) => break,
            Err(err) => tracing::warn!(error = %err, "unexpected reload error"),
        }
    }
    tracing::debug!("credential poll loop stopped");
}
