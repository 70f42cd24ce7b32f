use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use warden_core::contract::{Cancellation, Deadline};
use warden_core::error::{CoreError, WardenError};
use warden_core::retry::Backoff;
use warden_core::rpc::RpcConnection;
use warden_transport_tcp::{DialSpec, Dialer};
use warden_transport_tls::{Credential, SecureSession, handshake, server_name_for};

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// 把加密会话绑定为 RPC 连接的能力。
///
/// RPC 服务定义由外部预生成，本 trait 是生成桩代码与客户端核心之间的接缝：
/// 生产实现在会话之上建立 RPC 通道，测试实现可以直接在会话上收发简单帧。
#[async_trait]
pub trait RpcBinder: Send + Sync + 'static {
    /// 在已握手的会话上建立 RPC 连接。
    async fn bind(&self, session: SecureSession) -> Result<Arc<dyn RpcConnection>, CoreError>;
}

/// 以一份凭据建立一条 RPC 连接的能力。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 客户端门面只关心“给凭据、拿连接”，拨号、握手、绑定的组合方式由实现决定；
/// - 测试可以注入不触网的实现，单独验证重载、关闭与版本判定逻辑。
///
/// ## 契约（What）
/// - 失败时返回领域错误：拨号失败为 `DialFailed`，握手或绑定失败为 `Rpc`；
/// - `cancellation` 触发时应尽快返回。
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(
        &self,
        credential: &Credential,
        cancellation: &Cancellation,
    ) -> Result<Arc<dyn RpcConnection>, WardenError>;
}

/// 默认连接器：带退避的拨号 → TLS 握手 → RPC 绑定。
#[derive(Clone)]
pub struct SecureConnector {
    dialer: Dialer,
    spec: DialSpec,
    backoff: Backoff,
    server_name: Option<String>,
    handshake_timeout: Duration,
    binder: Arc<dyn RpcBinder>,
}

impl SecureConnector {
    pub fn new(spec: DialSpec, binder: Arc<dyn RpcBinder>) -> Self {
        Self {
            dialer: Dialer::new(),
            spec,
            backoff: Backoff::default(),
            server_name: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            binder,
        }
    }

    /// 替换拨号器（例如注入隧道感知的默认原语）。
    pub fn with_dialer(mut self, dialer: Dialer) -> Self {
        self.dialer = dialer;
        self
    }

    /// 拨号失败时的退避策略。
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// 覆盖 SNI；缺省取命中地址的主机部分。
    pub fn with_server_name(mut self, server_name: Option<String>) -> Self {
        self.server_name = server_name;
        self
    }

    /// 握手超时。
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// 拨号规格。
    pub fn spec(&self) -> &DialSpec {
        &self.spec
    }
}

#[async_trait]
impl Connector for SecureConnector {
    async fn connect(
        &self,
        credential: &Credential,
        cancellation: &Cancellation,
    ) -> Result<Arc<dyn RpcConnection>, WardenError> {
        let dialed = self
            .dialer
            .dial_with_backoff(&self.spec, &self.backoff, cancellation)
            .await?;
        let server_name = self
            .server_name
            .clone()
            .unwrap_or_else(|| server_name_for(&dialed.address).to_owned());
        let session = handshake(
            dialed.stream,
            credential,
            &server_name,
            Deadline::after(self.handshake_timeout),
            cancellation,
        )
        .await
        .map_err(|err| WardenError::rpc("handshake", err))?;
        tracing::debug!(address = %dialed.address, %server_name, "secure session established");
        self.binder
            .bind(session)
            .await
            .map_err(|err| WardenError::rpc("bind", err))
    }
}

impl fmt::Debug for SecureConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureConnector")
            .field("spec", &self.spec)
            .field("backoff", &self.backoff)
            .field("server_name", &self.server_name)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}
