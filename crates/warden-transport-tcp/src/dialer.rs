use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use warden_core::config::ClientOptions;
use warden_core::contract::{Cancellation, Deadline};
use warden_core::error::{DialAttempt, WardenError};
use warden_core::retry::Backoff;

use crate::error;
use crate::primitive::{BoxedStream, DialPrimitive, TcpDialPrimitive};
use crate::proxy::HttpConnectPrimitive;
use crate::util::{run_with_context, sleep_unless_cancelled};

const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// 拨号规格：候选地址、代理转接与拨号原语覆盖。
///
/// # 契约说明（What）
/// - `addresses` 非空且有序，构造时校验；
/// - `proxy` 存在时，外层连接指向代理，候选地址只出现在代理握手中；
/// - `primitive` 为空时使用 [`Dialer`] 的默认原语；
/// - `timeout` 约束单个候选地址的连接耗时。
#[derive(Clone)]
pub struct DialSpec {
    addresses: Vec<String>,
    proxy: Option<String>,
    primitive: Option<Arc<dyn DialPrimitive>>,
    timeout: Duration,
}

impl DialSpec {
    /// 以候选地址构造规格；地址列表为空时报错。
    pub fn new<I, S>(addresses: I) -> Result<Self, WardenError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let addresses: Vec<String> = addresses.into_iter().map(Into::into).collect();
        if addresses.is_empty() {
            return Err(WardenError::config("dial spec requires at least one address"));
        }
        Ok(Self {
            addresses,
            proxy: None,
            primitive: None,
            timeout: DEFAULT_DIAL_TIMEOUT,
        })
    }

    /// 从客户端选项构造规格，代理地址按选项解析（含环境变量回退）。
    pub fn from_options(options: &ClientOptions) -> Result<Self, WardenError> {
        let mut spec = Self::new(options.addresses.iter().cloned())?
            .with_timeout(options.dial_timeout);
        if let Some(proxy) = options.resolved_proxy()? {
            spec = spec.with_proxy(proxy);
        }
        Ok(spec)
    }

    /// 经由代理拨号。
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// 覆盖底层拨号原语。
    pub fn with_primitive(mut self, primitive: Arc<dyn DialPrimitive>) -> Self {
        self.primitive = Some(primitive);
        self
    }

    /// 覆盖单地址超时。
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 候选地址。
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// 代理地址。
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// 单地址超时。
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 是否覆盖了拨号原语。
    pub fn has_primitive_override(&self) -> bool {
        self.primitive.is_some()
    }
}

impl fmt::Debug for DialSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialSpec")
            .field("addresses", &self.addresses)
            .field("proxy", &self.proxy)
            .field("primitive_override", &self.has_primitive_override())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// 拨号成功的结果：字节流与实际使用的候选地址。
pub struct DialedStream {
    pub stream: BoxedStream,
    /// 命中的候选地址（代理模式下为最终目标，而非代理地址）。
    pub address: String,
    /// 经由的代理。
    pub proxy: Option<String>,
}

impl fmt::Debug for DialedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialedStream")
            .field("address", &self.address)
            .field("proxy", &self.proxy)
            .finish_non_exhaustive()
    }
}

/// 候选地址拨号器。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 把“多个候选地址 → 一条可用流”的策略与“如何打开一条流”的机制分离；
/// - 拨号失败时保留每个候选的错误，排障时能看到完整画面。
///
/// ## 逻辑 (How)
/// - 按顺序尝试候选地址，每个地址独立计算截止时间；
/// - 代理模式下把原语包装为 [`HttpConnectPrimitive`]；
/// - 第一个成功的地址立即返回，后续地址不再尝试。
///
/// ## 契约 (What)
/// - `dial` 不做自动重试；需要重试的调用方使用 [`Dialer::dial_with_backoff`]；
/// - 取消时立即返回 `DialFailed`，其中最后一条记录为取消错误。
#[derive(Clone)]
pub struct Dialer {
    primitive: Arc<dyn DialPrimitive>,
}

impl Dialer {
    /// 使用 TCP 直连作为默认原语。
    pub fn new() -> Self {
        Self::with_primitive(Arc::new(TcpDialPrimitive::new()))
    }

    /// 使用指定原语作为默认原语。
    pub fn with_primitive(primitive: Arc<dyn DialPrimitive>) -> Self {
        Self { primitive }
    }

    /// 按顺序拨号候选地址。
    pub async fn dial(
        &self,
        spec: &DialSpec,
        cancellation: &Cancellation,
    ) -> Result<DialedStream, WardenError> {
        let base = spec
            .primitive
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.primitive));
        let primitive: Arc<dyn DialPrimitive> = match &spec.proxy {
            Some(proxy) => Arc::new(HttpConnectPrimitive::new(proxy.clone(), base)),
            None => base,
        };

        let mut attempts = Vec::with_capacity(spec.addresses.len());
        for address in &spec.addresses {
            let deadline = Deadline::after(spec.timeout);
            tracing::debug!(%address, proxy = ?spec.proxy, "dialing candidate");
            let outcome = run_with_context(
                error::CONNECT,
                deadline,
                cancellation,
                primitive.open(address, deadline),
            )
            .await;
            match outcome {
                Ok(stream) => {
                    return Ok(DialedStream {
                        stream,
                        address: address.clone(),
                        proxy: spec.proxy.clone(),
                    });
                }
                Err(err) => {
                    tracing::debug!(%address, error = %err, "candidate failed");
                    attempts.push(DialAttempt {
                        address: address.clone(),
                        error: err,
                    });
                    if cancellation.is_cancelled() {
                        break;
                    }
                }
            }
        }
        tracing::warn!(candidates = spec.addresses.len(), "all dial candidates failed");
        Err(WardenError::DialFailed { attempts })
    }

    /// 按退避策略重试整轮拨号。
    ///
    /// - 仅 `DialFailed` 触发重试，其它错误立即返回；
    /// - 轮间等待可被取消，取消后返回最近一轮的错误。
    pub async fn dial_with_backoff(
        &self,
        spec: &DialSpec,
        backoff: &Backoff,
        cancellation: &Cancellation,
    ) -> Result<DialedStream, WardenError> {
        let attempts = backoff.attempts();
        let mut round = 1;
        loop {
            let err = match self.dial(spec, cancellation).await {
                Ok(dialed) => return Ok(dialed),
                Err(err @ WardenError::DialFailed { .. }) => err,
                Err(other) => return Err(other),
            };
            if round >= attempts || cancellation.is_cancelled() {
                return Err(err);
            }
            let wait = backoff.delay(round);
            tracing::info!(round, ?wait, "dial round failed, backing off");
            if !sleep_unless_cancelled(wait, cancellation).await {
                return Err(err);
            }
            round += 1;
        }
    }
}

impl Default for Dialer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialer").finish_non_exhaustive()
    }
}
