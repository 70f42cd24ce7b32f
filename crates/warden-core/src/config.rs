//! 客户端构造配置。
//!
//! # 教案式导航
//! - **定位（Where）**：客户端门面在构造时读取的枚举化选项，可由代码直接填写，也可从 TOML 装载；
//! - **约束（What）**：时长字段在 TOML 中以毫秒整数表示；凭据链与拨号原语覆盖属于代码级选项，
//!   不参与序列化；
//! - **默认值（How）**：拨号超时 5s、凭据轮询 1s、连接排空 5s、版本握手 10s、拨号退避见 [`Backoff::default`]。

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::WardenError;
use crate::retry::Backoff;
use crate::version::CompatibilityOptions;

/// 代理地址的环境变量回退列表，按顺序读取。
pub const PROXY_ENV_VARS: [&str; 2] = ["HTTPS_PROXY", "https_proxy"];

/// 客户端构造选项。
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientOptions {
    /// 候选拨号地址，按顺序尝试。
    pub addresses: Vec<String>,
    /// 是否经由中间代理拨号。
    pub proxy_indirection: bool,
    /// 显式代理地址；未设置时回退到 `HTTPS_PROXY` 环境变量。
    pub proxy_address: Option<String>,
    /// TLS SNI 覆盖值；缺省取目标地址的主机部分。
    pub server_name: Option<String>,
    /// 单个候选地址的连接超时。
    #[serde(with = "millis")]
    pub dial_timeout: Duration,
    /// 凭据变更探测周期。
    #[serde(with = "millis")]
    pub credential_poll_interval: Duration,
    /// 旧连接等待在途调用结束的最长时间。
    #[serde(with = "millis")]
    pub drain_timeout: Duration,
    /// 建连后版本握手 `ping` 的超时。
    #[serde(with = "millis")]
    pub ping_timeout: Duration,
    /// 构造期拨号失败的退避策略。
    pub dial_backoff: Backoff,
    /// 版本兼容策略。
    pub compatibility: CompatibilityOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            proxy_indirection: false,
            proxy_address: None,
            server_name: None,
            dial_timeout: Duration::from_secs(5),
            credential_poll_interval: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(5),
            ping_timeout: Duration::from_secs(10),
            dial_backoff: Backoff::default(),
            compatibility: CompatibilityOptions::default(),
        }
    }
}

impl ClientOptions {
    /// 以候选地址构造默认选项。
    pub fn with_addresses<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// 从 TOML 文本解析。
    pub fn from_toml_str(raw: &str) -> Result<Self, WardenError> {
        let options: Self = toml::from_str(raw)
            .map_err(|err| WardenError::config(format!("malformed client options: {err}")))?;
        options.validate()?;
        Ok(options)
    }

    /// 从 TOML 文件解析。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, WardenError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            WardenError::config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// 校验取值范围；地址列表允许为空，因为它可能由 profile 补全。
    pub fn validate(&self) -> Result<(), WardenError> {
        if self.dial_timeout.is_zero() {
            return Err(WardenError::config("dial_timeout must be positive"));
        }
        if self.credential_poll_interval.is_zero() {
            return Err(WardenError::config(
                "credential_poll_interval must be positive",
            ));
        }
        if self.ping_timeout.is_zero() {
            return Err(WardenError::config("ping_timeout must be positive"));
        }
        if self.addresses.iter().any(|addr| addr.trim().is_empty()) {
            return Err(WardenError::config("addresses must not contain blanks"));
        }
        if !self.dial_backoff.multiplier.is_finite() || self.dial_backoff.multiplier < 1.0 {
            return Err(WardenError::config("dial_backoff.multiplier must be >= 1"));
        }
        Ok(())
    }

    /// 解析实际使用的代理地址；未启用代理时返回 `None`。
    pub fn resolved_proxy(&self) -> Result<Option<String>, WardenError> {
        if !self.proxy_indirection {
            return Ok(None);
        }
        if let Some(explicit) = &self.proxy_address {
            return Ok(Some(explicit.clone()));
        }
        PROXY_ENV_VARS
            .iter()
            .find_map(|name| std::env::var(name).ok())
            .map(|raw| Some(strip_scheme(&raw).to_owned()))
            .ok_or_else(|| {
                WardenError::config("proxy_indirection is set but no proxy address is known")
            })
    }
}

fn strip_scheme(raw: &str) -> &str {
    let without_scheme = raw.split_once("://").map_or(raw, |(_, rest)| rest);
    without_scheme.trim_end_matches('/')
}

/// 以毫秒整数表示的 `Duration` 反序列化。
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
