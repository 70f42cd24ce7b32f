//! 客户端与服务端的版本兼容性判定。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 客户端在建连后立即 `ping` 服务端，拿到服务端版本号后必须判定协议是否兼容，
//!   不兼容时直接中止构造，避免后续 RPC 以难以诊断的方式失败。
//!
//! ## 逻辑（How）
//! - 主版本号必须一致；
//! - 服务端版本不得低于 `minimum`（默认取客户端的 `major.minor.0`）；
//! - 命中 `allow_list` 中任一 [`VersionReq`] 的服务端版本无条件放行。
//!
//! ## 契约（What）
//! - 版本字符串允许带 `v` 前缀，也允许省略补丁号（`2.3` 视为 `2.3.0`）；
//! - 预发布标签按 semver 规则参与比较：`2.3.0-beta.1 < 2.3.0`。

use semver::{Version, VersionReq};
use serde::Deserialize;

use crate::error::WardenError;

/// 解析宽松格式的版本号。
pub fn parse_version(raw: &str) -> Result<Version, WardenError> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    let (core, suffix) = match trimmed.find(['-', '+']) {
        Some(index) => trimmed.split_at(index),
        None => (trimmed, ""),
    };
    let normalized = match core.split('.').count() {
        1 => format!("{core}.0.0{suffix}"),
        2 => format!("{core}.0{suffix}"),
        _ => trimmed.to_owned(),
    };
    Version::parse(&normalized)
        .map_err(|err| WardenError::config(format!("invalid version `{raw}`: {err}")))
}

/// 版本兼容策略。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompatibilityPolicy {
    client: Version,
    minimum: Version,
    allow_list: Vec<VersionReq>,
}

impl CompatibilityPolicy {
    /// 以客户端版本构造策略，最低服务端版本取 `major.minor.0`。
    pub fn new(client: Version) -> Self {
        let minimum = Version::new(client.major, client.minor, 0);
        Self {
            client,
            minimum,
            allow_list: Vec::new(),
        }
    }

    /// 覆盖最低服务端版本。
    pub fn with_minimum(mut self, minimum: Version) -> Self {
        self.minimum = minimum;
        self
    }

    /// 追加放行规则。
    pub fn allow(mut self, requirement: VersionReq) -> Self {
        self.allow_list.push(requirement);
        self
    }

    /// 客户端版本。
    pub fn client(&self) -> &Version {
        &self.client
    }

    /// 最低服务端版本。
    pub fn minimum(&self) -> &Version {
        &self.minimum
    }

    /// 判定服务端上报的版本是否兼容。
    pub fn check(&self, remote_raw: &str) -> Result<Version, WardenError> {
        let remote = parse_version(remote_raw)?;
        if self.allow_list.iter().any(|req| req.matches(&remote)) {
            return Ok(remote);
        }
        if remote.major == self.client.major && remote >= self.minimum {
            return Ok(remote);
        }
        Err(WardenError::IncompatibleVersion {
            client: self.client.to_string(),
            remote: remote.to_string(),
            minimum: self.minimum.to_string(),
        })
    }
}

/// 兼容策略的可序列化配置。
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompatibilityOptions {
    /// 客户端自身版本；缺省时由调用方提供（通常为 crate 版本）。
    pub client_version: Option<String>,
    /// 最低服务端版本。
    pub minimum_version: Option<String>,
    /// 放行规则，semver 需求表达式，例如 `=2.1`。
    pub allow_list: Vec<String>,
}

impl CompatibilityOptions {
    /// 结合默认客户端版本生成策略。
    pub fn build(&self, default_client: &str) -> Result<CompatibilityPolicy, WardenError> {
        let client = parse_version(self.client_version.as_deref().unwrap_or(default_client))?;
        let mut policy = CompatibilityPolicy::new(client);
        if let Some(minimum) = &self.minimum_version {
            policy = policy.with_minimum(parse_version(minimum)?);
        }
        for raw in &self.allow_list {
            let requirement = VersionReq::parse(raw).map_err(|err| {
                WardenError::config(format!("invalid allow-list entry `{raw}`: {err}"))
            })?;
            policy = policy.allow(requirement);
        }
        Ok(policy)
    }
}
