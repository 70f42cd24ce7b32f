//! 访问请求模型：请求实体、特征集合、生命周期事件与处理决策。
//!
//! # 教案式导航
//! - **定位（Where）**：客户端 RPC 表面、路由器与监听器共享的数据模型；
//! - **动机（Why）**：路由规则基于特征集合做集合交运算，因此特征以 `key → 有序值集合` 表示，
//!   保证匹配结果与插入顺序无关；
//! - **约束（What）**：`Approved`/`Denied`/`Expired` 为终态，[`RequestState::is_terminal`] 据此判定。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// 访问请求的稳定标识。
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// 以任意字符串构造请求标识。
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// 借用底层字符串。
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// 访问请求的生命周期状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl RequestState {
    /// 是否为终态。
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Expired => "expired",
        };
        f.write_str(text)
    }
}

/// 特征集合：`key → 值集合`。
pub type Traits = BTreeMap<String, BTreeSet<String>>;

/// 待授权的访问请求。
///
/// # 契约说明（What）
/// - `requester`：发起者身份（用户名）；
/// - `roles`：申请的角色集合；
/// - `traits`：发起者的特征，例如 `team = {eng}`；
/// - `state`：当前生命周期状态。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub id: RequestId,
    pub requester: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub traits: Traits,
    pub state: RequestState,
}

impl AccessRequest {
    /// 构造处于 `Pending` 状态、无角色与特征的请求。
    pub fn pending(id: impl Into<RequestId>, requester: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            requester: requester.into(),
            roles: BTreeSet::new(),
            traits: Traits::new(),
            state: RequestState::Pending,
        }
    }

    /// 追加申请角色。
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// 为指定特征键追加一个值。
    pub fn with_trait(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.traits
            .entry(key.into())
            .or_default()
            .insert(value.into());
        self
    }

    /// 覆盖生命周期状态。
    pub fn with_state(mut self, state: RequestState) -> Self {
        self.state = state;
        self
    }

    /// 查询某个特征键的值集合。
    pub fn trait_values(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.traits.get(key)
    }
}

/// 生命周期事件类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessEventKind {
    /// 订阅建立确认，不携带业务含义。
    Init,
    /// 请求被创建或状态发生变化。
    Put,
    /// 请求被删除。
    Delete,
}

/// 事件流中的一条访问请求生命周期事件。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEvent {
    pub kind: AccessEventKind,
    pub request: Option<AccessRequest>,
}

impl AccessEvent {
    /// 订阅确认事件。
    pub fn init() -> Self {
        Self {
            kind: AccessEventKind::Init,
            request: None,
        }
    }

    /// 请求创建或更新事件。
    pub fn put(request: AccessRequest) -> Self {
        Self {
            kind: AccessEventKind::Put,
            request: Some(request),
        }
    }

    /// 请求删除事件。
    pub fn delete(request: AccessRequest) -> Self {
        Self {
            kind: AccessEventKind::Delete,
            request: Some(request),
        }
    }
}

/// 处理器对单个请求给出的决策。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Approve { reason: Option<String> },
    Deny { reason: Option<String> },
    /// 不做处理，请求保持 Pending，交由其它外部决策者。
    PassThrough,
}

impl Decision {
    /// 无理由批准。
    pub const fn approve() -> Self {
        Self::Approve { reason: None }
    }

    /// 无理由拒绝。
    pub const fn deny() -> Self {
        Self::Deny { reason: None }
    }

    /// 是否需要回写服务端。
    pub const fn requires_mutation(&self) -> bool {
        !matches!(self, Self::PassThrough)
    }
}

/// 列举访问请求时的过滤条件。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestFilter {
    pub requester: Option<String>,
    pub state: Option<RequestState>,
}

impl RequestFilter {
    /// 判断请求是否满足过滤条件。
    pub fn matches(&self, request: &AccessRequest) -> bool {
        self.requester
            .as_deref()
            .is_none_or(|requester| requester == request.requester)
            && self.state.is_none_or(|state| state == request.state)
    }
}
