use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use warden_core::access::{AccessRequest, Decision};
use warden_core::error::{ErrorCause, WardenError};

/// 特征值通配符：规则值集合包含它时，只要求请求带有该特征键。
pub const WILDCARD: &str = "*";

/// 单个特征键上的取值约束。
#[derive(Clone, Debug, PartialEq, Eq)]
enum ValueSet {
    Any,
    OneOf(BTreeSet<String>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct TraitPredicate {
    key: String,
    values: ValueSet,
}

impl TraitPredicate {
    fn matches(&self, request: &AccessRequest) -> bool {
        let Some(actual) = request.trait_values(&self.key) else {
            return false;
        };
        match &self.values {
            ValueSet::Any => !actual.is_empty(),
            ValueSet::OneOf(allowed) => !allowed.is_disjoint(actual),
        }
    }
}

/// 访问请求属性上的匹配规则：各条件之间为“且”关系。
///
/// # 契约（What）
/// - 特征条件：请求在该键上的取值集合与规则允许的取值集合有交集即满足；
///   允许集合含 [`WILDCARD`] 时，请求只需带有该键的任意取值；
/// - 角色条件：请求的角色集合必须包含规则列出的全部角色；
/// - 不含任何条件的规则匹配所有请求。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchRule {
    traits: Vec<TraitPredicate>,
    roles: BTreeSet<String>,
}

impl MatchRule {
    /// 匹配所有请求的规则。
    pub fn any() -> Self {
        Self::default()
    }

    /// 以一个特征条件开始构造规则。
    pub fn trait_in<I, S>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::any().and_trait_in(key, values)
    }

    /// 追加特征条件。
    pub fn and_trait_in<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        let values = if values.contains(WILDCARD) {
            ValueSet::Any
        } else {
            ValueSet::OneOf(values)
        };
        self.traits.push(TraitPredicate {
            key: key.into(),
            values,
        });
        self
    }

    /// 追加“带有该特征键即可”的条件，等价于取值集合为 `*`。
    pub fn and_trait_present(self, key: impl Into<String>) -> Self {
        self.and_trait_in(key, [WILDCARD])
    }

    /// 追加角色条件。
    pub fn and_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// 判断请求是否满足全部条件。
    pub fn matches(&self, request: &AccessRequest) -> bool {
        self.roles.is_subset(&request.roles)
            && self.traits.iter().all(|predicate| predicate.matches(request))
    }
}

/// 访问请求处理器。
///
/// 处理器在路由器的调用上下文中同步执行；返回错误不会改变请求在服务端的状态。
pub trait AccessHandler: Send + Sync + 'static {
    fn handle(&self, request: &AccessRequest) -> Result<Decision, ErrorCause>;
}

impl<F> AccessHandler for F
where
    F: Fn(&AccessRequest) -> Result<Decision, ErrorCause> + Send + Sync + 'static,
{
    fn handle(&self, request: &AccessRequest) -> Result<Decision, ErrorCause> {
        self(request)
    }
}

/// 规则与处理器的绑定。
#[derive(Clone)]
pub struct Route {
    label: String,
    rule: MatchRule,
    handler: Arc<dyn AccessHandler>,
}

impl Route {
    /// 路由标签，出现在分发结果与处理器错误中。
    pub fn label(&self) -> &str {
        &self.label
    }

    /// 匹配规则。
    pub fn rule(&self) -> &MatchRule {
        &self.rule
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("label", &self.label)
            .field("rule", &self.rule)
            .finish_non_exhaustive()
    }
}

/// 一次分发的结果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// 命中路由，处理器给出了决策。
    Handled { route: String, decision: Decision },
    /// 没有路由命中，请求保持原状，留给其它外部决策者。
    NoMatch,
}

impl Dispatch {
    /// 命中路由时返回决策。
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            Self::Handled { decision, .. } => Some(decision),
            Self::NoMatch => None,
        }
    }
}

#[derive(Default)]
struct RouteTable {
    routes: Vec<Route>,
}

/// 按注册顺序匹配的访问请求路由器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“哪个处理器负责哪类请求”声明为规则列表，处理器本身只关心决策；
/// - 规则数量在几十条量级，线性扫描足够；规则表以 `ArcSwap` 持有，分发路径不加锁。
///
/// ## 逻辑（How）
/// - `register` 以 RCU 方式在表尾追加路由，并递增修订号；
/// - `dispatch` 加载表快照，按注册顺序寻找第一条匹配的路由并同步调用其处理器。
///
/// ## 契约（What）
/// - **先注册者优先**：允许规则重叠，注册顺序决定命中结果，调用方应先注册更具体的规则；
/// - 每次分发至多调用一个处理器；
/// - 处理器错误包装为携带路由标签的 `HandlerError` 返回。
pub struct RequestRouter {
    table: ArcSwap<RouteTable>,
    revision: AtomicU64,
}

impl RequestRouter {
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(RouteTable::default()),
            revision: AtomicU64::new(0),
        }
    }

    /// 追加路由，标签自动取 `route-<序号>`。返回新路由的序号（从 0 开始）。
    ///
    /// 序号在 RCU 闭包内按实际插入位置确定，并发注册时标签与序号一致。
    pub fn register(&self, rule: MatchRule, handler: impl AccessHandler) -> usize {
        self.append(None, rule, Arc::new(handler))
    }

    /// 以指定标签追加路由。返回新路由的序号（从 0 开始）。
    pub fn register_labeled(
        &self,
        label: impl Into<String>,
        rule: MatchRule,
        handler: impl AccessHandler,
    ) -> usize {
        self.append(Some(label.into()), rule, Arc::new(handler))
    }

    fn append(
        &self,
        label: Option<String>,
        rule: MatchRule,
        handler: Arc<dyn AccessHandler>,
    ) -> usize {
        let previous = self.table.rcu(|table| {
            let index = table.routes.len();
            let mut routes = table.routes.clone();
            routes.push(Route {
                label: label
                    .clone()
                    .unwrap_or_else(|| format!("route-{index}")),
                rule: rule.clone(),
                handler: Arc::clone(&handler),
            });
            RouteTable { routes }
        });
        self.revision.fetch_add(1, Ordering::AcqRel);
        previous.routes.len()
    }

    /// 已注册路由数量。
    pub fn len(&self) -> usize {
        self.table.load().routes.len()
    }

    /// 是否尚未注册任何路由。
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 路由表修订号，每次注册递增。
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// 按注册顺序列出路由标签。
    pub fn labels(&self) -> Vec<String> {
        self.table
            .load()
            .routes
            .iter()
            .map(|route| route.label.clone())
            .collect()
    }

    /// 将请求分发给第一条匹配的路由。
    pub fn dispatch(&self, request: &AccessRequest) -> Result<Dispatch, WardenError> {
        let table = self.table.load();
        let Some(route) = table.routes.iter().find(|route| route.rule.matches(request)) else {
            tracing::trace!(request = %request.id, "no route matched");
            return Ok(Dispatch::NoMatch);
        };
        match route.handler.handle(request) {
            Ok(decision) => {
                tracing::debug!(request = %request.id, route = %route.label, ?decision, "request dispatched");
                Ok(Dispatch::Handled {
                    route: route.label.clone(),
                    decision,
                })
            }
            Err(source) => Err(WardenError::HandlerError {
                route: route.label.clone(),
                source,
            }),
        }
    }
}

impl Default for RequestRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RequestRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestRouter")
            .field("routes", &self.labels())
            .field("revision", &self.revision())
            .finish()
    }
}
