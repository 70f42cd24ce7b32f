//! RPC 表面契约。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 服务定义与编解码由外部预生成，客户端核心只关心四类调用：版本探测 `ping`、
//!   访问请求列举、事件订阅以及批准/拒绝变更；
//! - 以对象安全的 trait 描述这些调用，使生产实现（TLS 之上的 RPC 桩）与测试替身可以互换。
//!
//! ## 契约（What）
//! - 所有方法可被多个任务并发调用；
//! - [`RpcConnection::watch_access_requests`] 返回按服务端投递顺序排列的事件流，
//!   流结束或产出错误即视为订阅断开；
//! - [`RpcConnection::close`] 必须幂等。

use std::collections::BTreeSet;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::access::{AccessEvent, AccessRequest, RequestFilter, RequestId};
use crate::error::CoreError;

/// 事件流类型：按投递顺序产出生命周期事件。
pub type AccessEventStream =
    Pin<Box<dyn Stream<Item = Result<AccessEvent, CoreError>> + Send + 'static>>;

/// `ping` 的返回值：服务端版本与能力标记。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PingResponse {
    pub server_version: String,
    pub cluster_name: String,
    pub capabilities: BTreeSet<String>,
}

impl PingResponse {
    /// 以版本号构造不含能力标记的响应。
    pub fn new(server_version: impl Into<String>) -> Self {
        Self {
            server_version: server_version.into(),
            ..Self::default()
        }
    }

    /// 追加能力标记。
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    /// 是否声明了指定能力。
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// 已建立连接上的 RPC 调用能力。
#[async_trait]
pub trait RpcConnection: Send + Sync + 'static {
    /// 轻量探测调用，返回服务端版本与能力。
    async fn ping(&self) -> Result<PingResponse, CoreError>;

    /// 列举满足过滤条件的访问请求。
    async fn list_access_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<AccessRequest>, CoreError>;

    /// 订阅访问请求生命周期事件。
    async fn watch_access_requests(&self) -> Result<AccessEventStream, CoreError>;

    /// 批准指定请求。
    async fn approve(&self, id: &RequestId, reason: Option<&str>) -> Result<(), CoreError>;

    /// 拒绝指定请求。
    async fn deny(&self, id: &RequestId, reason: Option<&str>) -> Result<(), CoreError>;

    /// 关闭连接并释放底层资源；重复调用不得报错。
    async fn close(&self) -> Result<(), CoreError>;
}
