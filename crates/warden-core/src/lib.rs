#![doc = r#"
# warden-core

## 设计动机（Why）
- **契约集中**：访问审批客户端由凭据、拨号、客户端门面与工作流监听四层组成，
  各层共享的错误域、取消原语、访问请求模型与 RPC 表面统一沉淀在本 crate，
  避免实现层之间相互引用具体类型。
- **可替换性**：RPC 协议本身视为外部预生成的桩代码，本 crate 只定义
  [`rpc::RpcConnection`] 能力接口，测试与生产实现均可自由注入。

## 核心契约（What）
- [`error`]：稳定错误码的 [`CoreError`] 与领域错误分类 [`WardenError`]；
- [`contract`]：可等待的 [`Cancellation`] 与基于单调时钟的 [`Deadline`]；
- [`access`]：访问请求、特征集合、生命周期事件与处理决策；
- [`version`]：客户端/服务端版本兼容性判定；
- [`retry`]：指数退避策略；
- [`config`]：从 TOML 装载的 [`ClientOptions`]；
- [`observability`]：`tracing` 订阅器安装入口。

## 风险与考量（Trade-offs）
- 错误码一经发布即视为稳定契约，新增变体需同步更新 `codes` 模块；
- `Cancellation` 基于 `tokio::sync::Notify` 实现唤醒，因此核心契约绑定 Tokio 的同步原语。
"#]

pub mod access;
pub mod config;
pub mod contract;
pub mod error;
pub mod observability;
pub mod retry;
pub mod rpc;
pub mod version;

pub use config::ClientOptions;
pub use contract::{Cancellation, Deadline};
pub use error::{CoreError, ErrorCategory, Result, WardenError};
