#![doc = r#"
# warden-client

## 设计动机（Why）
- **门面**：把凭据链、拨号器、TLS 握手与 RPC 绑定组合为一个可直接调用的 [`Client`]；
- **稳定入口**：下游只依赖本 crate，内部类型通过再导出转发，而不是在各处复制定义。

## 核心契约（What）
- [`Client::new`] / [`Client::from_options`] / [`Client::from_profile`]：构造即完成建连、`ping` 与版本判定；
- [`Client::reload`]：凭据变化时原子切换连接，失败不影响旧连接；
- [`Client::close`]：停止后台轮询并释放连接，幂等；
- [`Connector`] / [`RpcBinder`]：建连与 RPC 绑定的可替换接缝。

## 风险与考量（Trade-offs）
- 后台轮询周期与旧连接排空时长由 [`ClientOptions`] 配置，缺省 1s 与 5s。
"#]

mod client;
mod connector;
#[cfg(test)]
mod test_support;

pub use client::{Client, ReloadOutcome, ServerMetadata};
pub use connector::{Connector, RpcBinder, SecureConnector};

pub use warden_core::access::{
    AccessEvent, AccessEventKind, AccessRequest, Decision, RequestFilter, RequestId, RequestState,
    Traits,
};
pub use warden_core::config::ClientOptions;
pub use warden_core::contract::{Cancellation, Deadline};
pub use warden_core::error::{CoreError, ErrorCategory, WardenError};
pub use warden_core::retry::Backoff;
pub use warden_core::rpc::{AccessEventStream, PingResponse, RpcConnection};
pub use warden_transport_tcp::{DialPrimitive, DialSpec, Dialer, TcpDialPrimitive};
pub use warden_transport_tls::{
    Credential, CredentialChain, CredentialSource, PathSource, ProfileRefreshHandle,
    ProfileSource, SecureSession, StaticSource,
};
