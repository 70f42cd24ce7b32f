#![doc = r#"
# warden-transport-tls

## 设计动机（Why）
- **凭据可替换**：静态证书、磁盘目录、外部登录流程写出的 profile 都能产出同一种 [`Credential`]，
  客户端只依赖 [`CredentialSource`] 能力接口；
- **顺序回退**：[`CredentialChain`] 把多个来源组合为固定顺序的策略列表，自身也实现
  [`CredentialSource`]，调用方无需为每种来源写特例；
- **加密入口**：[`handshake`] 在拨号得到的字节流上完成 TLS 客户端握手，证书与信任根全部来自凭据。

## 核心契约（What）
- `produce()` 返回凭据或 `CredentialUnavailable`（缺失、格式错误、过期）；
- `changed()` 是无副作用的探测：[`PathSource`] 比较内容指纹，[`ProfileSource`] 仅在外部登录流程
  通过 [`ProfileRefreshHandle`] 宣告刷新后返回 `true`，[`StaticSource`] 恒为 `false`；
- 链的 `changed()` 只询问上一次成功的来源。

## 实现策略（How）
- PEM 解析依赖 `rustls-pki-types` 的 `PemObject`，配置构建固定使用 `aws-lc-rs` provider；
- 内容指纹使用 SHA-256，避免依赖文件系统时间戳精度；
- 握手复用拨号层的取消/截止语义，错误映射为带稳定错误码的 `CoreError`。

## 风险与考量（Trade-offs）
- 指纹探测需要重新读取三个文件，轮询周期不宜过短；
- profile 的过期时间以 Unix 秒表示，依赖本机时钟。
"#]

mod chain;
mod credential;
mod error;
mod handshake;
mod profile;
mod source;
mod util;

pub use chain::CredentialChain;
pub use credential::{Credential, CredentialFiles};
pub use handshake::{SecureSession, handshake, server_name_for};
pub use profile::{Profile, ProfileRefreshHandle, ProfileSource};
pub use source::{CredentialSource, PathSource, StaticSource};
