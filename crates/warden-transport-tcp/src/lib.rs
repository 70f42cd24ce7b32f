#![doc = r#"
# warden-transport-tcp

## 设计动机（Why）
- **定位**：把“候选地址列表”解析为一条可用的字节流，是客户端建连的第一步；
- **可替换性**：底层“按地址与截止时间打开字节流”的能力被抽象为 [`DialPrimitive`]，
  隧道感知的实现可以整体替换 TCP 直连，而 [`Dialer`] 无需了解隧道细节；
- **代理转接**：启用代理时，外层连接只指向代理，目标地址通过 HTTP `CONNECT` 写入握手，
  由代理完成最后一跳。

## 核心契约（What）
- [`Dialer::dial`]：按顺序尝试候选地址，返回第一个在超时内完成连接的流；全部失败时返回
  聚合了每个候选错误的 `DialFailed`；本身不做重试；
- [`Dialer::dial_with_backoff`]：按 [`Backoff`](warden_core::retry::Backoff) 重试整轮拨号，
  轮间等待可被取消；
- [`DialSpec`]：非空的候选地址、可选代理、可选拨号原语覆盖与单地址超时。

## 风险与考量（Trade-offs）
- 代理握手逐字节读取响应头，避免把后续 TLS 字节读进缓冲区；响应头上限 8 KiB；
- 取消通过 [`Cancellation::cancelled`](warden_core::Cancellation::cancelled) 唤醒，不依赖轮询。
"#]

mod dialer;
mod error;
mod primitive;
mod proxy;
mod util;

pub use dialer::{DialSpec, DialedStream, Dialer};
pub use primitive::{AsyncStream, BoxedStream, DialPrimitive, TcpDialPrimitive};
pub use proxy::HttpConnectPrimitive;
