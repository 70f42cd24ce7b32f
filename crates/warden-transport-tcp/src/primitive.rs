use std::fmt;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream as TokioTcpStream;
use warden_core::contract::{Cancellation, Deadline};
use warden_core::error::CoreError;

use crate::error::{self, map_io_error};
use crate::util::run_with_context;

/// 可被拨号层持有的双向字节流。
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// 类型擦除后的字节流。
pub type BoxedStream = Box<dyn AsyncStream>;

/// 底层拨号原语：给定地址与截止时间，打开一条字节流。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - Dialer 只负责“候选地址的顺序与聚合错误”，具体如何打开字节流（TCP 直连、隧道、内存管道）
///   由本 trait 的实现决定；
/// - 测试可注入内存实现，生产可注入隧道感知实现。
///
/// ## 契约 (What)
/// - `address`：`host:port` 形式的目标；
/// - `deadline`：实现应尽量遵守；Dialer 也会在外层强制截止；
/// - 失败时返回带稳定错误码的 [`CoreError`]。
#[async_trait]
pub trait DialPrimitive: Send + Sync + 'static {
    /// 打开一条到 `address` 的字节流。
    async fn open(&self, address: &str, deadline: Deadline) -> Result<BoxedStream, CoreError>;
}

/// 基于 Tokio `TcpStream` 的默认拨号原语。
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpDialPrimitive {
    nodelay: bool,
}

impl TcpDialPrimitive {
    /// 启用 `TCP_NODELAY` 的默认实现。
    pub const fn new() -> Self {
        Self { nodelay: true }
    }

    /// 覆盖 `TCP_NODELAY` 设置。
    pub const fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

#[async_trait]
impl DialPrimitive for TcpDialPrimitive {
    async fn open(&self, address: &str, deadline: Deadline) -> Result<BoxedStream, CoreError> {
        // 原语自身不感知外部取消，取消由 Dialer 在外层处理。
        let never = Cancellation::new();
        let stream = run_with_context(error::CONNECT, deadline, &never, async {
            let candidates = tokio::net::lookup_host(address)
                .await
                .map_err(|err| map_io_error(error::RESOLVE, err))?;
            let mut last_error = None;
            for socket_addr in candidates {
                match TokioTcpStream::connect(socket_addr).await {
                    Ok(stream) => return Ok(stream),
                    Err(err) => last_error = Some(err),
                }
            }
            Err(match last_error {
                Some(err) => map_io_error(error::CONNECT, err),
                None => map_io_error(
                    error::RESOLVE,
                    std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("{address} resolved to no addresses"),
                    ),
                ),
            })
        })
        .await?;
        if self.nodelay {
            stream
                .set_nodelay(true)
                .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        }
        Ok(Box::new(stream))
    }
}

impl fmt::Debug for dyn DialPrimitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DialPrimitive")
    }
}
