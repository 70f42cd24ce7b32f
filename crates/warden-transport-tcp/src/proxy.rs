use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use warden_core::contract::{Cancellation, Deadline};
use warden_core::error::CoreError;

use crate::error::{self, map_io_error, proxy_malformed, proxy_rejected};
use crate::primitive::{BoxedStream, DialPrimitive};
use crate::util::run_with_context;

const MAX_RESPONSE_HEADER: usize = 8 * 1024;

/// 经由 HTTP `CONNECT` 代理完成最后一跳的拨号原语包装。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 客户端所在网络往往只能访问代理；外层连接必须指向代理，而目标地址只出现在代理握手中；
/// - 以包装器形式实现，使任意内层原语（TCP、隧道）都能叠加代理转接。
///
/// ## 逻辑（How）
/// 1. 通过内层原语连接代理地址；
/// 2. 写入 `CONNECT <target> HTTP/1.1` 请求；
/// 3. 逐字节读取响应头直到空行，校验状态码为 2xx；
/// 4. 返回已打通的流，后续字节直接到达目标。
///
/// ## 契约（What）
/// - 代理拒绝时返回 `warden.transport.proxy.rejected`；
/// - 响应头超过 8 KiB 或格式非法时返回 `ProtocolViolation` 分类错误。
#[derive(Clone)]
pub struct HttpConnectPrimitive {
    proxy: String,
    inner: Arc<dyn DialPrimitive>,
}

impl HttpConnectPrimitive {
    /// 以代理地址与内层原语构造。
    pub fn new(proxy: impl Into<String>, inner: Arc<dyn DialPrimitive>) -> Self {
        Self {
            proxy: proxy.into(),
            inner,
        }
    }

    /// 代理地址。
    pub fn proxy(&self) -> &str {
        &self.proxy
    }
}

impl std::fmt::Debug for HttpConnectPrimitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnectPrimitive")
            .field("proxy", &self.proxy)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DialPrimitive for HttpConnectPrimitive {
    async fn open(&self, address: &str, deadline: Deadline) -> Result<BoxedStream, CoreError> {
        let mut stream = self.inner.open(&self.proxy, deadline).await?;
        let never = Cancellation::new();
        run_with_context(error::PROXY_HANDSHAKE, deadline, &never, async {
            let request = format!("CONNECT {address} HTTP/1.1\r\nHost: {address}\r\n\r\n");
            stream
                .write_all(request.as_bytes())
                .await
                .map_err(|err| map_io_error(error::PROXY_HANDSHAKE, err))?;
            stream
                .flush()
                .await
                .map_err(|err| map_io_error(error::PROXY_HANDSHAKE, err))?;
            let header = read_response_header(&mut stream).await?;
            check_status(&header)
        })
        .await?;
        tracing::debug!(proxy = %self.proxy, target = %address, "proxy tunnel established");
        Ok(stream)
    }
}

async fn read_response_header(stream: &mut BoxedStream) -> Result<String, CoreError> {
    let mut header = Vec::with_capacity(128);
    while !header.ends_with(b"\r\n\r\n") {
        if header.len() >= MAX_RESPONSE_HEADER {
            return Err(proxy_malformed("proxy response header exceeds 8 KiB"));
        }
        let byte = stream
            .read_u8()
            .await
            .map_err(|err| map_io_error(error::PROXY_HANDSHAKE, err))?;
        header.push(byte);
    }
    String::from_utf8(header).map_err(|_| proxy_malformed("proxy response is not UTF-8"))
}

fn check_status(header: &str) -> Result<(), CoreError> {
    let status_line = header.lines().next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(proxy_malformed(format!(
            "unexpected proxy status line `{status_line}`"
        )));
    }
    let status: u16 = parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| proxy_malformed(format!("missing status code in `{status_line}`")))?;
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(proxy_rejected(status_line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_2xx_status() {
        assert!(check_status("HTTP/1.1 200 Connection established\r\n\r\n").is_ok());
        assert!(check_status("HTTP/1.0 204 No Content\r\n\r\n").is_ok());
    }

    #[test]
    fn rejects_non_success_status() {
        let err = check_status("HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
            .expect_err("407 必须视为拒绝");
        assert!(err.message().contains("407"));
    }

    #[test]
    fn rejects_garbage_status_line() {
        let err = check_status("SSH-2.0-OpenSSH\r\n\r\n").expect_err("非 HTTP 响应必须报错");
        assert_eq!(err.category(), warden_core::ErrorCategory::ProtocolViolation);
    }
}
