use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use rustls_pki_types::ServerName;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use warden_core::contract::{Cancellation, Deadline};
use warden_core::error::CoreError;
use warden_transport_tcp::BoxedStream;

use crate::credential::Credential;
use crate::error::{self, invalid_server_name, map_handshake_error};
use crate::util::run_with_context;

/// 完成 TLS 握手后的加密会话。
///
/// # 契约（What）
/// - 读写直接委托给内部的 `tokio-rustls` 流；
/// - `server_name` 为握手使用的 SNI，`peer_fingerprint` 为服务端叶证书的 SHA-256 指纹。
pub struct SecureSession {
    stream: TlsStream<BoxedStream>,
    server_name: String,
    peer_fingerprint: Option<String>,
}

impl SecureSession {
    /// 握手使用的 SNI。
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// 服务端叶证书指纹。
    pub fn peer_fingerprint(&self) -> Option<&str> {
        self.peer_fingerprint.as_deref()
    }

    /// 取出底层 `tokio-rustls` 流。
    pub fn into_inner(self) -> TlsStream<BoxedStream> {
        self.stream
    }
}

impl fmt::Debug for SecureSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureSession")
            .field("server_name", &self.server_name)
            .field("peer_fingerprint", &self.peer_fingerprint)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for SecureSession {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for SecureSession {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

/// 在已拨通的字节流上以给定凭据完成 TLS 客户端握手。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 拨号层只负责得到字节流，身份认证全部发生在此处：证书链与私钥用于客户端认证，
///   信任根用于校验服务端；
///
/// ## 逻辑（How）
/// 1. 由凭据构建 `ClientConfig` 与 `TlsConnector`；
/// 2. 将 `server_name` 解析为 DNS 名或 IP 地址；
/// 3. 在取消/截止约束下执行握手，并记录服务端叶证书指纹。
///
/// ## 契约（What）
/// - 证书校验失败映射为 `Security` 分类错误；
/// - 取消与超时分别返回 `Cancelled`、`Timeout` 分类错误。
pub async fn handshake(
    stream: BoxedStream,
    credential: &Credential,
    server_name: &str,
    deadline: Deadline,
    cancellation: &Cancellation,
) -> Result<SecureSession, CoreError> {
    let config = credential.client_config()?;
    let name = ServerName::try_from(server_name.to_owned())
        .map_err(|_| invalid_server_name(server_name))?;
    let connector = TlsConnector::from(config);
    let stream = run_with_context(
        error::HANDSHAKE,
        deadline,
        cancellation,
        connector.connect(name, stream),
        map_handshake_error,
    )
    .await?;
    let peer_fingerprint = stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|chain| chain.first())
        .map(|leaf| hex::encode(Sha256::digest(leaf.as_ref())));
    tracing::debug!(
        server_name,
        peer = peer_fingerprint.as_deref().unwrap_or("-"),
        client = credential.fingerprint(),
        "tls handshake completed"
    );
    Ok(SecureSession {
        stream,
        server_name: server_name.to_owned(),
        peer_fingerprint,
    })
}

/// 从 `host:port` 地址中提取用于 SNI 的主机部分。
///
/// 支持 `[::1]:443` 形式的 IPv6 字面量；没有端口时原样返回。
pub fn server_name_for(address: &str) -> &str {
    if let Some(rest) = address.strip_prefix('[')
        && let Some((host, _)) = rest.split_once(']')
    {
        return host;
    }
    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host,
        _ => address,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_host_from_addresses() {
        assert_eq!(server_name_for("auth.example.com:3025"), "auth.example.com");
        assert_eq!(server_name_for("127.0.0.1:443"), "127.0.0.1");
        assert_eq!(server_name_for("[::1]:443"), "::1");
        assert_eq!(server_name_for("auth.example.com"), "auth.example.com");
        assert_eq!(server_name_for("::1"), "::1");
    }
}
