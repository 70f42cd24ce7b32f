//! `tracing` 订阅器安装入口。
//!
//! 宿主进程在启动时调用一次 [`install_tracing`]，日志级别由 `RUST_LOG` 控制，缺省为 `info`。
//! 重复安装返回 [`InstallError::AlreadyInstalled`] 而不是 panic，便于测试与嵌入式宿主复用。

use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;

/// 安装失败的原因。
#[derive(Debug, Error)]
pub enum InstallError {
    /// 进程内已存在全局订阅器。
    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled(#[source] tracing::subscriber::SetGlobalDefaultError),
}

/// 安装带 `EnvFilter` 的 fmt 订阅器作为全局默认。
pub fn install_tracing() -> Result<(), InstallError> {
    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber).map_err(InstallError::AlreadyInstalled)
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_reports_already_installed() {
        // 同一测试二进制内其它用例不安装全局订阅器，因此首次安装必然成功。
        install_tracing().expect("首次安装应成功");
        let err = install_tracing().expect_err("重复安装必须报错");
        assert!(matches!(err, InstallError::AlreadyInstalled(_)));
    }
}
