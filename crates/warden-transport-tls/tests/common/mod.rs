//! 集成测试共用的临时 PKI：一个 CA，按需签发服务端与客户端证书。

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};
use rustls::RootCertStore;
use rustls::ServerConfig;
use rustls::crypto::aws_lc_rs;
use rustls::server::WebPkiClientVerifier;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

/// 一张已签发的证书及其私钥。
pub struct Issued {
    pub cert_pem: String,
    pub key_pem: String,
    pub cert_der: CertificateDer<'static>,
    pub key_der: Vec<u8>,
}

impl Issued {
    pub fn private_key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()))
    }
}

/// 测试用 CA。
pub struct TestPki {
    pub ca_pem: String,
    pub ca_der: CertificateDer<'static>,
    ca_cert: Certificate,
    ca_key: KeyPair,
}

impl TestPki {
    pub fn new(common_name: &str) -> anyhow::Result<Self> {
        let mut params = CertificateParams::new(Vec::<String>::new()).context("构造 CA 参数")?;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::CrlSign,
        ];
        let ca_key = KeyPair::generate().context("生成 CA 私钥")?;
        let ca_cert = params.self_signed(&ca_key).context("签发 CA 证书")?;
        Ok(Self {
            ca_pem: ca_cert.pem(),
            ca_der: ca_cert.der().clone(),
            ca_cert,
            ca_key,
        })
    }

    /// 签发带指定 SAN 与用途的叶证书。
    pub fn issue(&self, name: &str, usage: ExtendedKeyUsagePurpose) -> anyhow::Result<Issued> {
        let params = leaf_params(name, usage)?;
        self.sign(params)
    }

    /// 签发有效期已经结束的客户端证书（2000 年到 2001 年）。
    pub fn issue_lapsed(&self, name: &str) -> anyhow::Result<Issued> {
        let mut params = leaf_params(name, ExtendedKeyUsagePurpose::ClientAuth)?;
        params.not_before = rcgen::date_time_ymd(2000, 1, 1);
        params.not_after = rcgen::date_time_ymd(2001, 1, 1);
        self.sign(params)
    }

    fn sign(&self, params: CertificateParams) -> anyhow::Result<Issued> {
        let key = KeyPair::generate().context("生成叶证书私钥")?;
        let cert = params
            .signed_by(&key, &self.ca_cert, &self.ca_key)
            .context("签发叶证书")?;
        Ok(Issued {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            cert_der: cert.der().clone(),
            key_der: key.serialize_der(),
        })
    }

    /// 签发客户端证书，并按 `cert.pem`/`key.pem`/`ca.pem` 布局写入目录。
    ///
    /// `trust` 为写入 `ca.pem` 的信任根，通常是签发服务端证书的 CA。
    pub fn write_client_dir(&self, dir: &Path, trust: &TestPki) -> anyhow::Result<Issued> {
        let issued = self.issue("warden-client", ExtendedKeyUsagePurpose::ClientAuth)?;
        write_material(dir, &issued, trust)?;
        Ok(issued)
    }

    /// 构建要求客户端证书（由本 CA 签发）的服务端配置。
    pub fn server_config(&self, server: &Issued) -> anyhow::Result<Arc<ServerConfig>> {
        let provider = Arc::new(aws_lc_rs::default_provider());
        let mut roots = RootCertStore::empty();
        roots.add(self.ca_der.clone()).context("写入客户端信任根")?;
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .context("构建客户端证书校验器")?;
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .context("选择协议版本")?
            .with_client_cert_verifier(verifier)
            .with_single_cert(vec![server.cert_der.clone()], server.private_key())
            .context("构建服务端 TLS 配置")?;
        Ok(Arc::new(config))
    }
}

fn leaf_params(name: &str, usage: ExtendedKeyUsagePurpose) -> anyhow::Result<CertificateParams> {
    let mut params = CertificateParams::new(vec![name.to_owned()]).context("构造叶证书参数")?;
    params.distinguished_name.push(DnType::CommonName, name);
    params.extended_key_usages = vec![usage];
    Ok(params)
}

/// 按 `cert.pem`/`key.pem`/`ca.pem` 布局写入凭据目录。
pub fn write_material(dir: &Path, issued: &Issued, trust: &TestPki) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir).context("创建凭据目录")?;
    std::fs::write(dir.join("cert.pem"), &issued.cert_pem).context("写入证书")?;
    std::fs::write(dir.join("key.pem"), &issued.key_pem).context("写入私钥")?;
    std::fs::write(dir.join("ca.pem"), &trust.ca_pem).context("写入信任根")?;
    Ok(())
}
