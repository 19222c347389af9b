use anyhow::{Context, Result, anyhow, bail};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// TCP 上协商的应用层协议
pub(crate) const HTTPS_ALPN: &[&[u8]] = &[b"h2", b"http/1.1"];
/// QUIC 上协商的应用层协议
#[cfg(feature = "http3")]
pub(crate) const H3_ALPN: &[&[u8]] = &[b"h3"];

/// 服务端证书与私钥（PEM）
pub struct TlsConfig {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl Clone for TlsConfig {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("chain_len", &self.cert_chain.len())
            .finish_non_exhaustive()
    }
}

impl TlsConfig {
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// 从内存中的 PEM 证书链与私钥构建
    pub fn from_pem(cert: &[u8], key: &[u8]) -> Result<Self> {
        Ok(Self {
            cert_chain: parse_cert_chain(cert)?,
            key: parse_private_key(key)?,
        })
    }

    pub fn rustls_server_config(&self, alpn: &[&[u8]]) -> Result<rustls::ServerConfig> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(self.cert_chain.clone(), self.key.clone_key())?;
        config.alpn_protocols = alpn.iter().map(|proto| proto.to_vec()).collect();
        Ok(config)
    }

    pub fn tls_acceptor(&self) -> Result<TlsAcceptor> {
        Ok(TlsAcceptor::from(Arc::new(
            self.rustls_server_config(HTTPS_ALPN)?,
        )))
    }

    #[cfg(feature = "http3")]
    pub fn quic_server_config(&self) -> Result<quinn::ServerConfig> {
        let crypto = quinn::crypto::rustls::QuicServerConfig::try_from(
            self.rustls_server_config(H3_ALPN)?,
        )
        .map_err(|e| anyhow!("构建 QUIC TLS 配置失败: {e}"))?;
        Ok(quinn::ServerConfig::with_crypto(Arc::new(crypto)))
    }
}

#[derive(Default)]
pub struct TlsConfigBuilder {
    cert_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
}

impl TlsConfigBuilder {
    pub fn cert_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cert_path = Some(path.into());
        self
    }

    pub fn key_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.key_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<TlsConfig> {
        let cert_path = self
            .cert_path
            .ok_or_else(|| anyhow!("未设置证书路径，请调用 cert_path"))?;
        let key_path = self
            .key_path
            .ok_or_else(|| anyhow!("未设置私钥路径，请调用 key_path"))?;

        let cert = read(&cert_path, "证书")?;
        let key = read(&key_path, "私钥")?;
        let config = TlsConfig::from_pem(&cert, &key)
            .with_context(|| format!("加载证书失败: {}", cert_path.display()))?;

        tracing::info!(
            cert_path = %cert_path.display(),
            key_path = %key_path.display(),
            chain_len = config.cert_chain.len(),
            "loaded tls config"
        );
        Ok(config)
    }
}

fn read(path: &Path, kind: &str) -> Result<Vec<u8>> {
    if !path.exists() {
        bail!("{kind}文件不存在: {}", path.display());
    }
    fs::read(path).with_context(|| format!("读取{kind}文件失败: {}", path.display()))
}

fn parse_cert_chain(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut Cursor::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .context("解析 PEM 证书失败")?;
    if certs.is_empty() {
        bail!("PEM 中没有证书");
    }
    Ok(certs)
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut Cursor::new(pem))
        .context("解析 PEM 私钥失败")?
        .ok_or_else(|| anyhow!("PEM 中没有 PKCS8、PKCS1 或 SEC1 私钥"))
}
