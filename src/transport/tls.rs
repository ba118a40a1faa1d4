/// TLS 配置
///
/// 客户端：webpki 根证书 + 可选的自签名 CA（rustls）
/// 服务端：从 PEM 文件加载证书链和私钥

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

use crate::config::TlsFiles;
use crate::error::{Error, Result};

/// 创建客户端 TLS 配置（用于 wss://）
pub fn create_client_config(ca_cert: Option<&Path>) -> Result<Arc<ClientConfig>> {
    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = ca_cert {
        for cert in load_certs(path)? {
            root_store.add(cert)?;
        }
        debug!("Trusting extra CA from {}", path.display());
    }

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(Arc::new(config))
}

/// 加载服务端证书和私钥，创建 TLS acceptor
pub fn load_acceptor(files: &TlsFiles) -> Result<TlsAcceptor> {
    let certs = load_certs(&files.cert_path)?;
    let key = load_private_key(&files.key_path)?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    info!("TLS enabled with cert: {}", files.cert_path.display());
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Error::Tls(format!("Failed to open {}: {}", path.display(), e)))
}

/// 从 PEM 文件加载证书链
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("Failed to parse certificates in {}: {}", path.display(), e)))?;

    if certs.is_empty() {
        return Err(Error::Tls(format!("No certificates found in {}", path.display())));
    }
    debug!("Loaded {} certificate(s) from {}", certs.len(), path.display());
    Ok(certs)
}

/// 从 PEM 文件加载私钥（PKCS#1 / PKCS#8 / SEC1）
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::Tls(format!("Failed to parse private key in {}: {}", path.display(), e)))?
        .ok_or_else(|| Error::Tls(format!("No private key found in {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("websocks-rs-{}-{}", std::process::id(), name));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_client_config_without_ca() {
        assert!(create_client_config(None).is_ok());
    }

    #[test]
    fn test_missing_files() {
        let files = TlsFiles {
            cert_path: PathBuf::from("/nonexistent/websocks.cer"),
            key_path: PathBuf::from("/nonexistent/websocks.key"),
        };
        let err = load_acceptor(&files).err().unwrap();
        assert!(matches!(err, Error::Tls(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_empty_pem() {
        let path = scratch_file("empty.pem", "not a pem file\n");
        assert!(matches!(load_certs(&path), Err(Error::Tls(_))));
        assert!(matches!(load_private_key(&path), Err(Error::Tls(_))));
        let _ = std::fs::remove_file(path);
    }
}
