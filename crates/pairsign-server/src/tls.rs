//! TLS material: user-supplied certificates or a generated self-signed pair

use axum_server::tls_rustls::RustlsConfig;
use rcgen::{CertificateParams, DnType, KeyPair};
use std::path::{Path, PathBuf};
use tracing::info;

use pairsign_core::{Error, Result};

/// Generate a self-signed certificate for the given hostnames.
/// Returns `(cert_pem, key_pem)`.
pub fn generate_self_signed(hosts: &[String]) -> Result<(String, String)> {
    let mut params = CertificateParams::new(hosts.to_vec()).map_err(tls_err)?;
    params
        .distinguished_name
        .push(DnType::CommonName, "pairsign");
    let key_pair = KeyPair::generate().map_err(tls_err)?;
    let cert = params.self_signed(&key_pair).map_err(tls_err)?;
    Ok((cert.pem(), key_pair.serialize_pem()))
}

/// Reuse the certificate pair under `dir`, generating one on first run
pub fn load_or_generate_cert(dir: &Path) -> Result<(PathBuf, PathBuf)> {
    let cert_path = dir.join("server.crt");
    let key_path = dir.join("server.key");
    if cert_path.exists() && key_path.exists() {
        return Ok((cert_path, key_path));
    }

    std::fs::create_dir_all(dir)?;
    let (cert_pem, key_pem) = generate_self_signed(&["localhost".to_string()])?;
    std::fs::write(&cert_path, cert_pem)?;
    std::fs::write(&key_path, key_pem)?;
    info!(
        "Generated self-signed TLS certificate: {}",
        cert_path.display()
    );
    Ok((cert_path, key_path))
}

/// Build the rustls server config from PEM files
pub async fn rustls_config(cert: &Path, key: &Path) -> Result<RustlsConfig> {
    Ok(RustlsConfig::from_pem_file(cert, key).await?)
}

fn tls_err(err: rcgen::Error) -> Error {
    Error::Tls(err.to_string())
}
