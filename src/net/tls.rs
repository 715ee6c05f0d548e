//! TLS configuration and certificate loading.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;

use crate::config::schema::SslConfig;

/// Load the certificate chain and private key named in `config`.
///
/// The PEM files are checked up front so that a missing or empty file is
/// reported with its path instead of as a generic rustls error.
pub async fn load_tls_config(config: &SslConfig) -> Result<RustlsConfig, io::Error> {
    let cert_path = Path::new(&config.pem);
    let key_path = Path::new(&config.key);

    let certs = read_certs(cert_path)?;
    if certs == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("no certificates found in {}", cert_path.display()),
        ));
    }
    check_private_key(key_path)?;

    let tls = RustlsConfig::from_pem_file(cert_path, key_path).await?;
    tracing::info!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        certificates = certs,
        "TLS configuration loaded"
    );
    Ok(tls)
}

fn open(path: &Path) -> io::Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|err| io::Error::new(err.kind(), format!("{}: {}", path.display(), err)))
}

fn read_certs(path: &Path) -> io::Result<usize> {
    let mut reader = open(path)?;
    let count = rustls_pemfile::certs(&mut reader).try_fold(0, |count, cert| cert.map(|_| count + 1))?;
    Ok(count)
}

fn check_private_key(path: &Path) -> io::Result<()> {
    let mut reader = open(path)?;
    match rustls_pemfile::private_key(&mut reader)? {
        Some(_) => Ok(()),
        None => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("no private key found in {}", path.display()),
        )),
    }
}
