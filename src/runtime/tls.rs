//! TLS acceptor assembly from PEM files.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;

use super::config::TlsOptions;
use super::error::{BoxError, EngineError};

/// Build the listener's TLS acceptor. File access runs off the engine
/// workers.
pub(crate) async fn acceptor(options: &TlsOptions) -> Result<TlsAcceptor, EngineError> {
    let options = options.clone();
    tokio::task::spawn_blocking(move || build(&options))
        .await
        .map_err(|err| EngineError::TaskFailed(err.to_string()))?
}

fn build(options: &TlsOptions) -> Result<TlsAcceptor, EngineError> {
    let chain = load_certs(&options.cert_path)?;
    let key = load_key(&options.key_path)?;

    let builder = match &options.client_ca_path {
        Some(path) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(path)? {
                roots
                    .add(cert)
                    .map_err(|err| tls_error(format!("invalid client CA in {}", path.display()), err))?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .allow_unauthenticated()
                .build()
                .map_err(|err| tls_error("client verifier", err))?;
            ServerConfig::builder().with_client_cert_verifier(verifier)
        }
        None => ServerConfig::builder().with_no_client_auth(),
    };

    let mut config = builder
        .with_single_cert(chain, key)
        .map_err(|err| tls_error("certificate and key do not match", err))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, EngineError> {
    let context = || format!("reading certificates from {}", path.display());
    let mut reader = BufReader::new(File::open(path).map_err(|err| tls_error(context(), err))?);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| tls_error(context(), err))?;
    if certs.is_empty() {
        return Err(tls_error(
            context(),
            io::Error::new(io::ErrorKind::InvalidData, "no certificates found"),
        ));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, EngineError> {
    let context = || format!("reading private key from {}", path.display());
    let mut reader = BufReader::new(File::open(path).map_err(|err| tls_error(context(), err))?);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|err| tls_error(context(), err))?
        .ok_or_else(|| {
            tls_error(
                context(),
                io::Error::new(io::ErrorKind::InvalidData, "no private key found"),
            )
        })
}

fn tls_error(context: impl Into<String>, source: impl Into<BoxError>) -> EngineError {
    EngineError::Tls {
        context: context.into(),
        source: source.into(),
    }
}
