use std::{fs::File, io::BufReader, path::Path, sync::Arc};

use inbound_common::internal;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ServerConfig, ServerConnection,
        pki_types::{CertificateDer, PrivateKeyDer},
    },
    server::TlsStream,
};

use crate::error::{ConnectionResult, TlsError, TlsResult};

/// The negotiated parameters of a TLS connection, for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsInfo {
    pub version: String,
    pub cipher: String,
}

impl TlsInfo {
    fn of(conn: &ServerConnection) -> Self {
        let describe = |name: Option<&'static str>| name.unwrap_or("unknown").to_string();

        Self {
            version: describe(conn.protocol_version().and_then(|v| v.as_str())),
            cipher: describe(
                conn.negotiated_cipher_suite()
                    .and_then(|suite| suite.suite().as_str()),
            ),
        }
    }
}

fn load_certs(path: &Path) -> TlsResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|source| TlsError::CertificateLoad {
        path: path.display().to_string(),
        source,
    })?;

    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::CertificateLoad {
            path: path.display().to_string(),
            source,
        })
}

fn load_key(path: &Path) -> TlsResult<PrivateKeyDer<'static>> {
    let key_error = |reason: String| TlsError::KeyLoad {
        path: path.display().to_string(),
        reason,
    };

    let mut reader = BufReader::new(File::open(path).map_err(|e| key_error(e.to_string()))?);

    match rustls_pemfile::read_one(&mut reader).map_err(|e| key_error(e.to_string()))? {
        Some(rustls_pemfile::Item::Pkcs1Key(key)) => Ok(PrivateKeyDer::Pkcs1(key)),
        Some(rustls_pemfile::Item::Pkcs8Key(key)) => Ok(PrivateKeyDer::Pkcs8(key)),
        Some(rustls_pemfile::Item::Sec1Key(key)) => Ok(PrivateKeyDer::Sec1(key)),
        _ => Err(key_error(
            "Unable to determine key file format (expected PKCS1, PKCS8, or SEC1)".to_string(),
        )),
    }
}

/// Load the certificate chain and key from disk into a reusable acceptor.
///
/// # Errors
/// If either file is unreadable or not valid PEM, or rustls rejects the pair
#[tracing::instrument(level = "debug", skip_all, fields(certificate = %certificate.display()))]
pub fn acceptor(certificate: &Path, key: &Path) -> TlsResult<TlsAcceptor> {
    acceptor_from(load_certs(certificate)?, load_key(key)?)
}

/// Build an acceptor from certificate material already in memory.
///
/// # Errors
/// If rustls rejects the chain or the key
pub fn acceptor_from(
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> TlsResult<TlsAcceptor> {
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// A client connection, either side of a TLS upgrade.
pub enum Connection<Stream> {
    Plain { stream: Stream },
    Tls { stream: Box<TlsStream<Stream>> },
}

impl<Stream> Connection<Stream>
where
    Stream: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub const fn plain(stream: Stream) -> Self {
        Self::Plain { stream }
    }

    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls { .. })
    }

    /// Write `line` followed by CRLF.
    pub async fn send(&mut self, line: &str) -> ConnectionResult<()> {
        let mut buffer = Vec::with_capacity(line.len() + 2);
        buffer.extend_from_slice(line.as_bytes());
        buffer.extend_from_slice(b"\r\n");

        match self {
            Self::Plain { stream } => {
                stream.write_all(&buffer).await?;
                stream.flush().await?;
            }
            Self::Tls { stream } => {
                stream.write_all(&buffer).await?;
                stream.flush().await?;
            }
        }

        Ok(())
    }

    /// Read whatever is available into `buf`, returning 0 at end of stream.
    ///
    /// This is a single `read` call, so it can be raced against other
    /// futures without losing data.
    pub async fn receive(&mut self, buf: &mut [u8]) -> ConnectionResult<usize> {
        Ok(match self {
            Self::Plain { stream } => stream.read(buf).await?,
            Self::Tls { stream } => stream.read(buf).await?,
        })
    }

    /// Perform the server side of a TLS handshake over the existing stream.
    ///
    /// # Errors
    /// If the connection is already encrypted or the handshake fails
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn upgrade(self, acceptor: &TlsAcceptor) -> TlsResult<(Self, TlsInfo)> {
        match self {
            Self::Plain { stream } => {
                let stream = acceptor.accept(stream).await?;
                let info = TlsInfo::of(stream.get_ref().1);
                internal!(
                    level = DEBUG,
                    "Negotiated {} with {}",
                    info.version,
                    info.cipher
                );

                Ok((
                    Self::Tls {
                        stream: Box::new(stream),
                    },
                    info,
                ))
            }
            Self::Tls { .. } => Err(TlsError::AlreadyEncrypted),
        }
    }

    /// Flush and shut down the write side, ignoring errors from a peer that
    /// has already gone.
    pub async fn shutdown(&mut self) {
        let _ = match self {
            Self::Plain { stream } => stream.shutdown().await,
            Self::Tls { stream } => stream.shutdown().await,
        };
    }
}
