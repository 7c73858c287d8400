//! Error types for HTTP client operations.

use rustls::pki_types::InvalidDnsNameError;
use std::io;
use thiserror::Error;

/// An error that can occur during HTTP client operations.
#[derive(Debug, Error)]
pub enum HttpClientError {
    /// The URL uses a scheme other than `http` or `https`.
    #[error("unknown URL scheme: {0}")]
    InvalidScheme(String),
    /// The host of the URL is not a valid DNS name for TLS.
    #[error("invalid DNS name: {0}")]
    InvalidDnsName(String),
    /// The URL is missing a host.
    #[error("missing host")]
    MissingHost,
    /// The request or response uses a feature this client does not implement.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(&'static str),
    /// An I/O error occurred, including timeouts and malformed responses.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    /// A TLS error occurred.
    #[error("TLS error: {0}")]
    TlsError(#[from] rustls::Error),
}

impl HttpClientError {
    pub fn invalid_data(msg: &str) -> Self {
        HttpClientError::IoError(io::Error::new(io::ErrorKind::InvalidData, msg.to_string()))
    }
}

impl From<HttpClientError> for io::Error {
    fn from(value: HttpClientError) -> Self {
        match value {
            HttpClientError::IoError(err) => err,
            HttpClientError::UnsupportedFeature(_) => {
                io::Error::new(io::ErrorKind::Unsupported, value)
            }
            HttpClientError::InvalidScheme(_)
            | HttpClientError::InvalidDnsName(_)
            | HttpClientError::MissingHost => io::Error::new(io::ErrorKind::InvalidInput, value),
            HttpClientError::TlsError(_) => io::Error::other(value),
        }
    }
}

impl From<InvalidDnsNameError> for HttpClientError {
    fn from(value: InvalidDnsNameError) -> Self {
        Self::InvalidDnsName(value.to_string())
    }
}
