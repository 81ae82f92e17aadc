// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

use thiserror::Error;

/// What ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Connect,
    Request,
    Batch,
}

impl core::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Request => write!(f, "request"),
            Self::Batch => write!(f, "batch"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Tls(#[from] rustls::Error),
    #[error("invalid TLS server name")]
    InvalidServerName,
    #[error(transparent)]
    Socks(#[from] crate::socks::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0} timeout")]
    Timeout(TimeoutKind),
    #[error("connection lost")]
    ConnectionLost,
    #[error("server error: {0}")]
    Server(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Script(#[from] haven_core::script::Error),
    #[error(transparent)]
    Tx(#[from] haven_core::tx::Error),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub(crate) fn protocol<S>(msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::Protocol(msg.into())
    }
}
