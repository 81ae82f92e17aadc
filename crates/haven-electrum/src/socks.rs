// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! Minimal SOCKS5 CONNECT (RFC 1928) with optional username/password
//! authentication (RFC 1929), enough to reach Electrum servers through a
//! local Tor or privacy proxy.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const SOCKS_VERSION: u8 = 0x05;
const AUTH_NONE: u8 = 0x00;
const AUTH_USERPASS: u8 = 0x02;
const CMD_CONNECT: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("proxy speaks SOCKS version {0}, expected 5")]
    BadVersion(u8),
    #[error("proxy refused every offered auth method")]
    NoAcceptableAuth,
    #[error("proxy rejected credentials")]
    AuthFailed,
    #[error("hostname longer than 255 bytes")]
    HostTooLong,
    #[error("CONNECT rejected: {0}")]
    ConnectRejected(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Socks5Config {
    pub addr: SocketAddr,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Socks5Config {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            username: None,
            password: None,
        }
    }

    pub fn with_credentials<S>(mut self, username: S, password: S) -> Self
    where
        S: Into<String>,
    {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

fn reply_error(code: u8) -> &'static str {
    match code {
        0x01 => "general failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown reply code",
    }
}

/// Open a TCP stream to `host:port` through the proxy.
pub async fn connect(proxy: &Socks5Config, host: &str, port: u16) -> Result<TcpStream, Error> {
    if host.len() > 255 {
        return Err(Error::HostTooLong);
    }

    let mut stream = TcpStream::connect(proxy.addr).await?;

    let offer_userpass = proxy.username.is_some();
    let greeting: Vec<u8> = if offer_userpass {
        vec![SOCKS_VERSION, 2, AUTH_NONE, AUTH_USERPASS]
    } else {
        vec![SOCKS_VERSION, 1, AUTH_NONE]
    };
    stream.write_all(&greeting).await?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != SOCKS_VERSION {
        return Err(Error::BadVersion(choice[0]));
    }
    match choice[1] {
        AUTH_NONE => {}
        AUTH_USERPASS if offer_userpass => {
            let username = proxy.username.as_deref().unwrap_or_default().as_bytes();
            let password = proxy.password.as_deref().unwrap_or_default().as_bytes();
            let mut auth = Vec::with_capacity(3 + username.len() + password.len());
            auth.push(0x01);
            auth.push(username.len() as u8);
            auth.extend_from_slice(username);
            auth.push(password.len() as u8);
            auth.extend_from_slice(password);
            stream.write_all(&auth).await?;

            let mut status = [0u8; 2];
            stream.read_exact(&mut status).await?;
            if status[1] != 0x00 {
                return Err(Error::AuthFailed);
            }
        }
        _ => return Err(Error::NoAcceptableAuth),
    }

    let mut request = Vec::with_capacity(7 + host.len());
    request.extend_from_slice(&[SOCKS_VERSION, CMD_CONNECT, 0x00, ATYP_DOMAIN]);
    request.push(host.len() as u8);
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;
    if reply[0] != SOCKS_VERSION {
        return Err(Error::BadVersion(reply[0]));
    }
    if reply[1] != 0x00 {
        return Err(Error::ConnectRejected(reply_error(reply[1])));
    }

    // Drain the bound address, which varies with the address type.
    match reply[3] {
        0x01 => {
            let mut rest = [0u8; 4 + 2];
            stream.read_exact(&mut rest).await?;
        }
        0x04 => {
            let mut rest = [0u8; 16 + 2];
            stream.read_exact(&mut rest).await?;
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut rest = vec![0u8; len[0] as usize + 2];
            stream.read_exact(&mut rest).await?;
        }
        _ => return Err(Error::ConnectRejected("address type not supported")),
    }

    Ok(stream)
}
