//! Endpoint address strings.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AddressError;
use crate::transport::socket::{StreamTransport, TransportListener};

/// A parsed endpoint address.
///
/// Three spellings are accepted: `pipe:PATH` and `unix:PATH` (equivalent;
/// a filesystem socket) and `tcp:HOST:PORT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// A filesystem (Unix domain) socket.
    Pipe(PathBuf),
    /// A TCP endpoint.
    Tcp { host: String, port: u16 },
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, AddressError> {
        let (scheme, rest) = match s.split_once(':') {
            Some(parts) => parts,
            None => return Err(AddressError::UnknownScheme(s.to_string())),
        };
        match scheme {
            "pipe" | "unix" => {
                if rest.is_empty() {
                    Err(AddressError::MissingPath(s.to_string()))
                } else {
                    Ok(Address::Pipe(PathBuf::from(rest)))
                }
            }
            "tcp" => {
                let (host, port) = match rest.split_once(':') {
                    Some(parts) => parts,
                    None => return Err(AddressError::Malformed(s.to_string())),
                };
                if host.is_empty() {
                    return Err(AddressError::MissingHost(s.to_string()));
                }
                let port = port
                    .parse::<u16>()
                    .map_err(|_| AddressError::InvalidPort(s.to_string()))?;
                Ok(Address::Tcp {
                    host: host.to_string(),
                    port,
                })
            }
            _ => Err(AddressError::UnknownScheme(s.to_string())),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Pipe(path) => write!(f, "pipe:{}", path.display()),
            Address::Tcp { host, port } => write!(f, "tcp:{host}:{port}"),
        }
    }
}

impl Address {
    /// Connect to the endpoint as a client.
    pub fn connect(&self) -> crate::Result<StreamTransport> {
        tracing::debug!(address = %self, "connecting");
        Ok(StreamTransport::connect(self)?)
    }

    /// Bind the endpoint and listen for incoming connections.
    ///
    /// For `tcp:` the port may be `0` to let the OS choose; query
    /// [`TransportListener::local_address`] for the bound endpoint.
    pub fn listen(&self) -> crate::Result<TransportListener> {
        tracing::debug!(address = %self, "listening");
        Ok(TransportListener::bind(self)?)
    }
}
