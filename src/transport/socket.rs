//! Socket-backed [`Transport`] implementations.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;

use crate::transport::{Address, Transport};

/// A connected socket stream, TCP or Unix domain.
///
/// Cloning via [`Transport::try_clone`] duplicates the OS handle; a
/// `shutdown` through either handle unblocks reads on both, which is relied
/// on for teardown.
pub enum StreamTransport {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl StreamTransport {
    pub(crate) fn connect(address: &Address) -> io::Result<Self> {
        match address {
            Address::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))?;
                stream.set_nodelay(true)?;
                Ok(StreamTransport::Tcp(stream))
            }
            #[cfg(unix)]
            Address::Pipe(path) => Ok(StreamTransport::Unix(UnixStream::connect(path)?)),
            #[cfg(not(unix))]
            Address::Pipe(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "pipe addresses require a unix platform",
            )),
        }
    }
}

impl From<TcpStream> for StreamTransport {
    fn from(stream: TcpStream) -> Self {
        StreamTransport::Tcp(stream)
    }
}

#[cfg(unix)]
impl From<UnixStream> for StreamTransport {
    fn from(stream: UnixStream) -> Self {
        StreamTransport::Unix(stream)
    }
}

impl Transport for StreamTransport {
    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let result = match self {
                StreamTransport::Tcp(stream) => stream.read(buf),
                #[cfg(unix)]
                StreamTransport::Unix(stream) => stream.read(buf),
            };
            match result {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        // Write::write_all already retries interrupted writes.
        match self {
            StreamTransport::Tcp(stream) => stream.write_all(data),
            #[cfg(unix)]
            StreamTransport::Unix(stream) => stream.write_all(data),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            StreamTransport::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            StreamTransport::Unix(stream) => stream.flush(),
        }
    }

    fn shutdown(&mut self) -> io::Result<()> {
        let result = match self {
            StreamTransport::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            StreamTransport::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
        match result {
            // Already closed by the peer; teardown is idempotent.
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        Ok(match self {
            StreamTransport::Tcp(stream) => Box::new(StreamTransport::Tcp(stream.try_clone()?)),
            #[cfg(unix)]
            StreamTransport::Unix(stream) => Box::new(StreamTransport::Unix(stream.try_clone()?)),
        })
    }
}

/// A bound endpoint accepting [`StreamTransport`] connections.
pub enum TransportListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: UnixListener,
        path: PathBuf,
    },
}

impl TransportListener {
    pub(crate) fn bind(address: &Address) -> io::Result<Self> {
        match address {
            Address::Tcp { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port))?;
                Ok(TransportListener::Tcp(listener))
            }
            #[cfg(unix)]
            Address::Pipe(path) => {
                // A socket file left behind by a previous run would make
                // bind fail with AddrInUse even though nothing is serving.
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                let listener = UnixListener::bind(path)?;
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))?;
                }
                Ok(TransportListener::Unix {
                    listener,
                    path: path.clone(),
                })
            }
            #[cfg(not(unix))]
            Address::Pipe(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "pipe addresses require a unix platform",
            )),
        }
    }

    /// Block until a client connects.
    pub fn accept(&self) -> io::Result<StreamTransport> {
        match self {
            TransportListener::Tcp(listener) => {
                let (stream, peer) = listener.accept()?;
                tracing::debug!(%peer, "accepted connection");
                stream.set_nodelay(true)?;
                Ok(StreamTransport::Tcp(stream))
            }
            #[cfg(unix)]
            TransportListener::Unix { listener, .. } => {
                let (stream, _) = listener.accept()?;
                tracing::debug!("accepted pipe connection");
                Ok(StreamTransport::Unix(stream))
            }
        }
    }

    /// The endpoint actually bound. For `tcp:HOST:0` this carries the port
    /// the OS picked.
    pub fn local_address(&self) -> io::Result<Address> {
        match self {
            TransportListener::Tcp(listener) => {
                let addr = listener.local_addr()?;
                Ok(Address::Tcp {
                    host: addr.ip().to_string(),
                    port: addr.port(),
                })
            }
            #[cfg(unix)]
            TransportListener::Unix { path, .. } => Ok(Address::Pipe(path.clone())),
        }
    }
}

#[cfg(unix)]
impl Drop for TransportListener {
    fn drop(&mut self) {
        if let TransportListener::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_tcp_loopback_roundtrip() {
        let address: Address = "tcp:127.0.0.1:0".parse().unwrap();
        let listener = address.listen().unwrap();
        let bound = listener.local_address().unwrap();

        let server = thread::spawn(move || {
            let mut transport = listener.accept().unwrap();
            let mut buf = [0u8; 16];
            let n = transport.read_some(&mut buf).unwrap();
            transport.write_all(&buf[..n]).unwrap();
            transport.flush().unwrap();
        });

        let mut client = bound.connect().unwrap();
        client.write_all(b"ping").unwrap();
        client.flush().unwrap();
        let mut buf = [0u8; 16];
        let n = client.read_some(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
        server.join().unwrap();
    }

    #[test]
    fn test_shutdown_unblocks_cloned_reader() {
        let address: Address = "tcp:127.0.0.1:0".parse().unwrap();
        let listener = address.listen().unwrap();
        let bound = listener.local_address().unwrap();

        let server = thread::spawn(move || {
            // Hold the connection open without writing.
            let transport = listener.accept().unwrap();
            thread::sleep(std::time::Duration::from_millis(200));
            drop(transport);
        });

        let client = bound.connect().unwrap();
        let mut reader = client.try_clone().unwrap();
        let mut closer = client.try_clone().unwrap();
        let reader = thread::spawn(move || {
            let mut buf = [0u8; 16];
            reader.read_some(&mut buf).unwrap()
        });
        thread::sleep(std::time::Duration::from_millis(50));
        closer.shutdown().unwrap();
        // The blocked read returns end-of-stream instead of hanging.
        assert_eq!(reader.join().unwrap(), 0);
        server.join().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_socket_listener_cleans_up() {
        let dir = std::env::temp_dir().join(format!("printwire-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("endpoint.socket");
        let address = Address::Pipe(path.clone());

        {
            let listener = address.listen().unwrap();
            assert!(path.exists());

            let server = thread::spawn({
                let address = address.clone();
                move || {
                    let mut client = address.connect().unwrap();
                    client.write_all(b"hi").unwrap();
                }
            });
            let mut transport = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            assert_eq!(transport.read_some(&mut buf).unwrap(), 2);
            server.join().unwrap();
        }
        // Dropping the listener removes the socket file.
        assert!(!path.exists());

        // A stale file from a crashed process does not block rebinding.
        std::fs::write(&path, b"").unwrap();
        let listener = address.listen().unwrap();
        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
