//! Blocking byte-stream transports and the addresses that produce them.
//!
//! An [`Address`] names an endpoint (`pipe:`/`unix:` socket path or
//! `tcp:host:port`) and can [`connect`](Address::connect) to it or
//! [`listen`](Address::listen) on it. Both sides yield a
//! [`StreamTransport`], the concrete [`Transport`] used on real
//! connections.

mod addr;
mod socket;

pub use addr::Address;
pub use socket::{StreamTransport, TransportListener};

use std::io;

/// A blocking, bidirectional byte stream.
///
/// One thread blocks in [`read_some`](Transport::read_some) while others
/// write concurrently through a clone from
/// [`try_clone`](Transport::try_clone); implementations must support that
/// split. [`shutdown`](Transport::shutdown) unblocks a pending read from
/// another thread, which is how connection teardown is initiated.
pub trait Transport: Send {
    /// Read at least one byte, blocking until data is available. Returns
    /// `Ok(0)` at end of stream. Interrupted reads are retried internally.
    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the whole buffer.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    /// Shut down both directions, causing a blocked read on any clone of
    /// this transport to return end-of-stream.
    fn shutdown(&mut self) -> io::Result<()>;

    /// A second handle to the same underlying stream.
    fn try_clone(&self) -> io::Result<Box<dyn Transport>>;
}
