//! Wire framing for newline-free streams of JSON texts.
//!
//! The engine's peers write JSON objects and arrays back to back on a byte
//! stream with no delimiter between them. [`JsonFramer`] recovers the
//! individual texts incrementally, byte by byte, so framing is independent
//! of how the transport happens to split reads.

mod framer;

pub use framer::JsonFramer;
