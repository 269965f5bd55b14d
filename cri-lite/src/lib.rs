//! cri-lite exposes a narrowed CRI surface on per-listener UNIX sockets, so
//! that callers can manage a bounded slice of node state without node-level
//! privilege.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod args;
pub mod config;

pub use self::args::Args;
