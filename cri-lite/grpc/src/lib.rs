//! The cri-lite proxy: a policy-enforcing gRPC server for the Kubernetes CRI.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod client;
mod server;

pub use self::{
    client::{channel, RuntimeLookup},
    server::CriProxy,
};

/// The proxy's build version, advertised in annotated `Version` responses and
/// in the user agent of upstream calls.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
