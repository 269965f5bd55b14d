//! Protobuf and gRPC bindings for the Kubernetes Container Runtime Interface.
//!
//! The `runtime.v1.rs` module is generated from the upstream `runtime.v1`
//! protobuf package (kubelet's `cri-api`) and checked in so that builds do not
//! require `protoc`. Regenerate with `tonic-build` against the pinned proto
//! when tracking a new CRI release.

#![forbid(unsafe_code)]
#![allow(clippy::large_enum_variant)]

pub mod v1 {
    include!("runtime.v1.rs");
}
