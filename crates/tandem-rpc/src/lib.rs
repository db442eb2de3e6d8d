//! tandem-rpc: the hello service over a mutually authenticated channel.
//!
//! - [`server`]: `HelloService` implementation and an options-style server
//!   builder that binds first and serves second.
//! - [`client`]: typed client that dials with or without TLS and calls the
//!   procedure once or repeatedly.
//!
//! Every failure is returned as an [`RpcError`]; nothing here exits the
//! process.

pub mod client;
pub mod error;
pub mod server;

/// Generated protobuf types and gRPC service stubs.
pub mod proto {
    tonic::include_proto!("tandem.hello.v1");
}

pub use client::{ClientTarget, HelloClient};
pub use error::{RpcError, RpcResult};
pub use server::{BoundServer, HelloServiceImpl, RpcServer, RpcServerBuilder};
