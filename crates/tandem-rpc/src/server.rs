//! Hello RPC server.
//!
//! Construction is split into bind and serve: [`RpcServerBuilder::bind`]
//! claims the listening socket (the moment the endpoint goes from "not
//! started" to "serving"), and [`BoundServer::serve`] runs until the
//! shutdown future resolves.

use std::future::Future;
use std::net::SocketAddr;

use tandem_tls::CredentialBundle;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Server, ServerTlsConfig};
use tonic::{Request, Response, Status};
use tracing::{debug, info};

use crate::error::{RpcError, RpcResult};
use crate::proto;
use crate::proto::hello_service_server::{HelloService, HelloServiceServer};

/// Literal prepended to every hello reply.
pub const HELLO_PREFIX: &str = "hello:";

/// Port used when no address option is given.
pub const DEFAULT_PORT: u16 = 7890;

/// gRPC implementation of the hello service.
#[derive(Debug, Default, Clone, Copy)]
pub struct HelloServiceImpl;

impl HelloServiceImpl {
    /// Get the tonic service for mounting on a gRPC server.
    pub fn into_service(self) -> HelloServiceServer<Self> {
        HelloServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl HelloService for HelloServiceImpl {
    async fn hello(
        &self,
        request: Request<proto::StringValue>,
    ) -> Result<Response<proto::StringValue>, Status> {
        let remote = request.remote_addr();
        let value = request.into_inner().value;
        debug!(?remote, %value, "hello");

        Ok(Response::new(proto::StringValue {
            value: format!("{HELLO_PREFIX}{value}"),
        }))
    }
}

/// Entry point for building a hello server.
pub struct RpcServer;

impl RpcServer {
    pub fn builder() -> RpcServerBuilder {
        RpcServerBuilder::default()
    }
}

/// Options for a hello server. Unset options keep their defaults:
/// `0.0.0.0:7890`, plaintext.
#[derive(Debug, Clone)]
pub struct RpcServerBuilder {
    addr: SocketAddr,
    tls: Option<ServerTlsConfig>,
}

impl Default for RpcServerBuilder {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            tls: None,
        }
    }
}

impl RpcServerBuilder {
    /// Address to listen on. Port 0 picks an ephemeral port.
    pub fn addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Serve over TLS with `credentials`, requiring and verifying a client
    /// certificate issued by the bundle's CA pool on every connection.
    pub fn tls(mut self, credentials: &CredentialBundle) -> Self {
        tandem_tls::install_crypto_provider();
        self.tls = Some(credentials.server_tls_config());
        self
    }

    /// Bind the listening socket.
    pub async fn bind(self) -> RpcResult<BoundServer> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| RpcError::Bind {
                addr: self.addr,
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| RpcError::Bind {
            addr: self.addr,
            source,
        })?;

        info!(%local_addr, tls = self.tls.is_some(), "hello server bound");
        Ok(BoundServer {
            listener,
            local_addr,
            tls: self.tls,
        })
    }
}

/// A hello server whose socket is bound but which is not yet accepting.
pub struct BoundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    tls: Option<ServerTlsConfig>,
}

impl BoundServer {
    /// The actual bound address (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Accept connections and dispatch `HelloService` until `shutdown`
    /// resolves.
    pub async fn serve<F>(self, shutdown: F) -> RpcResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        let mut builder = Server::builder();
        if let Some(tls) = self.tls {
            builder = builder.tls_config(tls)?;
        }

        info!(addr = %self.local_addr, "hello server serving");
        builder
            .add_service(HelloServiceImpl.into_service())
            .serve_with_incoming_shutdown(TcpListenerStream::new(self.listener), shutdown)
            .await?;

        info!(addr = %self.local_addr, "hello server stopped");
        Ok(())
    }
}
