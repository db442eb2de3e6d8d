//! Hello RPC client.

use std::time::Duration;

use tandem_tls::CredentialBundle;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::{debug, info};

use crate::error::{RpcError, RpcResult};
use crate::proto;
use crate::proto::hello_service_client::HelloServiceClient;

/// Where and how to dial a hello server.
#[derive(Debug, Clone)]
pub struct ClientTarget {
    /// `host:port` of the server.
    pub addr: String,
    /// TLS settings; `None` dials plaintext.
    pub tls: Option<ClientTlsConfig>,
    pub connect_timeout: Duration,
}

impl ClientTarget {
    pub fn plaintext(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            tls: None,
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn tls(addr: impl Into<String>, tls: ClientTlsConfig) -> Self {
        Self {
            tls: Some(tls),
            ..Self::plaintext(addr)
        }
    }

    /// Present `credentials` to the server and require `server_name` on the
    /// server's certificate.
    pub fn mutual(
        addr: impl Into<String>,
        credentials: &CredentialBundle,
        server_name: &str,
    ) -> Self {
        Self::tls(addr, credentials.client_tls_config(server_name))
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn uri(&self) -> String {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        format!("{scheme}://{}", self.addr)
    }
}

/// Typed client for the hello service.
#[derive(Debug, Clone)]
pub struct HelloClient {
    inner: HelloServiceClient<Channel>,
    addr: String,
}

impl HelloClient {
    /// Dial the server. With TLS configured, the handshake (including
    /// server name validation) happens here.
    pub async fn connect(target: ClientTarget) -> RpcResult<Self> {
        let uri = target.uri();
        let mut endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| RpcError::InvalidEndpoint(format!("{uri}: {e}")))?
            .connect_timeout(target.connect_timeout);

        if let Some(tls) = target.tls {
            tandem_tls::install_crypto_provider();
            endpoint = endpoint.tls_config(tls)?;
        }

        let channel = endpoint.connect().await?;
        info!(%uri, "connected to hello server");

        Ok(Self {
            inner: HelloServiceClient::new(channel),
            addr: target.addr,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Call `Hello` once.
    pub async fn hello(&mut self, value: &str) -> RpcResult<String> {
        let resp = self
            .inner
            .hello(proto::StringValue {
                value: value.to_string(),
            })
            .await?;
        Ok(resp.into_inner().value)
    }

    /// Call `Hello` `times` times in sequence, stopping at the first
    /// failure.
    pub async fn hello_repeatedly(&mut self, value: &str, times: usize) -> RpcResult<Vec<String>> {
        let mut replies = Vec::with_capacity(times);
        for call in 1..=times {
            let reply = self.hello(value).await?;
            debug!(call, %reply, "hello reply");
            replies.push(reply);
        }
        Ok(replies)
    }
}
