//! The embedded member handle.
//!
//! Lifecycle: [`Embed::new`] → [`Embed::init`] → [`Embed::run`] (or
//! [`Embed::start`]) → [`Embed::stop`]. A stopped member is not restarted
//! through the same handle; build a new one over the same data dir.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tandem_state::{ClusterMeta, MemberRecord, StateError, StateStore};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::{debug, info};

use crate::auth::{self, ROOT_ROLE};
use crate::config::{ClusterState, EmbedConfig, EmbedOption};
use crate::error::{EmbedError, EmbedResult};
use crate::membership::MembershipManager;
use crate::peer;
use crate::server::{ClientServer, PeerServer};

/// State fixed by a successful `init`.
struct Member {
    config: EmbedConfig,
    membership: MembershipManager,
    meta: ClusterMeta,
}

#[derive(Debug, Clone, Copy)]
struct BoundAddrs {
    client: SocketAddr,
    peer: SocketAddr,
}

struct Inner {
    member: OnceLock<Member>,
    init_started: AtomicBool,
    running: AtomicBool,
    ready: AtomicBool,
    bound: OnceLock<BoundAddrs>,
    shutdown: watch::Sender<bool>,
    /// Serializes administrative calls.
    admin: Mutex<()>,
}

/// Handle to an embedded cluster member. Clones share the same member.
#[derive(Clone)]
pub struct Embed {
    inner: Arc<Inner>,
}

impl Default for Embed {
    fn default() -> Self {
        Self::new()
    }
}

impl Embed {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                member: OnceLock::new(),
                init_started: AtomicBool::new(false),
                running: AtomicBool::new(false),
                ready: AtomicBool::new(false),
                bound: OnceLock::new(),
                shutdown: watch::channel(false).0,
                admin: Mutex::new(()),
            }),
        }
    }

    /// Initialize from the defaults plus `options`.
    pub async fn init(&self, options: impl IntoIterator<Item = EmbedOption>) -> EmbedResult<()> {
        self.init_with(EmbedConfig::from_options(options)).await
    }

    /// Validate `config`, open the member's state and establish its
    /// identity: reload it if the data dir already holds one, otherwise
    /// bootstrap a new cluster or join an existing one.
    ///
    /// A failed init may be retried; a successful one may not.
    pub async fn init_with(&self, config: EmbedConfig) -> EmbedResult<()> {
        if self.inner.init_started.swap(true, Ordering::SeqCst) {
            return Err(EmbedError::AlreadyInitialized);
        }

        match open_member(config).await {
            Ok(member) => self
                .inner
                .member
                .set(member)
                .map_err(|_| EmbedError::AlreadyInitialized),
            Err(e) => {
                self.inner.init_started.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn member(&self) -> EmbedResult<&Member> {
        self.inner.member.get().ok_or(EmbedError::NotInitialized)
    }

    /// Bind both listeners, fire `ready`, then serve until [`Embed::stop`].
    ///
    /// `ready` is consumed on the first send, so it fires at most once. A
    /// dropped receiver is not an error. If binding fails, `ready` is dropped
    /// unsent and `run` may be called again.
    pub async fn run(&self, ready: oneshot::Sender<()>) -> EmbedResult<()> {
        let member = self.member()?;
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(EmbedError::AlreadyRunning);
        }

        let result = self.serve(member, ready).await;
        self.inner.ready.store(false, Ordering::SeqCst);
        if result.is_err() && self.inner.bound.get().is_none() {
            // Failed before both listeners were bound; run may be retried.
            self.inner.running.store(false, Ordering::SeqCst);
        }
        result
    }

    /// Spawn [`Embed::run`] on the current runtime.
    pub fn start(&self) -> (JoinHandle<EmbedResult<()>>, oneshot::Receiver<()>) {
        let (ready_tx, ready_rx) = oneshot::channel();
        let embed = self.clone();
        let handle = tokio::spawn(async move { embed.run(ready_tx).await });
        (handle, ready_rx)
    }

    async fn serve(&self, member: &Member, ready: oneshot::Sender<()>) -> EmbedResult<()> {
        let client_listener = bind(&member.config.client_addr).await?;
        let peer_listener = bind(&member.config.peer_addr).await?;
        let bound = BoundAddrs {
            client: local_addr(&client_listener, &member.config.client_addr)?,
            peer: local_addr(&peer_listener, &member.config.peer_addr)?,
        };
        // Only one run ever gets past the running flag.
        let _ = self.inner.bound.set(bound);

        self.inner.ready.store(true, Ordering::SeqCst);
        info!(
            name = %member.meta.name,
            member_id = %member.meta.member_id,
            client_addr = %bound.client,
            peer_addr = %bound.peer,
            "member ready"
        );
        if ready.send(()).is_err() {
            debug!("ready receiver dropped");
        }

        let client = Server::builder()
            .add_service(ClientServer::new(member.membership.clone()).into_service())
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(client_listener),
                self.shutdown_signal(),
            );
        let peer = Server::builder()
            .add_service(PeerServer::new(member.membership.clone()).into_service())
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(peer_listener),
                self.shutdown_signal(),
            );
        tokio::try_join!(client, peer)?;

        info!(name = %member.meta.name, "member stopped");
        Ok(())
    }

    fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.inner.shutdown.subscribe();
        async move {
            // A closed channel also means shut down.
            let _ = rx.wait_for(|stopped| *stopped).await;
        }
    }

    /// Create user `user` with the root role and enable authentication.
    ///
    /// Only accepted once the member is ready, and only once per cluster
    /// state: a second call fails.
    pub async fn set_auth(&self, user: &str, password: &str) -> EmbedResult<()> {
        if !self.is_ready() {
            return Err(EmbedError::NotReady);
        }
        let member = self.member()?;

        let _admin = self.inner.admin.lock().await;
        let (name, secret) = (user.to_string(), password.to_string());
        let record = tokio::task::spawn_blocking(move || auth::new_user(&name, &secret, &[ROOT_ROLE]))
            .await
            .map_err(|e| EmbedError::Auth(format!("password hashing task failed: {e}")))??;
        match member.membership.state().enable_root_auth(&record) {
            Ok(()) => {
                info!(%user, "root authentication enabled");
                Ok(())
            }
            Err(StateError::AlreadyExists(what)) => {
                Err(EmbedError::Auth(format!("{what} already exists")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Signal both servers to shut down.
    pub fn stop(&self) {
        self.inner.shutdown.send_replace(true);
        info!("member stop requested");
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    pub fn member_id(&self) -> Option<&str> {
        self.inner.member.get().map(|m| m.meta.member_id.as_str())
    }

    pub fn cluster_id(&self) -> Option<&str> {
        self.inner.member.get().map(|m| m.meta.cluster_id.as_str())
    }

    pub fn config(&self) -> Option<&EmbedConfig> {
        self.inner.member.get().map(|m| &m.config)
    }

    /// Whether root authentication has been enabled.
    pub fn auth_enabled(&self) -> EmbedResult<bool> {
        Ok(self.member()?.membership.state().auth_enabled()?)
    }

    /// Members as currently persisted.
    pub fn members(&self) -> EmbedResult<Vec<MemberRecord>> {
        self.member()?.membership.list_members()
    }

    /// Bound client address, once the member has been ready.
    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.inner.bound.get().map(|b| b.client)
    }

    /// Bound peer address, once the member has been ready.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.bound.get().map(|b| b.peer)
    }
}

async fn open_member(config: EmbedConfig) -> EmbedResult<Member> {
    config.validate()?;
    std::fs::create_dir_all(&config.data_dir)?;

    let state = StateStore::open(&config.db_path())?;
    let membership = MembershipManager::new(state);

    let meta = match membership.meta()? {
        Some(meta) => {
            if meta.name != config.name {
                return Err(EmbedError::InvalidConfig(format!(
                    "data dir {} belongs to member {}, not {}",
                    config.data_dir.display(),
                    meta.name,
                    config.name
                )));
            }
            refresh_client_addr(&membership, &meta, &config)?;
            info!(
                cluster_id = %meta.cluster_id,
                member_id = %meta.member_id,
                "restarting from existing state"
            );
            meta
        }
        None => match config.cluster_state {
            ClusterState::New => membership.bootstrap_new(&config)?,
            ClusterState::Existing => {
                let view = peer::join_existing(&config).await?;
                membership.bootstrap_from_view(&config, view)?
            }
        },
    };

    Ok(Member {
        config,
        membership,
        meta,
    })
}

fn refresh_client_addr(
    membership: &MembershipManager,
    meta: &ClusterMeta,
    config: &EmbedConfig,
) -> EmbedResult<()> {
    let state = membership.state();
    if let Some(mut local) = state.get_member(&meta.member_id)? {
        if local.client_addr.as_deref() != Some(config.client_addr.as_str()) {
            local.client_addr = Some(config.client_addr.clone());
            state.put_member(&local)?;
        }
    }
    Ok(())
}

async fn bind(addr: &str) -> EmbedResult<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| EmbedError::Bind {
            addr: addr.to_string(),
            source,
        })
}

fn local_addr(listener: &TcpListener, addr: &str) -> EmbedResult<SocketAddr> {
    listener.local_addr().map_err(|source| EmbedError::Bind {
        addr: addr.to_string(),
        source,
    })
}
