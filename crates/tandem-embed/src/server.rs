//! Member gRPC services.
//!
//! [`ClientServer`] answers on the client address and [`PeerServer`] on the
//! peer address. Both read through the same [`MembershipManager`].

use tandem_state::StateError;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use crate::auth::verify_password;
use crate::config::{check_host_port, check_member_name};
use crate::error::EmbedError;
use crate::membership::{MembershipManager, to_proto};
use crate::proto;
use crate::proto::client_service_server::{ClientService, ClientServiceServer};
use crate::proto::peer_service_server::{PeerService, PeerServiceServer};

fn internal(e: EmbedError) -> Status {
    match e {
        EmbedError::NotInitialized => Status::failed_precondition(e.to_string()),
        EmbedError::State(StateError::AlreadyExists(what)) => {
            Status::already_exists(format!("{what} already exists"))
        }
        other => Status::internal(other.to_string()),
    }
}

/// gRPC implementation of the client-facing service.
#[derive(Clone)]
pub struct ClientServer {
    membership: MembershipManager,
}

impl ClientServer {
    pub fn new(membership: MembershipManager) -> Self {
        Self { membership }
    }

    /// Get the tonic service for mounting on a gRPC server.
    pub fn into_service(self) -> ClientServiceServer<Self> {
        ClientServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl ClientService for ClientServer {
    async fn status(
        &self,
        _request: Request<proto::StatusRequest>,
    ) -> Result<Response<proto::StatusResponse>, Status> {
        let meta = self
            .membership
            .meta()
            .map_err(internal)?
            .ok_or_else(|| internal(EmbedError::NotInitialized))?;
        let auth_enabled = self
            .membership
            .state()
            .auth_enabled()
            .map_err(|e| internal(e.into()))?;

        Ok(Response::new(proto::StatusResponse {
            member_id: meta.member_id,
            name: meta.name,
            cluster_id: meta.cluster_id,
            auth_enabled,
        }))
    }

    async fn member_list(
        &self,
        _request: Request<proto::MemberListRequest>,
    ) -> Result<Response<proto::MemberListResponse>, Status> {
        let members = self.membership.list_members().map_err(internal)?;
        Ok(Response::new(proto::MemberListResponse {
            members: members.iter().map(to_proto).collect(),
        }))
    }

    async fn authenticate(
        &self,
        request: Request<proto::AuthenticateRequest>,
    ) -> Result<Response<proto::AuthenticateResponse>, Status> {
        let req = request.into_inner();
        let state = self.membership.state();

        if !state.auth_enabled().map_err(|e| internal(e.into()))? {
            return Err(Status::failed_precondition("authentication is not enabled"));
        }

        let user = state
            .get_user(&req.name)
            .map_err(|e| internal(e.into()))?;
        match user {
            Some(user) if verify_password(&user, &req.password) => {
                debug!(name = %user.name, "authenticated");
                Ok(Response::new(proto::AuthenticateResponse {
                    name: user.name,
                    roles: user.roles,
                }))
            }
            _ => {
                warn!(name = %req.name, "authentication failed");
                Err(Status::unauthenticated("invalid user name or password"))
            }
        }
    }
}

/// gRPC implementation of the peer-facing service.
#[derive(Clone)]
pub struct PeerServer {
    membership: MembershipManager,
}

impl PeerServer {
    pub fn new(membership: MembershipManager) -> Self {
        Self { membership }
    }

    /// Get the tonic service for mounting on a gRPC server.
    pub fn into_service(self) -> PeerServiceServer<Self> {
        PeerServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl PeerService for PeerServer {
    async fn members(
        &self,
        _request: Request<proto::MembersRequest>,
    ) -> Result<Response<proto::ClusterView>, Status> {
        Ok(Response::new(self.membership.view().map_err(internal)?))
    }

    async fn join(
        &self,
        request: Request<proto::JoinRequest>,
    ) -> Result<Response<proto::ClusterView>, Status> {
        let req = request.into_inner();
        check_member_name(&req.name)
            .and_then(|_| check_host_port("peer address", &req.peer_addr))
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        let member = self
            .membership
            .join(&req.name, &req.peer_addr)
            .map_err(internal)?;
        let view = self.membership.view().map_err(internal)?;

        info!(member_id = %member.id, members = view.members.len(), "member joined via gRPC");
        Ok(Response::new(view))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ROOT_ROLE, new_user};
    use crate::config::EmbedConfig;
    use tandem_state::StateStore;
    use tonic::Code;

    fn bootstrapped() -> MembershipManager {
        let mgr = MembershipManager::new(StateStore::open_in_memory().unwrap());
        mgr.bootstrap_new(&EmbedConfig::default()).unwrap();
        mgr
    }

    #[tokio::test]
    async fn status_reports_identity() {
        let mgr = bootstrapped();
        let meta = mgr.meta().unwrap().unwrap();
        let resp = ClientServer::new(mgr)
            .status(Request::new(proto::StatusRequest {}))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(resp.member_id, meta.member_id);
        assert_eq!(resp.cluster_id, meta.cluster_id);
        assert_eq!(resp.name, "default");
        assert!(!resp.auth_enabled);
    }

    #[tokio::test]
    async fn status_before_bootstrap_is_failed_precondition() {
        let mgr = MembershipManager::new(StateStore::open_in_memory().unwrap());
        let err = ClientServer::new(mgr)
            .status(Request::new(proto::StatusRequest {}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::FailedPrecondition);
    }

    #[tokio::test]
    async fn authenticate_requires_auth_enabled() {
        let err = ClientServer::new(bootstrapped())
            .authenticate(Request::new(proto::AuthenticateRequest {
                name: "root".into(),
                password: "pw".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::FailedPrecondition);
    }

    #[tokio::test]
    async fn authenticate_checks_password() {
        let mgr = bootstrapped();
        let root = new_user("root", "secret", &[ROOT_ROLE]).unwrap();
        mgr.state().enable_root_auth(&root).unwrap();
        let svc = ClientServer::new(mgr);

        let ok = svc
            .authenticate(Request::new(proto::AuthenticateRequest {
                name: "root".into(),
                password: "secret".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(ok.roles, vec![ROOT_ROLE.to_string()]);

        let bad = svc
            .authenticate(Request::new(proto::AuthenticateRequest {
                name: "root".into(),
                password: "guess".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(bad.code(), Code::Unauthenticated);

        let unknown = svc
            .authenticate(Request::new(proto::AuthenticateRequest {
                name: "nobody".into(),
                password: "secret".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(unknown.code(), Code::Unauthenticated);
    }

    #[tokio::test]
    async fn join_returns_updated_view() {
        let svc = PeerServer::new(bootstrapped());
        let view = svc
            .join(Request::new(proto::JoinRequest {
                name: "infra1".into(),
                peer_addr: "10.0.0.2:2380".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(view.members.len(), 2);
        assert!(view.members.iter().any(|m| m.name == "infra1"));
    }

    #[tokio::test]
    async fn members_reports_cluster_view() {
        let mgr = bootstrapped();
        let meta = mgr.meta().unwrap().unwrap();
        let view = PeerServer::new(mgr)
            .members(Request::new(proto::MembersRequest {}))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(view.cluster_id, meta.cluster_id);
        assert_eq!(view.members.len(), 1);
        assert_eq!(view.members[0].id, meta.member_id);
        assert_eq!(view.members[0].client_addr, "127.0.0.1:2379");
    }

    #[tokio::test]
    async fn join_with_taken_name_is_already_exists() {
        let svc = PeerServer::new(bootstrapped());
        let err = svc
            .join(Request::new(proto::JoinRequest {
                name: "default".into(),
                peer_addr: "10.0.0.2:2380".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::AlreadyExists);
    }

    #[tokio::test]
    async fn join_requires_name_and_address() {
        let svc = PeerServer::new(bootstrapped());
        let err = svc
            .join(Request::new(proto::JoinRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);

        let err = svc
            .join(Request::new(proto::JoinRequest {
                name: "a,b".into(),
                peer_addr: "10.0.0.2:2380".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }
}
