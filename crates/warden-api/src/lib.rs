//! Request handlers for the back-end.
//!
//! Every handler has the shape `fn(&AppState, &Request) -> Response`: it reads
//! the request's data map, talks to the repository and the credential
//! verifier, and always produces a well-formed response. Handlers never see
//! the socket.

pub mod auth;
pub mod profile;
pub mod sessions;

use std::sync::Arc;

use tracing::error;

use warden_store::Repository;
use warden_types::{Request, Response, ResponseCode, Session, keys};

use crate::auth::CredentialVerifier;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub repo: Arc<Repository>,
    pub verifier: CredentialVerifier,
}

impl AppStateInner {
    pub fn new(repo: Arc<Repository>, verifier: CredentialVerifier) -> AppState {
        Arc::new(Self { repo, verifier })
    }
}

/// Backend failure: log it with the request id, hide details from the wire.
pub(crate) fn internal_error(req: &Request, err: anyhow::Error) -> Response {
    error!(request_id = %req.id, "{} failed: {:#}", req.kind, err);
    Response::reply(req, ResponseCode::InternalError, "internal error, try again later")
}

/// The session named by the request's `session_id`, if it is still alive.
pub(crate) fn session_of(state: &AppState, req: &Request) -> Option<Session> {
    req.field(keys::SESSION_ID)
        .and_then(|sid| state.repo.get_session(sid))
}
