use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, warn};

use warden_api::{AppState, auth, profile, sessions};
use warden_types::{Request, RequestType, Response, ResponseCode};

/// A request handler. Handlers may block (password hashing, SQLite), so the
/// dispatcher runs them on the blocking pool.
pub type Handler = fn(&AppState, &Request) -> Response;

/// Routes decoded requests to handlers. Cheap to clone; every connection
/// holds one.
#[derive(Clone)]
pub struct Dispatcher {
    state: AppState,
    handlers: Arc<HashMap<RequestType, Handler>>,
}

impl Dispatcher {
    /// A dispatcher serving every known request type.
    pub fn new(state: AppState) -> Self {
        let mut dispatcher = Self::empty(state);
        dispatcher.register(RequestType::Login, auth::login);
        dispatcher.register(RequestType::Register, auth::register);
        dispatcher.register(RequestType::ChangePassword, auth::change_password);
        dispatcher.register(RequestType::Edit, profile::edit);
        dispatcher.register(RequestType::Logout, sessions::logout);
        dispatcher.register(RequestType::Home, sessions::home);
        dispatcher.register(RequestType::GetSession, sessions::get_session);
        dispatcher
    }

    pub fn empty(state: AppState) -> Self {
        Self {
            state,
            handlers: Arc::new(HashMap::new()),
        }
    }

    /// Route `kind` to `handler`, replacing any previous route. Clones made
    /// earlier keep their old table.
    pub fn register(&mut self, kind: RequestType, handler: Handler) {
        Arc::make_mut(&mut self.handlers).insert(kind, handler);
    }

    pub fn handles(&self, kind: RequestType) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Produce exactly one response for `req`, echoing its id.
    ///
    /// Unroutable requests get `UnknownRequest`; a handler that panics gets
    /// `InternalError`. Neither affects the connection the request came from.
    pub async fn dispatch(&self, req: Request) -> Response {
        let Some(&handler) = self.handlers.get(&req.kind) else {
            warn!(request_id = %req.id, "no handler for request type {}", req.kind);
            return Response::reply(
                &req,
                ResponseCode::UnknownRequest,
                format!("Unknown request type {}", req.kind),
            );
        };

        let id = req.id.clone();
        let kind = req.kind;
        let state = self.state.clone();

        match tokio::task::spawn_blocking(move || handler(&state, &req)).await {
            Ok(res) => {
                debug!(request_id = %res.id, "{} -> {}", kind, res.code.as_i32());
                res
            }
            Err(e) => {
                error!(request_id = %id, "{} handler failed: {}", kind, e);
                Response {
                    id,
                    code: ResponseCode::InternalError,
                    description: "internal error, try again later".to_string(),
                    data: HashMap::new(),
                }
            }
        }
    }
}
