use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use warden_types::{Request, RequestType, Response, keys};
use warden_wire::{Connection, ErrorKind, TransportError};

use crate::pool::{Dial, Pool, PoolConfig, PoolError, TcpDialer};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Back-end address, e.g. `127.0.0.1:8081`.
    pub addr: String,
    pub pool: PoolConfig,
    /// How long a call waits for its response.
    pub read_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8081".to_string(),
            pool: PoolConfig::default(),
            read_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    /// Read `WARDEN_BACKEND_ADDR`, `WARDEN_POOL_INITIAL`, `WARDEN_POOL_MAX`,
    /// `WARDEN_POOL_MAX_OPEN` and `WARDEN_READ_TIMEOUT_MS`. Unset variables
    /// take the defaults; a set but malformed one is an error.
    pub fn from_env() -> Result<Self, ClientError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        Ok(Self {
            addr: env::var("WARDEN_BACKEND_ADDR").unwrap_or(defaults.addr),
            pool: PoolConfig {
                initial_size: var_or("WARDEN_POOL_INITIAL", defaults.pool.initial_size)?,
                max_size: var_or("WARDEN_POOL_MAX", defaults.pool.max_size)?,
                max_open: parse_var("WARDEN_POOL_MAX_OPEN")?.or(defaults.pool.max_open),
            },
            read_timeout: parse_var("WARDEN_READ_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.read_timeout),
        })
    }
}

fn var_or<T: FromStr>(name: &str, default: T) -> Result<T, ClientError> {
    Ok(parse_var(name)?.unwrap_or(default))
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>, ClientError> {
    let Ok(value) = env::var(name) else {
        return Ok(None);
    };
    let parsed = value.trim().parse();
    match parsed {
        Ok(parsed) => Ok(Some(parsed)),
        Err(_) => Err(ClientError::Config {
            name: name.to_string(),
            value,
        }),
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid {name}: {value:?}")]
    Config { name: String, value: String },
}

impl ClientError {
    /// Whether retrying later might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Pool(_) => true,
            Self::Config { .. } => false,
            Self::Transport(e) => matches!(e.kind(), ErrorKind::Timeout | ErrorKind::PeerClosed),
        }
    }
}

/// Sends requests to the back-end over pooled connections, one request per
/// connection at a time.
pub struct Client<D: Dial = TcpDialer> {
    pool: Pool<D>,
    read_timeout: Duration,
}

impl<D: Dial> Clone for Client<D> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            read_timeout: self.read_timeout,
        }
    }
}

impl Client<TcpDialer> {
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let pool = Pool::new(config.pool, TcpDialer::new(config.addr)).await?;
        Ok(Self::with_pool(pool, config.read_timeout))
    }
}

impl<D, S> Client<D>
where
    D: Dial<Conn = Connection<S>>,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn with_pool(pool: Pool<D>, read_timeout: Duration) -> Self {
        Self { pool, read_timeout }
    }

    pub fn pool(&self) -> &Pool<D> {
        &self.pool
    }

    /// Send `req` and wait for the response carrying the same id.
    ///
    /// An empty id is replaced with a fresh UUID. After a timeout the
    /// connection goes back to the pool; its late response is skipped by
    /// whichever call uses the connection next. Any other failure closes it.
    pub async fn call(&self, mut req: Request) -> Result<Response, ClientError> {
        if req.id.is_empty() {
            req.id = Uuid::new_v4().to_string();
        }

        let mut conn = self.pool.get().await?;
        match self.exchange(&mut conn, &req).await {
            Ok(res) => {
                self.pool.put(conn);
                Ok(res)
            }
            Err(e) if e.is_reusable() => {
                debug!(request_id = %req.id, "{} timed out", req.kind);
                self.pool.put(conn);
                Err(e.into())
            }
            Err(e) => {
                warn!(request_id = %req.id, "{} failed: {}", req.kind, e);
                self.pool.destroy(conn);
                Err(e.into())
            }
        }
    }

    async fn exchange(
        &self,
        conn: &mut Connection<S>,
        req: &Request,
    ) -> Result<Response, TransportError> {
        conn.write_frame(req).await?;

        let deadline = Instant::now() + self.read_timeout;
        loop {
            let res: Response = tokio::time::timeout_at(deadline, conn.read_frame())
                .await
                .map_err(|_| TransportError::Timeout)??;
            if res.id == req.id {
                return Ok(res);
            }
            debug!(request_id = %req.id, "skipping stale response {}", res.id);
        }
    }

    // -- Convenience wrappers --

    pub async fn login(&self, username: &str, password: &str) -> Result<Response, ClientError> {
        self.call(
            Request::new(RequestType::Login, "")
                .with(keys::USERNAME, username)
                .with(keys::PASSWORD_PLAIN, password),
        )
        .await
    }

    pub async fn register(
        &self,
        username: &str,
        nickname: &str,
        password: &str,
    ) -> Result<Response, ClientError> {
        self.call(
            Request::new(RequestType::Register, "")
                .with(keys::USERNAME, username)
                .with(keys::NICKNAME, nickname)
                .with(keys::PASSWORD_PLAIN, password),
        )
        .await
    }

    /// Fields left as `None` keep their current values.
    pub async fn edit(
        &self,
        session_id: &str,
        nickname: Option<&str>,
        profile_picture_ref: Option<&str>,
    ) -> Result<Response, ClientError> {
        let mut req = Request::new(RequestType::Edit, "").with(keys::SESSION_ID, session_id);
        if let Some(nickname) = nickname {
            req = req.with(keys::NICKNAME, nickname);
        }
        if let Some(picture) = profile_picture_ref {
            req = req.with(keys::PROFILE_PICTURE_REF, picture);
        }
        self.call(req).await
    }

    pub async fn logout(&self, session_id: &str) -> Result<Response, ClientError> {
        self.call(Request::new(RequestType::Logout, "").with(keys::SESSION_ID, session_id))
            .await
    }

    pub async fn home(&self, session_id: &str) -> Result<Response, ClientError> {
        self.call(Request::new(RequestType::Home, "").with(keys::SESSION_ID, session_id))
            .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Response, ClientError> {
        self.call(Request::new(RequestType::GetSession, "").with(keys::SESSION_ID, session_id))
            .await
    }

    pub async fn change_password(
        &self,
        session_id: &str,
        new_password: &str,
    ) -> Result<Response, ClientError> {
        self.call(
            Request::new(RequestType::ChangePassword, "")
                .with(keys::SESSION_ID, session_id)
                .with(keys::PASSWORD_PLAIN, new_password),
        )
        .await
    }
}
