use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use argon2::{
    Algorithm, Argon2, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::{SaltString, rand_core::OsRng},
};
use constant_time_eq::constant_time_eq;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use warden_store::{Repository, TtlCache};
use warden_types::{Request, Response, ResponseCode, User, keys};

use crate::{AppState, internal_error, session_of};

pub use argon2::Params;

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// How long a verified password is trusted without re-hashing.
    pub memo_ttl: Duration,
    /// Upper bound on remembered (username, password) pairs.
    pub memo_capacity: usize,
    pub params: Params,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            memo_ttl: Duration::from_secs(300),
            memo_capacity: 250,
            params: Params::default(),
        }
    }
}

/// What the memo remembers about a successful verification. The digest stands
/// in for the plaintext, which is never kept.
#[derive(Clone)]
struct Memo {
    digest: [u8; 32],
    password_hash: String,
}

/// Checks plaintext passwords against stored Argon2id hashes.
///
/// Argon2 is deliberately slow, so recent successful checks are memoized per
/// username. A memo only counts while the stored hash is the one it was made
/// against, and `change_password` drops it explicitly.
pub struct CredentialVerifier {
    repo: Arc<Repository>,
    argon2: Argon2<'static>,
    memo: TtlCache<String, Memo>,
}

impl CredentialVerifier {
    pub fn new(repo: Arc<Repository>, config: VerifierConfig) -> Self {
        Self {
            repo,
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, config.params),
            memo: TtlCache::bounded(config.memo_ttl, config.memo_capacity),
        }
    }

    /// Salted Argon2id hash in PHC string form.
    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow!("failed to hash password: {}", e))?;
        Ok(hash.to_string())
    }

    pub fn verify_password(&self, username: &str, plaintext: &str) -> Result<bool> {
        Ok(self.authenticate(username, plaintext)?.is_some())
    }

    /// The user, if `plaintext` is their password. Unknown users fail closed.
    pub fn authenticate(&self, username: &str, plaintext: &str) -> Result<Option<User>> {
        let Some(user) = self.repo.get_user(username)? else {
            return Ok(None);
        };

        let digest: [u8; 32] = Sha256::digest(plaintext.as_bytes()).into();

        if let Some(memo) = self.memo.get(username) {
            if memo.password_hash == user.password_hash && constant_time_eq(&memo.digest, &digest) {
                debug!("password memo hit for {}", username);
                return Ok(Some(user));
            }
        }

        let parsed = match PasswordHash::new(&user.password_hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("stored hash for {} is not a PHC string: {}", username, e);
                return Ok(None);
            }
        };

        if self
            .argon2
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_err()
        {
            return Ok(None);
        }

        self.memo.insert(
            username.to_string(),
            Memo {
                digest,
                password_hash: user.password_hash.clone(),
            },
        );
        Ok(Some(user))
    }

    /// Hash and store a new password. Returns `false` for an unknown user.
    pub fn change_password(&self, username: &str, plaintext: &str) -> Result<bool> {
        let hash = self.hash(plaintext)?;
        let rows = self.repo.update_password(username, &hash)?;
        self.forget(username);
        Ok(rows == 1)
    }

    /// Drop the memo for `username`.
    pub fn forget(&self, username: &str) {
        self.memo.remove(username);
    }
}

/// Usernames are 3 to 32 letters, digits or underscores.
fn valid_username(username: &str) -> bool {
    (3..=32).contains(&username.chars().count())
        && username.chars().all(|c| c.is_alphanumeric() || c == '_')
}

// -- Handlers --

pub fn login(state: &AppState, req: &Request) -> Response {
    let (Some(username), Some(password)) =
        (req.field(keys::USERNAME), req.field(keys::PASSWORD_PLAIN))
    else {
        return Response::reply(req, ResponseCode::LoginFailed, "username and password are required");
    };

    let user = match state.verifier.authenticate(username, password) {
        Ok(Some(user)) => user,
        Ok(None) => {
            debug!(request_id = %req.id, "invalid credentials for {}", username);
            return Response::reply(
                req,
                ResponseCode::LoginFailed,
                format!("Login for {} failed", username),
            );
        }
        Err(e) => return internal_error(req, e),
    };

    let session = state.repo.create_session(&user);
    info!(request_id = %req.id, "{} logged in", user.username);

    Response::reply(
        req,
        ResponseCode::LoginOk,
        format!("Login for {} succeeded", user.username),
    )
    .with(keys::USERNAME, user.username)
    .with(keys::SESSION_ID, session.session_id)
}

/// Accepts either a plaintext password (hashed here) or a hash computed by
/// the front-end.
pub fn register(state: &AppState, req: &Request) -> Response {
    let (Some(username), Some(nickname)) = (req.field(keys::USERNAME), req.field(keys::NICKNAME))
    else {
        return Response::reply(req, ResponseCode::InsertFailed, "username and nickname are required");
    };

    if !valid_username(username) {
        return Response::reply(
            req,
            ResponseCode::InsertFailed,
            "usernames are 3 to 32 letters, digits or underscores",
        );
    }

    let password_hash = match (req.field(keys::PASSWORD_PLAIN), req.field(keys::PASSWORD_HASH)) {
        (Some(plain), _) => match state.verifier.hash(plain) {
            Ok(hash) => hash,
            Err(e) => return internal_error(req, e),
        },
        (None, Some(hash)) => hash.to_string(),
        (None, None) => {
            return Response::reply(req, ResponseCode::InsertFailed, "a password is required");
        }
    };

    match state.repo.insert_user(username, &password_hash, nickname) {
        Ok(1) => Response::reply(req, ResponseCode::InsertOk, format!("Registered {}", username)),
        Ok(_) => Response::reply(
            req,
            ResponseCode::InsertFailed,
            format!("Username {} is already taken", username),
        ),
        Err(e) => internal_error(req, e),
    }
}

pub fn change_password(state: &AppState, req: &Request) -> Response {
    let Some(session) = session_of(state, req) else {
        return Response::reply(req, ResponseCode::PasswordFailed, "not logged in");
    };
    let Some(password) = req.field(keys::PASSWORD_PLAIN) else {
        return Response::reply(req, ResponseCode::PasswordFailed, "a new password is required");
    };

    match state.verifier.change_password(&session.username, password) {
        Ok(true) => {
            info!(request_id = %req.id, "{} changed their password", session.username);
            Response::reply(req, ResponseCode::PasswordOk, "Password changed")
        }
        Ok(false) => Response::reply(req, ResponseCode::PasswordFailed, "no such user"),
        Err(e) => internal_error(req, e),
    }
}
