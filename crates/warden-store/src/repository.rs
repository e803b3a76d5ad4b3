use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use warden_db::Database;
use warden_types::{Session, User};

use crate::cache::TtlCache;

#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// How long a user row stays cached.
    pub user_ttl: Duration,
    /// Session lifetime. An expired session is a logged-out session.
    pub session_ttl: Duration,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            user_ttl: Duration::from_secs(60),
            session_ttl: Duration::from_secs(4 * 3600),
        }
    }
}

/// Users and sessions behind one cache-aside facade.
///
/// Users are durable in the database and cached by username. Sessions exist
/// only in the cache: losing them forces a re-login and nothing more.
/// Writes through this instance are visible to reads through this instance,
/// also when a read races a write.
pub struct Repository {
    db: Database,
    users: TtlCache<String, User>,
    sessions: TtlCache<String, Session>,
    /// Bumped by every user write. A cache fill only lands if no write
    /// happened since its database read.
    user_writes: Mutex<u64>,
}

impl Repository {
    pub fn new(db: Database, config: RepositoryConfig) -> Self {
        Self {
            db,
            users: TtlCache::new(config.user_ttl),
            sessions: TtlCache::new(config.session_ttl),
            user_writes: Mutex::new(0),
        }
    }

    // -- Users --

    /// Look a user up, cache first. A miss in the database is `None` and is
    /// not cached, so a later registration is seen immediately.
    pub fn get_user(&self, username: &str) -> Result<Option<User>> {
        if let Some(user) = self.users.get(username) {
            debug!("user cache hit: {}", username);
            return Ok(Some(user));
        }

        debug!("user cache miss: {}", username);
        let generation = *self.lock_user_writes();
        let user: Option<User> = self.db.get_user_by_username(username)?.map(Into::into);
        if let Some(user) = &user {
            self.fill_user(username, user, generation);
        }
        Ok(user)
    }

    /// Cache a row read while the write counter was at `generation`, unless
    /// a write has landed since.
    fn fill_user(&self, username: &str, user: &User, generation: u64) {
        let writes = self.lock_user_writes();
        if *writes == generation {
            self.users.insert(username.to_string(), user.clone());
        } else {
            debug!("not caching {}: written during read", username);
        }
    }

    /// Returns the number of rows inserted; `0` means the username is taken.
    pub fn insert_user(&self, username: &str, password_hash: &str, nickname: &str) -> Result<usize> {
        let rows = self.db.insert_user(username, nickname, password_hash)?;
        if rows == 1 {
            info!("INSERT users: {} ({})", username, nickname);
            let mut writes = self.lock_user_writes();
            *writes += 1;
            self.users.remove(username);
        }
        Ok(rows)
    }

    /// Write-through profile edit. On success the cached row is replaced by a
    /// fresh read so the next `get_user` sees the edit.
    pub fn update_user(&self, username: &str, nickname: &str, profile_picture_ref: &str) -> Result<usize> {
        let rows = self.db.update_user(username, nickname, profile_picture_ref)?;
        debug!(
            "UPDATE users: {} nickname={} profile_picture_ref={} ({} rows)",
            username, nickname, profile_picture_ref, rows
        );
        if rows == 1 {
            self.refresh_user(username);
        }
        Ok(rows)
    }

    /// Write-through password change.
    pub fn update_password(&self, username: &str, password_hash: &str) -> Result<usize> {
        let rows = self.db.update_password(username, password_hash)?;
        debug!("UPDATE users: {} password ({} rows)", username, rows);
        if rows == 1 {
            self.refresh_user(username);
        }
        Ok(rows)
    }

    /// Re-read and re-cache after a write. Holding the write lock across the
    /// re-read orders it after any fill that read the pre-write row.
    fn refresh_user(&self, username: &str) {
        let mut writes = self.lock_user_writes();
        *writes += 1;
        match self.db.get_user_by_username(username) {
            Ok(Some(row)) => self.users.insert(username.to_string(), row.into()),
            Ok(None) => {
                self.users.remove(username);
            }
            Err(e) => {
                // Never leave the pre-write row behind.
                warn!("failed to re-read {} after write: {}", username, e);
                self.users.remove(username);
            }
        }
    }

    fn lock_user_writes(&self) -> MutexGuard<'_, u64> {
        self.user_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // -- Sessions --

    pub fn create_session(&self, user: &User) -> Session {
        let session = Session {
            session_id: Uuid::new_v4().to_string(),
            username: user.username.clone(),
        };
        self.sessions
            .insert(session.session_id.clone(), session.clone());
        debug!("created session {} for {}", session.session_id, session.username);
        session
    }

    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id)
    }

    /// Idempotent: deleting an unknown session is not an error.
    pub fn delete_session(&self, session_id: &str) {
        if self.sessions.remove(session_id).is_some() {
            debug!("deleted session {}", session_id);
        }
    }

    // -- Housekeeping --

    /// Drop expired users and sessions. Returns how many entries went.
    pub fn purge_expired(&self) -> usize {
        self.sessions.purge_expired() + self.users.purge_expired()
    }

    /// Purge expired entries every `every` until the repository is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let repo: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(repo) = repo.upgrade() else {
                    break;
                };
                let purged = repo.purge_expired();
                if purged > 0 {
                    debug!("sweeper purged {} expired cache entries", purged);
                }
            }
        })
    }
}
