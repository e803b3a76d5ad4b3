use crate::Database;
use crate::models::UserRow;
use anyhow::Result;
use rusqlite::{Connection, ffi};
use tracing::debug;

impl Database {
    // -- Users --

    /// Insert a new user. Returns the number of rows inserted: `0` when the
    /// username is already taken.
    pub fn insert_user(&self, username: &str, nickname: &str, password_hash: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (username, nickname, password_hash) VALUES (?1, ?2, ?3)",
                (username, nickname, password_hash),
            );

            match inserted {
                Ok(rows) => Ok(rows),
                Err(e) if is_unique_violation(&e) => {
                    debug!("INSERT users: {} already exists", username);
                    Ok(0)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_username(conn, username))
    }

    /// Returns the number of rows updated (`0` for an unknown username).
    pub fn update_user(&self, username: &str, nickname: &str, profile_picture_ref: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE users SET nickname = ?1, profile_picture_ref = ?2 WHERE username = ?3",
                (nickname, profile_picture_ref, username),
            )?;
            Ok(rows)
        })
    }

    pub fn update_password(&self, username: &str, password_hash: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE users SET password_hash = ?1 WHERE username = ?2",
                (password_hash, username),
            )?;
            Ok(rows)
        })
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
        }
        _ => false,
    }
}

fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT username, nickname, password_hash, profile_picture_ref, created_at
         FROM users WHERE username = ?1",
    )?;

    let row = stmt
        .query_row([username], |row| {
            Ok(UserRow {
                username: row.get(0)?,
                nickname: row.get(1)?,
                password_hash: row.get(2)?,
                profile_picture_ref: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
