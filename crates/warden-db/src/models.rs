/// Database row types. These map directly to SQLite rows.
/// Distinct from warden-types models to keep the DB layer independent.

pub struct UserRow {
    pub username: String,
    pub nickname: String,
    pub password_hash: String,
    pub profile_picture_ref: String,
    pub created_at: String,
}

impl From<UserRow> for warden_types::User {
    fn from(row: UserRow) -> Self {
        Self {
            username: row.username,
            nickname: row.nickname,
            password_hash: row.password_hash,
            profile_picture_ref: row.profile_picture_ref,
        }
    }
}
