//! Password hashing for member users.

use std::time::{SystemTime, UNIX_EPOCH};

use tandem_state::UserRecord;

use crate::error::{EmbedError, EmbedResult};

/// Role granted by the administrative root-credential call.
pub const ROOT_ROLE: &str = "root";

/// bcrypt work factor for stored password hashes.
pub const BCRYPT_COST: u32 = 10;

/// Build a user record holding a bcrypt hash of `password`.
pub fn new_user(name: &str, password: &str, roles: &[&str]) -> EmbedResult<UserRecord> {
    if name.is_empty() {
        return Err(EmbedError::Auth("user name must not be empty".into()));
    }
    if password.is_empty() {
        return Err(EmbedError::Auth("password must not be empty".into()));
    }

    let password_hash = bcrypt::hash(password, BCRYPT_COST)
        .map_err(|e| EmbedError::Auth(format!("failed to hash password: {e}")))?;

    Ok(UserRecord {
        name: name.to_string(),
        password_hash,
        roles: roles.iter().map(|r| r.to_string()).collect(),
        created_at: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
    })
}

/// Whether `password` matches the stored hash. A malformed hash never
/// matches.
pub fn verify_password(user: &UserRecord, password: &str) -> bool {
    bcrypt::verify(password, &user.password_hash).unwrap_or(false)
}
