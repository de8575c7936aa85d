//! Operator credentials for the court system, read by the external worker.

use rusqlite::params;
use secrecy::{ExposeSecret, SecretString};

use super::{Database, DatabaseError};

/// Stores or replaces the secret for `username`.
pub fn save(db: &Database, username: &str, secret: &SecretString) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO credentials (username, secret) VALUES (?1, ?2)
             ON CONFLICT(username) DO UPDATE SET secret = excluded.secret",
            params![username, secret.expose_secret()],
        )?;
        Ok(())
    })
}

/// Usernames with a stored credential, ordered alphabetically.
pub fn usernames(db: &Database) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT username FROM credentials ORDER BY username")?;
        let rows = stmt
            .query_map([], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(rows)
    })
}

/// The stored secret for `username`.
pub fn secret(db: &Database, username: &str) -> Result<Option<SecretString>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT secret FROM credentials WHERE username = ?1")?;
        let mut rows = stmt.query_map(params![username], |r| r.get::<_, String>(0))?;
        match rows.next() {
            Some(Ok(value)) => Ok(Some(SecretString::from(value))),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Removes the credential for `username`.
pub fn delete(db: &Database, username: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let n = conn.execute("DELETE FROM credentials WHERE username = ?1", params![username])?;
        Ok(n > 0)
    })
}
