//! Username/password store for the session login.
//!
//! Passwords are kept as `sha256(salt || password)` with a random 16-byte salt,
//! both hex encoded.

use anyhow::{Context, Result};
use rand::RngCore;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use sha2::{Digest, Sha256};

const SALT_LEN: usize = 16;

/// Accounts created by `seed_defaults`: (username, display name, password).
pub const DEFAULT_USERS: [(&str, &str, &str); 2] =
    [("admin", "Admin", "123"), ("user1", "User 1", "pass1")];

pub struct CredentialStore {
    conn: Connection,
}

impl CredentialStore {
    /// Open or create the database. `file:` URIs are opened in URI mode.
    pub fn open(db_path: &str) -> Result<Self> {
        let opened = if db_path.starts_with("file:") {
            Connection::open_with_flags(
                db_path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI,
            )
        } else {
            Connection::open(db_path)
        };
        let conn = opened.with_context(|| format!("open credential store {}", db_path))?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Private in-memory store.
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
              username TEXT PRIMARY KEY,
              display_name TEXT NOT NULL,
              salt TEXT NOT NULL,
              password_hash TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Create the user or replace its display name and password.
    pub fn upsert_user(&self, username: &str, display_name: &str, password: &str) -> Result<()> {
        let username = username.trim();
        if username.is_empty() {
            anyhow::bail!("username must not be empty");
        }
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let password_hash = hash_password(&salt, password);
        self.conn
            .execute(
                "INSERT INTO users (username, display_name, salt, password_hash)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(username) DO UPDATE SET
                   display_name = excluded.display_name,
                   salt = excluded.salt,
                   password_hash = excluded.password_hash",
                params![username, display_name, hex::encode(salt), password_hash],
            )
            .with_context(|| format!("store user {}", username))?;
        Ok(())
    }

    /// Display name of the user when the password matches.
    pub fn verify(&self, username: &str, password: &str) -> Result<Option<String>> {
        let row: Option<(String, String, String)> = self
            .conn
            .query_row(
                "SELECT display_name, salt, password_hash FROM users WHERE username = ?1",
                params![username.trim()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((display_name, salt_hex, stored_hash)) = row else {
            return Ok(None);
        };
        let salt = hex::decode(&salt_hex)
            .with_context(|| format!("corrupt salt for user {}", username))?;
        if hash_password(&salt, password) == stored_hash {
            Ok(Some(display_name))
        } else {
            Ok(None)
        }
    }

    /// Insert the default accounts that are not present yet. Returns how many were added.
    pub fn seed_defaults(&self) -> Result<usize> {
        let mut added = 0;
        for (username, display_name, password) in DEFAULT_USERS {
            if !self.contains(username)? {
                self.upsert_user(username, display_name, password)?;
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn contains(&self, username: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM users WHERE username = ?1",
                params![username.trim()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn user_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn hash_password(salt: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}
