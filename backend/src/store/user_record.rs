// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use serde::Serialize;
use sqlx::{FromRow, SqliteExecutor};
use veilcommon::identifiers::Username;

use crate::errors::StorageError;

/// A registered user.
///
/// `public_key` is the compressed Ed25519 identity key and is immutable
/// after registration. `spk`/`sig` are the current signed prekey and the
/// identity signature over it; they are always replaced together.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct UserRecord {
    pub username: Username,
    pub public_key: String,
    pub spk: Option<String>,
    pub sig: Option<String>,
    pub status: String,
    pub biography: String,
    pub profile_picture: String,
    pub own_storage: String,
}

/// The public view of a user, as handed to other clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub username: Username,
    pub public_key: String,
    pub spk: Option<String>,
    pub sig: Option<String>,
    pub status: String,
    pub biography: String,
    pub profile_picture: String,
}

/// A user's own view of themselves; adds the client-side encrypted blob.
#[derive(Debug, Clone, Serialize)]
pub struct OwnUserProfile {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub own_storage: String,
}

impl UserRecord {
    /// A fresh record as created by registration.
    pub fn new(
        username: Username,
        public_key: String,
        spk: String,
        sig: String,
        own_storage: String,
    ) -> Self {
        Self {
            username,
            public_key,
            spk: Some(spk),
            sig: Some(sig),
            status: "online".to_owned(),
            biography: String::new(),
            profile_picture: String::new(),
            own_storage,
        }
    }

    pub fn into_profile(self) -> UserProfile {
        UserProfile {
            username: self.username,
            public_key: self.public_key,
            spk: self.spk,
            sig: self.sig,
            status: self.status,
            biography: self.biography,
            profile_picture: self.profile_picture,
        }
    }

    pub fn into_own_profile(self) -> OwnUserProfile {
        let own_storage = self.own_storage.clone();
        OwnUserProfile {
            profile: self.into_profile(),
            own_storage,
        }
    }
}

mod persistence {
    use super::*;

    impl UserRecord {
        pub async fn store(&self, executor: impl SqliteExecutor<'_>) -> Result<(), StorageError> {
            sqlx::query(
                "INSERT INTO users
                    (username, public_key, spk, sig, status, biography,
                     profile_picture, own_storage)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&self.username)
            .bind(&self.public_key)
            .bind(&self.spk)
            .bind(&self.sig)
            .bind(&self.status)
            .bind(&self.biography)
            .bind(&self.profile_picture)
            .bind(&self.own_storage)
            .execute(executor)
            .await?;
            Ok(())
        }

        pub async fn load(
            executor: impl SqliteExecutor<'_>,
            username: &Username,
        ) -> Result<Option<UserRecord>, StorageError> {
            let record = sqlx::query_as::<_, UserRecord>(
                "SELECT username, public_key, spk, sig, status, biography,
                        profile_picture, own_storage
                FROM users WHERE username = ?",
            )
            .bind(username)
            .fetch_optional(executor)
            .await?;
            Ok(record)
        }

        pub async fn exists(
            executor: impl SqliteExecutor<'_>,
            username: &Username,
        ) -> Result<bool, StorageError> {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = ?)")
                    .bind(username)
                    .fetch_one(executor)
                    .await?;
            Ok(exists)
        }

        /// All users in registration order.
        pub async fn load_all(
            executor: impl SqliteExecutor<'_>,
        ) -> Result<Vec<UserRecord>, StorageError> {
            let records = sqlx::query_as::<_, UserRecord>(
                "SELECT username, public_key, spk, sig, status, biography,
                        profile_picture, own_storage
                FROM users ORDER BY id",
            )
            .fetch_all(executor)
            .await?;
            Ok(records)
        }

        /// Write back every mutable column. `public_key` stays untouched.
        pub async fn update(&self, executor: impl SqliteExecutor<'_>) -> Result<(), StorageError> {
            sqlx::query(
                "UPDATE users SET
                    spk = ?, sig = ?, status = ?, biography = ?,
                    profile_picture = ?, own_storage = ?
                WHERE username = ?",
            )
            .bind(&self.spk)
            .bind(&self.sig)
            .bind(&self.status)
            .bind(&self.biography)
            .bind(&self.profile_picture)
            .bind(&self.own_storage)
            .bind(&self.username)
            .execute(executor)
            .await?;
            Ok(())
        }
    }

}
