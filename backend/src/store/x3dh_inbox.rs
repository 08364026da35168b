// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Queue of X3DH bundles for users that were offline when a DM was
//! created. Append order is replay order.

use sqlx::{SqliteConnection, SqliteExecutor};
use veilcommon::identifiers::Username;

use crate::errors::StorageError;

pub struct X3dhInbox;

impl X3dhInbox {
    pub async fn enqueue(
        executor: impl SqliteExecutor<'_>,
        username: &Username,
        bundle: &serde_json::Value,
    ) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO x3dh_inbox (username, payload) VALUES (?, ?)")
            .bind(username)
            .bind(serde_json::to_string(bundle)?)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Drain the user's inbox, returning bundles in append order. Read and
    /// clear happen on the same connection so a transaction makes them
    /// atomic.
    pub async fn take_all(
        connection: &mut SqliteConnection,
        username: &Username,
    ) -> Result<Vec<serde_json::Value>, StorageError> {
        let payloads: Vec<String> =
            sqlx::query_scalar("SELECT payload FROM x3dh_inbox WHERE username = ? ORDER BY id")
                .bind(username)
                .fetch_all(&mut *connection)
                .await?;
        sqlx::query("DELETE FROM x3dh_inbox WHERE username = ?")
            .bind(username)
            .execute(&mut *connection)
            .await?;
        payloads
            .into_iter()
            .map(|payload| Ok(serde_json::from_str(&payload)?))
            .collect()
    }
}
