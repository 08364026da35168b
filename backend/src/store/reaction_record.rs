// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use serde::Serialize;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteExecutor};
use veilcommon::identifiers::{MessageId, ReactionId, Username};

use crate::errors::StorageError;

/// A reaction to a message. `reaction` is ciphertext; `signature` is the
/// sender's Ed25519 signature over it.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ReactionRecord {
    pub id: ReactionId,
    pub message_id: MessageId,
    pub sender: Username,
    pub reaction: String,
    pub signature: String,
}

/// Reaction as attached to message payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReactionView {
    pub id: ReactionId,
    pub sender: Username,
    pub reaction: String,
    pub signature: String,
}

impl ReactionRecord {
    pub fn into_view(self) -> ReactionView {
        ReactionView {
            id: self.id,
            sender: self.sender,
            reaction: self.reaction,
            signature: self.signature,
        }
    }
}

mod persistence {
    use super::*;

    impl ReactionRecord {
        pub async fn insert(
            executor: impl SqliteExecutor<'_>,
            message_id: MessageId,
            sender: &Username,
            reaction: &str,
            signature: &str,
        ) -> Result<ReactionId, StorageError> {
            let id = sqlx::query_scalar(
                "INSERT INTO reactions (message_id, sender, reaction, signature)
                VALUES (?, ?, ?, ?) RETURNING id",
            )
            .bind(message_id)
            .bind(sender)
            .bind(reaction)
            .bind(signature)
            .fetch_one(executor)
            .await?;
            Ok(id)
        }

        pub async fn load(
            executor: impl SqliteExecutor<'_>,
            id: ReactionId,
        ) -> Result<Option<ReactionRecord>, StorageError> {
            let record = sqlx::query_as::<_, ReactionRecord>(
                "SELECT id, message_id, sender, reaction, signature
                FROM reactions WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(executor)
            .await?;
            Ok(record)
        }

        pub async fn for_message(
            executor: impl SqliteExecutor<'_>,
            message_id: MessageId,
        ) -> Result<Vec<ReactionRecord>, StorageError> {
            let records = sqlx::query_as::<_, ReactionRecord>(
                "SELECT id, message_id, sender, reaction, signature
                FROM reactions WHERE message_id = ? ORDER BY id",
            )
            .bind(message_id)
            .fetch_all(executor)
            .await?;
            Ok(records)
        }

        /// Reactions for a batch of messages, grouped by the caller.
        pub async fn for_messages(
            executor: impl SqliteExecutor<'_>,
            message_ids: &[MessageId],
        ) -> Result<Vec<ReactionRecord>, StorageError> {
            if message_ids.is_empty() {
                return Ok(vec![]);
            }
            let mut query = QueryBuilder::<Sqlite>::new(
                "SELECT id, message_id, sender, reaction, signature
                FROM reactions WHERE message_id IN (",
            );
            let mut in_list = query.separated(", ");
            for message_id in message_ids {
                in_list.push_bind(message_id);
            }
            query.push(") ORDER BY id");

            let records = query.build_query_as().fetch_all(executor).await?;
            Ok(records)
        }

        pub async fn delete(
            executor: impl SqliteExecutor<'_>,
            id: ReactionId,
        ) -> Result<(), StorageError> {
            sqlx::query("DELETE FROM reactions WHERE id = ?")
                .bind(id)
                .execute(executor)
                .await?;
            Ok(())
        }
    }

}
