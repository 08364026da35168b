// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqliteConnection, SqliteExecutor};
use veilcommon::{
    identifiers::{DmId, MessageId, Username},
    time,
};

use crate::errors::StorageError;

use super::reaction_record::{ReactionRecord, ReactionView};

/// A persisted message. `message` is a ciphertext blob opaque to the
/// server; `signature` is the sender's Ed25519 signature over it, checked
/// at insert time and not re-checked on read.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct MessageRecord {
    pub id: MessageId,
    pub dm_id: DmId,
    pub sender: Username,
    pub message: String,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
    pub delete_timestamp: Option<DateTime<Utc>>,
    pub pinned: bool,
}

/// Message payload as emitted to clients: the record plus its reactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageView {
    pub id: MessageId,
    pub dm_id: DmId,
    pub sender: Username,
    pub message: String,
    pub signature: String,
    #[serde(with = "veilcommon::time::serde_ts")]
    pub timestamp: DateTime<Utc>,
    #[serde(with = "veilcommon::time::serde_ts_opt")]
    pub delete_timestamp: Option<DateTime<Utc>>,
    pub pinned: bool,
    pub reactions: Vec<ReactionView>,
}

impl MessageRecord {
    /// Shape the record into its client payload with the given reactions
    /// (a freshly inserted message has none).
    pub fn into_view(self, reactions: Vec<ReactionView>) -> MessageView {
        MessageView {
            id: self.id,
            dm_id: self.dm_id,
            sender: self.sender,
            message: self.message,
            signature: self.signature,
            timestamp: self.timestamp,
            delete_timestamp: self.delete_timestamp,
            pinned: self.pinned,
            reactions,
        }
    }

    /// Attach this record's reactions.
    pub async fn with_reactions(
        self,
        connection: &mut SqliteConnection,
    ) -> Result<MessageView, StorageError> {
        let reactions = ReactionRecord::for_message(&mut *connection, self.id)
            .await?
            .into_iter()
            .map(ReactionRecord::into_view)
            .collect();
        Ok(self.into_view(reactions))
    }

    /// Attach reactions to a batch of records, preserving order.
    pub async fn attach_reactions(
        connection: &mut SqliteConnection,
        records: Vec<MessageRecord>,
    ) -> Result<Vec<MessageView>, StorageError> {
        let message_ids: Vec<MessageId> = records.iter().map(|m| m.id).collect();
        let mut reaction_map: HashMap<MessageId, Vec<ReactionView>> = HashMap::new();
        for reaction in ReactionRecord::for_messages(&mut *connection, &message_ids).await? {
            reaction_map
                .entry(reaction.message_id)
                .or_default()
                .push(reaction.into_view());
        }
        Ok(records
            .into_iter()
            .map(|record| {
                let reactions = reaction_map.remove(&record.id).unwrap_or_default();
                record.into_view(reactions)
            })
            .collect())
    }
}

mod persistence {
    use super::*;

    impl MessageRecord {
        /// Insert with a server-assigned timestamp. A positive
        /// `delete_after` arms the self-destruct timestamp that far in the
        /// future.
        pub async fn insert(
            connection: &mut SqliteConnection,
            dm_id: DmId,
            sender: &Username,
            message: &str,
            signature: &str,
            delete_after: i64,
        ) -> Result<MessageRecord, StorageError> {
            let timestamp = time::now();
            let delete_timestamp =
                (delete_after > 0).then(|| timestamp + chrono::Duration::seconds(delete_after));
            let id: MessageId = sqlx::query_scalar(
                "INSERT INTO messages
                    (dm_id, sender, message, signature, timestamp, delete_timestamp, pinned)
                VALUES (?, ?, ?, ?, ?, ?, FALSE)
                RETURNING id",
            )
            .bind(dm_id)
            .bind(sender)
            .bind(message)
            .bind(signature)
            .bind(time::format_timestamp(&timestamp))
            .bind(delete_timestamp.as_ref().map(time::format_timestamp))
            .fetch_one(&mut *connection)
            .await?;

            Ok(MessageRecord {
                id,
                dm_id,
                sender: sender.clone(),
                message: message.to_owned(),
                signature: signature.to_owned(),
                timestamp,
                delete_timestamp,
                pinned: false,
            })
        }

        pub async fn load(
            executor: impl SqliteExecutor<'_>,
            id: MessageId,
        ) -> Result<Option<MessageRecord>, StorageError> {
            let record = sqlx::query_as::<_, MessageRecord>(
                "SELECT id, dm_id, sender, message, signature, timestamp,
                        delete_timestamp, pinned
                FROM messages WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(executor)
            .await?;
            Ok(record)
        }

        /// Whether the message sits in one of the user's DMs.
        pub async fn visible_to(
            executor: impl SqliteExecutor<'_>,
            id: MessageId,
            username: &Username,
        ) -> Result<bool, StorageError> {
            let visible: bool = sqlx::query_scalar(
                "SELECT EXISTS(
                    SELECT 1 FROM messages
                    JOIN dm_members ON dm_members.dm_id = messages.dm_id
                    WHERE messages.id = ? AND dm_members.username = ?
                )",
            )
            .bind(id)
            .bind(username)
            .fetch_one(executor)
            .await?;
            Ok(visible)
        }

        /// The DM's newest message. Ties on `timestamp` break towards the
        /// higher id.
        pub async fn latest_in_dm(
            executor: impl SqliteExecutor<'_>,
            dm_id: DmId,
        ) -> Result<Option<MessageRecord>, StorageError> {
            let record = sqlx::query_as::<_, MessageRecord>(
                "SELECT id, dm_id, sender, message, signature, timestamp,
                        delete_timestamp, pinned
                FROM messages WHERE dm_id = ?
                ORDER BY timestamp DESC, id DESC
                LIMIT 1",
            )
            .bind(dm_id)
            .fetch_optional(executor)
            .await?;
            Ok(record)
        }

        /// Up to `limit` messages strictly older than `cursor`, newest
        /// first.
        pub async fn history(
            executor: impl SqliteExecutor<'_>,
            dm_id: DmId,
            cursor: &DateTime<Utc>,
            limit: i64,
        ) -> Result<Vec<MessageRecord>, StorageError> {
            let records = sqlx::query_as::<_, MessageRecord>(
                "SELECT id, dm_id, sender, message, signature, timestamp,
                        delete_timestamp, pinned
                FROM messages WHERE dm_id = ? AND timestamp < ?
                ORDER BY timestamp DESC, id DESC
                LIMIT ?",
            )
            .bind(dm_id)
            .bind(time::format_timestamp(cursor))
            .bind(limit)
            .fetch_all(executor)
            .await?;
            Ok(records)
        }

        /// All pinned messages of the DM, newest first.
        pub async fn pinned(
            executor: impl SqliteExecutor<'_>,
            dm_id: DmId,
        ) -> Result<Vec<MessageRecord>, StorageError> {
            let records = sqlx::query_as::<_, MessageRecord>(
                "SELECT id, dm_id, sender, message, signature, timestamp,
                        delete_timestamp, pinned
                FROM messages WHERE dm_id = ? AND pinned
                ORDER BY timestamp DESC, id DESC",
            )
            .bind(dm_id)
            .fetch_all(executor)
            .await?;
            Ok(records)
        }

        /// Write back the editable columns (ciphertext, signature, pin
        /// flag).
        pub async fn update(&self, executor: impl SqliteExecutor<'_>) -> Result<(), StorageError> {
            sqlx::query("UPDATE messages SET message = ?, signature = ?, pinned = ? WHERE id = ?")
                .bind(&self.message)
                .bind(&self.signature)
                .bind(self.pinned)
                .bind(self.id)
                .execute(executor)
                .await?;
            Ok(())
        }

        /// Delete a message and its reactions.
        pub async fn delete(
            connection: &mut SqliteConnection,
            id: MessageId,
        ) -> Result<(), StorageError> {
            sqlx::query("DELETE FROM reactions WHERE message_id = ?")
                .bind(id)
                .execute(&mut *connection)
                .await?;
            sqlx::query("DELETE FROM messages WHERE id = ?")
                .bind(id)
                .execute(&mut *connection)
                .await?;
            Ok(())
        }
    }

}
