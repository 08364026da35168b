// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection, SqliteExecutor};
use veilcommon::{
    identifiers::{DmId, Username},
    time,
};

use crate::errors::StorageError;

/// A DM conversation. Membership lives in `dm_members`; `public_keys` holds
/// the flattened key tree as an opaque JSON array.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct DmRecord {
    pub id: DmId,
    pub public_keys: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DmRecord {
    /// Decode the stored key tree.
    pub fn key_tree(&self) -> Result<serde_json::Value, StorageError> {
        Ok(serde_json::from_str(&self.public_keys)?)
    }
}

mod persistence {
    use super::*;

    impl DmRecord {
        /// Create a DM with the given member set and key tree; returns the
        /// new id. Duplicate usernames collapse into one membership.
        pub async fn create(
            connection: &mut SqliteConnection,
            usernames: &[Username],
            key_tree: &[String],
        ) -> Result<DmId, StorageError> {
            let public_keys = serde_json::to_string(key_tree)?;
            let dm_id: DmId = sqlx::query_scalar(
                "INSERT INTO dms (public_keys, created_at) VALUES (?, ?) RETURNING id",
            )
            .bind(&public_keys)
            .bind(time::format_timestamp(&time::now()))
            .fetch_one(&mut *connection)
            .await?;

            for username in usernames {
                sqlx::query("INSERT OR IGNORE INTO dm_members (dm_id, username) VALUES (?, ?)")
                    .bind(dm_id)
                    .bind(username)
                    .execute(&mut *connection)
                    .await?;
            }
            Ok(dm_id)
        }

        pub async fn load(
            executor: impl SqliteExecutor<'_>,
            dm_id: DmId,
        ) -> Result<Option<DmRecord>, StorageError> {
            let record = sqlx::query_as::<_, DmRecord>(
                "SELECT id, public_keys, name, created_at FROM dms WHERE id = ?",
            )
            .bind(dm_id)
            .fetch_optional(executor)
            .await?;
            Ok(record)
        }

        pub async fn exists(
            executor: impl SqliteExecutor<'_>,
            dm_id: DmId,
        ) -> Result<bool, StorageError> {
            let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM dms WHERE id = ?)")
                .bind(dm_id)
                .fetch_one(executor)
                .await?;
            Ok(exists)
        }

        pub async fn is_member(
            executor: impl SqliteExecutor<'_>,
            dm_id: DmId,
            username: &Username,
        ) -> Result<bool, StorageError> {
            let is_member: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM dm_members WHERE dm_id = ? AND username = ?)",
            )
            .bind(dm_id)
            .bind(username)
            .fetch_one(executor)
            .await?;
            Ok(is_member)
        }

        /// Member usernames in join order.
        pub async fn members(
            executor: impl SqliteExecutor<'_>,
            dm_id: DmId,
        ) -> Result<Vec<Username>, StorageError> {
            let members = sqlx::query_scalar(
                "SELECT username FROM dm_members WHERE dm_id = ? ORDER BY rowid",
            )
            .bind(dm_id)
            .fetch_all(executor)
            .await?;
            Ok(members)
        }

        /// An "individual" DM has exactly two members.
        pub async fn is_individual(
            executor: impl SqliteExecutor<'_>,
            dm_id: DmId,
        ) -> Result<bool, StorageError> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dm_members WHERE dm_id = ?")
                .bind(dm_id)
                .fetch_one(executor)
                .await?;
            Ok(count == 2)
        }

        /// Ids of every DM the user is a member of.
        pub async fn ids_for_user(
            executor: impl SqliteExecutor<'_>,
            username: &Username,
        ) -> Result<Vec<DmId>, StorageError> {
            let ids =
                sqlx::query_scalar("SELECT dm_id FROM dm_members WHERE username = ? ORDER BY dm_id")
                    .bind(username)
                    .fetch_all(executor)
                    .await?;
            Ok(ids)
        }

        pub async fn set_name(
            executor: impl SqliteExecutor<'_>,
            dm_id: DmId,
            name: Option<&str>,
        ) -> Result<(), StorageError> {
            sqlx::query("UPDATE dms SET name = ? WHERE id = ?")
                .bind(name)
                .bind(dm_id)
                .execute(executor)
                .await?;
            Ok(())
        }

        /// Remove a member. The DM itself is never deleted.
        pub async fn remove_member(
            executor: impl SqliteExecutor<'_>,
            dm_id: DmId,
            username: &Username,
        ) -> Result<(), StorageError> {
            sqlx::query("DELETE FROM dm_members WHERE dm_id = ? AND username = ?")
                .bind(dm_id)
                .bind(username)
                .execute(executor)
                .await?;
            Ok(())
        }

        /// True when some DM's member set equals `usernames` exactly. Used
        /// to keep individual DMs unique per pair.
        pub async fn member_set_exists(
            executor: impl SqliteExecutor<'_>,
            usernames: &[Username],
        ) -> Result<bool, StorageError> {
            let mut query = QueryBuilder::<Sqlite>::new(
                "SELECT EXISTS(
                    SELECT 1 FROM dm_members GROUP BY dm_id
                    HAVING COUNT(*) = ",
            );
            query.push_bind(usernames.len() as i64);
            query.push(" AND SUM(CASE WHEN username IN (");
            let mut in_list = query.separated(", ");
            for username in usernames {
                in_list.push_bind(username);
            }
            query.push(") THEN 1 ELSE 0 END) = ");
            query.push_bind(usernames.len() as i64);
            query.push(")");

            let exists: bool = query.build_query_scalar().fetch_one(executor).await?;
            Ok(exists)
        }
    }

}
