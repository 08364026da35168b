// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use serde::Serialize;
use sqlx::SqliteExecutor;
use veilcommon::identifiers::Username;

use crate::errors::StorageError;

/// State of a directed social-graph edge.
///
/// `Friend` is conceptually symmetric but stored once in an arbitrary
/// direction; `Request` is directional; `Block` applies both ways but each
/// party may hold its own edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum RelationStatus {
    Request,
    Friend,
    Block,
}

/// Namespace for the relation table operations. At most one edge exists per
/// ordered user pair.
pub struct Relation;

impl Relation {
    pub async fn insert(
        executor: impl SqliteExecutor<'_>,
        from: &Username,
        to: &Username,
        status: RelationStatus,
    ) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO relations (from_user, to_user, status_code) VALUES (?, ?, ?)")
            .bind(from)
            .bind(to)
            .bind(status)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn set_status(
        executor: impl SqliteExecutor<'_>,
        from: &Username,
        to: &Username,
        status: RelationStatus,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE relations SET status_code = ? WHERE from_user = ? AND to_user = ?")
            .bind(status)
            .bind(from)
            .bind(to)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn delete(
        executor: impl SqliteExecutor<'_>,
        from: &Username,
        to: &Username,
    ) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM relations WHERE from_user = ? AND to_user = ?")
            .bind(from)
            .bind(to)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Is there an edge `from → to` with this status?
    pub async fn exists(
        executor: impl SqliteExecutor<'_>,
        from: &Username,
        to: &Username,
        status: RelationStatus,
    ) -> Result<bool, StorageError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM relations
                WHERE from_user = ? AND to_user = ? AND status_code = ?
            )",
        )
        .bind(from)
        .bind(to)
        .bind(status)
        .fetch_one(executor)
        .await?;
        Ok(exists)
    }

    pub async fn outgoing(
        executor: impl SqliteExecutor<'_>,
        user: &Username,
        status: RelationStatus,
    ) -> Result<Vec<Username>, StorageError> {
        let usernames = sqlx::query_scalar(
            "SELECT to_user FROM relations WHERE from_user = ? AND status_code = ?",
        )
        .bind(user)
        .bind(status)
        .fetch_all(executor)
        .await?;
        Ok(usernames)
    }

    pub async fn incoming(
        executor: impl SqliteExecutor<'_>,
        user: &Username,
        status: RelationStatus,
    ) -> Result<Vec<Username>, StorageError> {
        let usernames = sqlx::query_scalar(
            "SELECT from_user FROM relations WHERE to_user = ? AND status_code = ?",
        )
        .bind(user)
        .bind(status)
        .fetch_all(executor)
        .await?;
        Ok(usernames)
    }

    /// Users related to `user` with the given status in either direction.
    /// This is the membership query for the symmetric reading of `friend`.
    pub async fn involving(
        executor: impl SqliteExecutor<'_>,
        user: &Username,
        status: RelationStatus,
    ) -> Result<Vec<Username>, StorageError> {
        let usernames = sqlx::query_scalar(
            "SELECT CASE WHEN from_user = ?1 THEN to_user ELSE from_user END
            FROM relations
            WHERE (from_user = ?1 OR to_user = ?1) AND status_code = ?2",
        )
        .bind(user)
        .bind(status)
        .fetch_all(executor)
        .await?;
        Ok(usernames)
    }

    pub async fn are_friends(
        executor: impl SqliteExecutor<'_>,
        user: &Username,
        other: &Username,
    ) -> Result<bool, StorageError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM relations
                WHERE status_code = 'friend'
                    AND ((from_user = ?1 AND to_user = ?2)
                        OR (from_user = ?2 AND to_user = ?1))
            )",
        )
        .bind(user)
        .bind(other)
        .fetch_one(executor)
        .await?;
        Ok(exists)
    }

    /// Drop the friendship edge whichever direction stores it.
    pub async fn delete_friendship(
        executor: impl SqliteExecutor<'_>,
        user: &Username,
        other: &Username,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "DELETE FROM relations
            WHERE status_code = 'friend'
                AND ((from_user = ?1 AND to_user = ?2)
                    OR (from_user = ?2 AND to_user = ?1))",
        )
        .bind(user)
        .bind(other)
        .execute(executor)
        .await?;
        Ok(())
    }
}
