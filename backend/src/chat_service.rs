// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{error, info};
use veilcommon::identifiers::{ConnectionId, Username};

use crate::{
    calls::CallRegistry,
    errors::StorageError,
    router::{NotificationRouter, OutboundEvent},
    scheduler::MessageScheduler,
    session::SessionStore,
    settings::DatabaseSettings,
    store::{DmRecord, UserRecord},
};

#[derive(Debug, Error)]
pub enum ServiceCreationError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl<T: Into<sqlx::Error>> From<T> for ServiceCreationError {
    fn from(e: T) -> Self {
        Self::Storage(StorageError::from(e.into()))
    }
}

/// The server core: persistence plus all in-memory registries. Cheap to
/// clone; background tasks capture their own handle.
#[derive(Debug, Clone)]
pub struct ChatService {
    pool: SqlitePool,
    pub(crate) sessions: SessionStore,
    pub(crate) router: NotificationRouter,
    pub(crate) scheduler: MessageScheduler,
    pub(crate) calls: CallRegistry,
    tasks: TaskTracker,
}

impl ChatService {
    /// Open (or create) the database, run migrations and assemble the
    /// service.
    pub async fn new(database_settings: &DatabaseSettings) -> Result<Self, ServiceCreationError> {
        let pool = SqlitePool::connect_with(database_settings.connect_options()).await?;
        info!("Running database migration");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(StorageError::from)?;
        info!("Database migration successful");
        Ok(Self::from_pool(pool))
    }

    /// Assemble the service around an already migrated pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        let tasks = TaskTracker::new();
        Self {
            pool,
            sessions: SessionStore::new(),
            router: NotificationRouter::new(tasks.clone()),
            scheduler: MessageScheduler::new(),
            calls: CallRegistry::new(),
            tasks,
        }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Presence of a user, as derived from live logged-in connections.
    pub fn is_user_online(&self, username: &Username) -> bool {
        self.router.is_user_online(username)
    }

    /// Register a fresh connection together with its outbound channel.
    pub fn connect(&self, connection: ConnectionId, sink: mpsc::UnboundedSender<OutboundEvent>) {
        self.sessions.connect(connection);
        self.router.register_connection(connection, sink);
    }

    /// Tear down a connection: unsubscribe it everywhere, broadcast the
    /// user going offline when this was their last connection, and purge
    /// their call memberships. Pending scheduled messages are left to
    /// fire.
    pub async fn disconnect(&self, connection: ConnectionId) {
        let username = self.sessions.disconnect(connection);
        self.router
            .remove_connection(connection, username.as_ref());
        let Some(username) = username else {
            return;
        };

        if let Err(error) = self.disconnect_cleanup(connection, &username).await {
            error!(%connection, %username, %error, "disconnect cleanup failed");
        }
    }

    async fn disconnect_cleanup(
        &self,
        connection: ConnectionId,
        username: &Username,
    ) -> Result<(), StorageError> {
        if !self.router.is_user_online(username) {
            let user = UserRecord::load(&self.pool, username).await?;
            if let Some(user) = user {
                if user.status != "offline" {
                    // Presence override only; the stored status is
                    // restored implicitly at the next login.
                    let mut profile = user.into_profile();
                    profile.status = "offline".to_owned();
                    self.router
                        .notify_profile(Some(connection), serde_json::to_value(profile)?);
                }
            }
        }

        for dm_id in self.calls.purge_user(username) {
            if DmRecord::exists(&self.pool, dm_id).await? {
                let mut db = self.pool.acquire().await?;
                let payload = self.dm_notification_payload(db.as_mut(), dm_id).await?;
                self.router.notify_dm(dm_id, payload);
            }
        }
        Ok(())
    }

    /// Stop accepting background work and wait for in-flight tasks.
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}
