// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared fixtures for store tests.

use sqlx::SqlitePool;
use veilcommon::identifiers::{DmId, Username};

use super::{DmRecord, UserRecord};

pub(crate) async fn store_test_user(
    pool: &SqlitePool,
    username: &str,
) -> anyhow::Result<UserRecord> {
    let record = UserRecord::new(
        Username::new(username),
        format!("{:0>64}", username.len()),
        "aa".repeat(32),
        "bb".repeat(64),
        "blob".to_owned(),
    );
    record.store(pool).await?;
    Ok(record)
}

pub(crate) async fn store_test_dm(pool: &SqlitePool, usernames: &[&str]) -> anyhow::Result<DmId> {
    let members: Vec<Username> = usernames.iter().copied().map(Username::new).collect();
    let mut connection = pool.acquire().await?;
    let dm_id = DmRecord::create(connection.as_mut(), &members, &["cc".repeat(32)]).await?;
    Ok(dm_id)
}
