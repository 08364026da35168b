// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transactional persistence of users, relations, DMs, messages and
//! reactions over SQLite.
//!
//! Entity modules expose their persistence functions against
//! `SqliteExecutor`/`SqliteConnection`, so handlers can run several of them
//! inside one transaction. A handler commits all storage effects before any
//! notification is emitted.

pub mod dm_record;
#[cfg(test)]
pub(crate) mod test_utils;
pub mod message_record;
pub mod reaction_record;
pub mod relation;
pub mod user_record;
pub mod x3dh_inbox;

pub use dm_record::DmRecord;
pub use message_record::{MessageRecord, MessageView};
pub use reaction_record::{ReactionRecord, ReactionView};
pub use relation::{Relation, RelationStatus};
pub use user_record::{UserProfile, UserRecord};
pub use x3dh_inbox::X3dhInbox;
