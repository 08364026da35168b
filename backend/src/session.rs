// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-connection session state.
//!
//! A connection moves through `connected → challenged → logged in`; the
//! pending challenge expectation is single-use and consumed on first read,
//! success or not. Ten consecutive auth failures arm a 60-second lockout.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, Duration, Utc};
use veilcommon::identifiers::{ConnectionId, Username};

/// Auth failures tolerated before the lockout arms.
const MAX_LOGIN_FAILS: u32 = 10;
/// How long an armed lockout refuses auth attempts.
const LOCKOUT_SECONDS: i64 = 60;

#[derive(Debug, Default)]
struct Session {
    logged_in: bool,
    username: Option<Username>,
    challenge_response: Option<String>,
    login_fails: u32,
    lockout_start: Option<DateTime<Utc>>,
}

/// What a recorded auth failure means for the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFailure {
    /// Failures remaining before the lockout arms.
    AttemptsLeft(u32),
    /// This failure armed the lockout.
    LockedOut,
}

/// Registry of live sessions, keyed by connection id.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<ConnectionId, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Session>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn connect(&self, connection: ConnectionId) {
        self.lock().insert(connection, Session::default());
    }

    /// Drop the session; returns the username it was logged in under, if
    /// any.
    pub fn disconnect(&self, connection: ConnectionId) -> Option<Username> {
        let session = self.lock().remove(&connection)?;
        session.logged_in.then_some(session.username).flatten()
    }

    pub fn is_logged_in(&self, connection: ConnectionId) -> bool {
        self.lock()
            .get(&connection)
            .is_some_and(|session| session.logged_in)
    }

    /// The username of a logged-in connection.
    pub fn logged_in_username(&self, connection: ConnectionId) -> Option<Username> {
        self.lock()
            .get(&connection)
            .filter(|session| session.logged_in)
            .and_then(|session| session.username.clone())
    }

    /// Park a challenge expectation. Also remembers the username the
    /// challenge was issued for; a repeated `login` overwrites both.
    pub fn begin_challenge(&self, connection: ConnectionId, username: Username, expected: String) {
        if let Some(session) = self.lock().get_mut(&connection) {
            session.username = Some(username);
            session.challenge_response = Some(expected);
        }
    }

    /// Consume the pending expectation. It is deleted even when the
    /// comparison afterwards fails.
    pub fn take_expected(&self, connection: ConnectionId) -> Option<String> {
        self.lock()
            .get_mut(&connection)
            .and_then(|session| session.challenge_response.take())
    }

    /// Flip the session to logged-in and reset the failure counter.
    /// Returns the username the challenge was issued for.
    pub fn complete_login(&self, connection: ConnectionId) -> Option<Username> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(&connection)?;
        session.logged_in = true;
        session.login_fails = 0;
        session.username.clone()
    }

    /// Whether the connection is inside an armed lockout window.
    pub fn in_lockout(&self, connection: ConnectionId, now: DateTime<Utc>) -> bool {
        self.lock()
            .get(&connection)
            .and_then(|session| session.lockout_start)
            .is_some_and(|start| now - start < Duration::seconds(LOCKOUT_SECONDS))
    }

    /// Count an auth failure; arms the lockout on the tenth consecutive
    /// one. The counter is only ever reset by a successful login.
    pub fn record_failure(&self, connection: ConnectionId, now: DateTime<Utc>) -> LoginFailure {
        let mut sessions = self.lock();
        let Some(session) = sessions.get_mut(&connection) else {
            return LoginFailure::AttemptsLeft(MAX_LOGIN_FAILS);
        };
        session.login_fails += 1;
        if session.login_fails >= MAX_LOGIN_FAILS {
            session.lockout_start = Some(now);
            LoginFailure::LockedOut
        } else {
            LoginFailure::AttemptsLeft(MAX_LOGIN_FAILS - session.login_fails)
        }
    }
}

#[cfg(test)]
mod tests {
    use veilcommon::time;

    use super::*;

    #[test]
    fn challenge_expectation_is_single_use() {
        let sessions = SessionStore::new();
        let connection = ConnectionId::random();
        sessions.connect(connection);

        sessions.begin_challenge(connection, Username::new("alice"), "cafe".into());
        assert_eq!(sessions.take_expected(connection).as_deref(), Some("cafe"));
        assert_eq!(sessions.take_expected(connection), None);
    }

    #[test]
    fn tenth_failure_arms_lockout() {
        let sessions = SessionStore::new();
        let connection = ConnectionId::random();
        sessions.connect(connection);
        let now = time::now();

        for remaining in (1..MAX_LOGIN_FAILS).rev() {
            assert_eq!(
                sessions.record_failure(connection, now),
                LoginFailure::AttemptsLeft(remaining)
            );
            assert!(!sessions.in_lockout(connection, now));
        }
        assert_eq!(
            sessions.record_failure(connection, now),
            LoginFailure::LockedOut
        );
        assert!(sessions.in_lockout(connection, now));
        // The window closes, but the counter stays armed.
        let later = now + Duration::seconds(LOCKOUT_SECONDS + 1);
        assert!(!sessions.in_lockout(connection, later));
        assert_eq!(
            sessions.record_failure(connection, later),
            LoginFailure::LockedOut
        );
    }

    #[test]
    fn successful_login_resets_failures() {
        let sessions = SessionStore::new();
        let connection = ConnectionId::random();
        sessions.connect(connection);
        let now = time::now();

        sessions.record_failure(connection, now);
        sessions.begin_challenge(connection, Username::new("alice"), "cafe".into());
        assert_eq!(
            sessions.complete_login(connection),
            Some(Username::new("alice"))
        );
        assert!(sessions.is_logged_in(connection));
        for remaining in (1..MAX_LOGIN_FAILS).rev().take(3) {
            assert_eq!(
                sessions.record_failure(connection, now),
                LoginFailure::AttemptsLeft(remaining)
            );
        }
    }

    #[test]
    fn disconnect_reports_logged_in_username_only() {
        let sessions = SessionStore::new();
        let connection = ConnectionId::random();
        sessions.connect(connection);
        sessions.begin_challenge(connection, Username::new("alice"), "cafe".into());
        assert_eq!(sessions.disconnect(connection), None);

        sessions.connect(connection);
        sessions.begin_challenge(connection, Username::new("alice"), "cafe".into());
        sessions.complete_login(connection);
        assert_eq!(sessions.disconnect(connection), Some(Username::new("alice")));
    }
}
