// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end handler tests: events go through the full dispatch
//! pipeline, notifications are observed on per-connection channels.

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use veilcommon::{crypto, identifiers::ConnectionId, time};

use crate::{ChatService, router::OutboundEvent};

use super::{Envelope, dispatch};

struct TestClient {
    connection: ConnectionId,
    rx: mpsc::UnboundedReceiver<OutboundEvent>,
}

impl TestClient {
    fn connect(service: &ChatService) -> Self {
        let connection = ConnectionId::random();
        let (tx, rx) = mpsc::unbounded_channel();
        service.connect(connection, tx);
        Self { connection, rx }
    }

    /// Next pending notification, if any.
    fn try_event(&mut self) -> Option<OutboundEvent> {
        self.rx.try_recv().ok()
    }

    fn drain(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}

struct TestUser {
    name: &'static str,
    signing_key: SigningKey,
    public_hex: String,
    spk_hex: String,
    sig_hex: String,
}

impl TestUser {
    fn generate(name: &'static str) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_hex = hex::encode(signing_key.verifying_key().to_bytes());
        // The SPK is a fresh point, signed by the identity key over its
        // raw bytes.
        let spk_bytes = SigningKey::generate(&mut OsRng).verifying_key().to_bytes();
        let spk_hex = hex::encode(spk_bytes);
        let sig_hex = hex::encode(signing_key.sign(&spk_bytes).to_bytes());
        Self {
            name,
            signing_key,
            public_hex,
            spk_hex,
            sig_hex,
        }
    }

    fn sign_hex(&self, message_hex: &str) -> String {
        let message = hex::decode(message_hex).unwrap();
        hex::encode(self.signing_key.sign(&message).to_bytes())
    }

    fn solve_challenge(&self, challenge_hex: &str) -> String {
        let point = crypto::decompress(challenge_hex).unwrap();
        crypto::compress(&(point * self.signing_key.to_scalar()))
    }
}

fn valid_point_hex() -> String {
    hex::encode(SigningKey::generate(&mut OsRng).verifying_key().to_bytes())
}

async fn send(
    service: &ChatService,
    client: &TestClient,
    event: &str,
    payload: Value,
) -> Envelope {
    dispatch(service, client.connection, event, payload)
        .await
        .expect("known event")
}

fn assert_ok(envelope: &Envelope) -> &Value {
    assert!(envelope.success, "unexpected failure: {:?}", envelope.result);
    &envelope.result
}

fn assert_failure(envelope: &Envelope, message: &str) {
    assert!(!envelope.success, "expected failure, got {:?}", envelope.result);
    assert_eq!(envelope.result, Value::String(message.to_owned()));
}

async fn register(service: &ChatService, client: &TestClient, user: &TestUser) -> Envelope {
    send(
        service,
        client,
        "register",
        json!({
            "username": user.name,
            "public_key": user.public_hex,
            "spk": user.spk_hex,
            "sig": user.sig_hex,
            "own_storage": "",
        }),
    )
    .await
}

async fn login(service: &ChatService, client: &mut TestClient, user: &TestUser) {
    let challenge = send(service, client, "login", json!({"username": user.name})).await;
    let challenge_hex = assert_ok(&challenge).as_str().unwrap().to_owned();
    let answer = send(
        service,
        client,
        "login_challenge_response",
        json!({"response": user.solve_challenge(&challenge_hex)}),
    )
    .await;
    assert_ok(&answer);
    client.drain();
}

/// Register + login in one go; returns the connected client.
async fn enter(service: &ChatService, user: &TestUser) -> TestClient {
    let mut client = TestClient::connect(service);
    assert_ok(&register(service, &client, user).await);
    login(service, &mut client, user).await;
    client
}

async fn make_friends(
    service: &ChatService,
    alice: &TestClient,
    alice_user: &TestUser,
    bob: &TestClient,
    bob_user: &TestUser,
) {
    let requested = send(
        service,
        alice,
        "send_friend_request",
        json!({"username": bob_user.name}),
    )
    .await;
    assert_ok(&requested);
    let acked = send(
        service,
        bob,
        "ack_friend_request",
        json!({"username": alice_user.name, "accept": true}),
    )
    .await;
    assert_ok(&acked);
}

async fn create_pair_dm(
    service: &ChatService,
    alice: &TestClient,
    bob_user: &TestUser,
) -> Envelope {
    send(
        service,
        alice,
        "create_dm",
        json!({
            "usernames": [bob_user.name],
            "messages": [{"spk": bob_user.spk_hex, "ek": valid_point_hex()}],
            "key_tree": [valid_point_hex()],
        }),
    )
    .await
}

#[sqlx::test]
async fn register_twice_conflicts(pool: SqlitePool) {
    let service = ChatService::from_pool(pool);
    let alice = TestUser::generate("alice");
    let client = TestClient::connect(&service);

    assert_ok(&register(&service, &client, &alice).await);
    let other_client = TestClient::connect(&service);
    assert_failure(
        &register(&service, &other_client, &alice).await,
        "Username already exists.",
    );
}

#[sqlx::test]
async fn register_rejects_forged_spk(pool: SqlitePool) {
    let service = ChatService::from_pool(pool);
    let mut alice = TestUser::generate("alice");
    let mallory = TestUser::generate("mallory");
    alice.sig_hex = mallory.sign_hex(&alice.spk_hex.clone());

    let client = TestClient::connect(&service);
    assert_failure(&register(&service, &client, &alice).await, "Malformed data.");
}

#[sqlx::test]
async fn login_challenge_roundtrip(pool: SqlitePool) {
    let service = ChatService::from_pool(pool);
    let alice = TestUser::generate("alice");
    let client = TestClient::connect(&service);
    assert_ok(&register(&service, &client, &alice).await);

    // Wrong answer: the expectation is consumed and the failure counter
    // ticks.
    let challenge = send(&service, &client, "login", json!({"username": "alice"})).await;
    assert_ok(&challenge);
    let wrong = send(
        &service,
        &client,
        "login_challenge_response",
        json!({"response": "00".repeat(32)}),
    )
    .await;
    assert_failure(&wrong, "Incorrect response. 9 attempts left before lockout.");
    let replay = send(
        &service,
        &client,
        "login_challenge_response",
        json!({"response": "00".repeat(32)}),
    )
    .await;
    assert_failure(
        &replay,
        "Not expecting a challenge response right now. 8 attempts left before lockout.",
    );

    // The real keyholder gets in.
    let mut client = client;
    login(&service, &mut client, &alice).await;
    let whoami = send(&service, &client, "get_full_user", json!({})).await;
    assert_eq!(assert_ok(&whoami)["username"], json!("alice"));
}

#[sqlx::test]
async fn tenth_failure_arms_the_lockout(pool: SqlitePool) {
    let service = ChatService::from_pool(pool);
    let client = TestClient::connect(&service);

    for remaining in (1..10).rev() {
        let attempt = send(&service, &client, "login", json!({"username": "ghost"})).await;
        assert_failure(
            &attempt,
            &format!("User does not exist. {remaining} attempts left before lockout."),
        );
    }
    let tenth = send(&service, &client, "login", json!({"username": "ghost"})).await;
    assert_failure(
        &tenth,
        "User does not exist. You have been locked out for 60 seconds.",
    );
    let locked = send(&service, &client, "login", json!({"username": "ghost"})).await;
    assert_failure(&locked, "You have been locked out for 60 seconds.");
}

#[sqlx::test]
async fn protected_events_require_login(pool: SqlitePool) {
    let service = ChatService::from_pool(pool);
    let client = TestClient::connect(&service);

    let listing = send(&service, &client, "get_user_list", json!({})).await;
    assert_failure(&listing, "Not logged in.");
    // username_exists is deliberately open.
    let open = send(&service, &client, "username_exists", json!({"username": "x"})).await;
    assert_eq!(assert_ok(&open), &json!(false));
}

#[sqlx::test]
async fn payload_key_sets_are_exact(pool: SqlitePool) {
    let service = ChatService::from_pool(pool);
    let alice = TestUser::generate("alice");
    let client = enter(&service, &alice).await;

    let extra = send(
        &service,
        &client,
        "get_user",
        json!({"username": "alice", "stray": 1}),
    )
    .await;
    assert_failure(&extra, "Invalid data format.");
    let missing = send(&service, &client, "get_user", json!({})).await;
    assert_failure(&missing, "Invalid data format.");

    // Unknown events get no acknowledgement at all.
    assert!(dispatch(&service, client.connection, "no_such_event", json!({})).await.is_none());
}

#[sqlx::test]
async fn individual_dms_require_friendship_and_are_unique(pool: SqlitePool) {
    let service = ChatService::from_pool(pool);
    let alice_user = TestUser::generate("alice");
    let bob_user = TestUser::generate("bob");
    let mut alice = enter(&service, &alice_user).await;
    let mut bob = enter(&service, &bob_user).await;

    assert_failure(
        &create_pair_dm(&service, &alice, &bob_user).await,
        "You need to be friends to make that DM.",
    );

    make_friends(&service, &alice, &alice_user, &bob, &bob_user).await;
    alice.drain();
    bob.drain();

    let created = create_pair_dm(&service, &alice, &bob_user).await;
    let dm_id = assert_ok(&created).as_i64().unwrap();

    // Bob is online, so the X3DH bundle arrives directly.
    let bundle = bob.try_event().expect("bundle for bob");
    assert_eq!(bundle.event, "x3dh_notification");
    assert_eq!(bundle.payload["sender"], json!("alice"));
    assert_eq!(bundle.payload["position"], json!(1));
    assert_eq!(bundle.payload["id"], json!(dm_id));

    assert_failure(
        &create_pair_dm(&service, &alice, &bob_user).await,
        "DM with that user already exists.",
    );

    // A stale SPK is rejected.
    let stale = send(
        &service,
        &alice,
        "create_dm",
        json!({
            "usernames": ["bob"],
            "messages": [{"spk": valid_point_hex(), "ek": valid_point_hex()}],
            "key_tree": [valid_point_hex()],
        }),
    )
    .await;
    assert_failure(&stale, "SPK does not match.");
}

#[sqlx::test]
async fn messages_reach_the_dm_room(pool: SqlitePool) {
    let service = ChatService::from_pool(pool);
    let alice_user = TestUser::generate("alice");
    let bob_user = TestUser::generate("bob");
    let alice = enter(&service, &alice_user).await;
    let mut bob = enter(&service, &bob_user).await;

    make_friends(&service, &alice, &alice_user, &bob, &bob_user).await;
    let dm_id = assert_ok(&create_pair_dm(&service, &alice, &bob_user).await)
        .as_i64()
        .unwrap();
    bob.drain();

    let ciphertext = "ff00";
    let sent = send(
        &service,
        &alice,
        "send_message",
        json!({
            "id": dm_id,
            "message": ciphertext,
            "signature": alice_user.sign_hex(ciphertext),
            "schedule": 0,
            "delete": 0,
        }),
    )
    .await;
    assert_ok(&sent);

    let event = bob.try_event().expect("message for bob");
    assert_eq!(event.event, "message_notification");
    assert_eq!(event.payload["message"], json!(ciphertext));
    assert_eq!(event.payload["sender"], json!("alice"));
    assert_eq!(event.payload["reactions"], json!([]));

    // A tampered signature never reaches the store.
    let forged = send(
        &service,
        &alice,
        "send_message",
        json!({
            "id": dm_id,
            "message": "ff01",
            "signature": alice_user.sign_hex("ff02"),
            "schedule": 0,
            "delete": 0,
        }),
    )
    .await;
    assert_failure(&forged, "Malformed data.");
}

#[sqlx::test]
async fn history_and_pinned_follow_the_log(pool: SqlitePool) {
    let service = ChatService::from_pool(pool);
    let alice_user = TestUser::generate("alice");
    let bob_user = TestUser::generate("bob");
    let alice = enter(&service, &alice_user).await;
    let bob = enter(&service, &bob_user).await;

    make_friends(&service, &alice, &alice_user, &bob, &bob_user).await;
    let dm_id = assert_ok(&create_pair_dm(&service, &alice, &bob_user).await)
        .as_i64()
        .unwrap();

    for ciphertext in ["01", "02", "03"] {
        let sent = send(
            &service,
            &alice,
            "send_message",
            json!({
                "id": dm_id,
                "message": ciphertext,
                "signature": alice_user.sign_hex(ciphertext),
                "schedule": 0,
                "delete": 0,
            }),
        )
        .await;
        assert_ok(&sent);
    }

    let history = send(
        &service,
        &bob,
        "get_message_history",
        json!({
            "id": dm_id,
            "cursor": time::format_timestamp(&time::now_delta(60)),
            "limit": 2,
        }),
    )
    .await;
    let page = assert_ok(&history).as_array().unwrap().clone();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0]["message"], json!("03"));
    assert_eq!(page[1]["message"], json!("02"));

    let next = send(
        &service,
        &bob,
        "get_message_history",
        json!({
            "id": dm_id,
            "cursor": page[1]["timestamp"],
            "limit": 2,
        }),
    )
    .await;
    let rest = assert_ok(&next).as_array().unwrap().clone();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0]["message"], json!("01"));

    // Pin the oldest message from the other side of the DM.
    let message_id = rest[0]["id"].as_i64().unwrap();
    let pinned = send(
        &service,
        &bob,
        "set_message",
        json!({"id": message_id, "pinned": true}),
    )
    .await;
    assert_ok(&pinned);
    let listing = send(&service, &bob, "get_pinned", json!({"id": dm_id})).await;
    let pins = assert_ok(&listing).as_array().unwrap().clone();
    assert_eq!(pins.len(), 1);
    assert_eq!(pins[0]["id"], json!(message_id));

    // Edits stay with the sender.
    let hijack = send(
        &service,
        &bob,
        "set_message",
        json!({
            "id": message_id,
            "message": "99",
            "signature": bob_user.sign_hex("99"),
        }),
    )
    .await;
    assert_failure(&hijack, "You cannot edit that message.");

    let bad_cursor = send(
        &service,
        &bob,
        "get_message_history",
        json!({"id": dm_id, "cursor": "yesterday", "limit": 5}),
    )
    .await;
    assert_failure(&bad_cursor, "Malformed data.");
}

#[sqlx::test]
async fn reactions_roundtrip(pool: SqlitePool) {
    let service = ChatService::from_pool(pool);
    let alice_user = TestUser::generate("alice");
    let bob_user = TestUser::generate("bob");
    let alice = enter(&service, &alice_user).await;
    let bob = enter(&service, &bob_user).await;

    make_friends(&service, &alice, &alice_user, &bob, &bob_user).await;
    let dm_id = assert_ok(&create_pair_dm(&service, &alice, &bob_user).await)
        .as_i64()
        .unwrap();
    let sent = send(
        &service,
        &alice,
        "send_message",
        json!({
            "id": dm_id,
            "message": "aa",
            "signature": alice_user.sign_hex("aa"),
            "schedule": 0,
            "delete": 0,
        }),
    )
    .await;
    assert_ok(&sent);
    let message = send(&service, &alice, "get_dm", json!({"id": dm_id})).await;
    let message_id = assert_ok(&message)["latest_message"]["id"].as_i64().unwrap();

    let added = send(
        &service,
        &bob,
        "add_reaction",
        json!({
            "id": message_id,
            "reaction": "cc",
            "signature": bob_user.sign_hex("cc"),
        }),
    )
    .await;
    let reaction_id = assert_ok(&added).as_i64().unwrap();

    // Only the reaction's sender may remove it.
    let stolen = send(&service, &alice, "remove_reaction", json!({"id": reaction_id})).await;
    assert_failure(&stolen, "You do not have access to that reaction.");
    let removed = send(&service, &bob, "remove_reaction", json!({"id": reaction_id})).await;
    assert_ok(&removed);

    let details = send(&service, &bob, "get_dm", json!({"id": dm_id})).await;
    assert_eq!(assert_ok(&details)["latest_message"]["reactions"], json!([]));
}

#[sqlx::test]
async fn blocking_cuts_the_friendship_both_ways(pool: SqlitePool) {
    let service = ChatService::from_pool(pool);
    let alice_user = TestUser::generate("alice");
    let bob_user = TestUser::generate("bob");
    let alice = enter(&service, &alice_user).await;
    let bob = enter(&service, &bob_user).await;

    make_friends(&service, &alice, &alice_user, &bob, &bob_user).await;

    assert_ok(&send(&service, &alice, "block_user", json!({"username": "bob"})).await);

    let friends = send(&service, &alice, "get_friends", json!({})).await;
    assert_eq!(assert_ok(&friends), &json!([]));

    let rejected = send(
        &service,
        &bob,
        "send_friend_request",
        json!({"username": "alice"}),
    )
    .await;
    assert_failure(&rejected, "Could not friend that person.");

    // Blocks are listed outgoing-only, and only the holder can lift
    // their own edge.
    let blocked = send(&service, &alice, "get_blocked", json!({})).await;
    assert_eq!(assert_ok(&blocked), &json!(["bob"]));
    let bob_blocked = send(&service, &bob, "get_blocked", json!({})).await;
    assert_eq!(assert_ok(&bob_blocked), &json!([]));
    assert_failure(
        &send(&service, &bob, "unblock_user", json!({"username": "alice"})).await,
        "You cannot unblock that user.",
    );

    // A fresh request from the blocker's side clears their own block.
    assert_ok(&send(&service, &alice, "send_friend_request", json!({"username": "bob"})).await);
    let blocked = send(&service, &alice, "get_blocked", json!({})).await;
    assert_eq!(assert_ok(&blocked), &json!([]));
}

#[sqlx::test]
async fn presence_is_broadcast_on_login_and_last_disconnect(pool: SqlitePool) {
    let service = ChatService::from_pool(pool);
    let alice_user = TestUser::generate("alice");
    let bob_user = TestUser::generate("bob");
    let mut alice = enter(&service, &alice_user).await;

    let mut bob = TestClient::connect(&service);
    assert_ok(&register(&service, &bob, &bob_user).await);
    login(&service, &mut bob, &bob_user).await;

    let event = alice.try_event().expect("bob's login profile broadcast");
    assert_eq!(event.event, "profile_notification");
    assert_eq!(event.payload["username"], json!("bob"));
    assert_eq!(event.payload["status"], json!("online"));

    // A second connection keeps bob online; only the last disconnect
    // flips the broadcast status to offline.
    let mut bob_second = TestClient::connect(&service);
    login(&service, &mut bob_second, &bob_user).await;
    alice.drain();

    service.disconnect(bob_second.connection).await;
    assert!(alice.try_event().is_none());
    service.disconnect(bob.connection).await;
    let event = alice.try_event().expect("offline broadcast");
    assert_eq!(event.event, "profile_notification");
    assert_eq!(event.payload["status"], json!("offline"));

    // get_user mirrors derived presence.
    let profile = send(&service, &alice, "get_user", json!({"username": "bob"})).await;
    assert_eq!(assert_ok(&profile)["status"], json!("offline"));
}

#[sqlx::test]
async fn calls_track_membership_and_purge_on_disconnect(pool: SqlitePool) {
    let service = ChatService::from_pool(pool);
    let alice_user = TestUser::generate("alice");
    let bob_user = TestUser::generate("bob");
    let mut alice = enter(&service, &alice_user).await;
    let bob = enter(&service, &bob_user).await;

    make_friends(&service, &alice, &alice_user, &bob, &bob_user).await;
    let dm_id = assert_ok(&create_pair_dm(&service, &alice, &bob_user).await)
        .as_i64()
        .unwrap();
    alice.drain();

    let joined = send(
        &service,
        &bob,
        "join_call",
        json!({"id": dm_id, "uuid": "call-uuid-1"}),
    )
    .await;
    assert_eq!(assert_ok(&joined), &json!({"bob": "call-uuid-1"}));

    let event = alice.try_event().expect("dm update for alice");
    assert_eq!(event.event, "dm_notification");
    assert_eq!(event.payload["users_in_call"], json!({"bob": "call-uuid-1"}));

    assert_failure(
        &send(&service, &alice, "leave_call", json!({"id": dm_id})).await,
        "You are not part of the call.",
    );

    // Disconnecting purges the membership and re-broadcasts the DM.
    service.disconnect(bob.connection).await;
    alice.drain();
    let details = send(&service, &alice, "get_dm", json!({"id": dm_id})).await;
    assert_eq!(assert_ok(&details)["users_in_call"], json!({}));
}

mod timers {
    use std::time::Duration;

    use super::*;

    /// A service over a throwaway on-disk database; `sqlx::test` cannot
    /// provision one inside a paused-clock runtime.
    async fn temp_service() -> (ChatService, std::path::PathBuf) {
        let path = std::env::temp_dir().join(format!("veil-test-{}.db", uuid::Uuid::new_v4()));
        let options = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePool::connect_with(options).await.expect("open pool");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("migrations");
        (ChatService::from_pool(pool), path)
    }

    fn cleanup(path: &std::path::Path) {
        let _ = std::fs::remove_file(path);
    }

    async fn scheduled_setup() -> (ChatService, TestClient, TestClient, TestUser, i64, std::path::PathBuf) {
        let (service, path) = temp_service().await;
        let alice_user = TestUser::generate("alice");
        let bob_user = TestUser::generate("bob");
        let alice = enter(&service, &alice_user).await;
        let mut bob = enter(&service, &bob_user).await;
        make_friends(&service, &alice, &alice_user, &bob, &bob_user).await;
        let dm_id = assert_ok(&create_pair_dm(&service, &alice, &bob_user).await)
            .as_i64()
            .unwrap();
        bob.drain();
        (service, alice, bob, alice_user, dm_id, path)
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_send_warns_then_delivers() {
        let (service, mut alice, mut bob, alice_user, dm_id, path) = scheduled_setup().await;
        alice.drain();

        let sent = send(
            &service,
            &alice,
            "send_message",
            json!({
                "id": dm_id,
                "message": "dd",
                "signature": alice_user.sign_hex("dd"),
                "schedule": 120,
                "delete": 0,
            }),
        )
        .await;
        assert_ok(&sent);

        // The entry is visible to its sender, and only to them.
        let details = send(&service, &alice, "get_dm", json!({"id": dm_id})).await;
        let scheduled = assert_ok(&details)["scheduled_messages"].clone();
        assert_eq!(scheduled["1"]["message"], json!("dd"));
        let details = send(&service, &bob, "get_dm", json!({"id": dm_id})).await;
        assert_eq!(assert_ok(&details)["scheduled_messages"], json!({}));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(alice.try_event().is_none());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let warning = alice.try_event().expect("pre-send warning");
        assert_eq!(warning.event, "scheduled_soon_notification");
        assert_eq!(warning.payload, json!({"dm_id": dm_id, "schedule_id": 1}));

        tokio::time::sleep(Duration::from_secs(60)).await;
        let confirmation = alice.rx.recv().await.expect("sent notification");
        assert_eq!(confirmation.event, "scheduled_message_sent_notification");
        let delivered = alice.rx.recv().await.expect("message broadcast");
        assert_eq!(delivered.event, "message_notification");
        assert_eq!(delivered.payload["message"], json!("dd"));
        let mirrored = bob.rx.recv().await.expect("bob's copy");
        assert_eq!(mirrored.event, "message_notification");

        // The registry entry is gone.
        let details = send(&service, &alice, "get_dm", json!({"id": dm_id})).await;
        assert_eq!(assert_ok(&details)["scheduled_messages"], json!({}));
        cleanup(&path);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_schedule_stays_silent() {
        let (service, mut alice, mut bob, alice_user, dm_id, path) = scheduled_setup().await;
        alice.drain();

        let sent = send(
            &service,
            &alice,
            "send_message",
            json!({
                "id": dm_id,
                "message": "dd",
                "signature": alice_user.sign_hex("dd"),
                "schedule": 120,
                "delete": 0,
            }),
        )
        .await;
        assert_ok(&sent);

        tokio::time::sleep(Duration::from_secs(30)).await;
        let cancelled = send(
            &service,
            &alice,
            "cancel_scheduled_message",
            json!({"dm_id": dm_id, "schedule_id": 1}),
        )
        .await;
        assert_ok(&cancelled);
        assert_failure(
            &send(
                &service,
                &alice,
                "cancel_scheduled_message",
                json!({"dm_id": dm_id, "schedule_id": 1}),
            )
            .await,
            "You did not schedule a message with that id.",
        );

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(alice.try_event().is_none());
        assert!(bob.try_event().is_none());
        let history = send(
            &service,
            &alice,
            "get_message_history",
            json!({
                "id": dm_id,
                "cursor": time::format_timestamp(&time::now_delta(600)),
                "limit": 10,
            }),
        )
        .await;
        assert_eq!(assert_ok(&history), &json!([]));
        cleanup(&path);
    }

    #[tokio::test(start_paused = true)]
    async fn self_destruct_deletes_after_the_interval() {
        let (service, alice, mut bob, alice_user, dm_id, path) = scheduled_setup().await;

        let sent = send(
            &service,
            &alice,
            "send_message",
            json!({
                "id": dm_id,
                "message": "ee",
                "signature": alice_user.sign_hex("ee"),
                "schedule": 0,
                "delete": 30,
            }),
        )
        .await;
        assert_ok(&sent);
        let event = bob.rx.recv().await.expect("message");
        assert!(event.payload["delete_timestamp"].is_string());

        tokio::time::sleep(Duration::from_secs(31)).await;
        let deletion = bob.rx.recv().await.expect("deletion broadcast");
        assert_eq!(deletion.event, "message_delete_notification");

        let history = send(
            &service,
            &bob,
            "get_message_history",
            json!({
                "id": dm_id,
                "cursor": time::format_timestamp(&time::now_delta(600)),
                "limit": 10,
            }),
        )
        .await;
        assert_eq!(assert_ok(&history), &json!([]));
        cleanup(&path);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_x3dh_bundles_replay_after_login() {
        let (service, path) = temp_service().await;
        let alice_user = TestUser::generate("alice");
        let bob_user = TestUser::generate("bob");
        let alice = enter(&service, &alice_user).await;
        let bob = enter(&service, &bob_user).await;
        make_friends(&service, &alice, &alice_user, &bob, &bob_user).await;

        // Bob goes offline before the DM is created.
        service.disconnect(bob.connection).await;
        assert_ok(&create_pair_dm(&service, &alice, &bob_user).await);

        let mut bob = TestClient::connect(&service);
        login(&service, &mut bob, &bob_user).await;
        assert!(bob.try_event().is_none());

        tokio::time::sleep(Duration::from_secs(6)).await;
        let bundle = bob.rx.recv().await.expect("replayed bundle");
        assert_eq!(bundle.event, "x3dh_notification");
        assert_eq!(bundle.payload["sender"], json!("alice"));
        assert_eq!(bundle.payload["position"], json!(1));

        // Delivered exactly once: a relogin finds an empty inbox.
        service.disconnect(bob.connection).await;
        let mut bob = TestClient::connect(&service);
        login(&service, &mut bob, &bob_user).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(bob.try_event().is_none());
        cleanup(&path);
    }
}
