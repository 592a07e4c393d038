// Message store tests against the in-memory API double
// These cover pagination, optimistic sends and reconciliation idempotence

mod common;
use common::{at, server_message, setup_logging, MockApi};

use std::collections::HashSet;

use tutorlink::api::ChatApi;
use tutorlink::chat::MessageStore;
use tutorlink::models::{DeliveryStatus, MessageType};

const CHAT: &str = "chat-1";

fn history(count: usize) -> Vec<tutorlink::models::Message> {
    (0..count)
        .map(|i| {
            server_message(
                &format!("h{}", i),
                CHAT,
                if i % 2 == 0 { "student-1" } else { "teacher-1" },
                &format!("history {}", i),
                i as i64 * 30,
            )
        })
        .collect()
}

#[tokio::test]
async fn initial_load_returns_newest_page() {
    setup_logging();
    let api = MockApi::new();
    api.seed_messages(CHAT, history(120));

    let mut store = MessageStore::new(CHAT);
    store.load_initial(&api).await.unwrap();

    assert_eq!(store.len(), 50);
    assert!(store.has_more());
    // Newest-last ordering
    assert_eq!(store.messages().last().unwrap().content, "history 119");
}

#[tokio::test]
async fn paging_older_never_duplicates() {
    setup_logging();
    let api = MockApi::new();
    api.seed_messages(CHAT, history(120));

    let mut store = MessageStore::new(CHAT);
    store.load_initial(&api).await.unwrap();
    store.load_older(&api).await.unwrap();
    assert_eq!(store.len(), 100);
    store.load_older(&api).await.unwrap();
    assert_eq!(store.len(), 120);
    assert!(!store.has_more());

    // Exhausted history: further calls are no-ops
    store.load_older(&api).await.unwrap();
    assert_eq!(store.len(), 120);

    let ids: HashSet<_> = store.messages().iter().map(|m| m.id.clone()).collect();
    assert_eq!(ids.len(), 120);
    assert_eq!(store.messages().first().unwrap().content, "history 0");
}

#[tokio::test]
async fn every_send_reconciles_to_exactly_one_entry() {
    setup_logging();
    let api = MockApi::new();
    api.seed_messages(CHAT, history(3));

    let mut store = MessageStore::new(CHAT);
    store.load_initial(&api).await.unwrap();

    for i in 0..5 {
        let content = format!("outgoing {}", i);
        let temp_id = store.send_optimistic("student-1", &content, MessageType::Text, at(1000 + i));
        let request = store.send_request_for(&temp_id).unwrap();
        let response = api.send_message(request).await.unwrap();
        let confirmed = server_message(&response.id, CHAT, "student-1", &content, 1000 + i);
        store.reconcile(&temp_id, confirmed);
    }

    assert_eq!(store.len(), 8);
    let ids: HashSet<_> = store
        .messages()
        .iter()
        .map(|m| m.id.clone().unwrap())
        .collect();
    assert_eq!(ids.len(), 8);
    assert!(store
        .messages()
        .iter()
        .all(|m| !m.is_optimistic && m.status == DeliveryStatus::Sent));
}

#[tokio::test]
async fn redelivered_poll_batches_converge() {
    setup_logging();
    let api = MockApi::new();
    api.seed_messages(CHAT, vec![server_message("m7", CHAT, "teacher-1", "hi", 0)]);

    let mut store = MessageStore::new(CHAT);
    store.load_initial(&api).await.unwrap();

    // Two poll batches redeliver the same confirmed record
    for _ in 0..2 {
        let batch = api.fetch_messages(CHAT, None, 50).await.unwrap();
        for message in batch.messages {
            store.apply_incoming(message);
        }
    }

    assert_eq!(store.len(), 1);
    let entry = &store.messages()[0];
    assert!(entry.has_id("m7"));
    assert_eq!(entry.content, "hi");
}

#[tokio::test]
async fn send_and_poll_interleaving_converges_either_way() {
    setup_logging();
    let api = MockApi::new();
    api.seed_messages(CHAT, Vec::new());

    // Order A: reconcile from the send response first, then the poll batch
    let mut store_a = MessageStore::new(CHAT);
    store_a.load_initial(&api).await.unwrap();
    let temp_id = store_a.send_optimistic("student-1", "hello", MessageType::Text, at(0));
    let request = store_a.send_request_for(&temp_id).unwrap();
    let response = api.send_message(request).await.unwrap();
    let confirmed = server_message(&response.id, CHAT, "student-1", "hello", 1);
    store_a.reconcile(&temp_id, confirmed.clone());
    let batch = api.fetch_messages(CHAT, None, 50).await.unwrap();
    for message in batch.messages {
        store_a.apply_incoming(message);
    }

    // Order B: the poll observes the confirmed record before reconciliation
    let mut store_b = MessageStore::new(CHAT);
    store_b.load_initial(&api).await.unwrap();
    let temp_id_b = store_b.send_optimistic("student-1", "hello", MessageType::Text, at(0));
    let batch = api.fetch_messages(CHAT, None, 50).await.unwrap();
    for message in batch.messages {
        store_b.apply_incoming(message);
    }
    store_b.reconcile(&temp_id_b, confirmed);

    // Both orders end with one optimistic entry resolved and one confirmed
    // record; neither drops nor duplicates the message
    let contents_a: Vec<_> = store_a.messages().iter().map(|m| m.content.clone()).collect();
    let contents_b: Vec<_> = store_b.messages().iter().map(|m| m.content.clone()).collect();
    assert_eq!(contents_a, contents_b);
    assert_eq!(
        store_a
            .messages()
            .iter()
            .filter(|m| m.content == "hello" && !m.is_optimistic)
            .count(),
        1
    );
}
