use std::sync::Arc;

use cardlink::adapters::MemorySettingsStore;
use cardlink::{
    Config, Error, Terminal, TransactionManager, TransactionRequest, TransactionState,
};

fn test_config() -> Config {
    Config {
        // keep background polls out of the way; poller behavior has its own
        // test file
        poll_interval_ms: 60_000,
        max_poll_attempts: 3,
        ..Config::default()
    }
}

fn new_manager() -> TransactionManager {
    TransactionManager::new(Arc::new(MemorySettingsStore::new()), &test_config())
}

#[tokio::test]
async fn test_initiate_sale_tracks_pending_transaction() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/transactions/sale")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"transactionId": "T-1", "status": "pending"}"#)
        .create_async()
        .await;

    let manager = new_manager();
    let terminal = Terminal::new("term-1", &server.url(), None).unwrap();

    let initiated = manager
        .initiate_sale(&terminal, TransactionRequest::sale(1000, "GBP"))
        .await
        .unwrap();

    mock.assert_async().await;
    assert!(initiated.transaction_id.starts_with("viva_"));
    assert_eq!(initiated.terminal_transaction_id, "T-1");

    assert_eq!(manager.active_count().await, 1);
    let tx = manager
        .active_transaction(&initiated.transaction_id)
        .await
        .unwrap();
    assert_eq!(tx.current_state(), TransactionState::Pending);
    assert_eq!(tx.terminal_transaction_id, "T-1");
    assert!(manager.is_polling(&initiated.transaction_id).await);

    let persisted = manager
        .persistence()
        .load_state(&initiated.transaction_id)
        .await
        .unwrap();
    assert_eq!(persisted.terminal_transaction_id, "T-1");
    assert_eq!(persisted.state.current_state, TransactionState::Pending);
}

#[tokio::test]
async fn test_initiate_sale_without_terminal_id_is_a_protocol_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/api/transactions/sale")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status": "pending"}"#)
        .create_async()
        .await;

    let manager = new_manager();
    let terminal = Terminal::new("term-1", &server.url(), None).unwrap();

    let result = manager
        .initiate_sale(&terminal, TransactionRequest::sale(1000, "GBP"))
        .await;

    assert!(matches!(result, Err(Error::Protocol(_))));
    assert_eq!(manager.active_count().await, 0);
}

#[tokio::test]
async fn test_initiate_sale_surfaces_terminal_error_body() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/api/transactions/sale")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error": "terminal busy"}"#)
        .create_async()
        .await;

    let manager = new_manager();
    let terminal = Terminal::new("term-1", &server.url(), None).unwrap();

    let result = manager
        .initiate_sale(&terminal, TransactionRequest::sale(1000, "GBP"))
        .await;

    match result {
        Err(Error::Api(message)) => assert!(message.contains("terminal busy")),
        other => panic!("expected Api error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_initiate_sale_transport_failure() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/api/transactions/sale")
        .with_status(500)
        .create_async()
        .await;

    let manager = new_manager();
    let terminal = Terminal::new("term-1", &server.url(), None).unwrap();

    let result = manager
        .initiate_sale(&terminal, TransactionRequest::sale(1000, "GBP"))
        .await;

    assert!(matches!(result, Err(Error::Transport(_))));
    assert_eq!(manager.active_count().await, 0);
}

#[tokio::test]
async fn test_initiate_rejects_mismatched_request_kinds() {
    let manager = new_manager();
    let terminal = Terminal::new("term-1", "http://127.0.0.1:9", None).unwrap();

    let result = manager
        .initiate_sale(&terminal, TransactionRequest::refund(500, "GBP", "T-1"))
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));

    let result = manager
        .initiate_refund(&terminal, TransactionRequest::sale(500, "GBP"))
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));
}

#[tokio::test]
async fn test_initiate_refund_uses_refund_endpoint() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/transactions/refund")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"transactionId": "T-2"}"#)
        .create_async()
        .await;

    let manager = new_manager();
    let terminal = Terminal::new("term-1", &server.url(), None).unwrap();

    let initiated = manager
        .initiate_refund(&terminal, TransactionRequest::refund(500, "GBP", "T-1"))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(initiated.terminal_transaction_id, "T-2");
}

#[tokio::test]
async fn test_sends_bearer_token_when_terminal_has_api_key() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/transactions/sale")
        .match_header("authorization", "Bearer hunter2")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"transactionId": "T-3"}"#)
        .create_async()
        .await;

    let manager = new_manager();
    let terminal = Terminal::new("term-1", &server.url(), Some("hunter2".to_string())).unwrap();

    manager
        .initiate_sale(&terminal, TransactionRequest::sale(1000, "GBP"))
        .await
        .unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn test_transaction_status_maps_and_stays_side_effect_free() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/api/transactions/T-9/status")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status": "awaiting_card"}"#)
        .create_async()
        .await;

    let manager = new_manager();
    let terminal = Terminal::new("term-1", &server.url(), None).unwrap();

    let info = manager
        .transaction_status(&terminal, "T-9")
        .await
        .unwrap();
    assert_eq!(info.status, "awaiting_card");
    assert_eq!(info.progress, 50);
    assert_eq!(info.message, "Please present your card");

    // untracked query: nothing entered the active table
    assert_eq!(manager.active_count().await, 0);
}

#[tokio::test]
async fn test_transaction_status_unrecognized_status_maps_to_fallback() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/api/transactions/T-9/status")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status": "defragmenting"}"#)
        .create_async()
        .await;

    let manager = new_manager();
    let terminal = Terminal::new("term-1", &server.url(), None).unwrap();

    let info = manager
        .transaction_status(&terminal, "T-9")
        .await
        .unwrap();
    assert_eq!(info.progress, 0);
    assert_eq!(info.message, "Processing...");
}

#[tokio::test]
async fn test_transaction_status_returns_none_on_transport_failure() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/api/transactions/T-9/status")
        .with_status(500)
        .create_async()
        .await;

    let manager = new_manager();
    let terminal = Terminal::new("term-1", &server.url(), None).unwrap();

    assert!(manager.transaction_status(&terminal, "T-9").await.is_none());
}

#[tokio::test]
async fn test_cancel_unknown_transaction_still_calls_terminal() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/transactions/T-0/cancel")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success": true}"#)
        .create_async()
        .await;

    let manager = new_manager();
    let terminal = Terminal::new("term-1", &server.url(), None).unwrap();

    assert!(manager.cancel_transaction(&terminal, "T-0").await);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_cancel_declined_by_terminal_returns_false() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/api/transactions/T-0/cancel")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success": false, "message": "card already inserted"}"#)
        .create_async()
        .await;

    let manager = new_manager();
    let terminal = Terminal::new("term-1", &server.url(), None).unwrap();

    assert!(!manager.cancel_transaction(&terminal, "T-0").await);
}

#[tokio::test]
async fn test_cancel_transport_failure_returns_false() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/api/transactions/T-0/cancel")
        .with_status(500)
        .create_async()
        .await;

    let manager = new_manager();
    let terminal = Terminal::new("term-1", &server.url(), None).unwrap();

    assert!(!manager.cancel_transaction(&terminal, "T-0").await);
}

#[tokio::test]
async fn test_cancel_tracked_transaction_marks_cancelled_and_stops_polling() {
    let mut server = mockito::Server::new_async().await;
    let _sale = server
        .mock("POST", "/api/transactions/sale")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"transactionId": "T-4"}"#)
        .create_async()
        .await;
    let _cancel = server
        .mock("POST", "/api/transactions/T-4/cancel")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success": true}"#)
        .create_async()
        .await;

    let manager = new_manager();
    let terminal = Terminal::new("term-1", &server.url(), None).unwrap();

    let initiated = manager
        .initiate_sale(&terminal, TransactionRequest::sale(1000, "GBP"))
        .await
        .unwrap();

    assert!(manager.cancel_transaction(&terminal, "T-4").await);

    let tx = manager
        .active_transaction(&initiated.transaction_id)
        .await
        .unwrap();
    assert_eq!(tx.current_state(), TransactionState::Cancelled);
    assert!(!manager.is_polling(&initiated.transaction_id).await);
}

#[tokio::test]
async fn test_remove_active_transaction_stops_polling_and_forgets_snapshot() {
    let mut server = mockito::Server::new_async().await;
    let _sale = server
        .mock("POST", "/api/transactions/sale")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"transactionId": "T-5"}"#)
        .create_async()
        .await;

    let manager = new_manager();
    let terminal = Terminal::new("term-1", &server.url(), None).unwrap();

    let initiated = manager
        .initiate_sale(&terminal, TransactionRequest::sale(1000, "GBP"))
        .await
        .unwrap();

    let removed = manager
        .remove_active_transaction(&initiated.transaction_id)
        .await
        .unwrap();
    assert_eq!(removed.terminal_transaction_id, "T-5");

    assert_eq!(manager.active_count().await, 0);
    assert!(!manager.is_polling(&initiated.transaction_id).await);
    assert!(manager
        .persistence()
        .load_state(&initiated.transaction_id)
        .await
        .is_none());

    // removing again is a no-op
    assert!(manager
        .remove_active_transaction(&initiated.transaction_id)
        .await
        .is_none());
}

#[tokio::test]
async fn test_recover_persisted_reports_in_flight_snapshots() {
    let mut server = mockito::Server::new_async().await;
    let _sale = server
        .mock("POST", "/api/transactions/sale")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"transactionId": "T-6"}"#)
        .create_async()
        .await;

    let store = Arc::new(MemorySettingsStore::new());
    let manager = TransactionManager::new(store.clone(), &test_config());
    let terminal = Terminal::new("term-1", &server.url(), None).unwrap();

    let initiated = manager
        .initiate_sale(&terminal, TransactionRequest::sale(1000, "GBP"))
        .await
        .unwrap();

    // a fresh manager over the same store sees the snapshot, as after a
    // process restart
    let restarted = TransactionManager::new(store, &test_config());
    let recovered = restarted.recover_persisted().await;
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].transaction_id, initiated.transaction_id);
    assert_eq!(recovered[0].terminal_transaction_id, "T-6");
    assert_eq!(recovered[0].terminal_id, "term-1");
}

#[tokio::test]
async fn test_local_transaction_ids_are_unique_across_initiates() {
    let mut server = mockito::Server::new_async().await;
    let _sale = server
        .mock("POST", "/api/transactions/sale")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"transactionId": "T-7"}"#)
        .expect_at_least(5)
        .create_async()
        .await;

    let manager = new_manager();
    let terminal = Terminal::new("term-1", &server.url(), None).unwrap();

    let mut seen = std::collections::HashSet::new();
    for _ in 0..5 {
        let initiated = manager
            .initiate_sale(&terminal, TransactionRequest::sale(1000, "GBP"))
            .await
            .unwrap();
        assert!(seen.insert(initiated.transaction_id));
    }
}
