//! Tests for the in-memory queue backend.

use super::*;
use std::time::Duration;

// ============================================================================
// Test Helper Functions
// ============================================================================

async fn create_queue(backend: &InMemoryBackend, name: &str) -> QueueEndpoint {
    backend
        .create_queue(&QueueName::new(name.to_string()).unwrap(), &HashMap::new())
        .await
        .unwrap()
}

fn receive_request(max_messages: u32, wait: u32, visibility: u32) -> ReceiveRequest {
    ReceiveRequest {
        max_messages,
        wait_time_seconds: wait,
        visibility_timeout_seconds: visibility,
        attribute_names: vec![attributes::APPROXIMATE_RECEIVE_COUNT.to_string()],
    }
}

/// Paused-clock timers fire on millisecond ticks
fn assert_elapsed(started: Instant, seconds: u64) {
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(seconds), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(seconds) + Duration::from_millis(10));
}

async fn counts(backend: &InMemoryBackend, endpoint: &QueueEndpoint) -> (String, String) {
    let attrs = backend
        .get_queue_attributes(endpoint, &[ALL_ATTRIBUTES.to_string()])
        .await
        .unwrap();
    (
        attrs[attributes::APPROXIMATE_NUMBER_OF_MESSAGES].clone(),
        attrs[attributes::APPROXIMATE_NUMBER_OF_MESSAGES_NOT_VISIBLE].clone(),
    )
}

// ============================================================================
// Queue Management Tests
// ============================================================================

mod queue_management {
    use super::*;

    #[test]
    fn test_zero_receive_limit_is_rejected() {
        let result = InMemoryBackend::new(InMemoryConfig {
            max_receive_count: Some(0),
            ..InMemoryConfig::default()
        });

        assert!(matches!(result, Err(QueueError::ConfigurationError(_))));
    }

    #[tokio::test]
    async fn test_create_queue_is_idempotent_by_name() {
        let backend = InMemoryBackend::default();
        let first = create_queue(&backend, "jobs").await;
        backend.send_message(&first, "body", 0).await.unwrap();

        let second = create_queue(&backend, "jobs").await;

        assert_eq!(first, second);
        assert_eq!(first.as_str(), "memory://jobs");
        assert_eq!(counts(&backend, &second).await.0, "1");
    }

    #[tokio::test]
    async fn test_queues_are_independent() {
        let backend = InMemoryBackend::default();
        let jobs = create_queue(&backend, "jobs").await;
        let other = create_queue(&backend, "other").await;

        backend.send_message(&jobs, "body", 0).await.unwrap();

        assert_eq!(counts(&backend, &jobs).await.0, "1");
        assert_eq!(counts(&backend, &other).await.0, "0");
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_queue_not_found() {
        let backend = InMemoryBackend::default();
        let endpoint = QueueEndpoint::new("memory://missing".to_string()).unwrap();

        let result = backend.send_message(&endpoint, "body", 0).await;
        assert!(matches!(result, Err(QueueError::QueueNotFound { .. })));
    }

    #[tokio::test]
    async fn test_create_attributes_are_reported() {
        let backend = InMemoryBackend::default();
        let mut attrs = HashMap::new();
        attrs.insert(attributes::VISIBILITY_TIMEOUT.to_string(), "45".to_string());
        let endpoint = backend
            .create_queue(&QueueName::new("jobs".to_string()).unwrap(), &attrs)
            .await
            .unwrap();

        let reported = backend
            .get_queue_attributes(&endpoint, &[attributes::VISIBILITY_TIMEOUT.to_string()])
            .await
            .unwrap();

        assert_eq!(reported.len(), 1);
        assert_eq!(reported[attributes::VISIBILITY_TIMEOUT], "45");
    }

    #[tokio::test]
    async fn test_provider_name() {
        assert_eq!(InMemoryBackend::default().provider_name(), "InMemory");
    }
}

// ============================================================================
// Send Tests
// ============================================================================

mod send {
    use super::*;

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let backend = InMemoryBackend::new(InMemoryConfig {
            max_message_size: 8,
            ..InMemoryConfig::default()
        })
        .unwrap();
        let endpoint = create_queue(&backend, "jobs").await;

        let result = backend.send_message(&endpoint, "123456789", 0).await;
        assert!(matches!(
            result,
            Err(QueueError::MessageTooLarge { size: 9, max_size: 8 })
        ));
    }

    #[tokio::test]
    async fn test_delay_above_maximum_rejected() {
        let backend = InMemoryBackend::default();
        let endpoint = create_queue(&backend, "jobs").await;

        let result = backend.send_message(&endpoint, "body", 901).await;
        assert!(matches!(result, Err(QueueError::ProviderError { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_message_hidden_until_delay_elapses() {
        let backend = InMemoryBackend::default();
        let endpoint = create_queue(&backend, "jobs").await;
        backend.send_message(&endpoint, "later", 30).await.unwrap();

        let attrs = backend
            .get_queue_attributes(&endpoint, &[ALL_ATTRIBUTES.to_string()])
            .await
            .unwrap();
        assert_eq!(attrs[attributes::APPROXIMATE_NUMBER_OF_MESSAGES], "0");
        assert_eq!(attrs[APPROXIMATE_NUMBER_OF_MESSAGES_DELAYED], "1");

        let early = backend
            .receive_messages(&endpoint, &receive_request(1, 0, 30))
            .await
            .unwrap();
        assert!(early.is_empty());

        tokio::time::advance(Duration::from_secs(30)).await;

        let due = backend
            .receive_messages(&endpoint, &receive_request(1, 0, 30))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].body, "later");
    }
}

// ============================================================================
// Receive Tests
// ============================================================================

mod receive {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_received_message_is_hidden_for_visibility_window() {
        let backend = InMemoryBackend::default();
        let endpoint = create_queue(&backend, "jobs").await;
        backend.send_message(&endpoint, "work", 0).await.unwrap();

        let first = backend
            .receive_messages(&endpoint, &receive_request(1, 0, 30))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].attributes[attributes::APPROXIMATE_RECEIVE_COUNT], "1");
        assert_eq!(counts(&backend, &endpoint).await, ("0".into(), "1".into()));

        let hidden = backend
            .receive_messages(&endpoint, &receive_request(1, 0, 30))
            .await
            .unwrap();
        assert!(hidden.is_empty());

        tokio::time::advance(Duration::from_secs(30)).await;

        let again = backend
            .receive_messages(&endpoint, &receive_request(1, 0, 30))
            .await
            .unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].body, "work");
        assert_eq!(again[0].attributes[attributes::APPROXIMATE_RECEIVE_COUNT], "2");
        assert_ne!(again[0].receipt_handle, first[0].receipt_handle);
        assert_eq!(again[0].message_id, first[0].message_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_respects_batch_limit_and_order() {
        let backend = InMemoryBackend::default();
        let endpoint = create_queue(&backend, "jobs").await;
        for i in 0..12 {
            backend
                .send_message(&endpoint, &format!("m{}", i), 0)
                .await
                .unwrap();
        }

        let two = backend
            .receive_messages(&endpoint, &receive_request(2, 0, 30))
            .await
            .unwrap();
        assert_eq!(
            two.iter().map(|m| m.body.as_str()).collect::<Vec<_>>(),
            vec!["m0", "m1"]
        );

        let capped = backend
            .receive_messages(&endpoint, &receive_request(50, 0, 30))
            .await
            .unwrap();
        assert_eq!(capped.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attributes_only_when_requested() {
        let backend = InMemoryBackend::default();
        let endpoint = create_queue(&backend, "jobs").await;
        backend.send_message(&endpoint, "work", 0).await.unwrap();

        let request = ReceiveRequest {
            attribute_names: Vec::new(),
            ..receive_request(1, 0, 30)
        };
        let received = backend.receive_messages(&endpoint, &request).await.unwrap();

        assert_eq!(received.len(), 1);
        assert!(received[0].attributes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_poll_returns_empty_after_wait() {
        let backend = InMemoryBackend::default();
        let endpoint = create_queue(&backend, "jobs").await;

        let started = Instant::now();
        let received = backend
            .receive_messages(&endpoint, &receive_request(1, 5, 30))
            .await
            .unwrap();

        assert!(received.is_empty());
        assert_elapsed(started, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_poll_wait_is_capped() {
        let backend = InMemoryBackend::default();
        let endpoint = create_queue(&backend, "jobs").await;

        let started = Instant::now();
        backend
            .receive_messages(&endpoint, &receive_request(1, 120, 30))
            .await
            .unwrap();

        assert_elapsed(started, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_poll_wakes_on_send() {
        let backend = Arc::new(InMemoryBackend::default());
        let endpoint = create_queue(&backend, "jobs").await;

        let receiver = {
            let backend = Arc::clone(&backend);
            let endpoint = endpoint.clone();
            tokio::spawn(async move {
                backend
                    .receive_messages(&endpoint, &receive_request(1, 20, 30))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(3)).await;
        backend.send_message(&endpoint, "arrived", 0).await.unwrap();

        let received = receiver.await.unwrap().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].body, "arrived");
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_poll_picks_up_expiring_visibility() {
        let backend = InMemoryBackend::default();
        let endpoint = create_queue(&backend, "jobs").await;
        backend.send_message(&endpoint, "work", 0).await.unwrap();
        backend
            .receive_messages(&endpoint, &receive_request(1, 0, 5))
            .await
            .unwrap();

        let started = Instant::now();
        let received = backend
            .receive_messages(&endpoint, &receive_request(1, 20, 30))
            .await
            .unwrap();

        assert_eq!(received.len(), 1);
        assert_elapsed(started, 5);
    }

    #[tokio::test]
    async fn test_visibility_above_maximum_rejected() {
        let backend = InMemoryBackend::default();
        let endpoint = create_queue(&backend, "jobs").await;

        let result = backend
            .receive_messages(&endpoint, &receive_request(1, 0, 43_201))
            .await;
        assert!(matches!(result, Err(QueueError::ProviderError { .. })));
    }
}

// ============================================================================
// Handle Tests
// ============================================================================

mod handles {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_delete_removes_message() {
        let backend = InMemoryBackend::default();
        let endpoint = create_queue(&backend, "jobs").await;
        backend.send_message(&endpoint, "work", 0).await.unwrap();
        let received = backend
            .receive_messages(&endpoint, &receive_request(1, 0, 30))
            .await
            .unwrap();

        backend
            .delete_message(&endpoint, &received[0].receipt_handle)
            .await
            .unwrap();

        assert_eq!(counts(&backend, &endpoint).await, ("0".into(), "0".into()));
        let second = backend
            .delete_message(&endpoint, &received[0].receipt_handle)
            .await;
        assert!(matches!(second, Err(QueueError::MessageNotFound { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_goes_stale_after_visibility_expires() {
        let backend = InMemoryBackend::default();
        let endpoint = create_queue(&backend, "jobs").await;
        backend.send_message(&endpoint, "work", 0).await.unwrap();
        let received = backend
            .receive_messages(&endpoint, &receive_request(1, 0, 10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;

        let result = backend
            .delete_message(&endpoint, &received[0].receipt_handle)
            .await;
        assert!(result.unwrap_err().is_stale_handle());
        assert_eq!(counts(&backend, &endpoint).await.0, "1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_goes_stale_after_redelivery() {
        let backend = InMemoryBackend::default();
        let endpoint = create_queue(&backend, "jobs").await;
        backend.send_message(&endpoint, "work", 0).await.unwrap();
        let first = backend
            .receive_messages(&endpoint, &receive_request(1, 0, 10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        let second = backend
            .receive_messages(&endpoint, &receive_request(1, 0, 10))
            .await
            .unwrap();

        let stale = backend
            .change_message_visibility(&endpoint, &first[0].receipt_handle, 0)
            .await;
        assert!(matches!(stale, Err(QueueError::MessageNotFound { .. })));

        backend
            .delete_message(&endpoint, &second[0].receipt_handle)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_visibility_to_zero_makes_message_ready() {
        let backend = InMemoryBackend::default();
        let endpoint = create_queue(&backend, "jobs").await;
        backend.send_message(&endpoint, "work", 0).await.unwrap();
        let received = backend
            .receive_messages(&endpoint, &receive_request(1, 0, 300))
            .await
            .unwrap();

        backend
            .change_message_visibility(&endpoint, &received[0].receipt_handle, 0)
            .await
            .unwrap();

        assert_eq!(counts(&backend, &endpoint).await, ("1".into(), "0".into()));
        let again = backend
            .receive_messages(&endpoint, &receive_request(1, 0, 300))
            .await
            .unwrap();
        assert_eq!(again[0].attributes[attributes::APPROXIMATE_RECEIVE_COUNT], "2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_visibility_is_repeatable_while_in_flight() {
        let backend = InMemoryBackend::default();
        let endpoint = create_queue(&backend, "jobs").await;
        backend.send_message(&endpoint, "work", 0).await.unwrap();
        let received = backend
            .receive_messages(&endpoint, &receive_request(1, 0, 30))
            .await
            .unwrap();
        let handle = &received[0].receipt_handle;

        backend
            .change_message_visibility(&endpoint, handle, 120)
            .await
            .unwrap();
        backend
            .change_message_visibility(&endpoint, handle, 120)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(counts(&backend, &endpoint).await, ("0".into(), "1".into()));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(counts(&backend, &endpoint).await, ("1".into(), "0".into()));
    }
}

// ============================================================================
// Purge and Redrive Tests
// ============================================================================

mod purge_and_redrive {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_purge_removes_ready_and_in_flight_messages() {
        let backend = InMemoryBackend::default();
        let endpoint = create_queue(&backend, "jobs").await;
        for body in ["a", "b", "c"] {
            backend.send_message(&endpoint, body, 0).await.unwrap();
        }
        let received = backend
            .receive_messages(&endpoint, &receive_request(1, 0, 30))
            .await
            .unwrap();

        backend.purge_queue(&endpoint).await.unwrap();

        assert_eq!(counts(&backend, &endpoint).await, ("0".into(), "0".into()));
        let result = backend
            .delete_message(&endpoint, &received[0].receipt_handle)
            .await;
        assert!(matches!(result, Err(QueueError::MessageNotFound { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_moves_to_dead_letters_after_max_receives() {
        let backend = InMemoryBackend::new(InMemoryConfig {
            max_receive_count: Some(2),
            ..InMemoryConfig::default()
        })
        .unwrap();
        let endpoint = create_queue(&backend, "jobs").await;
        backend.send_message(&endpoint, "poison", 0).await.unwrap();

        for expected in ["1", "2"] {
            let received = backend
                .receive_messages(&endpoint, &receive_request(1, 0, 10))
                .await
                .unwrap();
            assert_eq!(
                received[0].attributes[attributes::APPROXIMATE_RECEIVE_COUNT],
                expected
            );
            tokio::time::advance(Duration::from_secs(10)).await;
        }

        let third = backend
            .receive_messages(&endpoint, &receive_request(1, 0, 10))
            .await
            .unwrap();

        assert!(third.is_empty());
        assert_eq!(backend.dead_letters(&endpoint).unwrap(), vec!["poison"]);
        assert_eq!(counts(&backend, &endpoint).await, ("0".into(), "0".into()));
    }
}
