//! Contract tests for the queue client over the in-process transport.

use leaseq::error::Error;
use leaseq::queue::{ClientOptions, DequeueOptions, EnqueueOptions, WorkQueueClient};
use leaseq::retry::RetryPolicy;
use leaseq::transport::memory::MemoryTransport;
use leaseq::transport::{PutOptions, Transport};
use serde_json::{Value, json};
use std::time::Duration;

fn fast_options() -> ClientOptions {
    ClientOptions {
        retry: RetryPolicy {
            attempts: 3,
            backoff_unit: Duration::ZERO,
            backoff_floor: Duration::ZERO,
        },
        default_lease: Duration::from_secs(60),
        poll_interval: Duration::from_millis(20),
        ..ClientOptions::default()
    }
}

async fn client_on(transport: &MemoryTransport) -> WorkQueueClient<MemoryTransport> {
    WorkQueueClient::connect(transport.clone(), fast_options())
        .await
        .unwrap()
}

async fn fresh_client() -> (WorkQueueClient<MemoryTransport>, MemoryTransport) {
    let transport = MemoryTransport::new("test");
    (client_on(&transport).await, transport)
}

fn nowait_with_lease(lease: Duration) -> DequeueOptions {
    DequeueOptions {
        block: false,
        timeout: None,
        lease_duration: Some(lease),
    }
}

// ---------------------------------------------------------------------------
// Basic lifecycle: enqueue → dequeue → acknowledge
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enqueue_then_dequeue_round_trips() {
    let (mut client, _transport) = fresh_client().await;

    client.enqueue(&json!({"job": 1})).await.unwrap();
    let value = client.dequeue_nowait().await.unwrap();
    assert_eq!(value, json!({"job": 1}));

    client.acknowledge().await.unwrap();
    assert_eq!(client.approximate_size().await.unwrap(), 0);
    assert!(client.is_empty().await.unwrap());
}

#[tokio::test]
async fn dequeue_nowait_on_empty_queue_is_empty() {
    let (mut client, _transport) = fresh_client().await;
    assert!(matches!(client.dequeue_nowait().await, Err(Error::Empty)));
}

#[tokio::test]
async fn acknowledge_twice_fails_the_second_time() {
    let (mut client, _transport) = fresh_client().await;

    client.enqueue(&json!({"job": 1})).await.unwrap();
    client.dequeue_nowait().await.unwrap();

    client.acknowledge().await.unwrap();
    assert!(matches!(
        client.acknowledge().await,
        Err(Error::NoActiveLease)
    ));
}

#[tokio::test]
async fn lease_operations_without_a_lease_fail_fast() {
    let (mut client, _transport) = fresh_client().await;

    assert!(matches!(
        client.acknowledge().await,
        Err(Error::NoActiveLease)
    ));
    assert!(matches!(
        client.extend_lease().await,
        Err(Error::NoActiveLease)
    ));
    assert!(matches!(client.release().await, Err(Error::NoActiveLease)));
}

#[tokio::test]
async fn dequeue_while_a_lease_is_held_fails_fast() {
    let (mut client, _transport) = fresh_client().await;

    client.enqueue(&json!(1)).await.unwrap();
    client.enqueue(&json!(2)).await.unwrap();
    client.dequeue_nowait().await.unwrap();

    assert!(matches!(
        client.dequeue_nowait().await,
        Err(Error::LeaseAlreadyHeld)
    ));

    // Resolving the lease makes dequeue legal again.
    client.acknowledge().await.unwrap();
    client.dequeue_nowait().await.unwrap();
    client.acknowledge().await.unwrap();
}

#[tokio::test]
async fn current_lease_tracks_the_open_claim() {
    let (mut client, _transport) = fresh_client().await;
    assert!(client.current_lease().is_none());

    client.enqueue(&json!({"job": 1})).await.unwrap();
    client.dequeue_nowait().await.unwrap();

    let lease = client.current_lease().unwrap();
    assert_eq!(lease.delivery_count, 1);
    assert!(lease.deadline.is_some());

    client.acknowledge().await.unwrap();
    assert!(client.current_lease().is_none());
}

// ---------------------------------------------------------------------------
// Release, lease expiry, and extension
// ---------------------------------------------------------------------------

#[tokio::test]
async fn release_returns_the_message_to_ready() {
    let (mut client, _transport) = fresh_client().await;

    client.enqueue(&json!({"job": 1})).await.unwrap();
    client.dequeue_nowait().await.unwrap();
    client.release().await.unwrap();

    let value = client.dequeue_nowait().await.unwrap();
    assert_eq!(value, json!({"job": 1}));
}

#[tokio::test]
async fn release_with_delay_defers_redelivery() {
    let (mut client, _transport) = fresh_client().await;

    client.enqueue(&json!({"job": 1})).await.unwrap();
    client.dequeue_nowait().await.unwrap();
    client
        .release_with(Duration::from_millis(300), leaseq::transport::DEFAULT_PRIORITY)
        .await
        .unwrap();

    assert!(matches!(client.dequeue_nowait().await, Err(Error::Empty)));

    tokio::time::sleep(Duration::from_millis(350)).await;
    let value = client.dequeue_nowait().await.unwrap();
    assert_eq!(value, json!({"job": 1}));
}

#[tokio::test]
async fn expired_lease_is_redelivered_to_another_client() {
    let transport = MemoryTransport::new("test");
    let mut first = client_on(&transport).await;
    let mut second = client_on(&transport).await;

    first.enqueue(&json!({"job": 7})).await.unwrap();
    first
        .dequeue_with(nowait_with_lease(Duration::from_millis(50)))
        .await
        .unwrap();

    // Still leased: invisible to the second worker.
    assert!(matches!(second.dequeue_nowait().await, Err(Error::Empty)));

    tokio::time::sleep(Duration::from_millis(80)).await;
    let value = second.dequeue_nowait().await.unwrap();
    assert_eq!(value, json!({"job": 7}));
    assert_eq!(second.current_lease().unwrap().delivery_count, 2);
}

#[tokio::test]
async fn extend_lease_defers_redelivery() {
    let transport = MemoryTransport::new("test");
    let mut first = client_on(&transport).await;
    let mut second = client_on(&transport).await;

    first.enqueue(&json!({"job": 1})).await.unwrap();
    first
        .dequeue_with(nowait_with_lease(Duration::from_millis(80)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(40)).await;
    first
        .extend_lease_for(Duration::from_millis(300))
        .await
        .unwrap();

    // Past the original deadline, but the extension holds.
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(matches!(second.dequeue_nowait().await, Err(Error::Empty)));

    first.acknowledge().await.unwrap();
}

// ---------------------------------------------------------------------------
// Blocking and bounded dequeue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn blocking_dequeue_picks_up_a_late_arrival() {
    let transport = MemoryTransport::new("test");
    let mut consumer = client_on(&transport).await;

    let producer_transport = transport.clone();
    let producer = tokio::spawn(async move {
        let mut producer =
            WorkQueueClient::connect(producer_transport, fast_options()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        producer.enqueue(&json!({"job": "late"})).await.unwrap();
    });

    let value = consumer
        .dequeue_with(DequeueOptions {
            block: true,
            timeout: Some(Duration::from_secs(2)),
            lease_duration: None,
        })
        .await
        .unwrap();
    assert_eq!(value, json!({"job": "late"}));
    producer.await.unwrap();
}

#[tokio::test]
async fn bounded_blocking_dequeue_times_out_empty() {
    let (mut client, _transport) = fresh_client().await;

    let started = std::time::Instant::now();
    let result = client
        .dequeue_with(DequeueOptions {
            block: true,
            timeout: Some(Duration::from_millis(100)),
            lease_duration: None,
        })
        .await;
    assert!(matches!(result, Err(Error::Empty)));
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn zero_timeout_means_try_once() {
    let (mut client, _transport) = fresh_client().await;

    let result = client
        .dequeue_with(DequeueOptions {
            block: true,
            timeout: Some(Duration::ZERO),
            lease_duration: None,
        })
        .await;
    assert!(matches!(result, Err(Error::Empty)));
}

// ---------------------------------------------------------------------------
// Invalid call shapes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timeout_above_the_backend_maximum_is_invalid() {
    let (mut client, _transport) = fresh_client().await;

    // The in-process transport caps its native wait at 20 seconds.
    let result = client
        .dequeue_with(DequeueOptions {
            block: true,
            timeout: Some(Duration::from_secs(30)),
            lease_duration: None,
        })
        .await;
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[tokio::test]
async fn nonblocking_dequeue_with_timeout_is_invalid() {
    let (mut client, _transport) = fresh_client().await;

    let result = client
        .dequeue_with(DequeueOptions {
            block: false,
            timeout: Some(Duration::from_secs(1)),
            lease_duration: None,
        })
        .await;
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[tokio::test]
async fn enqueue_with_nondefault_wait_shape_is_invalid() {
    let (mut client, _transport) = fresh_client().await;

    let nonblocking = EnqueueOptions {
        block: false,
        ..EnqueueOptions::default()
    };
    assert!(matches!(
        client.enqueue_with(&json!(1), nonblocking).await,
        Err(Error::InvalidArgument(_))
    ));

    let timed = EnqueueOptions {
        timeout: Some(Duration::from_secs(1)),
        ..EnqueueOptions::default()
    };
    assert!(matches!(
        client.enqueue_with(&json!(1), timed).await,
        Err(Error::InvalidArgument(_))
    ));
}

// ---------------------------------------------------------------------------
// Codec policy at the client boundary
// ---------------------------------------------------------------------------

#[tokio::test]
async fn oversized_payload_is_rejected_before_the_transport() {
    let transport = MemoryTransport::new("test");
    let options = ClientOptions {
        max_payload_bytes: 16,
        ..fast_options()
    };
    let mut client = WorkQueueClient::connect(transport, options).await.unwrap();

    let result = client
        .enqueue(&json!({"far": "beyond sixteen bytes"}))
        .await;
    assert!(matches!(result, Err(Error::Serialization(_))));
    assert_eq!(client.approximate_size().await.unwrap(), 0);
}

#[tokio::test]
async fn undecodable_body_comes_back_raw() {
    let (mut client, transport) = fresh_client().await;

    // Inject a malformed body under the client's codec.
    let mut raw = transport.clone();
    raw.put("not json {", &PutOptions::default()).await.unwrap();

    let value = client.dequeue_nowait().await.unwrap();
    assert_eq!(value, Value::String("not json {".to_string()));
    client.acknowledge().await.unwrap();
}

// ---------------------------------------------------------------------------
// Ordering, delay, drain, and size accounting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lower_priority_value_is_delivered_first() {
    let (mut client, _transport) = fresh_client().await;

    client
        .enqueue_with(
            &json!("background"),
            EnqueueOptions {
                priority: 5000,
                ..EnqueueOptions::default()
            },
        )
        .await
        .unwrap();
    client
        .enqueue_with(
            &json!("urgent"),
            EnqueueOptions {
                priority: 1,
                ..EnqueueOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(client.dequeue_nowait().await.unwrap(), json!("urgent"));
    client.acknowledge().await.unwrap();
    assert_eq!(client.dequeue_nowait().await.unwrap(), json!("background"));
    client.acknowledge().await.unwrap();
}

#[tokio::test]
async fn delayed_enqueue_is_invisible_until_due() {
    let (mut client, _transport) = fresh_client().await;

    client
        .enqueue_with(
            &json!({"job": "later"}),
            EnqueueOptions {
                delay: Duration::from_millis(200),
                ..EnqueueOptions::default()
            },
        )
        .await
        .unwrap();

    assert!(matches!(client.dequeue_nowait().await, Err(Error::Empty)));

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(
        client.dequeue_nowait().await.unwrap(),
        json!({"job": "later"})
    );
}

#[tokio::test]
async fn drain_acknowledges_everything() {
    let (mut client, _transport) = fresh_client().await;

    for n in 0..3 {
        client.enqueue(&json!({"job": n})).await.unwrap();
    }

    assert_eq!(client.drain().await.unwrap(), 3);
    assert_eq!(client.approximate_size().await.unwrap(), 0);
    assert_eq!(client.drain().await.unwrap(), 0);
}

#[tokio::test]
async fn size_counts_ready_reserved_and_delayed() {
    let (mut client, _transport) = fresh_client().await;

    client.enqueue(&json!(1)).await.unwrap();
    client.enqueue(&json!(2)).await.unwrap();
    client
        .enqueue_with(
            &json!(3),
            EnqueueOptions {
                delay: Duration::from_secs(5),
                ..EnqueueOptions::default()
            },
        )
        .await
        .unwrap();
    client.dequeue_nowait().await.unwrap();

    // One reserved, one ready, one delayed.
    assert_eq!(client.approximate_size().await.unwrap(), 3);
    assert!(!client.is_empty().await.unwrap());
}
