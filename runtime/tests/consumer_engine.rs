//! Integration tests for the message consumption engine
//!
//! Drives a `ConsumptionEngine` over an in-memory source and checks delivery
//! order, failure isolation, late registration and the shutdown paths.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;
use user_service_core::{
    Context, ContextError, ContextProvider, Delivery, Message, SourceError, SubscriberResult,
};
use user_service_runtime::{ConsumptionEngine, TeardownError};
use user_service_testing::InMemorySource;

// ============================================================================
// Test Fixtures
// ============================================================================

type Log = Arc<Mutex<Vec<String>>>;

/// Subscriber that appends `name(key)` or `name!error` to `log`.
fn recorder(
    name: &'static str,
    log: &Log,
) -> impl Fn(Delivery<'_>) -> SubscriberResult + Send + Sync + 'static {
    let log = Arc::clone(log);
    move |delivery| {
        let entry = match delivery {
            Ok(msg) => format!("{name}({})", msg.key_str()),
            Err(e) => format!("{name}!{e}"),
        };
        log.lock().unwrap().push(entry);
        Ok(())
    }
}

fn engine_over(source: &InMemorySource) -> ConsumptionEngine<InMemorySource> {
    ConsumptionEngine::new(source.clone(), ContextProvider::background())
}

async fn wait_for_iterations(engine: &ConsumptionEngine<InMemorySource>, count: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while engine.iterations() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("engine did not reach the expected iteration count");
}

async fn shut_down(engine: &ConsumptionEngine<InMemorySource>) {
    assert_ok!(
        engine
            .close(&Context::with_timeout(Duration::from_secs(1)))
            .await
    );
    assert_ok!(tokio::time::timeout(Duration::from_secs(1), engine.wait_stopped()).await);
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test]
async fn delivers_to_subscribers_in_registration_order() {
    let source = InMemorySource::new();
    let log = Log::default();
    let engine = engine_over(&source);

    engine.subscribe(recorder("A", &log));
    engine.subscribe(recorder("B", &log));
    engine.subscribe(recorder("C", &log));

    source.push(Message::new("M", ""));
    wait_for_iterations(&engine, 1).await;

    assert_eq!(*log.lock().unwrap(), ["A(M)", "B(M)", "C(M)"]);
    shut_down(&engine).await;
}

#[tokio::test]
async fn subscribing_twice_launches_one_loop() {
    let source = InMemorySource::new();
    let engine = engine_over(&source);

    engine.subscribe(|_| Ok(()));
    engine.subscribe(|_| Ok(()));
    assert!(!engine.start());

    assert_eq!(engine.runs(), 1);
    assert!(engine.is_running());

    assert!(engine.stop());
    assert!(!engine.stop());
    shut_down(&engine).await;
    assert_eq!(engine.runs(), 1);
}

#[tokio::test]
async fn panicking_subscriber_does_not_affect_siblings_or_loop() {
    let source = InMemorySource::new();
    let log = Log::default();
    let engine = engine_over(&source);

    engine.subscribe(recorder("A", &log));
    let b_log = Arc::clone(&log);
    engine.subscribe(move |delivery| {
        let msg = delivery.unwrap();
        if msg.key == b"M" {
            panic!("B cannot handle M");
        }
        b_log.lock().unwrap().push(format!("B({})", msg.key_str()));
        Ok(())
    });
    engine.subscribe(recorder("C", &log));

    source.push(Message::new("M", ""));
    source.push(Message::new("M+1", ""));
    wait_for_iterations(&engine, 2).await;

    assert_eq!(
        *log.lock().unwrap(),
        ["A(M)", "C(M)", "A(M+1)", "B(M+1)", "C(M+1)"]
    );
    assert!(engine.is_running());
    shut_down(&engine).await;
}

#[tokio::test]
async fn read_errors_are_broadcast_not_retried() {
    let source = InMemorySource::new();
    let log = Log::default();
    let engine = engine_over(&source);
    engine.subscribe(recorder("A", &log));

    source.push_error(SourceError::ReadFailed("broker hiccup".to_string()));
    source.push(Message::new("after", ""));
    wait_for_iterations(&engine, 2).await;

    assert_eq!(
        *log.lock().unwrap(),
        ["A!Read failed: broker hiccup", "A(after)"]
    );
    shut_down(&engine).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn late_subscriber_only_sees_later_messages() {
    let source = InMemorySource::new();
    let log = Log::default();
    let engine = Arc::new(engine_over(&source));
    let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel();

    let slow_log = Arc::clone(&log);
    engine.subscribe(move |delivery| {
        let key = delivery.unwrap().key_str().into_owned();
        if key == "M" {
            started_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(150));
        }
        slow_log.lock().unwrap().push(format!("A({key})"));
        Ok(())
    });

    source.push(Message::new("M", ""));
    started_rx.recv().await.unwrap();

    // Registration blocks until the in-flight broadcast releases the registry.
    let late = {
        let engine = Arc::clone(&engine);
        let log = Arc::clone(&log);
        tokio::task::spawn_blocking(move || engine.subscribe(recorder("Late", &log)))
    };
    late.await.unwrap();

    source.push(Message::new("M+1", ""));
    wait_for_iterations(&engine, 2).await;

    assert_eq!(*log.lock().unwrap(), ["A(M)", "A(M+1)", "Late(M+1)"]);
    shut_down(&engine).await;
}

// ============================================================================
// Stop and close
// ============================================================================

#[tokio::test]
async fn stop_does_not_interrupt_an_in_flight_read() {
    let source = InMemorySource::new();
    let log = Log::default();
    let engine = engine_over(&source);
    engine.subscribe(recorder("A", &log));

    tokio::time::sleep(Duration::from_millis(20)).await;
    engine.stop();

    let early = tokio::time::timeout(Duration::from_millis(100), engine.wait_stopped()).await;
    assert!(early.is_err(), "loop exited while its read was still blocked");

    source.push(Message::new("last", ""));
    tokio::time::timeout(Duration::from_secs(1), engine.wait_stopped())
        .await
        .unwrap();

    assert_eq!(*log.lock().unwrap(), ["A(last)"]);
    assert_eq!(source.reads(), 1);
}

#[tokio::test]
async fn close_without_stop_keeps_broadcasting_closed_errors() {
    let source = InMemorySource::new();
    let log = Log::default();
    let engine = engine_over(&source);
    engine.subscribe(recorder("A", &log));

    engine
        .close_only(&Context::with_timeout(Duration::from_secs(1)))
        .await
        .unwrap();
    wait_for_iterations(&engine, 3).await;

    assert!(engine.is_running());
    {
        let log = log.lock().unwrap();
        assert!(log.len() >= 3);
        assert!(log.iter().all(|entry| entry == "A!Source closed"));
    }

    engine.stop();
    tokio::time::timeout(Duration::from_secs(1), engine.wait_stopped())
        .await
        .unwrap();
}

#[tokio::test]
async fn close_stops_the_loop() {
    let source = InMemorySource::new();
    let log = Log::default();
    let engine = engine_over(&source);
    engine.subscribe(recorder("A", &log));
    tokio::time::sleep(Duration::from_millis(20)).await;

    engine
        .close(&Context::with_timeout(Duration::from_secs(1)))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(1), engine.wait_stopped())
        .await
        .unwrap();

    assert!(!engine.is_running());
    assert!(source.is_closed());
    // The read blocked at close time ends with a single Closed delivery.
    assert!(log.lock().unwrap().len() <= 1);
}

#[tokio::test]
async fn slow_close_is_bounded_by_its_context() {
    let source = InMemorySource::new().with_close_delay(Duration::from_millis(400));
    let engine = engine_over(&source);
    engine.subscribe(|_| Ok(()));

    let started = std::time::Instant::now();
    let result = engine
        .close(&Context::with_timeout(Duration::from_millis(50)))
        .await;

    assert!(matches!(result, Err(TeardownError::DeadlineExceeded)));
    assert!(started.elapsed() < Duration::from_millis(300));
    assert!(!source.is_closed());

    // The abandoned close still completes in the background.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(source.is_closed());
    tokio::time::timeout(Duration::from_secs(1), engine.wait_stopped())
        .await
        .unwrap();
}

#[tokio::test]
async fn external_token_cancels_an_in_flight_read() {
    let source = InMemorySource::new();
    let log = Log::default();
    let shutdown = CancellationToken::new();
    let engine = ConsumptionEngine::new(
        source.clone(),
        ContextProvider::cancel_with(shutdown.clone()),
    );
    engine.subscribe(recorder("A", &log));
    tokio::time::sleep(Duration::from_millis(20)).await;

    engine.stop();
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), engine.wait_stopped())
        .await
        .unwrap();

    let expected = format!("A!{}", ContextError::Cancelled);
    assert_eq!(*log.lock().unwrap(), [expected]);
}
