//! Integration tests for graceful-daemon.

use graceful_daemon::{
    Config, ContextError, Daemon, LogLevel, Platform, Result, ShutdownCallback, ShutdownReason,
    Signal, CANCEL_CTX,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Platform that hands out the signal sender and records exit codes.
#[derive(Clone, Default)]
struct FakePlatform {
    sender: Arc<Mutex<Option<mpsc::Sender<Signal>>>>,
    subscribed: Arc<Mutex<Vec<Signal>>>,
    stopped: Arc<AtomicUsize>,
    exits: Arc<Mutex<Vec<i32>>>,
}

impl FakePlatform {
    async fn send(&self, signal: Signal) {
        let tx = self.sender.lock().clone().expect("signal_notify was not called");
        tx.send(signal).await.expect("primary loop stopped draining");
    }
}

impl Platform for FakePlatform {
    fn signal_notify(&self, tx: mpsc::Sender<Signal>, signals: &[Signal]) -> Result<()> {
        *self.sender.lock() = Some(tx);
        self.subscribed.lock().extend_from_slice(signals);
        Ok(())
    }

    fn signal_stop(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }

    fn exit(&self, code: i32) {
        self.exits.lock().push(code);
    }
}

type Log = Arc<Mutex<Vec<&'static str>>>;

fn recorder(log: &Log, name: &'static str) -> ShutdownCallback {
    let log = Arc::clone(log);
    ShutdownCallback::from_fn(move |_| log.lock().push(name))
}

fn start(platform: &FakePlatform) -> Daemon {
    Daemon::builder(CancellationToken::new())
        .with_platform(platform.clone())
        .start()
}

#[tokio::test]
async fn test_signal_triggers_graceful_shutdown() {
    let test_result = timeout(TEST_TIMEOUT, async {
        let platform = FakePlatform::default();
        let daemon = start(&platform);
        let log = Log::default();
        daemon.on_shut_down([recorder(&log, "close")]);

        platform.send(Signal::Terminate).await;
        daemon.wait().await;

        assert_eq!(*log.lock(), ["close"]);
        assert!(daemon.context().is_cancelled());
        assert_eq!(
            daemon.shutdown_reason(),
            Some(ShutdownReason::Signal(Signal::Terminate))
        );
        assert!(platform.exits.lock().is_empty());
    })
    .await;

    assert!(test_result.is_ok(), "Test timed out after 5 seconds");
}

#[tokio::test]
async fn test_default_signal_set_is_subscribed() {
    let platform = FakePlatform::default();
    let daemon = start(&platform);

    assert_eq!(*platform.subscribed.lock(), Config::default().signals);

    daemon.shut_down();
    timeout(TEST_TIMEOUT, daemon.wait()).await.unwrap();
}

#[tokio::test]
async fn test_fatal_error_triggers_shutdown() {
    let test_result = timeout(TEST_TIMEOUT, async {
        let platform = FakePlatform::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hook_seen = Arc::clone(&seen);
        let daemon = Daemon::builder(CancellationToken::new())
            .with_platform(platform.clone())
            .with_log_fatal_error(move |err| hook_seen.lock().push(err.to_string()))
            .start();

        daemon
            .fatal_errors_channel()
            .send("database connection lost".into())
            .await
            .unwrap();
        daemon.wait().await;

        assert_eq!(*seen.lock(), ["database connection lost"]);
        assert_eq!(daemon.shutdown_reason(), Some(ShutdownReason::FatalError));
    })
    .await;

    assert!(test_result.is_ok(), "Test timed out after 5 seconds");
}

#[tokio::test]
async fn test_parent_cancellation_triggers_shutdown() {
    let test_result = timeout(TEST_TIMEOUT, async {
        let parent = CancellationToken::new();
        let daemon = Daemon::builder(parent.clone())
            .with_platform(FakePlatform::default())
            .start();
        let log = Log::default();
        daemon.on_shut_down([recorder(&log, "never")]);

        parent.cancel();
        daemon.wait().await;

        // The shutdown context derives from the cancelled parent, so nothing runs.
        assert!(log.lock().is_empty());
        assert!(daemon.context().is_cancelled());
        assert_eq!(daemon.shutdown_reason(), Some(ShutdownReason::ParentCancelled));
        assert_eq!(daemon.sequence_report().unwrap().skipped, 1);
    })
    .await;

    assert!(test_result.is_ok(), "Test timed out after 5 seconds");
}

#[tokio::test]
async fn test_repeated_triggers_run_sequence_once() {
    let test_result = timeout(TEST_TIMEOUT, async {
        let platform = FakePlatform::default();
        let daemon = start(&platform);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let release = CancellationToken::new();
        let stuck = release.clone();
        daemon.on_shut_down([ShutdownCallback::new(move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            stuck.cancelled().await;
        })]);

        daemon.shut_down();
        daemon.shut_down();
        let clone = daemon.clone();
        tokio::spawn(async move { clone.shut_down() }).await.unwrap();
        daemon.fatal_errors_channel().send("late".into()).await.unwrap();
        platform.send(Signal::Interrupt).await;
        assert!(!daemon.is_done());

        release.cancel();
        daemon.wait().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(daemon.shutdown_reason(), Some(ShutdownReason::Requested));
    })
    .await;

    assert!(test_result.is_ok(), "Test timed out after 5 seconds");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_shut_down_runs_sequence_once() {
    let test_result = timeout(TEST_TIMEOUT, async {
        let daemon = start(&FakePlatform::default());
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        daemon.on_shut_down([ShutdownCallback::from_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })]);

        let barrier = Arc::new(tokio::sync::Barrier::new(8));
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let daemon = daemon.clone();
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    daemon.shut_down();
                })
            })
            .collect();

        let threads_barrier = Arc::new(std::sync::Barrier::new(4));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let daemon = daemon.clone();
                let barrier = Arc::clone(&threads_barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    daemon.shut_down();
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        for thread in threads {
            thread.join().unwrap();
        }

        daemon.wait().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(daemon.shutdown_reason(), Some(ShutdownReason::Requested));
        assert_eq!(daemon.sequence_report().unwrap().executed, 1);
    })
    .await;

    assert!(test_result.is_ok(), "Test timed out after 5 seconds");
}

#[tokio::test]
async fn test_append_order_law() {
    let daemon = start(&FakePlatform::default());
    let log = Log::default();

    daemon.on_shut_down([recorder(&log, "a"), recorder(&log, "b")]);
    daemon.on_shut_down([recorder(&log, "c"), recorder(&log, "d")]);

    daemon.shut_down();
    timeout(TEST_TIMEOUT, daemon.wait()).await.unwrap();
    assert_eq!(*log.lock(), ["a", "b", "c", "d"]);
}

#[tokio::test]
async fn test_stack_order_law() {
    let daemon = start(&FakePlatform::default());
    let log = Log::default();

    daemon.defer([recorder(&log, "a"), recorder(&log, "b"), recorder(&log, "c")]);
    daemon.defer([recorder(&log, "d"), recorder(&log, "e")]);

    daemon.shut_down();
    timeout(TEST_TIMEOUT, daemon.wait()).await.unwrap();
    assert_eq!(*log.lock(), ["e", "d", "c", "b", "a"]);
}

#[tokio::test]
async fn test_deadline_skips_remaining_callbacks() {
    let test_result = timeout(TEST_TIMEOUT, async {
        let daemon = Daemon::builder(CancellationToken::new())
            .with_platform(FakePlatform::default())
            .with_shutdown_grace_duration(Duration::from_millis(10))
            .start();
        let log = Log::default();
        let observed = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&observed);

        daemon.on_shut_down([
            recorder(&log, "before"),
            ShutdownCallback::new(move |ctx| async move {
                tokio::time::sleep(Duration::from_millis(80)).await;
                *slot.lock() = ctx.err();
            }),
            recorder(&log, "second"),
            recorder(&log, "third"),
        ]);

        daemon.shut_down();
        daemon.wait().await;

        assert_eq!(*log.lock(), ["before"]);
        assert_eq!(*observed.lock(), Some(ContextError::DeadlineExceeded));
        let report = daemon.sequence_report().unwrap();
        assert_eq!(report.executed, 2);
        assert_eq!(report.skipped, 2);
        assert!(daemon.context().is_cancelled());
    })
    .await;

    assert!(test_result.is_ok(), "Test timed out after 5 seconds");
}

#[tokio::test]
async fn test_cancel_marker_law() {
    let daemon = start(&FakePlatform::default());
    let ctx = daemon.context();
    let before_ctx = ctx.clone();
    let after_ctx = ctx.clone();
    let states = Arc::new(Mutex::new(Vec::new()));
    let before_states = Arc::clone(&states);
    let after_states = Arc::clone(&states);

    daemon.on_shut_down([
        ShutdownCallback::from_fn(move |_| before_states.lock().push(before_ctx.is_cancelled())),
        CANCEL_CTX,
        ShutdownCallback::from_fn(move |_| after_states.lock().push(after_ctx.is_cancelled())),
    ]);

    daemon.shut_down();
    timeout(TEST_TIMEOUT, daemon.wait()).await.unwrap();
    assert_eq!(*states.lock(), [false, true]);
}

#[tokio::test]
async fn test_context_cancelled_after_last_callback_without_marker() {
    let daemon = start(&FakePlatform::default());
    let ctx = daemon.context();
    let seen = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&seen);

    daemon.defer([ShutdownCallback::from_fn(move |_| {
        *slot.lock() = Some(ctx.is_cancelled());
    })]);

    daemon.shut_down();
    timeout(TEST_TIMEOUT, daemon.wait()).await.unwrap();
    assert_eq!(*seen.lock(), Some(false));
    assert!(daemon.context().is_cancelled());
}

#[tokio::test]
async fn test_escalation_terminates_immediately() {
    let test_result = timeout(TEST_TIMEOUT, async {
        let platform = FakePlatform::default();
        let release = CancellationToken::new();
        let exit_release = release.clone();
        let exits = Arc::new(Mutex::new(Vec::new()));
        let exit_codes = Arc::clone(&exits);

        let daemon = Daemon::builder(CancellationToken::new())
            .with_platform(platform.clone())
            .with_max_signal_count(2)
            .with_exit_fn(move |code| {
                exit_codes.lock().push(code);
                exit_release.cancel();
            })
            .start();

        let entered = CancellationToken::new();
        let callback_entered = entered.clone();
        daemon.on_shut_down([ShutdownCallback::new(move |_| async move {
            callback_entered.cancel();
            // Stuck until the process would have been terminated.
            release.cancelled().await;
        })]);

        platform.send(Signal::Interrupt).await;
        entered.cancelled().await;
        assert!(exits.lock().is_empty());

        platform.send(Signal::Interrupt).await;
        daemon.wait().await;

        assert_eq!(*exits.lock(), [2]);
        assert!(platform.exits.lock().is_empty());
    })
    .await;

    assert!(test_result.is_ok(), "Test timed out after 5 seconds");
}

#[tokio::test]
async fn test_escalation_disabled_by_default() {
    let test_result = timeout(TEST_TIMEOUT, async {
        let platform = FakePlatform::default();
        let daemon = start(&platform);
        let release = CancellationToken::new();
        let stuck = release.clone();
        daemon.on_shut_down([ShutdownCallback::new(move |_| async move {
            stuck.cancelled().await;
        })]);

        for _ in 0..5 {
            platform.send(Signal::Interrupt).await;
        }
        assert!(platform.exits.lock().is_empty());

        release.cancel();
        daemon.wait().await;
        assert!(platform.exits.lock().is_empty());
    })
    .await;

    assert!(test_result.is_ok(), "Test timed out after 5 seconds");
}

#[tokio::test]
async fn test_default_exit_goes_through_platform() {
    let test_result = timeout(TEST_TIMEOUT, async {
        let platform = FakePlatform::default();
        let daemon = Daemon::builder(CancellationToken::new())
            .with_platform(platform.clone())
            .with_max_signal_count(1)
            .start();

        platform.send(Signal::Quit).await;
        daemon.wait().await;

        assert_eq!(*platform.exits.lock(), [2]);
    })
    .await;

    assert!(test_result.is_ok(), "Test timed out after 5 seconds");
}

#[tokio::test]
async fn test_signal_stop_after_completion() {
    let platform = FakePlatform::default();
    let daemon = start(&platform);

    daemon.shut_down();
    timeout(TEST_TIMEOUT, daemon.wait()).await.unwrap();

    timeout(TEST_TIMEOUT, async {
        while platform.stopped.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("signal_stop was never called");
}

#[tokio::test]
async fn test_late_registration_is_rejected() {
    let daemon = start(&FakePlatform::default());
    daemon.shut_down();
    timeout(TEST_TIMEOUT, daemon.wait()).await.unwrap();

    assert!(!daemon.on_shut_down([ShutdownCallback::from_fn(|_| {})]));
    assert!(!daemon.defer([CANCEL_CTX]));
}

#[tokio::test]
async fn test_signal_hook_and_custom_config() {
    let test_result = timeout(TEST_TIMEOUT, async {
        let platform = FakePlatform::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hook_seen = Arc::clone(&seen);
        let config = Config::builder()
            .name("test-daemon")
            .signals([Signal::Hangup])
            .fatal_errors_channel_buffer_size(0)
            .log_level(LogLevel::Error)
            .build()
            .unwrap();

        let daemon = Daemon::builder(CancellationToken::new())
            .with_config(config)
            .with_platform(platform.clone())
            .with_log_signal(move |signal| hook_seen.lock().push(signal))
            .with_span(tracing::info_span!("custom"))
            .start();

        assert_eq!(daemon.config().name, "test-daemon");
        assert_eq!(*platform.subscribed.lock(), [Signal::Hangup]);
        assert_eq!(daemon.fatal_errors_channel().max_capacity(), 1);

        platform.send(Signal::Hangup).await;
        daemon.wait().await;
        assert_eq!(*seen.lock(), [Signal::Hangup]);
    })
    .await;

    assert!(test_result.is_ok(), "Test timed out after 5 seconds");
}

#[tokio::test]
async fn test_wait_from_many_tasks() {
    let daemon = start(&FakePlatform::default());
    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let daemon = daemon.clone();
            tokio::spawn(async move { daemon.wait().await })
        })
        .collect();

    daemon.shut_down();
    for waiter in waiters {
        timeout(TEST_TIMEOUT, waiter).await.unwrap().unwrap();
    }
    assert!(daemon.is_done());
}
