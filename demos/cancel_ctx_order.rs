//! Placing `CANCEL_CTX` in a deferred teardown list.
//!
//! The worker pool keeps writing to the store until the daemon context is
//! cancelled, so the store must close only after that point:
//!
//! 1. stop accepting new jobs (context still live, workers finish queued work)
//! 2. cancel the daemon context (workers exit)
//! 3. close the store
//!
//! Run with `cargo run --example cancel_ctx_order` and press Ctrl+C.

use graceful_daemon::{Daemon, ShutdownCallback, CANCEL_CTX};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Default)]
struct Store {
    rows: Mutex<Vec<u64>>,
    closed: AtomicBool,
}

impl Store {
    fn insert(&self, row: u64) {
        if self.closed.load(Ordering::Acquire) {
            tracing::error!(row, "Write after close");
            return;
        }
        self.rows.lock().push(row);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        info!(rows = self.rows.lock().len(), "Store closed");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().compact().init();

    let daemon = Daemon::builder(CancellationToken::new())
        .with_shutdown_grace_duration(Duration::from_secs(3))
        .with_max_signal_count(2)
        .start();
    let ctx = daemon.context();

    let store = Arc::new(Store::default());
    let intake = CancellationToken::new();

    for id in 0..4_u64 {
        let ctx = ctx.clone();
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(250));
            loop {
                tokio::select! {
                    () = ctx.cancelled() => break,
                    _ = tick.tick() => store.insert(id),
                }
            }
            info!(worker = id, "Worker exited");
        });
    }

    let close_store = Arc::clone(&store);
    let stop_intake = intake.clone();
    daemon.defer([
        ShutdownCallback::from_fn(move |_| close_store.close()), // finally, close the store
        CANCEL_CTX,                                               // then cancel the ctx
        ShutdownCallback::named("intake", move |_| async move {
            // first stop taking new work
            stop_intake.cancel();
            info!("Intake stopped");
        }),
    ]);

    daemon.wait().await;
    assert!(intake.is_cancelled());
}
