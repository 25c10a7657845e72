//! Simple daemon example: a TCP echo listener torn down on Ctrl+C.
//!
//! Run with `cargo run --example simple` and press Ctrl+C.

use graceful_daemon::{logging, Config, Daemon, FatalError, ShutdownCallback, ShutdownContext};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct EchoServer {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl EchoServer {
    fn start(addr: &'static str, ctx: CancellationToken, fatal_errors: mpsc::Sender<FatalError>) -> Self {
        let stop = ctx.child_token();
        let accept_stop = stop.clone();

        let task = tokio::spawn(async move {
            let listener = match TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    let _ = fatal_errors.send(Box::new(e)).await;
                    return;
                }
            };
            info!(%addr, "Echo server listening");

            loop {
                tokio::select! {
                    () = accept_stop.cancelled() => break,
                    accepted = listener.accept() => {
                        let (mut socket, peer) = match accepted {
                            Ok(conn) => conn,
                            Err(e) => {
                                let _ = fatal_errors.send(Box::new(e)).await;
                                break;
                            }
                        };
                        let conn_stop = accept_stop.clone();
                        tokio::spawn(async move {
                            let mut buf = [0u8; 1024];
                            loop {
                                tokio::select! {
                                    () = conn_stop.cancelled() => break,
                                    read = socket.read(&mut buf) => match read {
                                        Ok(0) | Err(_) => break,
                                        Ok(n) => {
                                            if socket.write_all(&buf[..n]).await.is_err() {
                                                break;
                                            }
                                        }
                                    },
                                }
                            }
                            info!(%peer, "Connection closed");
                        });
                    }
                }
            }
        });

        Self { stop, task }
    }

    async fn shut_down(self, ctx: ShutdownContext) {
        self.stop.cancel();
        tokio::select! {
            _ = self.task => info!("Echo server stopped"),
            () = ctx.cancelled() => warn!("Echo server did not stop in time"),
        }
    }
}

#[tokio::main]
async fn main() -> graceful_daemon::Result<()> {
    let config = Config::builder()
        .name("simple-echo")
        .shutdown_grace_duration(Duration::from_secs(5))?
        .build()?;
    logging::init_logging(&config.logging)?;

    let daemon = Daemon::builder(CancellationToken::new())
        .with_config(config)
        .start();

    let ctx = daemon.context(); // hand this to the rest of the application

    let server = EchoServer::start("127.0.0.1:3030", ctx, daemon.fatal_errors_channel());

    daemon.on_shut_down([ShutdownCallback::named("echo-server", move |ctx| server.shut_down(ctx))]);

    daemon.wait().await;
    info!(reason = ?daemon.shutdown_reason(), "Bye");
    Ok(())
}
