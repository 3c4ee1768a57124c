//! TCP listener and accept loop.

use super::handler::Handler;
use crate::error::{HockError, Result};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// A running accept loop. Dropping it stops accepting new connections.
pub struct ListenerHandle {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting and wait for the accept loop to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!("Accept loop on {} ended abnormally: {}", self.addr, e);
            }
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.shutdown_tx.send(());
        }
    }
}

pub async fn bind(host: &str, port: u16) -> Result<TcpListener> {
    TcpListener::bind((host, port))
        .await
        .map_err(|e| HockError::Listener(format!("failed to bind {host}:{port}: {e}")))
}

/// Serve `handler` on every connection accepted by `listener`.
pub fn spawn_accept_loop(listener: TcpListener, handler: Handler) -> Result<ListenerHandle> {
    let addr = listener
        .local_addr()
        .map_err(|e| HockError::Listener(e.to_string()))?;
    let (shutdown_tx, _) = broadcast::channel(1);
    let mut shutdown_rx = shutdown_tx.subscribe();

    info!("Hock listening on {}", addr);

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let service = handler.clone();
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                // Fail-fast misses surface here as aborted connections
                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!("Connection error from {}: {}", peer, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error on {}: {}", addr, e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Hock on {} shutting down", addr);
                    break;
                }
            }
        }
    });

    Ok(ListenerHandle {
        addr,
        shutdown_tx,
        task: Some(task),
    })
}
