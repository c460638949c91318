//! WebSocket server for inbound protocol requests.
//!
//! Every accepted connection is upgraded, bound to a [`Route`] from its
//! request path and served on its own task until the peer closes it.

use crate::handlers::{Handlers, Route};
use anyhow::Result;
use futures::{SinkExt, StreamExt};
use group_core::message::MAX_MESSAGE_SIZE;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

/// Accept loop for one group member.
pub struct GroupServer {
    listener: TcpListener,
    handlers: Arc<Handlers>,
}

impl GroupServer {
    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("Group server listening on {}", listen_addr);
        Ok(listener)
    }

    pub fn new(listener: TcpListener, handlers: Handlers) -> Self {
        Self {
            listener,
            handlers: Arc::new(handlers),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is aborted.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let handlers = self.handlers.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, addr, handlers).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, handlers: Arc<Handlers>) {
    let mut path = String::new();
    let record_path = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
        path = req.uri().path().to_string();
        Ok(resp)
    };

    let mut ws = match accept_hdr_async(stream, record_path).await {
        Ok(ws) => ws,
        Err(e) => {
            // Probes connect and close without finishing the upgrade.
            let err_str = e.to_string();
            if err_str.contains("Handshake not finished")
                || err_str.contains("Connection reset")
                || err_str.contains("unexpected EOF")
            {
                debug!("Connection closed before handshake from {}", addr);
            } else {
                warn!("WebSocket upgrade failed for {}: {}", addr, e);
            }
            return;
        }
    };

    let Some(route) = Route::from_path(&path) else {
        debug!("No handler for path {:?} from {}", path, addr);
        let _ = ws.close(None).await;
        return;
    };

    while let Some(frame) = ws.next().await {
        let data = match frame {
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
            Err(e) => {
                debug!("WebSocket error on {:?} from {}: {}", route, addr, e);
                break;
            }
        };

        if data.len() > MAX_MESSAGE_SIZE {
            warn!(
                "Message from {} exceeds max size ({} > {}), dropping",
                addr,
                data.len(),
                MAX_MESSAGE_SIZE
            );
            continue;
        }

        if let Some(reply) = handlers.handle(route, &data).await {
            if let Err(e) = ws.send(reply).await {
                debug!("Failed to reply to {}: {}", addr, e);
                break;
            }
        }
    }
}
