//! Outbound protocol calls.
//!
//! Every call opens a fresh WebSocket connection to `ws://<address><path>`,
//! writes one binary frame and, where a reply is expected, reads one frame
//! back. The whole exchange runs under a single deadline.

use futures::{SinkExt, StreamExt};
use group_core::cache::CacheDelta;
use group_core::message::{self, GroupMessage, MAX_MESSAGE_SIZE};
use group_core::GroupError;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use thiserror::Error;
use tracing::debug;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timed out after {0:?} talking to {1}")]
    Timeout(Duration, String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Connection to {0} closed before a reply")]
    Closed(String),

    #[error("Codec error: {0}")]
    Codec(#[from] GroupError),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// WebSocket URL for a peer path.
pub fn url(address: &str, path: &str) -> String {
    format!("ws://{}{}", address, path)
}

async fn connect(address: &str, path: &str) -> Result<WsStream> {
    let (ws, _) = connect_async(url(address, path))
        .await
        .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", address, e)))?;
    Ok(ws)
}

async fn send_frame(ws: &mut WsStream, data: Vec<u8>) -> Result<()> {
    ws.send(Message::Binary(data.into()))
        .await
        .map_err(|e| TransportError::SendFailed(e.to_string()))
}

/// Read until the first data frame.
async fn recv_frame(ws: &mut WsStream, address: &str) -> Result<Message> {
    loop {
        match ws.next().await {
            Some(Ok(msg @ (Message::Binary(_) | Message::Text(_)))) => return Ok(msg),
            Some(Ok(Message::Close(_))) | None => {
                return Err(TransportError::Closed(address.to_string()));
            }
            Some(Ok(_)) => continue,
            Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                return Err(TransportError::Closed(address.to_string()));
            }
            Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
        }
    }
}

async fn close(mut ws: WsStream) {
    if let Err(e) = ws.close(None).await {
        debug!("Close after exchange failed: {}", e);
    }
}

/// Send `msg` to its target and wait for the reply message.
pub async fn tx_rx(msg: &GroupMessage, deadline: Duration) -> Result<GroupMessage> {
    let address = msg.target_address.clone();
    let data = msg.encode()?;

    let exchange = async {
        let mut ws = connect(&address, &msg.target_path).await?;
        send_frame(&mut ws, data).await?;
        let reply = recv_frame(&mut ws, &address).await?;
        close(ws).await;

        match reply {
            Message::Binary(bytes) => Ok(GroupMessage::decode(&bytes)?),
            _ => Err(TransportError::ReceiveFailed(format!(
                "Expected binary reply from {}",
                address
            ))),
        }
    };

    timeout(deadline, exchange)
        .await
        .map_err(|_| TransportError::Timeout(deadline, msg.target_address.clone()))?
}

/// Send `msg` to its target without waiting for a reply.
pub async fn tx(msg: &GroupMessage, deadline: Duration) -> Result<()> {
    let address = msg.target_address.clone();
    let data = msg.encode()?;

    let exchange = async {
        let mut ws = connect(&address, &msg.target_path).await?;
        send_frame(&mut ws, data).await?;
        close(ws).await;
        Ok::<(), TransportError>(())
    };

    timeout(deadline, exchange)
        .await
        .map_err(|_| TransportError::Timeout(deadline, address.clone()))?
}

/// Push a cache delta to `address` and return whether it was applied.
pub async fn send_cache_update<D: CacheDelta>(
    address: &str,
    delta: &D,
    deadline: Duration,
) -> Result<bool> {
    let data = message::encode(delta)?;
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(TransportError::Codec(GroupError::MessageTooLarge(data.len())));
    }

    let exchange = async {
        let mut ws = connect(address, D::PATH).await?;
        send_frame(&mut ws, data).await?;
        let reply = recv_frame(&mut ws, address).await?;
        close(ws).await;

        match reply {
            Message::Text(text) => Ok(text.as_str() == "true"),
            _ => Err(TransportError::ReceiveFailed(format!(
                "Expected text reply from {}",
                address
            ))),
        }
    };

    timeout(deadline, exchange)
        .await
        .map_err(|_| TransportError::Timeout(deadline, address.to_string()))?
}
