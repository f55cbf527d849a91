//! Sync channel — the persistent WebSocket connection per session.
//!
//! DESIGN
//! ======
//! One connection per browsing session, associated with at most one active
//! floor; switching floors is a control message, not a reconnect. The
//! connection is split into a writer task fed by an unbounded channel and
//! a reader task that parses inbound frames and forwards them to the
//! session. Dropping either side of the socket ends both tasks, which
//! closes the handle; sends on a closed handle are dropped and logged,
//! never queued for resend.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::sync::message::{ControlAction, ControlMessage, Outbound, SyncMessage};

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("sync channel disabled by configuration")]
    Disabled,
    #[error("websocket connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Handle for sending on the channel. Clonable; all clones share the
/// writer task.
#[derive(Debug, Clone)]
pub struct SyncChannel {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl SyncChannel {
    /// Open the connection and spawn the reader/writer tasks. Returns the
    /// send handle and the stream of inbound broadcasts.
    ///
    /// # Errors
    ///
    /// `Disabled` when the configuration gates the channel off,
    /// `Connect` when the WebSocket handshake fails.
    pub async fn connect(
        config: &SyncConfig,
        floor_code: &str,
        user_name: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SyncMessage>), ChannelError> {
        if !config.websocket_enabled {
            return Err(ChannelError::Disabled);
        }

        let url = format!("{}?userName={user_name}&floorCode={floor_code}", config.ws_url);
        let (socket, _) = connect_async(url.as_str()).await?;
        info!(%floor_code, "sync channel connected");

        let (mut ws_write, mut ws_read) = socket.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<SyncMessage>();

        tokio::spawn(async move {
            while let Some(outbound) = out_rx.recv().await {
                let Ok(text) = serde_json::to_string(&outbound) else {
                    warn!("failed to serialize outbound sync message");
                    continue;
                };
                if ws_write.send(Message::Text(text.into())).await.is_err() {
                    warn!("sync channel writer closed");
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(msg) = ws_read.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<SyncMessage>(&text) {
                        Ok(parsed) => {
                            if in_tx.send(parsed).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "ignoring unparseable sync message"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            info!("sync channel reader finished");
        });

        let channel = Self { tx: out_tx };

        // Greet the service so presence counts include this session.
        channel.send_control(ControlMessage {
            action: ControlAction::RefreshUserCount,
            floor_code: floor_code.to_owned(),
        });

        Ok((channel, in_rx))
    }

    /// Send a broadcast if the channel is open. A closed channel drops the
    /// message with a log line — peers will see the change on their next
    /// fetch or reconnect.
    pub fn send(&self, message: SyncMessage) -> bool {
        if self.tx.send(Outbound::Message(message)).is_err() {
            warn!("sync channel closed; dropping broadcast");
            return false;
        }
        true
    }

    /// Send a control message to the service itself.
    pub fn send_control(&self, message: ControlMessage) -> bool {
        if self.tx.send(Outbound::Control(message)).is_err() {
            warn!("sync channel closed; dropping control message");
            return false;
        }
        true
    }

    /// Associate the connection with a different floor.
    pub fn switch_floor(&self, floor_code: &str) -> bool {
        self.send_control(ControlMessage { action: ControlAction::SwitchFloor, floor_code: floor_code.to_owned() })
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Handle wired to a local receiver instead of a socket, for tests.
    #[cfg(test)]
    pub(crate) fn test_pair() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}
