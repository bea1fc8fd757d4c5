//! Generic WebSocket streaming client (§4.6), grounded on the pack's
//! outbound-websocket scrapers (`binance_book_ticker.rs`,
//! `polymarket_ws.rs`): a single long-lived connection task driven by
//! `tokio_tungstenite::connect_async`, with subscribe/unsubscribe commands
//! sent over a channel rather than touching the socket directly from
//! caller threads.

use super::{Capabilities, ConnectionHealth, StreamingClient, SubscriptionKind};
use crate::core_types::{ProviderId, Symbol};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

enum WsCommand {
    Subscribe(Symbol, SubscriptionKind),
    Unsubscribe(Symbol, SubscriptionKind),
    Close,
}

/// Builds the vendor-specific wire frame for a (un)subscribe request. Kept
/// as an injected closure so this client stays venue-agnostic; a concrete
/// provider module supplies the vendor's actual channel-naming scheme.
pub type FrameBuilder = Arc<dyn Fn(&Symbol, SubscriptionKind, bool) -> Message + Send + Sync>;

/// Receives decoded text frames off the socket. Collectors (or a thin
/// vendor-specific adapter in front of them) implement this to turn raw
/// vendor JSON into canonical events.
pub type MessageHandler = Arc<dyn Fn(String) + Send + Sync>;

pub struct WebSocketStreamingClient {
    provider_id: ProviderId,
    url: String,
    capabilities: Capabilities,
    frame_builder: FrameBuilder,
    on_message: MessageHandler,
    health: mpsc::UnboundedSender<ConnectionHealth>,
    commands: Mutex<Option<mpsc::UnboundedSender<WsCommand>>>,
}

impl WebSocketStreamingClient {
    pub fn new(
        provider_id: ProviderId,
        url: impl Into<String>,
        capabilities: Capabilities,
        frame_builder: FrameBuilder,
        on_message: MessageHandler,
        health: mpsc::UnboundedSender<ConnectionHealth>,
    ) -> Self {
        Self {
            provider_id,
            url: url.into(),
            capabilities,
            frame_builder,
            on_message,
            health,
            commands: Mutex::new(None),
        }
    }
}

#[async_trait]
impl StreamingClient for WebSocketStreamingClient {
    fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn connect(&self) -> Result<()> {
        let (stream, _response) = connect_async(&self.url).await.map_err(|e| CoreError::TransientIo {
            provider: self.provider_id.clone(),
            message: e.to_string(),
        })?;

        let (mut sink, mut stream) = stream.split();
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<WsCommand>();
        *self.commands.lock().await = Some(cmd_tx);

        let _ = self.health.send(ConnectionHealth::Connected);
        let health = self.health.clone();
        let on_message = self.on_message.clone();
        let provider_id = self.provider_id.clone();
        let frame_builder = self.frame_builder.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => (on_message)(text),
                            Some(Ok(Message::Close(_))) | None => {
                                let _ = health.send(ConnectionHealth::Disconnected);
                                return;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                tracing::warn!(target: "ingest", provider = %provider_id, error = %err, "websocket read error");
                                let _ = health.send(ConnectionHealth::Error { message: err.to_string() });
                            }
                        }
                    }
                    cmd = cmd_rx.recv() => {
                        match cmd {
                            Some(WsCommand::Subscribe(symbol, what)) => {
                                let frame = (frame_builder)(&symbol, what, true);
                                if let Err(err) = sink.send(frame).await {
                                    tracing::warn!(target: "ingest", provider = %provider_id, error = %err, "failed to send subscribe frame");
                                }
                            }
                            Some(WsCommand::Unsubscribe(symbol, what)) => {
                                let frame = (frame_builder)(&symbol, what, false);
                                if let Err(err) = sink.send(frame).await {
                                    tracing::warn!(target: "ingest", provider = %provider_id, error = %err, "failed to send unsubscribe frame");
                                }
                            }
                            Some(WsCommand::Close) | None => {
                                let _ = sink.close().await;
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut guard = self.commands.lock().await;
        if let Some(tx) = guard.take() {
            let _ = tx.send(WsCommand::Close);
        }
        Ok(())
    }

    async fn subscribe(&self, symbol: &Symbol, what: SubscriptionKind) -> Result<()> {
        let guard = self.commands.lock().await;
        let tx = guard
            .as_ref()
            .ok_or_else(|| CoreError::Configuration("client not connected".into()))?;
        tx.send(WsCommand::Subscribe(symbol.clone(), what))
            .map_err(|_| CoreError::Fatal("websocket command channel closed".into()))
    }

    async fn unsubscribe(&self, symbol: &Symbol, what: SubscriptionKind) -> Result<()> {
        let guard = self.commands.lock().await;
        let tx = guard
            .as_ref()
            .ok_or_else(|| CoreError::Configuration("client not connected".into()))?;
        tx.send(WsCommand::Unsubscribe(symbol.clone(), what))
            .map_err(|_| CoreError::Fatal("websocket command channel closed".into()))
    }
}
