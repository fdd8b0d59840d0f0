//! WebSocket client: connection lifecycle, reconnect loop and frame pump.
//!
//! [`TransportClient::run`] is a single tokio task that owns the socket.
//! Outbound requests arrive over an unbounded channel, which both preserves
//! chunk order (one writer) and keeps the senders non-blocking, as required
//! by the audio paths that feed it.  Inbound frames are parsed and handed to
//! the [`EventHandler`] inline on the read path, so response audio reaches
//! the playback ring with no extra hop.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::TransportConfig;
use crate::transport::messages::{encode_request, parse_server_message};
use crate::transport::{ClientRequest, EventHandler};

use std::sync::Arc;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Persistent connection to the chat service.
pub struct TransportClient {
    config: TransportConfig,
    handler: Arc<dyn EventHandler>,
    requests: mpsc::UnboundedReceiver<ClientRequest>,
    shutdown: watch::Receiver<bool>,
}

impl TransportClient {
    pub fn new(
        config: TransportConfig,
        handler: Arc<dyn EventHandler>,
        requests: mpsc::UnboundedReceiver<ClientRequest>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            handler,
            requests,
            shutdown,
        }
    }

    /// Connect, pump frames, reconnect on failure; returns on shutdown.
    pub async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                return;
            }

            match connect_async(&self.config.url).await {
                Ok((ws, _)) => {
                    log::info!("connected to {}", self.config.url);
                    if self.session_loop(ws).await {
                        return;
                    }
                    log::warn!("connection lost, reconnecting");
                }
                Err(e) => {
                    log::error!("connect to {} failed: {e}", self.config.url);
                }
            }

            if self.reconnect_wait().await {
                return;
            }
        }
    }

    /// Sleep out the reconnect delay.  Requests arriving while disconnected
    /// are dropped with a warning (stale audio chunks must not be replayed
    /// after reconnecting).  Returns `true` on shutdown.
    async fn reconnect_wait(&mut self) -> bool {
        let delay = tokio::time::sleep(Duration::from_secs(self.config.reconnect_delay_secs));
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = &mut delay => return false,
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        return true;
                    }
                }
                request = self.requests.recv() => match request {
                    Some(request) => {
                        log::warn!("transport disconnected, dropping {request:?}");
                    }
                    None => return true,
                },
            }
        }
    }

    /// Pump one live connection.  Returns `true` when the client should
    /// stop entirely, `false` to reconnect.
    async fn session_loop(&mut self, ws: WsStream) -> bool {
        let (mut sink, mut stream) = ws.split();
        let write_timeout = Duration::from_secs(self.config.write_timeout_secs);
        let mut ping = tokio::time::interval(Duration::from_secs(self.config.ping_interval_secs));
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick would ping before anything happened.
        ping.reset();

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        let _ = sink.send(Message::Close(None)).await;
                        return true;
                    }
                }

                request = self.requests.recv() => {
                    let Some(request) = request else {
                        // All request senders are gone; nothing left to do.
                        return true;
                    };
                    let frame = match encode_request(&request) {
                        Ok(frame) => frame,
                        Err(e) => {
                            log::error!("failed to encode {request:?}: {e}");
                            continue;
                        }
                    };
                    match tokio::time::timeout(
                        write_timeout,
                        sink.send(Message::Text(frame.into())),
                    )
                    .await
                    {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            // Best-effort: the dropped frame is not retried.
                            log::warn!("send failed: {e}");
                            return false;
                        }
                        Err(_) => {
                            log::warn!("send timed out after {write_timeout:?}");
                            return false;
                        }
                    }
                }

                _ = ping.tick() => {
                    match tokio::time::timeout(
                        write_timeout,
                        sink.send(Message::Ping(Vec::new().into())),
                    )
                    .await
                    {
                        Ok(Ok(())) => log::trace!("ping sent"),
                        Ok(Err(e)) => {
                            log::warn!("ping failed: {e}");
                            return false;
                        }
                        Err(_) => {
                            log::warn!("ping timed out");
                            return false;
                        }
                    }
                }

                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => self.dispatch(text.as_str()),
                    Some(Ok(Message::Pong(_))) => log::trace!("pong received"),
                    Some(Ok(Message::Close(_))) => {
                        log::info!("server closed the connection");
                        return false;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("read error: {e}");
                        return false;
                    }
                    None => {
                        log::warn!("connection ended");
                        return false;
                    }
                },
            }
        }
    }

    fn dispatch(&self, text: &str) {
        match parse_server_message(text) {
            Ok(Some(event)) => self.handler.on_event(event),
            Ok(None) => {}
            Err(e) => log::warn!("bad server message: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
