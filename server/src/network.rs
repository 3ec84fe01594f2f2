//! WebSocket transport
//!
//! Each accepted connection becomes one [`Session`] plus two tasks: a read
//! pump that decodes frames and hands them to [`dispatch`], and a write pump
//! that drains the session's outbound queue onto the socket and keeps the
//! connection alive with pings. Whichever pump stops first takes the other
//! down with it, and the connection then asks the hub to unregister.

use crate::config::{ConnectionConfig, GameConfig};
use crate::dispatch::dispatch;
use crate::error::{DispatchError, HubError, TransportError};
use crate::hub::HubHandle;
use crate::session::{Outbound, Session};
use futures::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

pub struct NetworkServer {
    listener: TcpListener,
    hub: HubHandle,
    connection: ConnectionConfig,
    outbound_capacity: usize,
}

impl NetworkServer {
    pub async fn bind(addr: &str, hub: HubHandle, config: &GameConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            hub,
            connection: config.connection,
            outbound_capacity: config.outbound_capacity,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the hub goes away.
    pub async fn run(self) {
        loop {
            if self.hub.is_closed() {
                info!("Hub stopped, no longer accepting connections");
                break;
            }

            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let hub = self.hub.clone();
                    let connection = self.connection;
                    let capacity = self.outbound_capacity;
                    tokio::spawn(async move {
                        handle_connection(stream, addr, hub, connection, capacity).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: HubHandle,
    connection: ConnectionConfig,
    outbound_capacity: usize,
) {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(connection.max_message_size);
    ws_config.max_frame_size = Some(connection.max_message_size);

    let ws_stream = match accept_async_with_config(stream, Some(ws_config)).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };

    let (session, outbound_rx) = Session::open(outbound_capacity);
    let session_id = session.id().to_string();
    info!("Client {} connected from {}", session_id, addr);

    if let Err(e) = hub.register(session) {
        // The session went down with the rejected event, closing its queue
        warn!("Could not register {}: {}", session_id, e);
        return;
    }

    let (sink, stream) = ws_stream.split();
    let mut writer = tokio::spawn(write_pump(sink, outbound_rx, connection, session_id.clone()));
    let mut reader = tokio::spawn(read_pump(stream, hub.clone(), connection, session_id.clone()));

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    if let Err(e) = hub.unregister(&session_id) {
        debug!("Unregister for {} not queued: {}", session_id, e);
    }
    info!("Client {} disconnected", session_id);
}

/// Reads frames until the peer closes, errors or goes silent for longer than
/// the pong wait.
async fn read_pump<S>(mut stream: S, hub: HubHandle, connection: ConnectionConfig, session_id: String)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let frame = match timeout(connection.pong_wait, stream.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                debug!("Read from {} failed: {}", session_id, e);
                break;
            }
            Ok(None) => break,
            Err(_) => {
                warn!("Client {} silent for {:?}", session_id, connection.pong_wait);
                break;
            }
        };

        let result = match frame {
            Message::Text(text) => match dispatch(&hub, &session_id, &text) {
                Err(DispatchError::Decode(e)) => {
                    warn!("Malformed message from {}: {}", session_id, e);
                    hub.touch(&session_id)
                }
                Err(DispatchError::Hub(e)) => Err(e),
                Ok(()) => Ok(()),
            },
            Message::Close(_) => break,
            Message::Binary(_) => {
                debug!("Ignoring binary frame from {}", session_id);
                hub.touch(&session_id)
            }
            // Pings are answered by tungstenite; any frame counts as liveness
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => hub.touch(&session_id),
        };

        // A full queue was already logged where the event was dropped
        if result == Err(HubError::HubClosed) {
            break;
        }
    }
}

/// Writes queued messages and periodic pings. A closed queue means the hub
/// has dropped the session, so the peer gets a close frame.
async fn write_pump<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Outbound>,
    connection: ConnectionConfig,
    session_id: String,
) where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let mut ping = interval(connection.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping.tick().await;

    loop {
        tokio::select! {
            payload = outbound.recv() => match payload {
                Some(payload) => {
                    let frame = Message::Text(payload.to_string().into());
                    if let Err(e) = send_with_deadline(&mut sink, frame, connection.write_wait).await {
                        warn!("Write to {} failed: {}", session_id, e);
                        break;
                    }
                    ping.reset();
                }
                None => {
                    let _ = send_with_deadline(&mut sink, Message::Close(None), connection.write_wait).await;
                    break;
                }
            },

            _ = ping.tick() => {
                let frame = Message::Ping(Vec::new().into());
                if let Err(e) = send_with_deadline(&mut sink, frame, connection.write_wait).await {
                    warn!("Ping to {} failed: {}", session_id, e);
                    break;
                }
            }
        }
    }
}

async fn send_with_deadline<S>(sink: &mut S, frame: Message, deadline: Duration) -> Result<(), TransportError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    match timeout(deadline, sink.send(frame)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(TransportError::WriteTimeout(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use std::sync::Arc;

    fn quick_connection() -> ConnectionConfig {
        ConnectionConfig {
            write_wait: Duration::from_millis(200),
            pong_wait: Duration::from_millis(300),
            ping_period: Duration::from_millis(100),
            max_message_size: 512,
        }
    }

    #[tokio::test]
    async fn test_write_pump_forwards_then_closes() {
        let (sink_tx, mut sink_rx) = fmpsc::unbounded::<Message>();
        let sink = sink_tx.sink_map_err(|_| WsError::ConnectionClosed);
        let (tx, rx) = mpsc::channel::<Outbound>(4);

        tx.send(Arc::from("hello")).await.unwrap();
        drop(tx);
        write_pump(sink, rx, quick_connection(), "s".to_string()).await;

        assert_eq!(sink_rx.next().await, Some(Message::Text("hello".to_string().into())));
        assert!(matches!(sink_rx.next().await, Some(Message::Close(None))));
    }

    #[tokio::test]
    async fn test_write_pump_pings_idle_connection() {
        let (sink_tx, mut sink_rx) = fmpsc::unbounded::<Message>();
        let sink = sink_tx.sink_map_err(|_| WsError::ConnectionClosed);
        let (tx, rx) = mpsc::channel::<Outbound>(4);

        let pump = tokio::spawn(write_pump(sink, rx, quick_connection(), "s".to_string()));
        let frame = timeout(Duration::from_secs(2), sink_rx.next()).await.unwrap();
        assert!(matches!(frame, Some(Message::Ping(_))));

        drop(tx);
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_pump_stops_on_close_frame() {
        let (_hub_owner, hub) = crate::hub::Hub::new(GameConfig::default()).unwrap();
        let frames = futures::stream::iter(vec![
            Ok(Message::Text(r#"{"type":"unknown"}"#.to_string().into())),
            Ok(Message::Close(None)),
            Ok(Message::Text("never read".to_string().into())),
        ]);

        timeout(
            Duration::from_secs(1),
            read_pump(frames, hub, quick_connection(), "s".to_string()),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_read_pump_times_out_silent_peer() {
        let (_hub_owner, hub) = crate::hub::Hub::new(GameConfig::default()).unwrap();
        let silent = futures::stream::pending::<Result<Message, WsError>>();

        let started = std::time::Instant::now();
        read_pump(silent, hub, quick_connection(), "s".to_string()).await;
        assert!(started.elapsed() >= Duration::from_millis(300));
    }
}
