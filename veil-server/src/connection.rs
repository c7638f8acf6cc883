//! Client connection handling

use std::io;
use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use veil_common::protocol::ClientMessage;

use crate::broker::Broker;

/// Parameters for handling a connection
pub struct ConnectionParams {
    pub peer_addr: SocketAddr,
    pub broker: Broker,
    pub debug: bool,
}

/// Handle a client connection over WebSocket
///
/// Upgrades the socket, registers the session with the broker, then runs
/// the connection loop until either side goes away. The broker is always
/// told about the departure, whatever path ended the loop.
pub async fn handle_connection(socket: TcpStream, params: ConnectionParams) -> io::Result<()> {
    let ConnectionParams {
        peer_addr,
        broker,
        debug,
    } = params;

    let ws_stream = accept_async(socket)
        .await
        .map_err(|e| io::Error::other(format!("WebSocket handshake failed: {}", e)))?;
    let (mut ws_sink, mut ws_source) = ws_stream.split();

    // Channel for events the broker wants delivered to this client
    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = broker.connect(tx).await;
    let session_id = session.session_id();

    // Main loop - handle both incoming frames and outgoing events
    loop {
        tokio::select! {
            // Inbound frames from the client
            inbound = ws_source.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::ChatSend {
                                key_fingerprint,
                                envelope_key,
                                payload,
                            }) => {
                                broker
                                    .handle_chat(session_id, key_fingerprint, envelope_key, payload)
                                    .await;
                            }
                            Err(e) => {
                                // Unparseable input is dropped, never answered
                                if debug {
                                    eprintln!(
                                        "Session {} ({}) sent invalid message: {}",
                                        session_id, peer_addr, e
                                    );
                                }
                            }
                        }
                    }
                    // Binary and control frames carry no protocol meaning;
                    // ping/pong is answered by the stream itself
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        if debug {
                            eprintln!("Session {} ({}) read error: {}", session_id, peer_addr, e);
                        }
                        break;
                    }
                }
            }
            // Outbound events from the broker
            event = rx.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if ws_sink.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        eprintln!("Failed to serialize event for session {}: {}", session_id, e);
                    }
                }
            }
        }
    }

    broker.disconnect(session_id).await;
    Ok(())
}
