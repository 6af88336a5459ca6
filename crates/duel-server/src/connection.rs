//! Per-connection lifecycle: handshake, read loop, outbound pump, liveness
//! monitor and teardown.
//!
//! The transport is any `Sink`/`Stream` pair of websocket messages, so the
//! same code drives axum sockets and in-memory test transports.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use duel_core::messages::{AcceptConnectionResponse, ConnectRequest};
use duel_core::validation::{self, FieldErrors};
use duel_core::{ClientMessageType, Envelope, ErrorResponse, PlayerId, ServerMessageType};

use crate::handlers::{self, HandlerState};
use crate::session::Session;

type SharedSink<S> = Arc<Mutex<S>>;

/// Drive one client connection to completion.
pub async fn run_session<S, R, E>(sink: S, mut stream: R, state: Arc<HandlerState>)
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin + Send,
    E: Display + Send,
{
    let sink: SharedSink<S> = Arc::new(Mutex::new(sink));

    let Some((session, rx)) = handshake(&sink, &mut stream, &state).await else {
        close(&sink).await;
        return;
    };
    let player_id = session.player_id;
    let cancel = session.cancel_token().clone();

    let pump = tokio::spawn(outbound_pump(Arc::clone(&sink), rx, cancel.clone(), player_id));
    let monitor = tokio::spawn(liveness_monitor(
        Arc::clone(&sink),
        Arc::clone(&session),
        state.config.ping_interval,
        state.config.pong_timeout,
    ));

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = stream.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => handle_frame(&state, &session, text.as_str()).await,
            Some(Ok(Message::Binary(data))) => {
                handle_frame(&state, &session, &String::from_utf8_lossy(&data)).await
            }
            Some(Ok(Message::Pong(_))) => session.record_pong(),
            Some(Ok(Message::Ping(_))) => {}
            Some(Ok(Message::Close(_))) | None => {
                tracing::info!(player_id = %player_id, "client closed connection");
                break;
            }
            Some(Err(e)) => {
                tracing::warn!(player_id = %player_id, error = %e, "transport read failed");
                break;
            }
        }
    }

    // Teardown. Registry removal cancels the token, which stops the pump and monitor.
    state.registry.remove(&player_id);
    for (task, result) in [("outbound pump", pump.await), ("liveness monitor", monitor.await)] {
        if let Err(e) = result {
            tracing::error!(player_id = %player_id, task, error = %e, "session task failed");
        }
    }
    handlers::on_disconnect(&state, &player_id, &session.username).await;
    close(&sink).await;
    tracing::info!(player_id = %player_id, username = %session.username, "session closed");
}

async fn handle_frame(state: &HandlerState, session: &Session, raw: &str) {
    match Envelope::from_json(raw) {
        Ok(envelope) => handlers::dispatch(state, session, envelope).await,
        Err(e) => {
            tracing::info!(player_id = %session.player_id, error = %e, "undecodable frame");
            let frame = Envelope::server(ServerMessageType::Error, ErrorResponse::decode_failed(e.to_string()));
            if let Err(e) = session.enqueue(frame, state.registry.send_timeout()).await {
                tracing::warn!(player_id = %session.player_id, error = %e, "failed to enqueue reply");
            }
        }
    }
}

/// Read the `Connect` frame, create the user and register the session.
///
/// On any failure the error is written straight to the transport and `None`
/// is returned; nothing is registered.
async fn handshake<S, R, E>(
    sink: &SharedSink<S>,
    stream: &mut R,
    state: &HandlerState,
) -> Option<(Arc<Session>, mpsc::Receiver<Envelope>)>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let raw = match tokio::time::timeout(state.config.handshake_timeout, first_frame(stream)).await {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            tracing::debug!("connection closed before handshake");
            return None;
        }
        Err(_) => {
            tracing::info!(timeout = ?state.config.handshake_timeout, "handshake timed out");
            return None;
        }
    };

    let envelope = match Envelope::from_json(&raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            write_direct(sink, ErrorResponse::decode_failed(e.to_string())).await;
            return None;
        }
    };

    if envelope.client_type() != Ok(ClientMessageType::Connect) {
        let details = FieldErrors::from([("type".to_string(), "first message must be connect".to_string())]);
        write_direct(sink, ErrorResponse::invalid_fields(details)).await;
        return None;
    }

    let request: ConnectRequest = match validation::validate_payload(&envelope.payload) {
        Ok(request) => request,
        Err(fields) => {
            tracing::info!(fields = ?fields, "invalid connect request");
            write_direct(sink, ErrorResponse::invalid_fields(fields)).await;
            return None;
        }
    };

    let player_id = PlayerId::new();
    if let Err(e) = state
        .storage()
        .create_user_with_roster(&player_id, &request.username, &request.pokemons)
    {
        let response = if e.is_not_found() {
            ErrorResponse::invalid_fields(FieldErrors::from([("pokemons".to_string(), e.to_string())]))
        } else {
            tracing::error!(username = %request.username, error = %e, "failed to create user");
            ErrorResponse::database(e.to_string())
        };
        write_direct(sink, response).await;
        return None;
    }

    let (tx, rx) = mpsc::channel(state.config.queue_capacity);
    let session = Arc::new(Session::new(player_id, request.username.clone(), tx, CancellationToken::new()));
    if !register(sink, state, &session).await {
        return None;
    }

    let accept = AcceptConnectionResponse {
        username: request.username,
        id: player_id,
    };
    if let Err(e) = session
        .enqueue(
            Envelope::server(ServerMessageType::AcceptConnection, accept),
            state.registry.send_timeout(),
        )
        .await
    {
        tracing::warn!(player_id = %player_id, error = %e, "failed to enqueue accept");
    }

    tracing::info!(player_id = %player_id, username = %session.username, "player connected");
    Some((session, rx))
}

/// Add a freshly created player to the registry. On failure the client is
/// told and the player's records are removed again.
async fn register<S>(sink: &SharedSink<S>, state: &HandlerState, session: &Arc<Session>) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let Err(e) = state.registry.add(Arc::clone(session)) else {
        return true;
    };
    tracing::error!(error = %e, "failed to register session");
    if let Err(e) = state.storage().delete_user(&session.player_id) {
        tracing::error!(player_id = %session.player_id, error = %e, "failed to delete user");
    }
    write_direct(sink, ErrorResponse::bad_request(e.to_string())).await;
    false
}

/// Text of the first data frame, skipping control frames.
async fn first_frame<R, E>(stream: &mut R) -> Option<String>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => return Some(text.to_string()),
            Ok(Message::Binary(data)) => return Some(String::from_utf8_lossy(&data).into_owned()),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => return None,
            Err(e) => {
                tracing::debug!(error = %e, "transport read failed during handshake");
                return None;
            }
        }
    }
    None
}

/// Write an `Error` frame bypassing the outbound queue (no session exists yet).
async fn write_direct<S>(sink: &SharedSink<S>, error: ErrorResponse)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let envelope = Envelope::server(ServerMessageType::Error, error);
    let json = match envelope.to_json() {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode error frame");
            return;
        }
    };
    if let Err(e) = sink.lock().await.send(Message::Text(json.into())).await {
        tracing::debug!(error = %e, "failed to write handshake error");
    }
}

async fn close<S>(sink: &SharedSink<S>)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    if let Err(e) = sink.lock().await.close().await {
        tracing::debug!(error = %e, "transport close failed");
    }
}

/// Single consumer of a session's outbound queue; writes frames in order.
async fn outbound_pump<S>(
    sink: SharedSink<S>,
    mut rx: mpsc::Receiver<Envelope>,
    cancel: CancellationToken,
    player_id: PlayerId,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        let envelope = tokio::select! {
            _ = cancel.cancelled() => break,
            envelope = rx.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };
        let json = match envelope.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(player_id = %player_id, error = %e, "failed to encode frame");
                continue;
            }
        };
        if let Err(e) = sink.lock().await.send(Message::Text(json.into())).await {
            tracing::warn!(player_id = %player_id, error = %e, "transport write failed");
            cancel.cancel();
            break;
        }
    }
    tracing::debug!(player_id = %player_id, "outbound pump stopped");
}

/// Ping on a fixed interval; end the session when a ping fails or no pong
/// arrived within `pong_timeout`.
async fn liveness_monitor<S>(
    sink: SharedSink<S>,
    session: Arc<Session>,
    ping_interval: Duration,
    pong_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let cancel = session.cancel_token().clone();
    if ping_interval.is_zero() {
        tracing::error!(player_id = %session.player_id, "ping interval is zero, liveness checks disabled");
        return;
    }
    let mut ticker = tokio::time::interval(ping_interval);
    ticker.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if !session.is_alive(pong_timeout) {
                    tracing::warn!(player_id = %session.player_id, "pong timeout, closing connection");
                    cancel.cancel();
                    break;
                }
                if let Err(e) = sink.lock().await.send(Message::Ping(Bytes::new())).await {
                    tracing::warn!(player_id = %session.player_id, error = %e, "ping failed, closing connection");
                    cancel.cancel();
                    break;
                }
                tracing::trace!(player_id = %session.player_id, "sent ping");
            }
        }
    }
    tracing::debug!(player_id = %session.player_id, "liveness monitor stopped");
}
