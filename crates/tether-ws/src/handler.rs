use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tether_core::chat::{self, OutgoingMessage};
use tether_core::presence::ConnectionHandle;
use tether_core::{auth, responder, AppState, ChatError};
use tether_models::gateway::{ClientEvent, MarkReadPayload, SendMessagePayload};
use tether_models::ServerEvent;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

/// Transport heartbeat: the server pings every 20s and drops connections
/// with no inbound traffic inside the 60s window.
const PING_INTERVAL: Duration = Duration::from_secs(20);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

/// Close code sent when the handshake credential is rejected.
const CLOSE_AUTH_FAILED: u16 = 4001;

async fn send_event(
    sender: &mut (impl SinkExt<Message> + Unpin),
    event: &ServerEvent,
) -> Result<(), ()> {
    let payload = serde_json::to_string(event).map_err(|_| ())?;
    sender
        .send(Message::Text(payload.into()))
        .await
        .map_err(|_| ())
}

async fn send_close(
    sender: &mut (impl SinkExt<Message> + Unpin),
    code: u16,
    reason: &str,
) -> Result<(), ()> {
    sender
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await
        .map_err(|_| ())
}

/// Connection lifecycle: authenticate the handshake credential, register
/// presence, run the event loop, then tear down idempotently. A connection
/// that fails authentication is closed before any state is touched.
pub async fn handle_connection(socket: WebSocket, state: AppState, token: Option<String>) {
    let claims = match token
        .as_deref()
        .map(|t| auth::verify_access(t, &state.config.jwt_secret))
    {
        Some(Ok(claims)) => claims,
        _ => {
            let (mut sender, _) = socket.split();
            let _ = send_close(&mut sender, CLOSE_AUTH_FAILED, "authentication failed").await;
            return;
        }
    };
    let user_id = claims.sub;
    tracing::info!(%user_id, "gateway connection authenticated");

    let (tx, rx) = mpsc::unbounded_channel();
    let handle = ConnectionHandle::new(tx);
    let connection_id = handle.connection_id;

    // Last connection wins; a replaced handle is left to die on its own
    // loop and must not evict this entry when it does.
    if let Some(replaced) = state.presence.register(&user_id, handle) {
        tracing::debug!(
            %user_id,
            replaced = %replaced.connection_id,
            "reconnect replaced a live gateway handle"
        );
    }
    state.presence.broadcast_except(
        connection_id,
        &ServerEvent::UserOnline {
            user_id: user_id.clone(),
        },
    );

    let (sender, receiver) = socket.split();
    let disconnect_reason = run_session(sender, receiver, rx, &user_id, &state).await;
    tracing::info!(%user_id, disconnect_reason, "gateway connection closed");

    // Stale-safe: only the connection that still owns the registry entry
    // removes it and announces the user offline. A second close signal for
    // an already-closed connection falls through both branches.
    if state.presence.unregister(&user_id, connection_id) {
        state.presence.broadcast_except(
            connection_id,
            &ServerEvent::UserOffline {
                user_id: user_id.clone(),
            },
        );
    }
}

async fn run_session(
    mut sender: impl SinkExt<Message> + Unpin,
    mut receiver: impl StreamExt<Item = Result<Message, axum::Error>> + Unpin,
    mut outbound_rx: mpsc::UnboundedReceiver<ServerEvent>,
    user_id: &str,
    state: &AppState,
) -> &'static str {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let heartbeat_sleep = tokio::time::sleep(HEARTBEAT_TIMEOUT);
    tokio::pin!(heartbeat_sleep);

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        heartbeat_sleep.as_mut().reset(Instant::now() + HEARTBEAT_TIMEOUT);
                        handle_client_event(&text, &mut sender, user_id, state).await;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        heartbeat_sleep.as_mut().reset(Instant::now() + HEARTBEAT_TIMEOUT);
                    }
                    Some(Ok(Message::Binary(_))) => {
                        tracing::debug!(user_id, "ignoring binary frame");
                    }
                    Some(Ok(Message::Close(_))) => break "client close frame",
                    Some(Err(_)) => break "websocket receive error",
                    None => break "websocket stream ended",
                }
            }
            event = outbound_rx.recv() => {
                match event {
                    Some(event) => {
                        if send_event(&mut sender, &event).await.is_err() {
                            break "websocket send error";
                        }
                    }
                    // Registry dropped our handle (we were replaced and the
                    // newer connection has since unregistered); nothing left
                    // to deliver.
                    None => break "outbound channel closed",
                }
            }
            () = &mut heartbeat_sleep => break "heartbeat timeout",
            _ = ping_interval.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break "websocket ping send error";
                }
            }
        }
    }
}

/// Map a handler failure to the error event shown to the acting client.
/// Store failures surface as a retryable error; internals stay out of the
/// payload.
fn error_event(err: &ChatError) -> ServerEvent {
    let message = match err {
        ChatError::Validation(detail) => detail.clone(),
        ChatError::NotFound => "conversation or message not found".to_string(),
        ChatError::Database(_) => "message could not be saved, please retry".to_string(),
    };
    ServerEvent::MessageError { message }
}

/// Parse and dispatch one inbound frame. Every failure path ends here as a
/// `message:error` to the acting client; nothing propagates out of the
/// handler, so one bad event can never tear down the session loop.
async fn handle_client_event(
    text: &str,
    sender: &mut (impl SinkExt<Message> + Unpin),
    user_id: &str,
    state: &AppState,
) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(user_id, "rejected malformed event: {e}");
            let _ = send_event(
                sender,
                &ServerEvent::MessageError {
                    message: "unrecognized event payload".to_string(),
                },
            )
            .await;
            return;
        }
    };

    match event {
        ClientEvent::SendMessage(payload) => {
            handle_send(payload, sender, user_id, state).await;
        }
        ClientEvent::TypingStart(peer) => {
            // Transient: delivered only while the peer is online, silently
            // dropped otherwise.
            if let Some(handle) = state.presence.lookup(&peer.receiver_id) {
                handle.send(ServerEvent::UserTyping {
                    user_id: user_id.to_string(),
                });
            }
        }
        ClientEvent::TypingStop(peer) => {
            if let Some(handle) = state.presence.lookup(&peer.receiver_id) {
                handle.send(ServerEvent::UserStoppedTyping {
                    user_id: user_id.to_string(),
                });
            }
        }
        ClientEvent::MessagesRead(payload) => {
            handle_mark_read(payload, sender, user_id, state).await;
        }
        ClientEvent::GetOnlineUsers(_) => {
            let _ = send_event(
                sender,
                &ServerEvent::OnlineUsers {
                    users: state.presence.all_online(),
                },
            )
            .await;
        }
    }
}

/// The send path. The sender always gets exactly one ack: `message:sent`
/// with the stored row, or `message:error`. Delivery to the receiver and
/// the cache write never affect that guarantee.
async fn handle_send(
    payload: SendMessagePayload,
    sender: &mut (impl SinkExt<Message> + Unpin),
    user_id: &str,
    state: &AppState,
) {
    let outgoing = OutgoingMessage {
        receiver_id: payload.receiver_id,
        content: payload.content,
        message_type: payload.message_type,
        attachment: payload.attachment,
    };

    match chat::send_message(state, user_id, outgoing).await {
        Ok(stored) => {
            if let Some(handle) = state.presence.lookup(&stored.receiver_id) {
                handle.send(ServerEvent::ReceiveMessage(stored.clone()));
            }
            let _ = send_event(sender, &ServerEvent::MessageSent(stored.clone())).await;
            responder::on_message_persisted(state, &stored);
        }
        Err(err) => {
            if matches!(err, ChatError::Database(_)) {
                tracing::error!(user_id, "send failed at the store: {err}");
            } else {
                tracing::debug!(user_id, "send rejected: {err}");
            }
            let _ = send_event(sender, &error_event(&err)).await;
        }
    }
}

async fn handle_mark_read(
    payload: MarkReadPayload,
    sender: &mut (impl SinkExt<Message> + Unpin),
    user_id: &str,
    state: &AppState,
) {
    if payload.conversation_id.is_empty() {
        let _ = send_event(
            sender,
            &ServerEvent::MessageError {
                message: "conversationId is required".to_string(),
            },
        )
        .await;
        return;
    }

    match chat::mark_read(state, &payload.conversation_id, user_id).await {
        Ok(_changed) => {
            // Tell the original sender their messages were read, if online.
            if let Some(handle) = state.presence.lookup(&payload.sender_id) {
                handle.send(ServerEvent::MessagesRead {
                    conversation_id: payload.conversation_id,
                    read_by: user_id.to_string(),
                });
            }
        }
        Err(ChatError::NotFound) => {
            tracing::warn!(
                user_id,
                conversation_id = %payload.conversation_id,
                "mark-read on unknown conversation"
            );
        }
        Err(err) => {
            tracing::error!(user_id, "mark-read failed: {err}");
            let _ = send_event(sender, &error_event(&err)).await;
        }
    }
}
