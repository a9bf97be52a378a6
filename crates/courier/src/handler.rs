//! Per-connection handler: decode requests, run them, stream conversations.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive an envelope → decode the request
//!   2. Unary requests run under the request timeout and get one reply
//!      carrying the request's `seq`
//!   3. `Subscribe` switches the connection into streaming: events carry
//!      the subscribe's `seq` until `Unsubscribe`, disconnect, replacement
//!      or shutdown, then a `StreamEnd` closes the stream

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use courier_auth::{PasswordKdf, TokenSigner};
use courier_protocol::{
    Codec, EndReason, Envelope, Payload, PhoneNumber, ProtocolError, Request, Response,
    StreamEvent,
};
use courier_store::Store;
use courier_transport::{Connection, WebSocketConnection};

use crate::server::ServerState;
use crate::{CourierError, SessionCore};

/// What the read loop should do after a request.
enum Flow {
    Continue,
    Disconnect,
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<S, T, K, C>(
    conn: WebSocketConnection,
    state: Arc<ServerState<S, T, K, C>>,
) -> Result<(), CourierError>
where
    S: Store,
    T: TokenSigner,
    K: PasswordKdf,
    C: Codec,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, peer = %conn.peer_addr(), "handling new connection");

    loop {
        let data = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            received = conn.recv() => match received {
                Ok(Some(data)) => data,
                Ok(None) => {
                    tracing::debug!(%conn_id, "connection closed cleanly");
                    break;
                }
                Err(e) => {
                    tracing::debug!(%conn_id, error = %e, "recv error");
                    break;
                }
            },
        };

        let Some((seq, request)) = decode_request(&conn, &state.codec, &data).await? else {
            continue;
        };
        tracing::debug!(%conn_id, seq, kind = request.kind(), "request");

        match request {
            Request::Subscribe {
                token,
                user_a,
                user_b,
                since,
            } => {
                let flow =
                    stream_conversation(&conn, &state, seq, &token, &user_a, &user_b, since)
                        .await?;
                if matches!(flow, Flow::Disconnect) {
                    break;
                }
            }
            // Nothing is streaming, so there is nothing to end.
            Request::Unsubscribe => {
                send_response(&conn, &state.codec, seq, Response::Unsubscribed).await?;
            }
            unary => {
                let response = run_unary(&state, unary).await;
                send_response(&conn, &state.codec, seq, response).await?;
            }
        }
    }

    let _ = conn.close().await;
    Ok(())
}

/// Decodes one frame into a request. Undecodable frames are answered with
/// `InvalidArgument` and yield `None`.
async fn decode_request(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    data: &[u8],
) -> Result<Option<(u64, Request)>, CourierError> {
    let envelope: Envelope = match codec.decode(data) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(conn_id = %conn.id(), error = %e, "failed to decode envelope");
            send_error(conn, codec, 0, &e.into()).await?;
            return Ok(None);
        }
    };

    match envelope.payload {
        Payload::Request(request) => Ok(Some((envelope.seq, request))),
        _ => {
            let err = ProtocolError::InvalidMessage("clients may only send requests".into());
            send_error(conn, codec, envelope.seq, &err.into()).await?;
            Ok(None)
        }
    }
}

/// Runs a unary request under the request timeout and turns the outcome
/// into a reply.
async fn run_unary<S, T, K, C>(state: &ServerState<S, T, K, C>, request: Request) -> Response
where
    S: Store,
    T: TokenSigner,
    K: PasswordKdf,
    C: Codec,
{
    let kind = request.kind();
    match with_timeout(state, dispatch(&state.core, request)).await {
        Ok(response) => response,
        Err(e) => error_response(kind, &e),
    }
}

async fn with_timeout<S, T, K, C, R>(
    state: &ServerState<S, T, K, C>,
    fut: impl Future<Output = Result<R, CourierError>>,
) -> Result<R, CourierError> {
    tokio::time::timeout(state.request_timeout, fut)
        .await
        .map_err(|_| CourierError::Timeout)?
}

/// Maps a unary request onto the session core.
async fn dispatch<S, T, K>(
    core: &SessionCore<S, T, K>,
    request: Request,
) -> Result<Response, CourierError>
where
    S: Store,
    T: TokenSigner,
    K: PasswordKdf,
{
    match request {
        Request::Register {
            username,
            phone,
            password,
        } => {
            let token = core.register(&username, &phone, &password).await?;
            Ok(Response::Registered { token })
        }
        Request::Login { phone, password } => {
            let token = core.login(&phone, &password).await?;
            Ok(Response::LoggedIn { token })
        }
        Request::SendDirectMessage {
            token,
            sender,
            receiver,
            content,
        } => {
            let message = core
                .send_direct_message(&token, &sender, &receiver, &content)
                .await?;
            Ok(Response::Sent {
                id: message.id,
                timestamp: message.timestamp,
            })
        }
        Request::GetDms {
            token,
            user_a,
            user_b,
            since,
        } => {
            let messages = core.get_dms(&token, &user_a, &user_b, since).await?;
            Ok(Response::Dms { messages })
        }
        Request::GetUserInfo { token, phone } => {
            let profile = core.get_user_info(&token, &phone).await?;
            Ok(Response::UserInfo {
                username: profile.username,
                phone: profile.phone,
            })
        }
        Request::Subscribe { .. } | Request::Unsubscribe => Err(ProtocolError::InvalidMessage(
            "streaming requests are not unary".into(),
        )
        .into()),
    }
}

/// Subscribes and forwards the conversation until it ends.
///
/// While streaming the connection stays full duplex: unary requests are
/// still answered, `Unsubscribe` ends the stream, and a second `Subscribe`
/// is refused.
async fn stream_conversation<S, T, K, C>(
    conn: &WebSocketConnection,
    state: &ServerState<S, T, K, C>,
    stream_seq: u64,
    token: &str,
    user_a: &PhoneNumber,
    user_b: &PhoneNumber,
    since: Option<DateTime<Utc>>,
) -> Result<Flow, CourierError>
where
    S: Store,
    T: TokenSigner,
    K: PasswordKdf,
    C: Codec,
{
    let conn_id = conn.id();
    let subscribed = with_timeout(state, state.core.subscribe(token, user_a, user_b, since)).await;
    let mut stream = match subscribed {
        Ok(stream) => stream,
        Err(e) => {
            send_response(conn, &state.codec, stream_seq, error_response("subscribe", &e)).await?;
            return Ok(Flow::Continue);
        }
    };
    send_response(conn, &state.codec, stream_seq, Response::Subscribed).await?;
    tracing::info!(%conn_id, key = %stream.key(), "stream started");

    let (end, flow) = loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break (Some(EndReason::Shutdown), Flow::Disconnect),

            next = stream.next() => match next {
                Some(message) => {
                    send_event(conn, &state.codec, stream_seq, StreamEvent::Message { message }).await?;
                }
                None => {
                    let reason = if state.shutdown.is_cancelled() {
                        EndReason::Shutdown
                    } else {
                        EndReason::ChannelClosed
                    };
                    break (Some(reason), Flow::Continue);
                }
            },

            received = conn.recv() => {
                let data = match received {
                    Ok(Some(data)) => data,
                    Ok(None) | Err(_) => break (None, Flow::Disconnect),
                };
                let Some((seq, request)) = decode_request(conn, &state.codec, &data).await? else {
                    continue;
                };
                match request {
                    Request::Unsubscribe => {
                        stream.close();
                        send_event(
                            conn,
                            &state.codec,
                            stream_seq,
                            StreamEvent::StreamEnd { reason: EndReason::Unsubscribed },
                        )
                        .await?;
                        send_response(conn, &state.codec, seq, Response::Unsubscribed).await?;
                        break (None, Flow::Continue);
                    }
                    Request::Subscribe { .. } => {
                        let err = ProtocolError::InvalidMessage("already streaming".into());
                        send_error(conn, &state.codec, seq, &err.into()).await?;
                    }
                    unary => {
                        let response = run_unary(state, unary).await;
                        send_response(conn, &state.codec, seq, response).await?;
                    }
                }
            }
        }
    };

    stream.close();
    tracing::info!(%conn_id, key = %stream.key(), reason = ?end, "stream ended");
    if let Some(reason) = end {
        send_event(conn, &state.codec, stream_seq, StreamEvent::StreamEnd { reason }).await?;
    }
    Ok(flow)
}

/// Builds an error reply and logs the internal cause.
fn error_response(kind: &'static str, err: &CourierError) -> Response {
    let code = err.status();
    if code == courier_protocol::StatusCode::Internal {
        tracing::error!(kind, error = %err, "request failed");
    } else {
        tracing::debug!(kind, %code, error = %err, "request rejected");
    }
    Response::Error {
        code,
        message: err.public_message(),
    }
}

async fn send_response(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    seq: u64,
    response: Response,
) -> Result<(), CourierError> {
    send_envelope(conn, codec, seq, Payload::Response(response)).await
}

async fn send_event(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    seq: u64,
    event: StreamEvent,
) -> Result<(), CourierError> {
    send_envelope(conn, codec, seq, Payload::Event(event)).await
}

async fn send_error(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    seq: u64,
    err: &CourierError,
) -> Result<(), CourierError> {
    send_response(conn, codec, seq, error_response("decode", err)).await
}

async fn send_envelope(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    seq: u64,
    payload: Payload,
) -> Result<(), CourierError> {
    let bytes = codec.encode(&Envelope { seq, payload })?;
    conn.send(&bytes).await?;
    Ok(())
}
