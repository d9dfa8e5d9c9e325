//! WebSocket handler — the connection gateway.
//!
//! DESIGN
//! ======
//! On upgrade, generates a connection ID and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Board events queued for this connection → forward to client
//!
//! Handlers validate the payload and call into the bound `Board`, which
//! applies the mutation and fans the resulting event out to peers under its
//! own lock. Handlers only decide what the originating connection hears back.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session.connected` with `connectionId`
//! 2. `board.join` → bind to a board, reply with `board.sync`
//! 3. Intents → dispatch → `done` or `error` reply to the sender
//! 4. Close → part the bound board → cleanup

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{self, Data, ErrorCode, Frame, Status, to_data};
use crate::primitive::Primitive;
use crate::services::board::Board;
use crate::services::fanout::ConnectionId;
use crate::services::persistence::StoreError;
use crate::services::presence::{Presence, PresencePatch, SessionId};
use crate::state::AppState;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("malformed join: {0}")]
    MalformedJoin(String),
    #[error("not joined to a board")]
    NotJoined,
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("unknown syscall: {0}")]
    UnknownSyscall(String),
    #[error("board unavailable: {0}")]
    BoardUnavailable(#[from] StoreError),
}

impl ErrorCode for GatewayError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidFrame(_) => "E_INVALID_FRAME",
            Self::MalformedJoin(_) => "E_MALFORMED_JOIN",
            Self::NotJoined => "E_NOT_JOINED",
            Self::MalformedPayload(_) => "E_MALFORMED_PAYLOAD",
            Self::UnknownSyscall(_) => "E_UNKNOWN_SYSCALL",
            Self::BoardUnavailable(_) => "E_BOARD_UNAVAILABLE",
        }
    }
}

/// A connection's board binding, set by a successful join.
struct Binding {
    board: Arc<Board>,
    session_id: SessionId,
}

/// What the originating connection hears back. Peers are served by the board.
enum Outcome {
    /// Empty `done` reply.
    Done,
    /// A fully built reply frame.
    Reply(Frame),
    /// No reply (cursor traffic).
    Silent,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinPayload {
    #[serde(default)]
    board_id: Option<String>,
    presence: Presence,
}

#[derive(Deserialize)]
struct UpdatePayload {
    id: String,
    changes: serde_json::Value,
}

#[derive(Deserialize)]
struct DeletePayload {
    id: String,
}

#[derive(Deserialize)]
struct CursorPayload {
    x: f64,
    y: f64,
}

#[derive(Deserialize)]
struct RenamePayload {
    name: String,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();

    // Per-connection queue for board events published by peers.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.config.client_queue_capacity);

    let welcome =
        Frame::request(frame::SESSION_CONNECTED, Data::new()).with_data("connectionId", connection_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(%connection_id, "ws: client connected");

    let mut binding: Option<Binding> = None;

    'conn: loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, &mut binding, connection_id, &client_tx, text.as_str()).await;
                        for reply in replies {
                            if send_frame(&mut socket, &reply).await.is_err() {
                                break 'conn;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(event) = client_rx.recv() => {
                if send_frame(&mut socket, &event).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(binding) = binding.take() {
        binding.board.part(connection_id).await;
    }
    info!(%connection_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
///
/// Transport concerns stay in `run_ws`, so tests can drive dispatch with
/// plain channels.
async fn process_inbound_text(
    state: &AppState,
    binding: &mut Option<Binding>,
    connection_id: ConnectionId,
    client_tx: &mpsc::Sender<Frame>,
    text: &str,
) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%connection_id, error = %e, "ws: invalid inbound frame");
            let err = GatewayError::InvalidFrame(e.to_string());
            let err_frame = Frame::request(frame::GATEWAY_ERROR, Data::new())
                .with_status(Status::Error)
                .with_data(frame::FRAME_CODE, err.error_code())
                .with_data(frame::FRAME_MESSAGE, err.to_string());
            return vec![err_frame];
        }
    };

    if let Some(bound) = binding.as_ref() {
        req.from = Some(bound.session_id.clone());
        if req.board_id.is_none() {
            req.board_id = Some(bound.board.id().to_owned());
        }
    }

    let prefix = req.prefix();
    if prefix != "cursor" {
        info!(%connection_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");
    }

    let result = match prefix {
        "board" => handle_board(state, binding, connection_id, client_tx, &req).await,
        "primitive" => handle_primitive(binding.as_ref(), connection_id, &req).await,
        "cursor" => Ok(handle_cursor(binding.as_ref(), connection_id, &req).await),
        "presence" => handle_presence(binding.as_ref(), connection_id, &req).await,
        "history" => handle_history(binding.as_ref(), &req).await,
        _ => Err(req.error_from(&GatewayError::UnknownSyscall(req.syscall.clone()))),
    };

    match result {
        Ok(Outcome::Done) => vec![req.done()],
        Ok(Outcome::Reply(reply)) => vec![reply],
        Ok(Outcome::Silent) => vec![],
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// BOARD HANDLERS
// =============================================================================

async fn handle_board(
    state: &AppState,
    binding: &mut Option<Binding>,
    connection_id: ConnectionId,
    client_tx: &mpsc::Sender<Frame>,
    req: &Frame,
) -> Result<Outcome, Frame> {
    if req.syscall != frame::JOIN {
        return Err(req.error_from(&GatewayError::UnknownSyscall(req.syscall.clone())));
    }

    let payload: JoinPayload = req
        .parse_data()
        .map_err(|e| req.error_from(&GatewayError::MalformedJoin(e.to_string())))?;
    let board_id = payload
        .board_id
        .or_else(|| req.board_id.clone())
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| req.error_from(&GatewayError::MalformedJoin("boardId required".into())))?;
    if payload.presence.session_id.trim().is_empty() {
        return Err(req.error_from(&GatewayError::MalformedJoin("presence.sessionId required".into())));
    }

    // Part the current board before binding to the new one.
    if let Some(previous) = binding.take() {
        previous.board.part(connection_id).await;
    }

    let board = state
        .registry
        .get_or_create(&board_id)
        .await
        .map_err(|e| req.error_from(&GatewayError::from(e)))?;

    let session_id = payload.presence.session_id.clone();
    let sync = board
        .join(connection_id, payload.presence, client_tx.clone())
        .await;
    *binding = Some(Binding { board, session_id });

    let reply = Frame::request(frame::SYNC, to_data(&sync))
        .with_board_id(board_id)
        .with_parent(req.id)
        .with_status(Status::Done);
    Ok(Outcome::Reply(reply))
}

// =============================================================================
// PRIMITIVE HANDLERS
// =============================================================================

async fn handle_primitive(binding: Option<&Binding>, connection_id: ConnectionId, req: &Frame) -> Result<Outcome, Frame> {
    let Some(bound) = binding else {
        return Err(req.error_from(&GatewayError::NotJoined));
    };
    let malformed = |e: serde_json::Error| req.error_from(&GatewayError::MalformedPayload(e.to_string()));

    let result = match req.syscall.as_str() {
        frame::PRIMITIVE_CREATE => {
            let primitive: Primitive = req.parse_data().map_err(malformed)?;
            bound.board.create_primitive(connection_id, primitive).await
        }
        frame::PRIMITIVE_UPDATE => {
            let payload: UpdatePayload = req.parse_data().map_err(malformed)?;
            bound
                .board
                .update_primitive(connection_id, &payload.id, payload.changes)
                .await
        }
        frame::PRIMITIVE_DELETE => {
            let payload: DeletePayload = req.parse_data().map_err(malformed)?;
            bound
                .board
                .delete_primitive(connection_id, &payload.id)
                .await
        }
        _ => return Err(req.error_from(&GatewayError::UnknownSyscall(req.syscall.clone()))),
    };

    result.map(|()| Outcome::Done).map_err(|e| {
        warn!(%connection_id, board_id = %bound.board.id(), syscall = %req.syscall, error = %e, "ws: intent rejected");
        req.error_from(&e)
    })
}

// =============================================================================
// CURSOR HANDLERS
// =============================================================================

async fn handle_cursor(binding: Option<&Binding>, connection_id: ConnectionId, req: &Frame) -> Outcome {
    let Some(bound) = binding else {
        return Outcome::Silent;
    };
    if req.syscall != frame::CURSOR_MOVE {
        return Outcome::Silent;
    }
    let Ok(CursorPayload { x, y }) = req.parse_data() else {
        return Outcome::Silent;
    };
    bound.board.move_cursor(connection_id, x, y).await;
    Outcome::Silent
}

// =============================================================================
// PRESENCE HANDLERS
// =============================================================================

async fn handle_presence(binding: Option<&Binding>, connection_id: ConnectionId, req: &Frame) -> Result<Outcome, Frame> {
    let Some(bound) = binding else {
        return Err(req.error_from(&GatewayError::NotJoined));
    };
    let malformed = |e: serde_json::Error| req.error_from(&GatewayError::MalformedPayload(e.to_string()));

    let patch = match req.syscall.as_str() {
        frame::PRESENCE_RENAME => {
            let RenamePayload { name } = req.parse_data().map_err(malformed)?;
            PresencePatch { name: Some(name), color: None }
        }
        frame::PRESENCE_UPDATE => req.parse_data::<PresencePatch>().map_err(malformed)?,
        _ => return Err(req.error_from(&GatewayError::UnknownSyscall(req.syscall.clone()))),
    };
    if patch.is_empty() {
        return Ok(Outcome::Done);
    }

    bound
        .board
        .update_presence(connection_id, &req.syscall, patch)
        .await;
    Ok(Outcome::Done)
}

// =============================================================================
// HISTORY HANDLERS
// =============================================================================

async fn handle_history(binding: Option<&Binding>, req: &Frame) -> Result<Outcome, Frame> {
    let Some(bound) = binding else {
        return Err(req.error_from(&GatewayError::NotJoined));
    };

    let result = match req.syscall.as_str() {
        frame::UNDO => bound.board.undo().await,
        frame::REDO => bound.board.redo().await,
        _ => return Err(req.error_from(&GatewayError::UnknownSyscall(req.syscall.clone()))),
    };
    result.map(|()| Outcome::Done).map_err(|e| {
        debug!(board_id = %bound.board.id(), syscall = %req.syscall, error = %e, "ws: history no-op");
        req.error_from(&e)
    })
}

// =============================================================================
// TRANSPORT
// =============================================================================

async fn send_frame(socket: &mut WebSocket, out: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(out) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if out.syscall != frame::CURSOR_MOVE {
        if out.status == Status::Error {
            let code = out
                .data
                .get(frame::FRAME_CODE)
                .and_then(|v| v.as_str())
                .unwrap_or("-");
            warn!(id = %out.id, syscall = %out.syscall, code, "ws: send frame status=Error");
        } else {
            debug!(id = %out.id, syscall = %out.syscall, status = ?out.status, "ws: send frame");
        }
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
