use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use domain::error::{SessionError, TaskError};
use domain::model::entity::{PendingUpload, SessionId, SubmitRequest, TaskId};
use domain::service::{BeginOutcome, BlobStore, TaskManager, UploadHandle};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::TokenValidator;
use crate::config::ServerConfig;
use crate::protocol::message::{
    AuthData, CancelData, InboundEnvelope, OutboundEnvelope, TaskStatusData, UploadChunkData, UploadDataData,
    UploadMode, UploadRequestData,
};
use crate::session::registry::{SessionHandle, SessionRegistry};
use crate::session::upload;

/// Everything a connection handler needs, wired once in `ServiceProvider`
/// and shared read-only across every socket.
pub struct ConnectionContext {
    pub config: Arc<ServerConfig>,
    pub task_manager: Arc<dyn TaskManager>,
    pub blob_store: Arc<dyn BlobStore>,
    pub registry: Arc<SessionRegistry>,
    pub token_validator: Arc<dyn TokenValidator>,
}

/// Rejects a connection once `max_connections` is already reached (§6, §7
/// `MaxConnections`). The handshake itself has already succeeded by the time
/// axum hands us the socket, so the rejection is a normal envelope followed
/// by an immediate close rather than a refused upgrade.
pub async fn reject_over_capacity(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Text(
            OutboundEnvelope::error("MaxConnections", "server connection limit reached", None).to_text(),
        ))
        .await;
    let _ = socket.close().await;
}

/// One full WebSocket conversation (§4.2): demultiplexes inbound messages,
/// assembles uploads, and relays whatever the task manager fans out through
/// the registry's outbound channel, until the peer disconnects or the
/// heartbeat/timeout discipline closes the connection.
pub async fn handle_socket(socket: WebSocket, ctx: Arc<ConnectionContext>) {
    let connection_id: SessionId = Uuid::new_v4();
    let (handle, mut outbound_rx) = ctx.registry.register(connection_id);

    let (mut ws_sink, mut ws_stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if ws_sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let _ = handle.outbound_tx.send(OutboundEnvelope::connected(connection_id).to_text()).await;
    tracing::info!(%connection_id, "session accepted");

    let heartbeat_interval = Duration::from_secs(ctx.config.heartbeat_interval_s.max(1));
    let connection_timeout = Duration::from_secs(ctx.config.connection_timeout_s.max(1));
    let mut ticker = tokio::time::interval(heartbeat_interval);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            frame = ws_stream.next() => {
                let Some(Ok(frame)) = frame else { break };
                last_seen = Instant::now();
                handle.state.lock().await.touch();
                match frame {
                    Message::Text(text) => {
                        if let Err(e) = dispatch_inbound(&ctx, &handle, connection_id, &text).await {
                            tracing::debug!(%connection_id, error = %e, "inbound message rejected");
                        }
                    }
                    Message::Ping(_) | Message::Pong(_) => {}
                    Message::Close(_) => break,
                    Message::Binary(_) => {
                        let _ = handle.outbound_tx.try_send(
                            OutboundEnvelope::error(
                                "InvalidMessage",
                                "binary frames are not accepted; base64-encode inside a text envelope",
                                None,
                            )
                            .to_text(),
                        );
                    }
                }
            }
            _ = ticker.tick() => {
                if last_seen.elapsed() > connection_timeout {
                    tracing::info!(%connection_id, "connection timed out");
                    break;
                }
                let _ = handle.outbound_tx.try_send(OutboundEnvelope::pong().to_text());
            }
        }
    }

    writer.abort();
    teardown(&ctx, connection_id, &handle).await;
    tracing::info!(%connection_id, "session closed");
}

/// Purges the session's subscriptions on disconnect without touching any
/// task's progress (§3, Session invariants) — results still land in the
/// cache for whichever subscribers remain. If the session disconnected with
/// an upload still in flight, that task never reached `blob_ready` and no
/// one else can finish it, so it is abandoned here rather than left `Pending`
/// forever (domain/src/service/task_manager.rs's `abandon` doc comment names
/// exactly this case), and its blob-store temp file is discarded.
async fn teardown(ctx: &ConnectionContext, connection_id: SessionId, handle: &SessionHandle) {
    let (subscribed, stranded_upload) = {
        let mut session = handle.state.lock().await;
        let subscribed: Vec<TaskId> = session.subscribed_task_ids.iter().copied().collect();
        (subscribed, session.pending_upload.take())
    };

    for task_id in subscribed {
        ctx.task_manager.unsubscribe(task_id, connection_id).await;
    }

    if let Some(pending) = stranded_upload {
        ctx.task_manager.abandon(pending.task_id).await;
        let _ = tokio::fs::remove_file(&pending.temp_path).await;
    }

    ctx.registry.deregister(connection_id);
}

async fn dispatch_inbound(
    ctx: &Arc<ConnectionContext>,
    handle: &Arc<SessionHandle>,
    connection_id: SessionId,
    text: &str,
) -> Result<(), SessionError> {
    let envelope: InboundEnvelope =
        serde_json::from_str(text).map_err(|e| SessionError::InvalidMessage(e.to_string()))?;

    if ctx.config.auth.enabled && envelope.kind != "auth" && envelope.kind != "ping" {
        let authenticated = handle.state.lock().await.authenticated;
        if !authenticated {
            let _ = handle
                .outbound_tx
                .try_send(OutboundEnvelope::error("AuthFailed", "authenticate before issuing other commands", None).to_text());
            return Ok(());
        }
    }

    match envelope.kind.as_str() {
        "auth" => handle_auth(ctx, handle, envelope.data).await,
        "upload_request" => handle_upload_request(ctx, handle, connection_id, envelope.data).await,
        "upload_data" => handle_upload_data(ctx, handle, envelope.data).await,
        "upload_chunk" => handle_upload_chunk(ctx, handle, envelope.data).await,
        "task_status" => handle_task_status(ctx, handle, connection_id, envelope.data).await,
        "cancel" => handle_cancel(ctx, handle, connection_id, envelope.data).await,
        "ping" => {
            let _ = handle.outbound_tx.try_send(OutboundEnvelope::pong().to_text());
            Ok(())
        }
        other => {
            let _ = handle
                .outbound_tx
                .try_send(OutboundEnvelope::error("InvalidMessage", &format!("unrecognized message type: {other}"), None).to_text());
            Ok(())
        }
    }
}

async fn handle_auth(ctx: &Arc<ConnectionContext>, handle: &Arc<SessionHandle>, data: Value) -> Result<(), SessionError> {
    let data: AuthData = serde_json::from_value(data).map_err(|e| SessionError::InvalidMessage(e.to_string()))?;
    match ctx.token_validator.validate(&data.token) {
        Some(subject) => {
            handle.state.lock().await.authenticated = true;
            tracing::debug!(%subject, "session authenticated");
            let _ = handle.outbound_tx.send(OutboundEnvelope::auth_ok().to_text()).await;
        }
        None => {
            let _ = handle
                .outbound_tx
                .send(OutboundEnvelope::error("AuthFailed", "invalid authentication token", None).to_text())
                .await;
        }
    }
    Ok(())
}

fn validate_upload_request(config: &ServerConfig, data: &UploadRequestData) -> Result<(), TaskError> {
    let limit = config.max_file_size_bytes();
    if data.file_size > limit {
        return Err(TaskError::FileTooLarge { size: data.file_size, limit });
    }
    let extension = std::path::Path::new(&data.file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();
    if !config.allowed_extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&extension)) {
        return Err(TaskError::UnsupportedFormat(extension));
    }
    Ok(())
}

async fn handle_upload_request(
    ctx: &Arc<ConnectionContext>,
    handle: &Arc<SessionHandle>,
    connection_id: SessionId,
    data: Value,
) -> Result<(), SessionError> {
    let data: UploadRequestData = serde_json::from_value(data).map_err(|e| SessionError::InvalidMessage(e.to_string()))?;

    if let Err(e) = validate_upload_request(&ctx.config, &data) {
        let _ = handle.outbound_tx.send(OutboundEnvelope::error(e.code(), &e.to_string(), None).to_text()).await;
        return Ok(());
    }

    let req = SubmitRequest {
        file_name: data.file_name.clone(),
        file_size: data.file_size,
        file_hash: data.file_hash.clone(),
        output_format: data.output_format,
        force_refresh: data.force_refresh,
        creator_session_id: connection_id,
    };

    match ctx.task_manager.begin_submission(req).await {
        Ok(BeginOutcome::CacheHit { task_id, payload, .. }) => {
            handle.state.lock().await.note_created(task_id);
            let mut rendered: Value = serde_json::from_str(&payload).unwrap_or_default();
            if let Value::Object(map) = &mut rendered {
                map.entry("task_id").or_insert_with(|| serde_json::json!(task_id));
            }
            let _ = handle.outbound_tx.send(OutboundEnvelope { kind: "task_complete", data: rendered }.to_text()).await;
        }
        Ok(BeginOutcome::PendingUpload { task_id }) => {
            handle.state.lock().await.note_created(task_id);
            reserve_blob_upload(ctx, handle, task_id, &data).await;
            let _ = handle.outbound_tx.send(OutboundEnvelope::upload_ready(task_id).to_text()).await;
        }
        Err(e) => {
            let _ = handle.outbound_tx.send(OutboundEnvelope::error(e.code(), &e.to_string(), None).to_text()).await;
        }
    }
    Ok(())
}

/// Reserves the blob-store temp file up front for both upload modes: a
/// single-shot `upload_data` is just the degenerate case of one chunk
/// spanning the whole file, so both paths converge on the same
/// `write_chunk_and_maybe_finalize` below.
async fn reserve_blob_upload(ctx: &Arc<ConnectionContext>, handle: &Arc<SessionHandle>, task_id: TaskId, data: &UploadRequestData) {
    let (chunk_size, total_chunks) = match data.upload_mode {
        UploadMode::Chunked => (data.chunk_size.unwrap_or_else(|| data.file_size.max(1)), data.total_chunks.unwrap_or(1).max(1)),
        UploadMode::Single => (data.file_size.max(1), 1),
    };

    match ctx.blob_store.begin_upload(&data.file_hash, data.file_size).await {
        Ok(upload_handle) => {
            let pending = PendingUpload::new(task_id, data.file_size, data.file_hash.clone(), chunk_size, total_chunks, upload_handle.temp_path);
            handle.state.lock().await.pending_upload = Some(pending);
        }
        Err(e) => {
            let _ = handle.outbound_tx.send(OutboundEnvelope::error("InvalidMessage", &e.to_string(), Some(task_id)).to_text()).await;
        }
    }
}

async fn handle_upload_data(ctx: &Arc<ConnectionContext>, handle: &Arc<SessionHandle>, data: Value) -> Result<(), SessionError> {
    let data: UploadDataData = serde_json::from_value(data).map_err(|e| SessionError::InvalidMessage(e.to_string()))?;
    let bytes = match BASE64.decode(&data.file_data) {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = handle
                .outbound_tx
                .send(OutboundEnvelope::error("InvalidMessage", &format!("invalid base64: {e}"), Some(data.task_id)).to_text())
                .await;
            return Ok(());
        }
    };
    write_chunk_and_maybe_finalize(ctx, handle, data.task_id, 0, bytes).await
}

async fn handle_upload_chunk(ctx: &Arc<ConnectionContext>, handle: &Arc<SessionHandle>, data: Value) -> Result<(), SessionError> {
    let data: UploadChunkData = serde_json::from_value(data).map_err(|e| SessionError::InvalidMessage(e.to_string()))?;
    let bytes = match BASE64.decode(&data.chunk_data) {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = handle
                .outbound_tx
                .send(OutboundEnvelope::error("InvalidMessage", &format!("invalid base64: {e}"), Some(data.task_id)).to_text())
                .await;
            return Ok(());
        }
    };
    if !upload::hash_matches(&bytes, &data.chunk_hash) {
        let _ = handle
            .outbound_tx
            .send(OutboundEnvelope::error("InvalidMessage", "chunk hash mismatch", Some(data.task_id)).to_text())
            .await;
        return Ok(());
    }
    write_chunk_and_maybe_finalize(ctx, handle, data.task_id, data.chunk_index, bytes).await
}

/// Shared tail of both upload modes: write the bytes at their offset, ack
/// the chunk (or note it as a duplicate, per §4.2), and finalize the blob
/// once every chunk has arrived.
async fn write_chunk_and_maybe_finalize(
    ctx: &Arc<ConnectionContext>,
    handle: &Arc<SessionHandle>,
    task_id: TaskId,
    chunk_index: u64,
    bytes: Vec<u8>,
) -> Result<(), SessionError> {
    struct ChunkTarget {
        hash: String,
        temp_path: std::path::PathBuf,
        chunk_size: u64,
        already_received: bool,
    }

    let target = {
        let session = handle.state.lock().await;
        let Some(pending) = session.pending_upload.as_ref().filter(|p| p.task_id == task_id) else {
            drop(session);
            let _ = handle
                .outbound_tx
                .send(OutboundEnvelope::error("UnknownTask", "no pending upload for this task", Some(task_id)).to_text())
                .await;
            return Ok(());
        };
        if chunk_index >= pending.total_chunks {
            let msg = format!("chunk index {chunk_index} out of range for {} total chunks", pending.total_chunks);
            drop(session);
            let _ = handle.outbound_tx.send(OutboundEnvelope::error("InvalidMessage", &msg, Some(task_id)).to_text()).await;
            return Ok(());
        }
        ChunkTarget {
            hash: pending.expected_hash.clone(),
            temp_path: pending.temp_path.clone(),
            chunk_size: pending.chunk_size,
            already_received: pending.received[chunk_index as usize],
        }
    };

    if target.already_received {
        let _ = handle.outbound_tx.send(OutboundEnvelope::chunk_received(task_id, chunk_index, "duplicate").to_text()).await;
        return Ok(());
    }

    let upload_handle = UploadHandle { hash: target.hash, temp_path: target.temp_path };
    let offset = upload::chunk_offset(chunk_index, target.chunk_size);
    if let Err(e) = ctx.blob_store.write_chunk(&upload_handle, offset, &bytes).await {
        let _ = handle.outbound_tx.send(OutboundEnvelope::error("InvalidMessage", &e.to_string(), Some(task_id)).to_text()).await;
        return Ok(());
    }

    let completed_upload = {
        let mut session = handle.state.lock().await;
        let Some(pending) = session.pending_upload.as_mut().filter(|p| p.task_id == task_id) else {
            return Ok(());
        };
        pending.received[chunk_index as usize] = true;
        if pending.is_complete() {
            session.pending_upload.take()
        } else {
            None
        }
    };

    let _ = handle.outbound_tx.send(OutboundEnvelope::chunk_received(task_id, chunk_index, "received").to_text()).await;

    if completed_upload.is_some() {
        finalize_upload(ctx, handle, task_id, upload_handle).await?;
    }
    Ok(())
}

async fn finalize_upload(
    ctx: &Arc<ConnectionContext>,
    handle: &Arc<SessionHandle>,
    task_id: TaskId,
    upload_handle: UploadHandle,
) -> Result<(), SessionError> {
    let outcome = ctx.blob_store.finalize(upload_handle).await;
    match outcome {
        Ok(outcome) if outcome.hash_ok => match ctx.task_manager.blob_ready(task_id).await {
            Ok(_enqueue_outcome) => {
                let _ = handle.outbound_tx.send(OutboundEnvelope::upload_complete(task_id).to_text()).await;
            }
            Err(e) => {
                let _ = handle.outbound_tx.send(OutboundEnvelope::error(e.code(), &e.to_string(), Some(task_id)).to_text()).await;
            }
        },
        Ok(_hash_mismatch) => {
            ctx.task_manager.abandon(task_id).await;
            let _ = handle
                .outbound_tx
                .send(OutboundEnvelope::error("FileHashMismatch", "assembled file hash did not match the declared hash", Some(task_id)).to_text())
                .await;
        }
        Err(e) => {
            ctx.task_manager.abandon(task_id).await;
            let _ = handle.outbound_tx.send(OutboundEnvelope::error("InvalidMessage", &e.to_string(), Some(task_id)).to_text()).await;
        }
    }
    Ok(())
}

async fn handle_task_status(
    ctx: &Arc<ConnectionContext>,
    handle: &Arc<SessionHandle>,
    connection_id: SessionId,
    data: Value,
) -> Result<(), SessionError> {
    let data: TaskStatusData = serde_json::from_value(data).map_err(|e| SessionError::InvalidMessage(e.to_string()))?;

    if let Err(e) = ctx.task_manager.subscribe(data.task_id, connection_id).await {
        let _ = handle.outbound_tx.send(OutboundEnvelope::error(e.code(), &e.to_string(), Some(data.task_id)).to_text()).await;
        return Ok(());
    }
    handle.state.lock().await.subscribed_task_ids.insert(data.task_id);

    match ctx.task_manager.task_snapshot(data.task_id).await {
        Ok(snapshot) => {
            let _ = handle
                .outbound_tx
                .send(OutboundEnvelope::task_progress_status(snapshot.task_id, snapshot.status, snapshot.retry_count).to_text())
                .await;
        }
        Err(e) => {
            let _ = handle.outbound_tx.send(OutboundEnvelope::error(e.code(), &e.to_string(), Some(data.task_id)).to_text()).await;
        }
    }
    Ok(())
}

async fn handle_cancel(
    ctx: &Arc<ConnectionContext>,
    handle: &Arc<SessionHandle>,
    connection_id: SessionId,
    data: Value,
) -> Result<(), SessionError> {
    let data: CancelData = serde_json::from_value(data).map_err(|e| SessionError::InvalidMessage(e.to_string()))?;

    match ctx.task_manager.cancel(data.task_id, connection_id).await {
        Ok(outcome) => {
            let status = match outcome {
                domain::service::CancelOutcome::Cancelled => domain::model::entity::TaskStatus::Cancelled,
                domain::service::CancelOutcome::NoEffect => domain::model::entity::TaskStatus::Processing,
            };
            let _ = handle.outbound_tx.send(OutboundEnvelope::task_progress_status(data.task_id, status, 0).to_text()).await;
        }
        Err(e) => {
            let _ = handle.outbound_tx.send(OutboundEnvelope::error(e.code(), &e.to_string(), Some(data.task_id)).to_text()).await;
        }
    }
    Ok(())
}
