//! Per-job progress stream over WebSocket.
//!
//! Each text frame is one JSON-encoded [`ProgressEvent`]. The first frame is
//! always a `catch_up` snapshot; the server closes the socket after the
//! terminal event, or when the client falls too far behind.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use melon_core::job::Job;
use melon_core::progress::ProgressEvent;
use melon_core::types::JobId;
use melon_events::Subscription;

use crate::ws::manager::WsManager;

/// Where the events of a stream come from.
pub enum StreamSource {
    /// A job still tracked by the runner.
    Live(Subscription),
    /// A job known only from history: one catch-up frame, then close.
    Stored(Job),
}

/// Serve one progress stream until it ends or the client disconnects.
pub async fn serve(socket: WebSocket, job_id: JobId, source: StreamSource, ws_manager: Arc<WsManager>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let mut control = ws_manager.add(conn_id.clone(), job_id).await;
    let watchers = ws_manager.watchers(job_id).await;
    tracing::info!(conn_id = %conn_id, job_id = %job_id, watchers, "Progress stream connected");
    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let mut send_task = tokio::spawn(async move {
        let mut subscription = match source {
            StreamSource::Live(subscription) => subscription,
            StreamSource::Stored(job) => {
                let _ = send_event(&mut sink, &stored_catch_up(&job)).await;
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
        };
        loop {
            tokio::select! {
                event = subscription.next() => match event {
                    Some(event) => {
                        if send_event(&mut sink, &event).await.is_err() {
                            tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                            return;
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    }
                },
                frame = control.recv() => match frame {
                    Some(frame) => {
                        let closing = matches!(frame, Message::Close(_));
                        if sink.send(frame).await.is_err() || closing {
                            return;
                        }
                    }
                    None => return,
                },
            }
        }
    });

    let recv_conn_id = conn_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = stream.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(Message::Pong(_)) => {
                    tracing::trace!(conn_id = %recv_conn_id, "Pong received");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(conn_id = %recv_conn_id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    // Closing the connection drops the subscription.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    ws_manager.remove(&conn_id).await;
    tracing::info!(conn_id = %conn_id, job_id = %job_id, "Progress stream disconnected");
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &ProgressEvent,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).map_err(axum::Error::new)?;
    sink.send(Message::Text(text.into())).await
}

fn stored_catch_up(job: &Job) -> ProgressEvent {
    ProgressEvent::CatchUp {
        state: job.state,
        percent: job.progress_percent,
        log_tail: job.log_tail.clone(),
        summary: job.summary.clone(),
    }
}
