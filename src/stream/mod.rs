//! Server-sent event transport for ReAct runs.
//!
//! A run executes on its own task and pushes [`StreamEvent`]s into a
//! bounded channel. The consumer side turns them into `data: <json>\n\n`
//! frames and always closes with a single `data: [DONE]\n\n`. Dropping the
//! frame stream cancels the run.

pub mod http;

use crate::agent::{ReActController, RunRequest};
use crate::types::{FailureCategory, ReActResult, RunStatus, StreamEvent};
use chrono::Utc;
use futures::Stream;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

/// Terminator frame. Sent exactly once, always last.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Serialize one event as an SSE data frame.
pub fn encode_frame(event: &StreamEvent) -> String {
    match serde_json::to_string(event) {
        Ok(json) => format!("data: {}\n\n", json),
        Err(e) => {
            warn!("Failed to encode {} event: {}", event.kind(), e);
            let fallback = StreamEvent::Error {
                iteration: event.iteration(),
                category: FailureCategory::Unavailable,
                message: "event could not be encoded".into(),
                timestamp: Utc::now(),
            };
            format!(
                "data: {}\n\n",
                serde_json::to_string(&fallback).unwrap_or_default()
            )
        }
    }
}

/// The terminal event matching a finished run.
pub fn terminal_event(result: &ReActResult) -> StreamEvent {
    match result.status {
        RunStatus::Done | RunStatus::MaxIterations => StreamEvent::Final {
            iteration: result.iterations,
            answer: result.answer.clone(),
            status: result.status,
            tools_used: result.tools_used.clone(),
            ungrounded: result.ungrounded_claims().to_vec(),
            timestamp: Utc::now(),
        },
        RunStatus::Failed => StreamEvent::Error {
            iteration: result.iterations,
            category: result
                .metadata
                .failure
                .as_ref()
                .map(|f| f.category)
                .unwrap_or(FailureCategory::Unavailable),
            message: result.answer.clone(),
            timestamp: Utc::now(),
        },
    }
}

/// A run executing in the background.
pub struct RunHandle {
    pub events: mpsc::Receiver<StreamEvent>,
    pub result: JoinHandle<ReActResult>,
    pub cancel: CancellationToken,
}

/// Start `request` on a new task.
///
/// `cancel` should be a token dedicated to this run (a child token of a
/// server-wide one, for instance): the frame stream cancels it on drop.
pub fn spawn_run(
    controller: Arc<ReActController>,
    request: RunRequest,
    buffer: usize,
    cancel: CancellationToken,
) -> RunHandle {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let run_cancel = cancel.clone();
    let result = tokio::spawn(async move {
        controller
            .run_with_events(&request, &tx, &run_cancel)
            .await
    });
    RunHandle {
        events: rx,
        result,
        cancel,
    }
}

enum FramePhase {
    Events,
    Terminating,
    Closed,
}

struct FrameState {
    events: mpsc::Receiver<StreamEvent>,
    result: Option<JoinHandle<ReActResult>>,
    guard: Option<DropGuard>,
    phase: FramePhase,
}

impl FrameState {
    fn finish(&mut self) {
        self.phase = FramePhase::Closed;
        if let Some(guard) = self.guard.take() {
            guard.disarm();
        }
    }
}

/// Turn a running handle into SSE frames.
///
/// Yields one frame per event, then [`DONE_FRAME`]. If the producer dies
/// without a terminal event, an error frame is synthesized first.
pub fn sse_frames(handle: RunHandle) -> impl Stream<Item = String> + Send + 'static {
    let RunHandle {
        events,
        result,
        cancel,
    } = handle;
    let state = FrameState {
        events,
        result: Some(result),
        guard: Some(cancel.drop_guard()),
        phase: FramePhase::Events,
    };

    futures::stream::unfold(state, |mut state| async move {
        match state.phase {
            FramePhase::Closed => None,
            FramePhase::Terminating => {
                state.finish();
                Some((DONE_FRAME.to_string(), state))
            }
            FramePhase::Events => match state.events.recv().await {
                Some(event) => {
                    if event.is_terminal() {
                        state.phase = FramePhase::Terminating;
                    }
                    Some((encode_frame(&event), state))
                }
                None => {
                    state.phase = FramePhase::Terminating;
                    let frame = lost_producer_frame(state.result.take()).await;
                    Some((frame, state))
                }
            },
        }
    })
}

/// Frame for a producer that closed its channel without a terminal event.
async fn lost_producer_frame(result: Option<JoinHandle<ReActResult>>) -> String {
    let message = match result {
        Some(handle) => match handle.await {
            Ok(result) => return encode_frame(&terminal_event(&result)),
            Err(e) if e.is_panic() => {
                warn!("Run task panicked");
                "The run stopped unexpectedly.".to_string()
            }
            Err(e) => {
                debug!("Run task ended early: {}", e);
                "The run was cancelled.".to_string()
            }
        },
        None => "The run stopped unexpectedly.".to_string(),
    };
    encode_frame(&StreamEvent::Error {
        iteration: 0,
        category: FailureCategory::Unavailable,
        message,
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn handle_from(events: Vec<StreamEvent>, result: JoinHandle<ReActResult>) -> RunHandle {
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            tx.try_send(event).unwrap();
        }
        drop(tx);
        RunHandle {
            events: rx,
            result,
            cancel: CancellationToken::new(),
        }
    }

    async fn explode() -> ReActResult {
        panic!("boom")
    }

    #[test]
    fn frames_are_data_lines() {
        let frame = encode_frame(&StreamEvent::Thought {
            iteration: 1,
            content: "hi".into(),
            timestamp: Utc::now(),
        });
        assert!(frame.starts_with("data: {\"type\":\"thought\""));
        assert!(frame.ends_with("}\n\n"));
    }

    #[tokio::test]
    async fn done_follows_terminal_event() {
        let final_event = StreamEvent::Final {
            iteration: 1,
            answer: "ok".into(),
            status: RunStatus::Done,
            tools_used: vec![],
            ungrounded: vec![],
            timestamp: Utc::now(),
        };
        let task = tokio::spawn(async { futures::future::pending::<ReActResult>().await });
        let frames: Vec<String> = sse_frames(handle_from(vec![final_event], task))
            .collect()
            .await;

        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("\"type\":\"final\""));
        assert_eq!(frames[1], DONE_FRAME);
    }

    #[tokio::test]
    async fn panicked_producer_still_terminates() {
        let task = tokio::spawn(explode());
        let frames: Vec<String> = sse_frames(handle_from(vec![], task)).collect().await;

        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("\"type\":\"error\""));
        assert_eq!(frames.iter().filter(|f| *f == DONE_FRAME).count(), 1);
        assert_eq!(frames.last().map(String::as_str), Some(DONE_FRAME));
    }

    #[tokio::test]
    async fn dropping_the_stream_cancels_the_run() {
        let cancel = CancellationToken::new();
        let (_tx, rx) = mpsc::channel::<StreamEvent>(1);
        let handle = RunHandle {
            events: rx,
            result: tokio::spawn(async { futures::future::pending::<ReActResult>().await }),
            cancel: cancel.clone(),
        };

        let stream = sse_frames(handle);
        drop(stream);
        assert!(cancel.is_cancelled());
    }
}
