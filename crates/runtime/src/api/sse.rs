//! SSE streams as push-channels
//!
//! The producer is a polling task writing into an mpsc channel; the consumer
//! is the axum SSE writer draining it. A client disconnect closes the
//! channel, which stops the producer at its next send.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use super::AppState;
use crate::db::jobs;
use crate::db::models::AnalysisJobRecord;
use crate::observability;
use crate::types::JobStatus;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const STATUS_ENDPOINT_LABEL: &str = "/api/v1/repos/{repo_id}/status";

/// The change-detection tuple: a new event is emitted only when this moves.
pub fn signature(job: &AnalysisJobRecord) -> (String, i32, Option<String>) {
    (job.status.clone(), job.progress, job.error_message.clone())
}

/// Build the `(event_name, payload)` pair for a job row.
pub fn job_event(job: &AnalysisJobRecord) -> (&'static str, Value) {
    let status = job.status.parse::<JobStatus>().ok();

    if status == Some(JobStatus::Failed) {
        let raw = job.error_message.clone().unwrap_or_else(|| "Job failed".to_string());
        let (code, message) = match raw.split_once(':') {
            Some((code, message)) => (code.trim().to_string(), message.trim().to_string()),
            None => ("UNKNOWN".to_string(), raw),
        };
        return (
            "error",
            json!({
                "job_id": job.id.to_string(),
                "stage": "failed",
                "progress": if job.progress > 0 { job.progress } else { 100 },
                "code": code,
                "message": message,
            }),
        );
    }

    if status == Some(JobStatus::Done) {
        return (
            "done",
            json!({
                "job_id": job.id.to_string(),
                "stage": "done",
                "progress": 100,
            }),
        );
    }

    (
        "progress",
        json!({
            "job_id": job.id.to_string(),
            "stage": job.status,
            "progress": job.progress,
            "message": format!("{} in progress", job.status),
            "eta_seconds": Value::Null,
        }),
    )
}

fn no_job_event(repo_id: Uuid) -> Event {
    let payload = json!({
        "repo_id": repo_id.to_string(),
        "code": "NO_JOB",
        "message": "No analysis job found for repository",
    });
    Event::default().event("error").data(payload.to_string())
}

fn to_event(name: &str, payload: &Value) -> Event {
    Event::default().event(name).data(payload.to_string())
}

/// Stream job status events for a repository until terminal or disconnect.
///
/// With `once` set, a single snapshot event is emitted and the stream ends.
pub fn job_status_stream(
    state: AppState,
    repo_id: Uuid,
    once: bool,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Event>(16);

    tokio::spawn(async move {
        let stream_started = Instant::now();
        let mut sent_first_event = false;
        let mut last_signature: Option<(String, i32, Option<String>)> = None;

        loop {
            let job = match jobs::latest_for_repo(&state.pool, repo_id).await {
                Ok(job) => job,
                Err(error) => {
                    tracing::error!(%error, %repo_id, "status poll failed");
                    return;
                }
            };

            let Some(job) = job else {
                let _ = tx.send(no_job_event(repo_id)).await;
                return;
            };

            let current = signature(&job);
            if last_signature.as_ref() != Some(&current) || once {
                let (name, payload) = job_event(&job);
                if !sent_first_event {
                    observability::observe_sse_startup(
                        STATUS_ENDPOINT_LABEL,
                        stream_started.elapsed().as_secs_f64(),
                    );
                    sent_first_event = true;
                }
                if tx.send(to_event(name, &payload)).await.is_err() {
                    // Client went away.
                    return;
                }
                last_signature = Some(current);

                if once || matches!(name, "done" | "error") {
                    return;
                }
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    });

    Sse::new(ReceiverStream::new(rx).map(Ok))
}

/// Stream a finished chat turn: one `delta` per whitespace token, then the
/// terminal `done` carrying the validated citations.
pub fn chat_message_stream(
    content: String,
    done_payload: Value,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut events: Vec<Event> = content
        .split(' ')
        .map(|token| {
            let delta = json!({ "token": format!("{token} ") });
            Event::default().event("delta").data(delta.to_string())
        })
        .collect();
    events.push(Event::default().event("done").data(done_payload.to_string()));

    Sse::new(futures::stream::iter(events.into_iter().map(Ok)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn job(status: &str, progress: i32, error_message: Option<&str>) -> AnalysisJobRecord {
        AnalysisJobRecord {
            id: Uuid::new_v4(),
            repo_id: Uuid::new_v4(),
            user_id: None,
            idempotency_key: None,
            commit_sha: "abcdef1234567890".to_string(),
            status: status.to_string(),
            progress,
            error_message: error_message.map(str::to_string),
            retry_count: 0,
            next_retry_at: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn progress_event_carries_stage_and_message() {
        let record = job("parsing", 35, None);
        let (name, payload) = job_event(&record);
        assert_eq!(name, "progress");
        assert_eq!(payload["stage"], "parsing");
        assert_eq!(payload["progress"], 35);
        assert_eq!(payload["message"], "parsing in progress");
        assert!(payload["eta_seconds"].is_null());
    }

    #[test]
    fn done_event_pins_progress_to_100() {
        let record = job("done", 100, None);
        let (name, payload) = job_event(&record);
        assert_eq!(name, "done");
        assert_eq!(payload["stage"], "done");
        assert_eq!(payload["progress"], 100);
    }

    #[test]
    fn failed_event_splits_code_and_message() {
        let record = job(
            "failed",
            100,
            Some("FILE_LIMIT_EXCEEDED: Repo has 3 source files; limit is 2"),
        );
        let (name, payload) = job_event(&record);
        assert_eq!(name, "error");
        assert_eq!(payload["stage"], "failed");
        assert_eq!(payload["code"], "FILE_LIMIT_EXCEEDED");
        assert_eq!(payload["message"], "Repo has 3 source files; limit is 2");
    }

    #[test]
    fn failed_event_without_colon_uses_unknown_code() {
        let record = job("failed", 100, Some("something went sideways"));
        let (_, payload) = job_event(&record);
        assert_eq!(payload["code"], "UNKNOWN");
        assert_eq!(payload["message"], "something went sideways");
    }

    #[test]
    fn signature_tracks_status_progress_and_error() {
        let a = job("parsing", 30, None);
        let mut b = job("parsing", 30, None);
        b.id = a.id;
        assert_eq!(signature(&a), signature(&b));

        b.progress = 35;
        assert_ne!(signature(&a), signature(&b));

        b.progress = 30;
        b.error_message = Some("CLONE_FAILED: boom".to_string());
        assert_ne!(signature(&a), signature(&b));
    }
}
