//! WebSocket relay of Progress Hub events for one report.
//!
//! Hub events go out verbatim as JSON text frames. Incoming text frames are
//! acknowledged with `{"type":"ack","data":<text>}`. Disconnecting drops the
//! subscription, which unsubscribes the observer.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{Sink, SinkExt, Stream, StreamExt};
use quarry_core::{ProgressHub, ReportStore, Subscription};
use quarry_shared::{ProgressEvent, QuarryError, ReportId, ReportRecord, Result, Stage};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::error::ApiError;

pub async fn research_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(report_id): Path<ReportId>,
) -> std::result::Result<Response, ApiError> {
    let pipeline = &state.pipeline;
    let response = match attach(pipeline.hub(), &**pipeline.store(), report_id).await? {
        Attachment::Finished(event) => ws.on_upgrade(move |socket| send_final(socket, event)),
        Attachment::Live(subscription) => ws.on_upgrade(move |socket| {
            let (sender, receiver) = socket.split();
            relay(sender, receiver, subscription)
        }),
    };
    Ok(response)
}

/// How an observer joins a report's progress.
pub(crate) enum Attachment {
    /// The job already ended; this is the event it ended with.
    Finished(ProgressEvent),
    /// The job is still running.
    Live(Subscription),
}

/// Subscribe to the report's job, then confirm from the store that it has
/// not already finished. A terminal event published before the subscription
/// existed is recovered from the persisted record.
pub(crate) async fn attach(
    hub: &Arc<ProgressHub>,
    store: &dyn ReportStore,
    report_id: ReportId,
) -> Result<Attachment> {
    let job_id = find_report(store, report_id).await?.job_id;
    let subscription = hub.subscribe(job_id);

    let record = find_report(store, report_id).await?;
    match terminal_event(&record) {
        Some(event) => {
            drop(subscription);
            Ok(Attachment::Finished(event))
        }
        None => Ok(Attachment::Live(subscription)),
    }
}

async fn find_report(store: &dyn ReportStore, report_id: ReportId) -> Result<ReportRecord> {
    store
        .get_report(report_id)
        .await?
        .ok_or_else(|| QuarryError::NotFound(format!("report {report_id}")))
}

pub(crate) async fn relay<S, R, E>(mut sender: S, mut receiver: R, mut subscription: Subscription)
where
    S: Sink<Message> + Unpin,
    R: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: Display,
{
    let job_id = subscription.job_id();
    info!(%job_id, "progress observer connected");

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else {
                    // Terminal event already delivered.
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };
                let Some(frame) = event_frame(&event) else { continue };
                if sender.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    debug!(%job_id, "observer message received");
                    if sender.send(Message::Text(ack_frame(text.as_str()).into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(%job_id, error = %e, "websocket error");
                    break;
                }
            },
        }
    }

    drop(subscription);
    info!(%job_id, "progress observer disconnected");
}

async fn send_final(mut socket: WebSocket, event: ProgressEvent) {
    if let Some(frame) = event_frame(&event) {
        let _ = socket.send(Message::Text(frame.into())).await;
    }
    let _ = socket.send(Message::Close(None)).await;
}

fn event_frame(event: &ProgressEvent) -> Option<String> {
    serde_json::to_string(event)
        .map_err(|e| warn!(error = %e, "failed to serialize progress event"))
        .ok()
}

pub(crate) fn ack_frame(data: &str) -> String {
    json!({ "type": "ack", "data": data }).to_string()
}

/// The event a finished job ended with, rebuilt from its persisted record.
pub(crate) fn terminal_event(record: &ReportRecord) -> Option<ProgressEvent> {
    match record.stage {
        Stage::Done => Some(ProgressEvent::Report {
            report_id: record.id,
            citations: record.citations.len(),
            conflicts: record.conflicts.len(),
            document: record.document.clone(),
        }),
        Stage::Failed => Some(ProgressEvent::Error {
            detail: record
                .error
                .clone()
                .unwrap_or_else(|| "Research failed".to_string()),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::channel::mpsc;
    use quarry_core::InMemoryStore;
    use quarry_shared::{Citation, Conflict, Job, JobId, JobSummary};
    use serde_json::Value;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    type Incoming = mpsc::UnboundedSender<std::result::Result<Message, axum::Error>>;
    type Outgoing = mpsc::UnboundedReceiver<Message>;

    /// Fails the job right after the first report lookup, the way a pipeline
    /// finishing concurrently with the handshake would.
    struct FinishesAfterLookup {
        inner: InMemoryStore,
        hub: Arc<ProgressHub>,
        job_id: JobId,
        finished: AtomicBool,
    }

    #[async_trait]
    impl ReportStore for FinishesAfterLookup {
        async fn create_job(&self, job: &Job) -> Result<()> {
            self.inner.create_job(job).await
        }
        async fn set_job_stage(&self, job_id: JobId, stage: Stage, error: Option<&str>) -> Result<()> {
            self.inner.set_job_stage(job_id, stage, error).await
        }
        async fn create_report(&self, job_id: JobId) -> Result<ReportId> {
            self.inner.create_report(job_id).await
        }
        async fn update_report_output(&self, report_id: ReportId, document: &str) -> Result<()> {
            self.inner.update_report_output(report_id, document).await
        }
        async fn add_citation(&self, report_id: ReportId, citation: &Citation) -> Result<()> {
            self.inner.add_citation(report_id, citation).await
        }
        async fn add_conflict(&self, report_id: ReportId, conflict: &Conflict) -> Result<()> {
            self.inner.add_conflict(report_id, conflict).await
        }
        async fn get_report(&self, report_id: ReportId) -> Result<Option<ReportRecord>> {
            let record = self.inner.get_report(report_id).await?;
            if !self.finished.swap(true, Ordering::SeqCst) {
                self.inner
                    .set_job_stage(self.job_id, Stage::Failed, Some("Research failed"))
                    .await?;
                self.hub.publish(
                    self.job_id,
                    ProgressEvent::Error {
                        detail: "Research failed".into(),
                    },
                );
            }
            Ok(record)
        }
        async fn list_jobs(&self, limit: u32) -> Result<Vec<JobSummary>> {
            self.inner.list_jobs(limit).await
        }
    }

    async fn pending_report(store: &InMemoryStore) -> (JobId, ReportId) {
        let job = Job::new("q", vec![]);
        store.create_job(&job).await.unwrap();
        let report_id = store.create_report(job.id).await.unwrap();
        (job.id, report_id)
    }

    fn start_relay(subscription: Subscription) -> (Incoming, Outgoing, JoinHandle<()>) {
        let (out_tx, out_rx) = mpsc::unbounded::<Message>();
        let (in_tx, in_rx) = mpsc::unbounded();
        let handle = tokio::spawn(relay(out_tx, in_rx, subscription));
        (in_tx, out_rx, handle)
    }

    async fn next_message(out: &mut Outgoing) -> Message {
        timeout(Duration::from_secs(2), out.next())
            .await
            .expect("relay stalled")
            .expect("relay ended without closing")
    }

    async fn next_json(out: &mut Outgoing) -> Value {
        match next_message(out).await {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn job_finishing_during_attach_is_replayed_not_awaited() {
        let inner = InMemoryStore::new();
        let (job_id, report_id) = pending_report(&inner).await;
        let hub = ProgressHub::new();
        let store = FinishesAfterLookup {
            inner,
            hub: Arc::clone(&hub),
            job_id,
            finished: AtomicBool::new(false),
        };

        match attach(&hub, &store, report_id).await.unwrap() {
            Attachment::Finished(ProgressEvent::Error { detail }) => assert_eq!(detail, "Research failed"),
            Attachment::Finished(other) => panic!("unexpected event {other:?}"),
            Attachment::Live(_) => panic!("finished job attached as live"),
        }
        assert_eq!(hub.active_jobs(), 0);
    }

    #[tokio::test]
    async fn running_job_attaches_live() {
        let store = InMemoryStore::new();
        let (job_id, report_id) = pending_report(&store).await;
        let hub = ProgressHub::new();

        let attachment = attach(&hub, &store, report_id).await.unwrap();
        assert!(matches!(attachment, Attachment::Live(_)));
        assert_eq!(hub.observer_count(job_id), 1);
        drop(attachment);
        assert_eq!(hub.observer_count(job_id), 0);
    }

    #[tokio::test]
    async fn unknown_report_cannot_attach() {
        let hub = ProgressHub::new();
        let result = attach(&hub, &InMemoryStore::new(), ReportId::new()).await;
        assert!(matches!(result, Err(QuarryError::NotFound(_))));
        assert_eq!(hub.active_jobs(), 0);
    }

    #[tokio::test]
    async fn relays_events_in_order_then_closes() {
        let hub = ProgressHub::new();
        let job_id = JobId::new();
        let (_incoming, mut out, handle) = start_relay(hub.subscribe(job_id));

        hub.publish(job_id, ProgressEvent::stage(Stage::Dispatching, "Querying 2 providers"));
        hub.publish(
            job_id,
            ProgressEvent::Error {
                detail: "All providers failed".into(),
            },
        );

        let first = next_json(&mut out).await;
        assert_eq!(first["type"], "stage_changed");
        assert_eq!(first["stage"], "dispatching");
        assert_eq!(first["detail"], "Querying 2 providers");
        let second = next_json(&mut out).await;
        assert_eq!(second, json!({"type": "error", "detail": "All providers failed"}));
        assert!(matches!(next_message(&mut out).await, Message::Close(None)));

        handle.await.unwrap();
        assert_eq!(hub.active_jobs(), 0);
    }

    #[tokio::test]
    async fn text_frames_are_acknowledged() {
        let hub = ProgressHub::new();
        let job_id = JobId::new();
        let (incoming, mut out, _handle) = start_relay(hub.subscribe(job_id));

        incoming.unbounded_send(Ok(Message::Text("ping".into()))).unwrap();
        assert_eq!(next_json(&mut out).await, json!({"type": "ack", "data": "ping"}));
    }

    #[tokio::test]
    async fn disconnect_unsubscribes() {
        let hub = ProgressHub::new();
        let job_id = JobId::new();
        let (incoming, _out, handle) = start_relay(hub.subscribe(job_id));
        assert_eq!(hub.observer_count(job_id), 1);

        drop(incoming);
        timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert_eq!(hub.observer_count(job_id), 0);
        assert_eq!(hub.active_jobs(), 0);
    }
}
