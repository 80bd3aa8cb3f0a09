//! Per-job publish/subscribe of [`ProgressEvent`]s.
//!
//! Each observer owns an unbounded queue, so publishers never wait on slow
//! observers and nothing is coalesced or dropped for a live observer.
//! There is no replay: a subscriber only sees events published after it
//! subscribed. Once a terminal event is published the job's entry is dropped;
//! observers drain what was queued and then see end-of-stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use quarry_shared::{JobId, ProgressEvent};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

/// Identifies one observer within the hub.
pub type ObserverId = u64;
type Registry = HashMap<JobId, HashMap<ObserverId, UnboundedSender<ProgressEvent>>>;

/// Observer registry keyed by job.
#[derive(Default)]
pub struct ProgressHub {
    jobs: Mutex<Registry>,
    next_observer: AtomicU64,
}

impl ProgressHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // A panicking observer must not wedge every other job.
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an observer for `job_id`.
    pub fn subscribe(self: &Arc<Self>, job_id: JobId) -> Subscription {
        let observer_id = self.next_observer.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        self.lock().entry(job_id).or_default().insert(observer_id, tx);
        debug!(%job_id, observer_id, "observer subscribed");

        Subscription {
            hub: Arc::clone(self),
            job_id,
            observer_id,
            rx,
        }
    }

    /// Deliver `event` to every observer currently registered for `job_id`.
    ///
    /// Observers whose queue is closed are removed. Never fails.
    pub fn publish(&self, job_id: JobId, event: ProgressEvent) {
        let terminal = event.is_terminal();
        let mut jobs = self.lock();

        let Some(observers) = jobs.get_mut(&job_id) else {
            trace!(%job_id, "no observers, event dropped");
            return;
        };

        observers.retain(|observer_id, tx| {
            let delivered = tx.send(event.clone()).is_ok();
            if !delivered {
                debug!(%job_id, observer_id, "observer gone, removing");
            }
            delivered
        });

        if terminal || observers.is_empty() {
            jobs.remove(&job_id);
        }
    }

    /// Remove one observer. Unknown ids are ignored.
    pub fn unsubscribe(&self, job_id: JobId, observer_id: ObserverId) {
        let mut jobs = self.lock();
        if let Some(observers) = jobs.get_mut(&job_id) {
            if observers.remove(&observer_id).is_some() {
                debug!(%job_id, observer_id, "observer unsubscribed");
            }
            if observers.is_empty() {
                jobs.remove(&job_id);
            }
        }
    }

    /// Number of observers currently registered for `job_id`.
    pub fn observer_count(&self, job_id: JobId) -> usize {
        self.lock().get(&job_id).map_or(0, HashMap::len)
    }

    /// Number of jobs with at least one registered observer.
    pub fn active_jobs(&self) -> usize {
        self.lock().len()
    }
}

/// A live registration. Dropping it unsubscribes.
pub struct Subscription {
    hub: Arc<ProgressHub>,
    job_id: JobId,
    observer_id: ObserverId,
    rx: UnboundedReceiver<ProgressEvent>,
}

impl Subscription {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Wait for the next event. `None` once the job reached a terminal event
    /// and the queue is drained.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving events. Already-queued events are discarded.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.job_id, self.observer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_shared::Stage;

    fn stage(detail: &str) -> ProgressEvent {
        ProgressEvent::stage(Stage::Dispatching, detail)
    }

    fn detail(event: &ProgressEvent) -> &str {
        match event {
            ProgressEvent::StageChanged { detail, .. } => detail.as_deref().unwrap_or(""),
            _ => "",
        }
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let hub = ProgressHub::new();
        let job = JobId::new();

        let mut early = hub.subscribe(job);
        hub.publish(job, stage("e1"));
        let mut late = hub.subscribe(job);
        hub.publish(job, stage("e2"));

        assert_eq!(detail(&early.recv().await.unwrap()), "e1");
        assert_eq!(detail(&early.recv().await.unwrap()), "e2");
        assert_eq!(detail(&late.recv().await.unwrap()), "e2");
        assert!(late.try_recv().is_none());
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let hub = ProgressHub::new();
        let job = JobId::new();
        let mut sub = hub.subscribe(job);

        for i in 0..100 {
            hub.publish(job, stage(&i.to_string()));
        }
        for i in 0..100 {
            assert_eq!(detail(&sub.recv().await.unwrap()), i.to_string());
        }
    }

    #[test]
    fn unsubscribed_observer_receives_nothing_more() {
        let hub = ProgressHub::new();
        let job = JobId::new();
        let mut keep = hub.subscribe(job);
        let gone = hub.subscribe(job);
        assert_eq!(hub.observer_count(job), 2);

        gone.unsubscribe();
        assert_eq!(hub.observer_count(job), 1);

        hub.publish(job, stage("after"));
        assert_eq!(detail(&keep.try_recv().unwrap()), "after");
    }

    #[test]
    fn jobs_are_isolated() {
        let hub = ProgressHub::new();
        let (a, b) = (JobId::new(), JobId::new());
        let mut sub_a = hub.subscribe(a);
        let mut sub_b = hub.subscribe(b);

        hub.publish(a, stage("for a"));
        assert!(sub_a.try_recv().is_some());
        assert!(sub_b.try_recv().is_none());
    }

    #[test]
    fn publish_without_observers_is_a_noop() {
        let hub = ProgressHub::new();
        hub.publish(JobId::new(), stage("nobody"));
        assert_eq!(hub.active_jobs(), 0);
    }

    #[tokio::test]
    async fn terminal_event_prunes_job_and_ends_stream() {
        let hub = ProgressHub::new();
        let job = JobId::new();
        let mut sub = hub.subscribe(job);

        hub.publish(job, stage("working"));
        hub.publish(job, ProgressEvent::Error { detail: "boom".into() });
        assert_eq!(hub.active_jobs(), 0);

        assert!(matches!(sub.recv().await, Some(ProgressEvent::StageChanged { .. })));
        assert!(matches!(sub.recv().await, Some(ProgressEvent::Error { .. })));
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn dead_observer_does_not_block_others() {
        let hub = ProgressHub::new();
        let job = JobId::new();
        let mut alive = hub.subscribe(job);
        let mut dead = hub.subscribe(job);
        dead.rx.close();

        hub.publish(job, stage("x"));
        assert_eq!(hub.observer_count(job), 1);
        assert!(alive.try_recv().is_some());
        drop(dead);
        assert_eq!(hub.observer_count(job), 1);
    }

    #[test]
    fn dropping_last_subscription_prunes_entry() {
        let hub = ProgressHub::new();
        let job = JobId::new();
        let sub = hub.subscribe(job);
        assert_eq!(hub.active_jobs(), 1);
        drop(sub);
        assert_eq!(hub.active_jobs(), 0);
    }
}
