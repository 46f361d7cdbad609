//! The push coordinator: versioned, ordered delivery of configuration
//! change sets with confirmation by observed applied-version advance.
//!
//! One owner task per agent consumes a FIFO queue, so at most one push is
//! in flight against an agent at any instant. Confirmation polls the stored
//! applied version at a fixed interval for a bounded number of attempts; the
//! budget is a hard deadline, not a sliding one. Terminal states are final:
//! a cancelled worker resolves its push before any later poll can observe a
//! version advance, so a removed agent can never produce a zombie
//! confirmation.

pub mod validate;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use proxyfleet_common::api::{PushSnapshot, PushState, PushStatusResponse, PushSubmitResponse};
use proxyfleet_common::proto::{ConfigMutation, ConsoleMessage};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::ChannelHub;
use crate::config::PushConfig;
use crate::events::{Event, EventBus};
use crate::persistence::{agents, configs, Db};
use crate::schema::{SchemaError, SchemaRegistry};
use crate::telemetry;
use crate::validator::FieldError;

/// Submission failure.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The agent does not exist.
    #[error("agent not found")]
    AgentNotFound,
    /// No schema for the document's kind/protocol.
    #[error(transparent)]
    UnknownProtocol(#[from] SchemaError),
    /// The document failed schema validation.
    #[error("document failed validation")]
    Validation(Vec<FieldError>),
    /// Structurally invalid submission (empty push, duplicate tag, ...).
    #[error("{0}")]
    Invalid(String),
    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// One accepted push travelling through a worker queue.
#[derive(Debug, Clone)]
struct PushJob {
    id: Uuid,
    target_version: i64,
    mutations: Vec<ConfigMutation>,
    submitted_at: DateTime<Utc>,
}

/// Apply failures reported by agent sessions, consumed by the polling loop.
/// Stale entries are cleared before each delivery so an old report can not
/// fail a newer push.
#[derive(Debug, Default)]
pub struct ApplyReports {
    failures: StdMutex<HashMap<Uuid, (i64, String)>>,
}

impl ApplyReports {
    pub fn record_failure(&self, agent_id: Uuid, version: i64, reason: String) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(agent_id, (version, reason));
        }
    }

    pub fn take_failure(&self, agent_id: Uuid) -> Option<(i64, String)> {
        self.failures.lock().ok()?.remove(&agent_id)
    }

    fn clear(&self, agent_id: Uuid) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.remove(&agent_id);
        }
    }
}

#[derive(Debug, Default)]
struct WorkerShared {
    queue_depth: AtomicUsize,
    in_flight: StdMutex<Option<PushSnapshot>>,
    last_resolved: StdMutex<Option<PushSnapshot>>,
}

impl WorkerShared {
    fn set_in_flight(&self, snapshot: Option<PushSnapshot>) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            *in_flight = snapshot;
        }
    }

    fn update_in_flight_state(&self, state: PushState) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            if let Some(snapshot) = in_flight.as_mut() {
                snapshot.state = state;
            }
        }
    }

    fn set_resolved(&self, snapshot: PushSnapshot) {
        if let Ok(mut last) = self.last_resolved.lock() {
            *last = Some(snapshot);
        }
        self.set_in_flight(None);
    }

    fn snapshot(&self) -> (usize, Option<PushSnapshot>, Option<PushSnapshot>) {
        let in_flight = self.in_flight.lock().ok().and_then(|guard| guard.clone());
        let last = self.last_resolved.lock().ok().and_then(|guard| guard.clone());
        (self.queue_depth.load(Ordering::SeqCst), in_flight, last)
    }
}

struct Worker {
    jobs: mpsc::UnboundedSender<PushJob>,
    cancel: watch::Sender<bool>,
    shared: Arc<WorkerShared>,
}

struct Inner {
    db: Db,
    hub: ChannelHub,
    events: EventBus,
    schemas: Arc<SchemaRegistry>,
    cfg: PushConfig,
    reports: ApplyReports,
    workers: Mutex<HashMap<Uuid, Worker>>,
    /// Serializes version assignment across concurrent submissions.
    submit_lock: Mutex<()>,
}

/// Accepts pushes, assigns versions, and drives them to a terminal state.
#[derive(Clone)]
pub struct PushCoordinator {
    inner: Arc<Inner>,
}

impl PushCoordinator {
    pub fn new(db: Db, hub: ChannelHub, events: EventBus, schemas: Arc<SchemaRegistry>, cfg: PushConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                hub,
                events,
                schemas,
                cfg,
                reports: ApplyReports::default(),
                workers: Mutex::new(HashMap::new()),
                submit_lock: Mutex::new(()),
            }),
        }
    }

    /// Where agent sessions report explicit apply failures.
    pub fn reports(&self) -> &ApplyReports {
        &self.inner.reports
    }

    /// Validates the mutations, assigns the next version, records the
    /// change set, and enqueues the push on the agent's worker.
    pub async fn submit(
        &self,
        agent_id: Uuid,
        mutations: Vec<ConfigMutation>,
    ) -> Result<PushSubmitResponse, SubmitError> {
        let agent = agents::get_agent(&self.inner.db, agent_id)
            .await
            .map_err(SubmitError::Storage)?
            .ok_or(SubmitError::AgentNotFound)?;

        let prepared =
            validate::prepare_mutations(&self.inner.db, &self.inner.schemas, agent.id, mutations)
                .await?;

        let _submit_guard = self.inner.submit_lock.lock().await;
        let target_version = configs::latest_version(&self.inner.db, agent_id)
            .await
            .map_err(SubmitError::Storage)?
            + 1;

        let mut tx = self
            .inner
            .db
            .begin()
            .await
            .map_err(|err| SubmitError::Storage(err.into()))?;
        configs::record_change_set(&mut tx, agent_id, target_version, &prepared)
            .await
            .map_err(SubmitError::Storage)?;
        tx.commit()
            .await
            .map_err(|err| SubmitError::Storage(err.into()))?;

        let job = PushJob {
            id: Uuid::new_v4(),
            target_version,
            mutations: prepared,
            submitted_at: Utc::now(),
        };
        let push_id = job.id;

        self.enqueue(agent_id, job).await;
        telemetry::record_push_submitted();
        info!(%agent_id, %push_id, target_version, "push accepted");

        Ok(PushSubmitResponse {
            push_id,
            target_version,
            state: PushState::Queued,
        })
    }

    /// Queue depth, in-flight push, last resolution, and applied version
    /// for one agent.
    pub async fn status(&self, agent_id: Uuid) -> Result<PushStatusResponse, SubmitError> {
        let agent = agents::get_agent(&self.inner.db, agent_id)
            .await
            .map_err(SubmitError::Storage)?
            .ok_or(SubmitError::AgentNotFound)?;

        let (queue_depth, in_flight, last_resolved) = {
            let workers = self.inner.workers.lock().await;
            match workers.get(&agent_id) {
                Some(worker) => worker.shared.snapshot(),
                None => (0, None, None),
            }
        };

        Ok(PushStatusResponse {
            queue_depth,
            in_flight,
            last_resolved,
            applied_version: agent.applied_version,
        })
    }

    /// Cancels everything for a removed agent: the in-flight push and all
    /// queued ones resolve `Failed` with reason `agent removed`, and no
    /// poll started for them may produce side effects afterwards.
    pub async fn cancel_agent(&self, agent_id: Uuid) {
        let worker = self.inner.workers.lock().await.remove(&agent_id);
        if let Some(worker) = worker {
            let _ = worker.cancel.send(true);
            // Dropping the sender lets the worker loop drain and exit.
            drop(worker.jobs);
        }
        self.inner.reports.clear(agent_id);
    }

    async fn enqueue(&self, agent_id: Uuid, job: PushJob) {
        let mut workers = self.inner.workers.lock().await;
        let worker = workers.entry(agent_id).or_insert_with(|| {
            let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
            let (cancel_tx, cancel_rx) = watch::channel(false);
            let shared = Arc::new(WorkerShared::default());
            tokio::spawn(worker_loop(
                self.inner.clone(),
                agent_id,
                jobs_rx,
                cancel_rx,
                shared.clone(),
            ));
            Worker {
                jobs: jobs_tx,
                cancel: cancel_tx,
                shared,
            }
        });
        worker.shared.queue_depth.fetch_add(1, Ordering::SeqCst);
        if worker.jobs.send(job).is_err() {
            // The worker exited (agent cancelled between lookup and send).
            worker.shared.queue_depth.fetch_sub(1, Ordering::SeqCst);
            warn!(%agent_id, "push worker gone, dropping job");
        }
    }
}

enum Outcome {
    Confirmed,
    Failed(String),
    TimedOut,
}

async fn worker_loop(
    inner: Arc<Inner>,
    agent_id: Uuid,
    mut jobs: mpsc::UnboundedReceiver<PushJob>,
    mut cancel: watch::Receiver<bool>,
    shared: Arc<WorkerShared>,
) {
    while let Some(job) = jobs.recv().await {
        shared.queue_depth.fetch_sub(1, Ordering::SeqCst);
        shared.set_in_flight(Some(PushSnapshot {
            push_id: job.id,
            target_version: job.target_version,
            state: PushState::Queued,
            submitted_at: job.submitted_at,
            error: None,
        }));

        let outcome = if *cancel.borrow() {
            Outcome::Failed("agent removed".into())
        } else {
            run_push(&inner, agent_id, &job, &mut cancel, &shared).await
        };
        resolve(&inner, &shared, agent_id, &job, outcome);
    }
    debug!(%agent_id, "push worker stopped");
}

/// Delivers one push and waits for confirmation. Never returns a
/// non-terminal outcome.
async fn run_push(
    inner: &Inner,
    agent_id: Uuid,
    job: &PushJob,
    cancel: &mut watch::Receiver<bool>,
    shared: &WorkerShared,
) -> Outcome {
    let poll_interval = Duration::from_millis(inner.cfg.poll_interval_ms);
    let queue_wait = Duration::from_secs(inner.cfg.queue_wait_secs);

    // Delivery: wait (bounded) for a live channel, then hand the change set
    // to the session.
    let delivery_deadline = tokio::time::Instant::now() + queue_wait;
    inner.reports.clear(agent_id);
    loop {
        if *cancel.borrow() {
            return Outcome::Failed("agent removed".into());
        }
        let message = ConsoleMessage::ApplyConfig {
            target_version: job.target_version,
            mutations: job.mutations.clone(),
        };
        match inner.hub.send(agent_id, message).await {
            Ok(()) => break,
            Err(err) => {
                debug!(%agent_id, %err, "push delivery waiting for channel");
            }
        }
        if tokio::time::Instant::now() >= delivery_deadline {
            return Outcome::TimedOut;
        }
        tokio::select! {
            _ = cancel.changed() => {}
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    shared.update_in_flight_state(PushState::Pending);
    debug!(%agent_id, push_id = %job.id, target_version = job.target_version, "push pending");

    // Confirmation: poll the stored applied version on a fixed interval for
    // a bounded number of attempts.
    for _attempt in 0..inner.cfg.poll_max_attempts {
        tokio::select! {
            _ = cancel.changed() => {}
            _ = tokio::time::sleep(poll_interval) => {}
        }
        if *cancel.borrow() {
            return Outcome::Failed("agent removed".into());
        }

        if let Some((version, reason)) = inner.reports.take_failure(agent_id) {
            debug!(%agent_id, version, "push failed by agent report");
            return Outcome::Failed(reason);
        }

        match agents::get_agent(&inner.db, agent_id).await {
            Ok(Some(record)) if record.applied_version >= job.target_version => {
                return Outcome::Confirmed;
            }
            Ok(Some(_)) => {}
            Ok(None) => return Outcome::Failed("agent removed".into()),
            Err(err) => {
                warn!(?err, %agent_id, "applied-version poll failed");
            }
        }
    }

    Outcome::TimedOut
}

fn resolve(inner: &Inner, shared: &WorkerShared, agent_id: Uuid, job: &PushJob, outcome: Outcome) {
    let (state, error) = match &outcome {
        Outcome::Confirmed => (PushState::Confirmed, None),
        Outcome::Failed(reason) => (PushState::Failed, Some(reason.clone())),
        Outcome::TimedOut => (PushState::TimedOut, None),
    };

    shared.set_resolved(PushSnapshot {
        push_id: job.id,
        target_version: job.target_version,
        state,
        submitted_at: job.submitted_at,
        error: error.clone(),
    });

    match outcome {
        Outcome::Confirmed => {
            telemetry::record_push_outcome("confirmed");
            info!(%agent_id, push_id = %job.id, version = job.target_version, "push confirmed");
            inner.events.publish(Event::PushConfirmed {
                agent_id,
                push_id: job.id,
                version: job.target_version,
            });
        }
        Outcome::Failed(reason) => {
            telemetry::record_push_outcome("failed");
            warn!(%agent_id, push_id = %job.id, %reason, "push failed");
            inner.events.publish(Event::PushFailed {
                agent_id,
                push_id: job.id,
                version: job.target_version,
                reason,
            });
        }
        Outcome::TimedOut => {
            telemetry::record_push_outcome("timed_out");
            warn!(%agent_id, push_id = %job.id, "push timed out");
            inner.events.publish(Event::PushTimedOut {
                agent_id,
                push_id: job.id,
                version: job.target_version,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::migrations;
    use proxyfleet_common::proto::{ConfigKind, MutationOp};
    use serde_json::json;
    use tokio::sync::mpsc::Receiver;

    fn test_cfg() -> PushConfig {
        PushConfig {
            poll_interval_ms: 20,
            poll_max_attempts: 25,
            queue_wait_secs: 1,
        }
    }

    async fn seeded_coordinator() -> (PushCoordinator, Db, ChannelHub, Uuid) {
        let db = migrations::test_pool().await;
        let hub = ChannelHub::new();
        let events = EventBus::default();
        let schemas = Arc::new(SchemaRegistry::builtin());
        let coordinator = PushCoordinator::new(
            db.clone(),
            hub.clone(),
            events,
            schemas,
            test_cfg(),
        );
        let agent = agents::create_agent(
            &db,
            agents::NewAgent {
                id: Uuid::new_v4(),
                name: "edge-1".into(),
                credential_hash: "hash".into(),
            },
        )
        .await
        .expect("create agent");
        (coordinator, db, hub, agent.id)
    }

    async fn connect_fake_agent(hub: &ChannelHub, agent_id: Uuid) -> Receiver<ConsoleMessage> {
        let (tx, rx) = mpsc::channel(16);
        hub.register(agent_id, tx).await;
        rx
    }

    fn socks_create(tag: &str) -> Vec<ConfigMutation> {
        vec![ConfigMutation {
            op: MutationOp::Create,
            kind: ConfigKind::Inbound,
            tag: tag.into(),
            document: Some(json!({
                "tag": tag,
                "protocol": "socks",
                "port": 1080,
                "settings": {"auth": "noauth", "udp": false},
            })),
        }]
    }

    #[tokio::test]
    async fn push_confirms_when_agent_reports_target_version() {
        let (coordinator, db, hub, agent_id) = seeded_coordinator().await;
        let mut agent_rx = connect_fake_agent(&hub, agent_id).await;

        let accepted = coordinator
            .submit(agent_id, socks_create("socks-in"))
            .await
            .expect("submit");
        assert_eq!(accepted.target_version, 1);
        assert_eq!(accepted.state, PushState::Queued);

        // The fake agent receives the change set and reports having applied
        // it, the way the channel session would.
        let delivered = tokio::time::timeout(Duration::from_secs(2), agent_rx.recv())
            .await
            .expect("delivery")
            .expect("message");
        let ConsoleMessage::ApplyConfig { target_version, mutations } = delivered else {
            panic!("expected apply-config, got {delivered:?}");
        };
        assert_eq!(target_version, 1);
        assert_eq!(mutations.len(), 1);
        agents::advance_applied_version(&db, agent_id, target_version)
            .await
            .expect("advance");

        wait_for_state(&coordinator, agent_id, PushState::Confirmed).await;
    }

    #[tokio::test]
    async fn push_times_out_when_agent_never_confirms() {
        let (coordinator, _db, hub, agent_id) = seeded_coordinator().await;
        let _agent_rx = connect_fake_agent(&hub, agent_id).await;

        coordinator
            .submit(agent_id, socks_create("socks-in"))
            .await
            .expect("submit");

        wait_for_state(&coordinator, agent_id, PushState::TimedOut).await;
    }

    #[tokio::test]
    async fn agent_reported_error_resolves_failed_with_reason() {
        let (coordinator, _db, hub, agent_id) = seeded_coordinator().await;
        let mut agent_rx = connect_fake_agent(&hub, agent_id).await;

        coordinator
            .submit(agent_id, socks_create("socks-in"))
            .await
            .expect("submit");

        let _ = tokio::time::timeout(Duration::from_secs(2), agent_rx.recv())
            .await
            .expect("delivery");
        coordinator
            .reports()
            .record_failure(agent_id, 1, "port already bound".into());

        let status = wait_for_state(&coordinator, agent_id, PushState::Failed).await;
        assert_eq!(
            status.last_resolved.expect("resolved").error.as_deref(),
            Some("port already bound")
        );
    }

    #[tokio::test]
    async fn second_push_waits_for_first_to_resolve() {
        let (coordinator, db, hub, agent_id) = seeded_coordinator().await;
        let mut agent_rx = connect_fake_agent(&hub, agent_id).await;

        let first = coordinator
            .submit(agent_id, socks_create("socks-a"))
            .await
            .expect("submit first");
        let second = coordinator
            .submit(agent_id, socks_create("socks-b"))
            .await
            .expect("submit second");
        assert_eq!(first.target_version, 1);
        assert_eq!(second.target_version, 2);

        // Only the first change set is dispatched while it is unresolved.
        let delivered = tokio::time::timeout(Duration::from_secs(2), agent_rx.recv())
            .await
            .expect("first delivery")
            .expect("message");
        let ConsoleMessage::ApplyConfig { target_version, .. } = delivered else {
            panic!("expected apply-config");
        };
        assert_eq!(target_version, 1);

        let status = coordinator.status(agent_id).await.expect("status");
        assert_eq!(status.queue_depth, 1);

        agents::advance_applied_version(&db, agent_id, 1)
            .await
            .expect("advance");

        let delivered = tokio::time::timeout(Duration::from_secs(2), agent_rx.recv())
            .await
            .expect("second delivery")
            .expect("message");
        let ConsoleMessage::ApplyConfig { target_version, .. } = delivered else {
            panic!("expected apply-config");
        };
        assert_eq!(target_version, 2);

        agents::advance_applied_version(&db, agent_id, 2)
            .await
            .expect("advance");
        wait_for_state(&coordinator, agent_id, PushState::Confirmed).await;
    }

    #[tokio::test]
    async fn cancel_agent_fails_pending_and_queued_pushes() {
        let (coordinator, db, hub, agent_id) = seeded_coordinator().await;
        let _agent_rx = connect_fake_agent(&hub, agent_id).await;

        coordinator
            .submit(agent_id, socks_create("socks-a"))
            .await
            .expect("submit first");
        coordinator
            .submit(agent_id, socks_create("socks-b"))
            .await
            .expect("submit second");

        let mut events_rx = {
            // Subscribe late is fine; cancellation publishes after this.
            coordinator.inner.events.subscribe()
        };

        coordinator.cancel_agent(agent_id).await;

        let mut failed = 0;
        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
                .await
                .expect("event")
                .expect("recv");
            if let Event::PushFailed { reason, .. } = event {
                assert_eq!(reason, "agent removed");
                failed += 1;
            }
        }
        assert_eq!(failed, 2);

        // A later version advance must not flip anything to confirmed;
        // the worker is gone and its snapshots are final.
        agents::advance_applied_version(&db, agent_id, 99)
            .await
            .expect("advance");
        tokio::time::sleep(Duration::from_millis(100)).await;
        let status = coordinator.status(agent_id).await.expect("status");
        assert_eq!(status.queue_depth, 0);
        assert!(status.in_flight.is_none());
        assert!(status.last_resolved.is_none());
    }

    #[tokio::test]
    async fn disconnected_agent_push_waits_then_times_out() {
        let (coordinator, _db, _hub, agent_id) = seeded_coordinator().await;

        let accepted = coordinator
            .submit(agent_id, socks_create("socks-in"))
            .await
            .expect("submit");
        assert_eq!(accepted.state, PushState::Queued);

        wait_for_state(&coordinator, agent_id, PushState::TimedOut).await;
    }

    async fn wait_for_state(
        coordinator: &PushCoordinator,
        agent_id: Uuid,
        expected: PushState,
    ) -> PushStatusResponse {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let status = coordinator.status(agent_id).await.expect("status");
            if status
                .last_resolved
                .as_ref()
                .map(|snapshot| snapshot.state == expected)
                .unwrap_or(false)
            {
                return status;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "push never reached {expected:?}; status: {status:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
