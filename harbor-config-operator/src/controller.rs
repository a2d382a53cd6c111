//! The controller: per-object reconciliation and the dispatcher loop.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Semaphore, watch};
use tokio::task::{Id, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::audit::OperatorAuditLogger;
use crate::clients::{ClientFactory, RemoteResourceClient};
use crate::config::ControllerConfig;
use crate::context::SyncContext;
use crate::desired::DesiredStateResolver;
use crate::error::{ErrorKind, ReconcileError};
use crate::finalizer::{FinalizerLifecycleManager, FinalizerState, Lifecycle};
use crate::queue::{Outcome, WorkQueue};
use crate::reconciler::{ReconciliationEngine, StatusRecord};
use crate::resource::{HarborConfiguration, ObjectKey};
use crate::store::ObjectStore;
use crate::target::{TargetError, TargetResolver};

pub const REASON_SYNCED: &str = "Synced";

/// Condition reason for a failed pass.
pub fn failure_reason(err: &ReconcileError) -> &'static str {
    match err {
        ReconcileError::InvalidSpec(_) => "InvalidSpec",
        ReconcileError::Target(_) => "TargetUnavailable",
        ReconcileError::Teardown(_) => "TeardownFailed",
        ReconcileError::DeadlineExceeded { .. } => "DeadlineExceeded",
        ReconcileError::Cancelled { .. } => "Cancelled",
        ReconcileError::Store(_) => "StoreError",
        ReconcileError::Remote { source, .. } => match source.kind {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Transient => "TransientFailure",
            _ => "SyncFailed",
        },
    }
}

/// How the dispatcher treats a finished pass.
pub fn outcome_of(result: &Result<(), ReconcileError>) -> Outcome {
    match result {
        Ok(()) => Outcome::Success,
        Err(e) if e.is_cancelled() => Outcome::Cancelled,
        Err(e) if e.is_retryable() => Outcome::Retry,
        Err(_) => Outcome::Park,
    }
}

pub struct Controller {
    store: Arc<dyn ObjectStore>,
    resolver: DesiredStateResolver,
    targets: Arc<dyn TargetResolver>,
    clients: Arc<dyn ClientFactory>,
    engine: ReconciliationEngine,
    finalizers: FinalizerLifecycleManager,
    audit: Arc<OperatorAuditLogger>,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        targets: Arc<dyn TargetResolver>,
        clients: Arc<dyn ClientFactory>,
        audit: Arc<OperatorAuditLogger>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            engine: ReconciliationEngine::new(audit.clone()),
            finalizers: FinalizerLifecycleManager::new(store.clone(), audit.clone()),
            store,
            resolver: DesiredStateResolver,
            targets,
            clients,
            audit,
            config,
        }
    }

    /// Run one reconciliation pass for the object stored under `key`.
    pub async fn reconcile(
        &self,
        key: &ObjectKey,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), ReconcileError> {
        let Some(mut obj) = self.store.get(key).await? else {
            debug!(object = %key, "Object no longer exists");
            return Ok(());
        };

        let ctx = SyncContext::new(shutdown, self.config.reconcile_timeout);
        match Lifecycle::of(&obj) {
            Lifecycle::Active => self.converge(&ctx, &mut obj).await,
            Lifecycle::Terminating => self.terminate(&ctx, &mut obj).await,
        }
    }

    async fn client(
        &self,
        obj: &HarborConfiguration,
    ) -> Result<Arc<dyn RemoteResourceClient>, TargetError> {
        let endpoint = self.targets.resolve(&obj.spec.harbor_target).await?;
        self.clients
            .client_for(&endpoint)
            .map_err(TargetError::Client)
    }

    async fn sync(
        &self,
        ctx: &SyncContext,
        obj: &HarborConfiguration,
    ) -> Result<StatusRecord, ReconcileError> {
        let desired = self.resolver.resolve(&obj.spec)?;
        let client = self.client(obj).await?;
        self.engine.sync_all(ctx, client.as_ref(), &desired).await
    }

    async fn converge(
        &self,
        ctx: &SyncContext,
        obj: &mut HarborConfiguration,
    ) -> Result<(), ReconcileError> {
        let key = obj.key();
        info!(object = %key, generation = ?obj.metadata.generation, "Reconciling");

        self.finalizers.ensure_present(obj).await?;

        let now = Utc::now();
        match self.sync(ctx, obj).await {
            Ok(record) => {
                record.apply_to(&mut obj.status);
                obj.status.last_sync_time = Some(now);
                obj.status.set_synced(true, REASON_SYNCED, "", now);
                self.store.update_status(&key, &obj.status).await?;
                info!(object = %key, "Reconciled");
                Ok(())
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                warn!(object = %key, "Reconcile failed: {}", e);
                self.record_failure(obj, &e).await;
                Err(e)
            }
        }
    }

    async fn terminate(
        &self,
        ctx: &SyncContext,
        obj: &mut HarborConfiguration,
    ) -> Result<(), ReconcileError> {
        let key = obj.key();
        if FinalizerLifecycleManager::state(obj) == FinalizerState::Absent {
            debug!(object = %key, "Terminating without finalizer, nothing to do");
            return Ok(());
        }

        // Blank names are torn down through the IDs recorded in status.
        let names = self.resolver.names(&obj.spec);

        info!(object = %key, "Tearing down remote resources");
        let recorded = StatusRecord::from(&obj.status);
        let result = match self.client(obj).await {
            Ok(client) => {
                self.finalizers
                    .teardown(ctx, client.as_ref(), &names, &recorded)
                    .await
            }
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => {
                self.finalizers.remove(obj).await?;
                info!(object = %key, "Teardown complete, finalizer removed");
                Ok(())
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                warn!(object = %key, "Teardown failed: {}", e);
                if let ReconcileError::Teardown(failures) = &e {
                    self.audit.teardown_failed(&key, failures);
                }
                self.record_failure(obj, &e).await;
                Err(e)
            }
        }
    }

    /// Mark the object as not synced. A store failure here is only logged;
    /// the pass error is what gets reported.
    async fn record_failure(&self, obj: &mut HarborConfiguration, err: &ReconcileError) {
        obj.status
            .set_synced(false, failure_reason(err), &err.to_string(), Utc::now());
        if let Err(e) = self.store.update_status(&obj.key(), &obj.status).await {
            warn!(object = %obj.key(), "Failed to record status: {}", e);
        }
    }

    /// Dispatcher loop. Returns after `shutdown` fires and every running pass
    /// has finished.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            workers = self.config.workers,
            poll_interval = ?self.config.poll_interval,
            "Controller started"
        );

        let mut queue = WorkQueue::new(&self.config);
        let permits = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks: JoinSet<Result<(), ReconcileError>> = JoinSet::new();
        let mut running: HashMap<Id, ObjectKey> = HashMap::new();

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some(joined) = tasks.join_next_with_id() => {
                    Self::finish(&mut queue, &mut running, joined);
                }
                _ = ticker.tick() => {
                    let objects = match self.store.list().await {
                        Ok(objects) => objects,
                        Err(e) => {
                            warn!("Failed to list objects: {}", e);
                            continue;
                        }
                    };

                    for key in queue.due(&objects, Instant::now()) {
                        let this = Arc::clone(&self);
                        let permits = Arc::clone(&permits);
                        let rx = shutdown.clone();
                        let task_key = key.clone();
                        let handle = tasks.spawn(async move {
                            // The semaphore is never closed.
                            let Ok(_permit) = permits.acquire_owned().await else {
                                return Ok(());
                            };
                            this.reconcile(&task_key, rx).await
                        });
                        running.insert(handle.id(), key);
                    }
                }
            }
        }

        info!(in_flight = tasks.len(), "Controller stopping");
        while let Some(joined) = tasks.join_next_with_id().await {
            Self::finish(&mut queue, &mut running, joined);
        }
        info!("Controller stopped");
    }

    fn finish(
        queue: &mut WorkQueue,
        running: &mut HashMap<Id, ObjectKey>,
        joined: Result<(Id, Result<(), ReconcileError>), tokio::task::JoinError>,
    ) {
        let (id, outcome) = match joined {
            Ok((id, result)) => (id, outcome_of(&result)),
            Err(e) => {
                error!("Reconcile task failed: {}", e);
                (e.id(), Outcome::Retry)
            }
        };
        if let Some(key) = running.remove(&id) {
            debug!(object = %key, ?outcome, "Pass finished");
            queue.complete(&key, outcome, Instant::now());
        }
    }
}
