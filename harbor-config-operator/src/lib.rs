//! harbor-config-operator: reconciles declared `HarborConfiguration` objects
//! with a Harbor instance.
//!
//! Each object declares a registry, a project on top of it and a replication
//! policy from that registry. The [`controller::Controller`] keeps them in
//! sync, requests a replication run after every successful pass and removes
//! the three resources again before a deleted object is released.

pub mod audit;
pub mod classify;
pub mod clients;
pub mod config;
pub mod context;
pub mod controller;
pub mod desired;
pub mod error;
pub mod finalizer;
pub mod queue;
pub mod reconciler;
pub mod resource;
pub mod store;
pub mod target;

pub use audit::OperatorAuditLogger;
pub use clients::{ClientFactory, HarborClient, HarborClientFactory, RemoteResourceClient};
pub use config::{ClientConfig, ControllerConfig, FINALIZER};
pub use context::SyncContext;
pub use controller::Controller;
pub use desired::{DesiredConfiguration, DesiredStateResolver};
pub use error::{ErrorKind, ReconcileError, RemoteError, Step, TeardownError};
pub use finalizer::{FinalizerLifecycleManager, FinalizerState, Lifecycle};
pub use reconciler::{ReconciliationEngine, StatusRecord};
pub use resource::{HarborConfiguration, ObjectKey};
pub use store::{FileStore, MemoryStore, ObjectStore, StoreError};
pub use target::{HarborEndpoint, SpecTargetResolver, TargetResolver};
