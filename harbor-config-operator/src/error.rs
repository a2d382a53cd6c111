//! Error types shared by the engine, the finalizer manager and the controller.
//!
//! All branching in the reconcilers is expressed in terms of [`ErrorKind`],
//! never in terms of the transport error or its text.

use std::fmt;

use thiserror::Error;

use crate::desired::ResolveError;
use crate::store::StoreError;
use crate::target::TargetError;

/// Classified outcome of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    /// Malformed input payload. Retrying cannot succeed without a spec change.
    Validation,
    /// Network or backend failure.
    Transient,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::Validation => "validation error",
            ErrorKind::Transient => "transient failure",
            ErrorKind::Unknown => "unknown error",
        };
        f.write_str(s)
    }
}

/// A failed call against the remote service, already classified.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

/// Step of a reconciliation pass. Also names the teardown operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Registry,
    Project,
    Replication,
    Trigger,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::Registry => "registry",
            Step::Project => "project",
            Step::Replication => "replication",
            Step::Trigger => "trigger",
        };
        f.write_str(s)
    }
}

/// Errors returned from a reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A remote call failed in the given step.
    #[error("{step} step failed: {source}")]
    Remote {
        step: Step,
        #[source]
        source: RemoteError,
    },

    /// The shutdown signal fired while the step was waiting on the remote service.
    #[error("cancelled during {step} step")]
    Cancelled { step: Step },

    /// The per-pass deadline expired.
    #[error("deadline exceeded during {step} step")]
    DeadlineExceeded { step: Step },

    #[error("invalid desired state: {0}")]
    InvalidSpec(#[from] ResolveError),

    #[error(transparent)]
    Teardown(#[from] TeardownError),

    #[error("target: {0}")]
    Target(#[from] TargetError),

    #[error("store: {0}")]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// Classified kind of this error, if it maps onto one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ReconcileError::Remote { source, .. } => Some(source.kind),
            ReconcileError::DeadlineExceeded { .. } => Some(ErrorKind::Transient),
            ReconcileError::InvalidSpec(_) => Some(ErrorKind::Validation),
            ReconcileError::Target(e) => Some(e.kind()),
            ReconcileError::Cancelled { .. }
            | ReconcileError::Teardown(_)
            | ReconcileError::Store(_) => None,
        }
    }

    /// Whether the error has the given classified kind.
    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind() == Some(kind)
    }

    /// Whether the dispatcher should requeue the object with backoff.
    ///
    /// Validation errors stay put until the declared spec changes.
    pub fn is_retryable(&self) -> bool {
        !self.is_kind(ErrorKind::Validation)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReconcileError::Cancelled { .. })
    }
}

/// Failures accumulated while tearing down the three remote resources.
///
/// Failures are kept in teardown order (replication, project, registry).
#[derive(Debug, Default)]
pub struct TeardownError {
    pub failures: Vec<(Step, ReconcileError)>,
}

impl TeardownError {
    pub fn push(&mut self, step: Step, error: ReconcileError) {
        self.failures.push((step, error));
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Steps that failed, in the order they were attempted.
    pub fn steps(&self) -> Vec<Step> {
        self.failures.iter().map(|(step, _)| *step).collect()
    }
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "teardown failed for {} resource(s)", self.failures.len())?;
        for (step, error) in &self.failures {
            write!(f, "; {}: {}", step, error)?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownError {}
