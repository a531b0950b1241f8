//! Error taxonomy of the quota engine.
//!
//! Every rejection carries a human readable message and a stable
//! [`ErrorCode`]. Callers that speak the admin console protocol map it to a
//! numeric result code with [`QuotaError::legacy_code`].

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Which invariant a [`Violation`] broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Rule {
    /// `min <= max` on one node.
    MinWithinMax,
    /// `sum(child.min) <= node.min`.
    ChildMinSum,
    /// `max(child.max) <= node.max`.
    ChildMaxCeiling,
    /// A name or quantity that cannot be interpreted.
    Malformed,
    /// Two nodes share a qualified name.
    DuplicateName,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::MinWithinMax => write!(f, "min<max"),
            Rule::ChildMinSum => write!(f, "min<sum(child.min)"),
            Rule::ChildMaxCeiling => write!(f, "max<max(child.max)"),
            Rule::Malformed => write!(f, "well-formed"),
            Rule::DuplicateName => write!(f, "unique name"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    /// Qualified name of the offending node.
    pub node: String,
    /// Resource type, empty for structural violations.
    pub resource: String,
    pub rule: Rule,
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node: {} resource: {} want: {} given: {} (expected {})",
            self.node, self.resource, self.rule, self.actual, self.expected
        )
    }
}

/// A namespace that cannot be detached because a workload is running in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusyNamespace {
    pub namespace: String,
    pub workload: String,
}

impl fmt::Display for BusyNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "namespace:{} pod:{} in running", self.namespace, self.workload)
    }
}

/// One principal whose bindings could not be brought up to date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrincipalFailure {
    pub principal: String,
    pub namespaces: Vec<String>,
    pub operation: String,
    pub reason: String,
}

impl fmt::Display for PrincipalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "principal {} ({}) over [{}]: {}",
            self.principal,
            self.operation,
            self.namespaces.join(","),
            self.reason
        )
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("quota validation failed: {}", join(.0))]
    Validation(Vec<Violation>),

    #[error("{}", join(.0))]
    Safety(Vec<BusyNamespace>),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("reconciliation failed for {} principal(s): {}", .0.len(), join(.0))]
    Reconciliation(Vec<PrincipalFailure>),

    #[error("{0}")]
    Conflict(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, QuotaError>;

/// Machine-stable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    QuotaValidation,
    NamespaceBusy,
    NotFound,
    ReconcileFailed,
    Conflict,
    InvalidRequest,
    StoreError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::QuotaValidation => "QUOTA_VALIDATION",
            ErrorCode::NamespaceBusy => "NAMESPACE_BUSY",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ReconcileFailed => "RECONCILE_FAILED",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::StoreError => "STORE_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations that report numeric result codes to the admin console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateTree,
    UpdateTree,
    DeleteTree,
    ListGroups,
    CreateGroup,
    UpdateGroup,
    DeleteGroup,
    GroupNamespaces,
}

impl QuotaError {
    pub fn code(&self) -> ErrorCode {
        match self {
            QuotaError::Validation(_) => ErrorCode::QuotaValidation,
            QuotaError::Safety(_) => ErrorCode::NamespaceBusy,
            QuotaError::NotFound { .. } => ErrorCode::NotFound,
            QuotaError::Reconciliation(_) => ErrorCode::ReconcileFailed,
            QuotaError::Conflict(_) => ErrorCode::Conflict,
            QuotaError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            QuotaError::Store(_) => ErrorCode::StoreError,
        }
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        QuotaError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Numeric result code of the admin console for `op` failing with `self`.
    pub fn legacy_code(&self, op: Operation) -> u32 {
        let store = matches!(self, QuotaError::Store(_));
        match op {
            Operation::CreateTree | Operation::UpdateTree | Operation::DeleteTree => {
                match self {
                    QuotaError::InvalidRequest(_)
                    | QuotaError::Validation(_)
                    | QuotaError::Safety(_) => 10206,
                    QuotaError::NotFound { .. } => 10207,
                    _ if store && op == Operation::DeleteTree => 10204,
                    _ => match op {
                        Operation::CreateTree => 10201,
                        Operation::UpdateTree => 10202,
                        _ => 10203,
                    },
                }
            }
            Operation::ListGroups => 10205,
            Operation::CreateGroup if store => 10602,
            Operation::CreateGroup => 10601,
            Operation::UpdateGroup => match self {
                QuotaError::NotFound { .. } => 10603,
                _ if store => 10612,
                _ => 10611,
            },
            Operation::DeleteGroup if store => 10622,
            Operation::DeleteGroup => 10621,
            Operation::GroupNamespaces => 10623,
        }
    }
}
