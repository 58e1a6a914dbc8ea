//! Error taxonomy for the compile → link → deploy pipeline.

use std::time::Duration;

use alloy_core::primitives::TxHash;
use thiserror::Error;

/// Result alias used by the pipeline core.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by the pipeline core.
///
/// Every variant is terminal for the operation that raised it. The only
/// automatic retry in the pipeline is the confirmation poll, which retries on
/// "not yet mined" and never on one of these errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The compiler was given both inline source and input files, or neither.
    #[error("exactly one of inline source or input files must be provided, got {got}")]
    AmbiguousSource { got: &'static str },

    /// The external compiler exited with a failure or produced unparsable output.
    #[error("compiler invocation failed: {message}\n{stderr}")]
    CompilerInvocation { message: String, stderr: String },

    /// Two compiled contracts share a name.
    #[error("duplicate contract `{name}` (defined in {first} and {second})")]
    DuplicateContract {
        name: String,
        first: String,
        second: String,
    },

    /// A placeholder marker could not be decoded or lies outside the bytecode.
    #[error("malformed library placeholder in `{contract}` at byte offset {offset}")]
    MalformedPlaceholder { contract: String, offset: usize },

    /// A library reference has no matching contract, or no confirmed address at link time.
    #[error("contract `{contract}` references library `{library}` which cannot be resolved")]
    UnresolvedLibrary { contract: String, library: String },

    /// A truncated library reference matches more than one contract.
    #[error(
        "library reference `{library}` in `{contract}` is ambiguous, it matches {}",
        candidates.join(", ")
    )]
    AmbiguousLibrary {
        contract: String,
        library: String,
        candidates: Vec<String>,
    },

    /// The dependency graph contains a cycle. The path starts and ends on the same contract.
    #[error("cyclic library dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// The node did not answer before the readiness deadline.
    #[error("node was not ready after {timeout:?}: {message}")]
    NodeNotReady { timeout: Duration, message: String },

    /// A contract was not submitted because a library it depends on failed.
    #[error("`{contract}` was not deployed because its dependency `{failed}` failed to deploy")]
    DependencyDeploymentFailed { contract: String, failed: String },

    /// The deployment transaction was not mined before the deadline.
    #[error("deployment of `{contract}` (tx {tx_hash}) was not confirmed within {timeout:?}")]
    DeploymentTimeout {
        contract: String,
        tx_hash: TxHash,
        timeout: Duration,
    },

    /// The deployment transaction was mined but reverted.
    #[error("deployment transaction of `{contract}` (tx {tx_hash}) reverted")]
    TransactionReverted { contract: String, tx_hash: TxHash },

    /// The node no longer knows the deployment transaction.
    #[error("deployment transaction of `{contract}` (tx {tx_hash}) was dropped by the node")]
    TransactionDropped { contract: String, tx_hash: TxHash },

    /// A deployment plan names a contract missing from the compiled set.
    #[error("contract `{name}` is not part of the compiled set")]
    UnknownContract { name: String },

    /// The RPC endpoint returned an error while deploying a contract.
    #[error("rpc request failed while deploying `{contract}`: {message}")]
    Rpc { contract: String, message: String },

    /// Deployment was interrupted. The contract in flight, if any, stays pending.
    #[error("deployment cancelled{}", contract.as_ref().map(|c| format!(" while confirming `{c}`")).unwrap_or_default())]
    Cancelled { contract: Option<String> },
}

impl Error {
    /// Name of the contract the error is about, when there is one.
    pub fn contract(&self) -> Option<&str> {
        match self {
            Self::DuplicateContract { name, .. } | Self::UnknownContract { name } => Some(name),
            Self::MalformedPlaceholder { contract, .. }
            | Self::UnresolvedLibrary { contract, .. }
            | Self::AmbiguousLibrary { contract, .. }
            | Self::DependencyDeploymentFailed { contract, .. }
            | Self::DeploymentTimeout { contract, .. }
            | Self::TransactionReverted { contract, .. }
            | Self::TransactionDropped { contract, .. }
            | Self::Rpc { contract, .. } => Some(contract),
            Self::Cancelled { contract } => contract.as_deref(),
            Self::AmbiguousSource { .. }
            | Self::CompilerInvocation { .. }
            | Self::CyclicDependency { .. }
            | Self::NodeNotReady { .. } => None,
        }
    }
}
