//! Sequential deployment of a planned contract set.
//!
//! Contracts are deployed one at a time in plan order. Each one is linked
//! against the addresses confirmed so far, submitted, then polled until its
//! receipt settles. The first failure stops the run: contracts depending on
//! the failed one are aborted and the rest are skipped.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    time::Duration,
};

use alloy_core::primitives::{Address, TxHash};
use backon::{BackoffBuilder, ConstantBuilder, ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::watch;

use crate::{
    contract::CompiledSet,
    error::{Error, Result},
    graph::DependencyGraph,
    linker::link_contract,
    planner::DeploymentPlan,
    rpc::{ReceiptStatus, RpcClient, wait_until_ready},
};

/// Default interval between receipt polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default deadline for a single contract to be confirmed.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Exponential polling never waits longer than this many poll intervals.
const MAX_BACKOFF_FACTOR: u32 = 8;

/// How the delay between receipt polls evolves.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Backoff {
    /// Poll at a constant interval.
    #[default]
    Fixed,
    /// Double the interval after every poll, up to eight times the base interval.
    Exponential,
}

/// Bounds on how long the orchestrator waits for the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    pub poll_interval: Duration,
    /// Deadline for one contract, measured from its submission.
    pub timeout: Duration,
    pub backoff: Backoff,
    /// Wait for the node to answer before the first submission.
    pub node_ready_timeout: Option<Duration>,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            backoff: Backoff::default(),
            node_ready_timeout: None,
        }
    }
}

impl ConfirmationPolicy {
    /// Upper bound on polls, so the retry loop ends even without the deadline.
    fn max_polls(&self) -> usize {
        let interval = self.poll_interval.as_millis().max(1);
        usize::try_from(self.timeout.as_millis() / interval)
            .unwrap_or(usize::MAX)
            .saturating_add(1)
    }
}

/// Lifecycle state of a submitted contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Confirmed,
    Failed,
}

/// A contract whose deployment transaction has been submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedContract {
    pub name: String,
    /// Known once the transaction is confirmed.
    pub address: Option<Address>,
    pub transaction_hash: TxHash,
    pub status: DeploymentStatus,
}

impl DeployedContract {
    fn submitted(name: &str, transaction_hash: TxHash) -> Self {
        Self {
            name: name.to_string(),
            address: None,
            transaction_hash,
            status: DeploymentStatus::Pending,
        }
    }

    fn confirm(&mut self, address: Address) {
        if self.status == DeploymentStatus::Pending {
            self.address = Some(address);
            self.status = DeploymentStatus::Confirmed;
        }
    }

    fn fail(&mut self) {
        if self.status == DeploymentStatus::Pending {
            self.status = DeploymentStatus::Failed;
        }
    }
}

impl fmt::Display for DeployedContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            Some(address) => write!(f, "{} @ {address}", self.name)?,
            None => write!(f, "{} @ <pending>", self.name)?,
        }
        write!(f, " via txn:{}", self.transaction_hash)
    }
}

/// Outcome of a deployment run.
#[derive(Debug, Default)]
pub struct DeployResult {
    /// Submitted contracts, in plan order.
    pub contracts: Vec<DeployedContract>,
    /// Contracts never submitted because a library they need failed.
    pub aborted: Vec<(String, Error)>,
    /// Contracts never submitted because the run stopped early.
    pub skipped: Vec<String>,
}

impl DeployResult {
    pub fn get(&self, name: &str) -> Option<&DeployedContract> {
        self.contracts.iter().find(|c| c.name == name)
    }

    /// Addresses of every confirmed contract.
    pub fn addresses(&self) -> BTreeMap<String, Address> {
        self.contracts
            .iter()
            .filter_map(|c| c.address.map(|address| (c.name.clone(), address)))
            .collect()
    }

    /// Whether every submitted contract is confirmed and nothing was left out.
    pub fn is_complete(&self) -> bool {
        self.aborted.is_empty()
            && self.skipped.is_empty()
            && self
                .contracts
                .iter()
                .all(|c| c.status == DeploymentStatus::Confirmed)
    }
}

impl fmt::Display for DeployResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, contract) in self.contracts.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{contract}")?;
        }
        Ok(())
    }
}

/// A deployment run that stopped on an error, with everything done until then.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct DeployFailure {
    pub result: DeployResult,
    pub error: Error,
}

/// Why a receipt poll did not produce a settled receipt.
#[derive(Debug)]
enum PollError {
    NotMined,
    Rpc(anyhow::Error),
}

/// Drives the deployment of a plan against a node.
#[derive(Debug)]
pub struct Orchestrator<'a, R> {
    rpc: &'a R,
    policy: ConfirmationPolicy,
    cancel: Option<watch::Receiver<bool>>,
}

impl<'a, R: RpcClient> Orchestrator<'a, R> {
    pub fn new(rpc: &'a R, policy: ConfirmationPolicy) -> Self {
        Self {
            rpc,
            policy,
            cancel: None,
        }
    }

    /// Stop deploying once `cancel` turns `true`.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Deploy every contract of `plan`.
    pub async fn deploy(
        &self,
        set: &CompiledSet,
        graph: &DependencyGraph,
        plan: &DeploymentPlan,
    ) -> std::result::Result<DeployResult, DeployFailure> {
        let mut result = DeployResult::default();

        if let Some(timeout) = self.policy.node_ready_timeout {
            if let Err(error) = self.wait_for_node(timeout).await {
                result.skipped = plan.to_vec();
                return Err(DeployFailure { result, error });
            }
        }

        tracing::info!(contracts = plan.len(), "Starting deployment");

        let mut addresses = BTreeMap::new();

        for (step, name) in plan.iter().enumerate() {
            let outcome = if self.is_cancelled() {
                Err(Error::Cancelled { contract: None })
            } else {
                self.deploy_contract(set, graph, name, &addresses, &mut result)
                    .await
            };

            match outcome {
                Ok(address) => {
                    addresses.insert(name.clone(), address);
                }
                Err(error) => {
                    let remaining = match &error {
                        Error::Cancelled { contract: None } => &plan[step..],
                        _ => &plan[step + 1..],
                    };
                    stop(graph, name, remaining, &error, &mut result);
                    return Err(DeployFailure { result, error });
                }
            }
        }

        tracing::info!(contracts = result.contracts.len(), "Deployment complete");

        Ok(result)
    }

    async fn deploy_contract(
        &self,
        set: &CompiledSet,
        graph: &DependencyGraph,
        name: &str,
        addresses: &BTreeMap<String, Address>,
        result: &mut DeployResult,
    ) -> Result<Address> {
        let contract = set.get(name).ok_or_else(|| Error::UnknownContract {
            name: name.to_string(),
        })?;
        let linked = link_contract(contract, graph.placeholders(name), addresses)?;

        let tx_hash = self
            .rpc
            .submit_transaction(&linked.bytecode)
            .await
            .map_err(|e| Error::Rpc {
                contract: name.to_string(),
                message: format!("{e:#}"),
            })?;

        tracing::info!(contract = %name, tx_hash = %tx_hash, "Submitted deployment transaction");

        let mut deployed = DeployedContract::submitted(name, tx_hash);
        let outcome = self.confirm(name, tx_hash).await;

        match &outcome {
            Ok(address) => {
                deployed.confirm(*address);
                tracing::info!(contract = %name, address = %address, "Contract deployed");
            }
            Err(Error::Cancelled { .. }) => {}
            Err(error) => {
                deployed.fail();
                tracing::error!(contract = %name, tx_hash = %tx_hash, error = %error, "Deployment failed");
            }
        }

        result.contracts.push(deployed);
        outcome
    }

    /// Poll until `tx_hash` settles, the deadline passes or the run is cancelled.
    async fn confirm(&self, contract: &str, tx_hash: TxHash) -> Result<Address> {
        let interval = self.policy.poll_interval;
        let max_polls = self.policy.max_polls();

        let polling = async {
            match self.policy.backoff {
                Backoff::Fixed => {
                    let backoff = ConstantBuilder::default()
                        .with_delay(interval)
                        .with_max_times(max_polls);
                    self.poll_receipt(&tx_hash, backoff).await
                }
                Backoff::Exponential => {
                    let backoff = ExponentialBuilder::default()
                        .with_min_delay(interval)
                        .with_max_delay(interval * MAX_BACKOFF_FACTOR)
                        .with_factor(2.0)
                        .with_max_times(max_polls);
                    self.poll_receipt(&tx_hash, backoff).await
                }
            }
        };
        let deadline = tokio::time::timeout(self.policy.timeout, polling);

        let outcome = match self.cancel.clone() {
            Some(mut cancel) => tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => {
                    tracing::warn!(contract = %contract, tx_hash = %tx_hash, "Deployment cancelled while confirming");
                    return Err(Error::Cancelled { contract: Some(contract.to_string()) });
                }
                outcome = deadline => outcome,
            },
            None => deadline.await,
        };

        let contract = contract.to_string();
        match outcome {
            Ok(Ok(ReceiptStatus::Mined(address))) => Ok(address),
            Ok(Ok(ReceiptStatus::Reverted)) => Err(Error::TransactionReverted { contract, tx_hash }),
            Ok(Ok(ReceiptStatus::Dropped)) => Err(Error::TransactionDropped { contract, tx_hash }),
            Ok(Err(PollError::Rpc(e))) => Err(Error::Rpc {
                contract,
                message: format!("{e:#}"),
            }),
            Ok(Ok(ReceiptStatus::Pending)) | Ok(Err(PollError::NotMined)) | Err(_) => {
                Err(Error::DeploymentTimeout {
                    contract,
                    tx_hash,
                    timeout: self.policy.timeout,
                })
            }
        }
    }

    async fn poll_receipt<B: BackoffBuilder>(
        &self,
        tx_hash: &TxHash,
        backoff: B,
    ) -> std::result::Result<ReceiptStatus, PollError> {
        let rpc = self.rpc;

        (move || async move {
            match rpc.get_receipt(tx_hash).await {
                Ok(ReceiptStatus::Pending) => Err(PollError::NotMined),
                Ok(status) => Ok(status),
                Err(e) => Err(PollError::Rpc(e)),
            }
        })
        .retry(backoff)
        .sleep(tokio::time::sleep)
        .when(|e| matches!(e, PollError::NotMined))
        .notify(|_, delay| {
            tracing::trace!(tx_hash = %tx_hash, ?delay, "Transaction not mined yet");
        })
        .await
    }

    /// Wait for the node to answer, giving up on the deadline or on cancellation.
    async fn wait_for_node(&self, timeout: Duration) -> Result<()> {
        let rpc = self.rpc;

        let waiting = wait_until_ready("node", timeout, move || async move {
            let height = rpc.get_block_number().await?;
            tracing::debug!(height, "Node is ready");
            Ok(())
        });

        let outcome = match self.cancel.clone() {
            Some(mut cancel) => tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => {
                    tracing::warn!("Deployment cancelled while waiting for the node");
                    return Err(Error::Cancelled { contract: None });
                }
                outcome = waiting => outcome,
            },
            None => waiting.await,
        };

        outcome.map_err(|e| Error::NodeNotReady {
            timeout,
            message: format!("{e:#}"),
        })
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|cancel| *cancel.borrow())
    }
}

/// Resolve once the cancellation flag is raised. Never resolves if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Record what happens to the contracts after `failed` once the run stops.
fn stop(
    graph: &DependencyGraph,
    failed: &str,
    remaining: &[String],
    error: &Error,
    result: &mut DeployResult,
) {
    if matches!(error, Error::Cancelled { .. }) {
        result.skipped.extend(remaining.iter().cloned());
        return;
    }

    // Plan order puts libraries first, so one pass catches transitive dependents.
    let mut broken: BTreeSet<&str> = BTreeSet::from([failed]);

    for name in remaining {
        if graph.dependencies(name).any(|lib| broken.contains(lib)) {
            tracing::warn!(contract = %name, failed = %failed, "Aborting deployment of dependent contract");
            broken.insert(name);
            result.aborted.push((
                name.clone(),
                Error::DependencyDeploymentFailed {
                    contract: name.clone(),
                    failed: failed.to_string(),
                },
            ));
        } else {
            result.skipped.push(name.clone());
        }
    }
}
