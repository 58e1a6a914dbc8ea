//! End-to-end tests for kiln-pipeline.
//!
//! The compiler and the node are replaced by in-process stand-ins: the
//! compiler answers with canned `--combined-json` output and the node follows
//! a per-transaction script. Everything in between runs for real.

use std::{
    collections::{BTreeMap, VecDeque},
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use alloy_core::primitives::{Address, TxHash};
use anyhow::Result;
use kiln_pipeline::{
    Backoff, BuildArtifact, CompilerTool, ConfirmationPolicy, DependencyGraph, DeploymentPlan,
    DeploymentStatus, Error, Orchestrator, ReceiptStatus, RpcClient, Solc, compile_project,
    compiler::ToolOutput, has_placeholders,
};
use serde_json::json;
use tempdir::TempDir;

/// Route pipeline logs to the test output. Safe to call from every test.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .with_test_writer()
        .try_init();
}

const ACCOUNTING_LIB_BIN: &str = "6060604052600a8060106000396000f3";

/// PiggyBank calls into AccountingLib, so its bytecode carries a placeholder.
fn piggy_bank_bin() -> String {
    format!("606060405273{:_<40}6000f3", "__AccountingLib")
}

/// Compiler stand-in answering from a queue.
struct CannedCompiler {
    responses: Mutex<VecDeque<ToolOutput>>,
}

impl CannedCompiler {
    fn new(stdouts: impl IntoIterator<Item = String>) -> Self {
        let responses = stdouts
            .into_iter()
            .map(|stdout| ToolOutput {
                success: true,
                stdout,
                stderr: String::new(),
            })
            .collect();
        Self {
            responses: Mutex::new(responses),
        }
    }
}

impl CompilerTool for CannedCompiler {
    fn run(&self, _args: &[String], _stdin: Option<&str>) -> std::io::Result<ToolOutput> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| std::io::Error::other("compiler called too many times"))
    }
}

fn combined_json(contracts: &[(&str, &str)]) -> String {
    let contracts: serde_json::Map<String, serde_json::Value> = contracts
        .iter()
        .map(|(name, bin)| {
            (
                name.to_string(),
                json!({
                    "abi": "[{\"inputs\":[],\"type\":\"constructor\"}]\n",
                    "bin": bin,
                    "devdoc": "{\n   \"methods\" : {}\n}\n",
                    "userdoc": "{\n   \"methods\" : {}\n}\n",
                }),
            )
        })
        .collect();
    json!({ "contracts": contracts, "version": "0.1.1-054b3c3c" }).to_string()
}

/// Node stand-in. Transactions carrying a stuck bytecode never get mined.
#[derive(Default)]
struct ScriptedNode {
    stuck: Vec<&'static str>,
    state: Mutex<NodeState>,
}

#[derive(Default)]
struct NodeState {
    /// Submitted bytecode, by transaction index.
    submitted: Vec<String>,
    deployed: BTreeMap<TxHash, Address>,
}

impl ScriptedNode {
    fn stuck_on(bytecodes: &[&'static str]) -> Self {
        Self {
            stuck: bytecodes.to_vec(),
            ..Self::default()
        }
    }

    fn submitted(&self) -> Vec<String> {
        self.state.lock().unwrap().submitted.clone()
    }
}

impl RpcClient for ScriptedNode {
    async fn submit_transaction(&self, bytecode: &str) -> Result<TxHash> {
        let mut state = self.state.lock().unwrap();
        state.submitted.push(bytecode.to_string());

        let index = state.submitted.len() as u8;
        let tx_hash = TxHash::with_last_byte(index);
        if !self.stuck.iter().any(|stuck| *stuck == bytecode) {
            state
                .deployed
                .insert(tx_hash, Address::with_last_byte(0xa0 + index));
        }
        Ok(tx_hash)
    }

    async fn get_receipt(&self, tx_hash: &TxHash) -> Result<ReceiptStatus> {
        let state = self.state.lock().unwrap();
        Ok(match state.deployed.get(tx_hash) {
            Some(address) => ReceiptStatus::Mined(*address),
            None => ReceiptStatus::Pending,
        })
    }

    async fn get_block_number(&self) -> Result<u64> {
        Ok(42)
    }
}

fn write_project(root: &Path) -> PathBuf {
    let contracts_dir = root.join("contracts");
    std::fs::create_dir_all(&contracts_dir).unwrap();
    std::fs::write(
        contracts_dir.join("Bank.sol"),
        "library AccountingLib {}\ncontract PiggyBank {}\n",
    )
    .unwrap();
    contracts_dir
}

fn policy() -> ConfirmationPolicy {
    ConfirmationPolicy {
        poll_interval: Duration::from_millis(5),
        timeout: Duration::from_millis(100),
        backoff: Backoff::Fixed,
        node_ready_timeout: Some(Duration::from_secs(1)),
    }
}

/// Compile the sample project and load the written artifact back.
fn compile_sample(root: &Path) -> BuildArtifact {
    let contracts_dir = write_project(root);
    let artifact_path = root.join("build").join("contracts.json");
    let solc = Solc::new(CannedCompiler::new([
        combined_json(&[("PiggyBank", &piggy_bank_bin()), ("AccountingLib", ACCOUNTING_LIB_BIN)]),
        "solc, the solidity compiler commandline interface\nVersion: 0.1.1-054b3c3c/Release-Linux/g++/JIT linked to libethereum-0.9.92-0/Release-Linux/g++/JIT".to_string(),
    ]));

    let result = compile_project(&solc, &contracts_dir, &artifact_path, &[]).unwrap();
    assert_eq!(result.output_path, artifact_path);

    BuildArtifact::load_from_file(&artifact_path).unwrap()
}

#[tokio::test]
async fn test_compile_link_and_deploy() {
    init_tracing();
    let dir = TempDir::new("kiln-e2e").unwrap();
    let artifact = compile_sample(dir.path());
    assert_eq!(artifact.compiler_version.as_deref(), Some("0.1.1-054b3c3c"));
    assert!(artifact.stale_sources().is_empty());

    let graph = DependencyGraph::extract(&artifact.contracts).unwrap();
    let plan = DeploymentPlan::from_graph(&graph).unwrap();
    assert_eq!(*plan, vec!["AccountingLib", "PiggyBank"]);

    let node = ScriptedNode::default();
    let result = Orchestrator::new(&node, policy())
        .deploy(&artifact.contracts, &graph, &plan)
        .await
        .unwrap();

    assert!(result.is_complete());
    let library = result.get("AccountingLib").unwrap();
    let piggy_bank = result.get("PiggyBank").unwrap();
    assert_eq!(piggy_bank.status, DeploymentStatus::Confirmed);

    // The library address is linked into the dependent's bytecode.
    let library_address = library.address.unwrap();
    let submitted = node.submitted();
    assert_eq!(
        submitted[1],
        format!("606060405273{}6000f3", hex::encode(library_address.as_slice()))
    );
    assert!(!has_placeholders(&submitted[1]));

    // The compiled artifact keeps the unlinked bytecode.
    assert!(has_placeholders(&artifact.contracts.get("PiggyBank").unwrap().bytecode));

    let report = result.to_string();
    assert!(report.starts_with("AccountingLib @ 0x"));
    assert!(report.contains("\nPiggyBank @ 0x"));
    assert!(report.contains(" via txn:0x"));
}

#[tokio::test]
async fn test_library_timeout_aborts_dependent() {
    init_tracing();
    let dir = TempDir::new("kiln-e2e").unwrap();
    let artifact = compile_sample(dir.path());
    let graph = DependencyGraph::extract(&artifact.contracts).unwrap();
    let plan = DeploymentPlan::from_graph(&graph).unwrap();

    let node = ScriptedNode::stuck_on(&[ACCOUNTING_LIB_BIN]);
    let failure = Orchestrator::new(&node, policy())
        .deploy(&artifact.contracts, &graph, &plan)
        .await
        .unwrap_err();

    assert!(matches!(
        failure.error,
        Error::DeploymentTimeout { ref contract, .. } if contract == "AccountingLib"
    ));
    assert_eq!(
        failure.result.get("AccountingLib").unwrap().status,
        DeploymentStatus::Failed
    );
    assert_eq!(
        failure.result.to_string(),
        format!("AccountingLib @ <pending> via txn:{}", TxHash::with_last_byte(1))
    );

    // PiggyBank is never submitted.
    assert_eq!(node.submitted().len(), 1);
    let (name, reason) = &failure.result.aborted[0];
    assert_eq!(name, "PiggyBank");
    assert_eq!(
        reason.to_string(),
        "`PiggyBank` was not deployed because its dependency `AccountingLib` failed to deploy"
    );
}

#[test]
fn test_cyclic_libraries_are_rejected_before_deployment() {
    let dir = TempDir::new("kiln-e2e").unwrap();
    let contracts_dir = dir.path().join("contracts");
    std::fs::create_dir_all(&contracts_dir).unwrap();
    std::fs::write(contracts_dir.join("Cycle.sol"), "").unwrap();

    let ping = format!("60{:_<40}", "__Pong");
    let pong = format!("60{:_<40}", "__Ping");
    let solc = Solc::new(CannedCompiler::new([
        combined_json(&[("Ping", &ping), ("Pong", &pong)]),
        "Version: 0.1.1/Release-Linux".to_string(),
    ]));

    let result = compile_project(
        &solc,
        &contracts_dir,
        &dir.path().join("build").join("contracts.json"),
        &[],
    )
    .unwrap();

    let graph = DependencyGraph::extract(&result.contracts).unwrap();
    let err = DeploymentPlan::from_graph(&graph).unwrap_err();
    assert_eq!(err.to_string(), "cyclic library dependency: Ping -> Pong -> Ping");
}
