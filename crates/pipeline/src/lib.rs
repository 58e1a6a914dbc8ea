//! kiln-pipeline - Compile, link and deploy smart contracts.
//!
//! The pipeline runs strictly forward: contract sources are compiled into a
//! [`CompiledSet`], library references are extracted into a
//! [`DependencyGraph`], the graph is ordered into a [`DeploymentPlan`], and the
//! [`Orchestrator`] deploys the plan step by step, linking every contract
//! against the library addresses confirmed before it.

mod artifact;
pub use artifact::{BuildArtifact, SourceDigest};

pub mod compiler;
pub use compiler::{CompilerOutput, CompilerTool, OutputMode, Solc, SolcBinary, SourceInput};

mod config;
pub use config::{
    ARTIFACT_FILENAME, CONFIG_FILENAME, CompilerConfig, DeployConfig, KilnConfig, ProjectConfig,
    RpcConfig,
};

mod contract;
pub use contract::{CompiledContract, CompiledSet, ContractSource};

mod error;
pub use error::{Error, Result};

mod graph;
pub use graph::DependencyGraph;

mod linker;
pub use linker::{link_bytecode, link_contract};

mod orchestrator;
pub use orchestrator::{
    Backoff, ConfirmationPolicy, DeployFailure, DeployResult, DeployedContract, DeploymentStatus,
    Orchestrator,
};

mod placeholder;
pub use placeholder::{LibraryPlaceholder, has_placeholders, scan_placeholders};

mod planner;
pub use planner::DeploymentPlan;

mod project;
pub use project::{CompileResult, ContractFilter, compile_project, find_contract_sources};

pub mod rpc;
pub use rpc::{JsonRpcClient, ReceiptStatus, RpcClient};
