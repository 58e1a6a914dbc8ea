//! Compiling every contract of a project directory.

use std::{
    collections::BTreeSet,
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result};

use crate::{
    artifact::{BuildArtifact, SourceDigest},
    compiler::{CompilerTool, SourceInput, Solc},
    contract::{CompiledContract, CompiledSet, ContractSource},
    error::Error,
};

/// Source file extension picked up from the contracts directory.
pub const SOURCE_EXTENSION: &str = "sol";

/// Restricts which contracts a compile run keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractFilter {
    /// Every contract of one source file: `path/to/File.sol`.
    File(PathBuf),
    /// One named contract of one source file: `path/to/File.sol:Name`.
    FileContract(PathBuf, String),
    /// Contracts with this name in any file: `Name`.
    Name(String),
}

impl ContractFilter {
    /// Whether the filter can select anything from `file`.
    pub fn selects_file(&self, file: &Path) -> bool {
        match self {
            Self::File(path) | Self::FileContract(path, _) => file.ends_with(path),
            Self::Name(_) => true,
        }
    }

    /// Whether the filter selects contract `name` compiled from `file`.
    pub fn selects(&self, file: &Path, name: &str) -> bool {
        match self {
            Self::File(path) => file.ends_with(path),
            Self::FileContract(path, wanted) => file.ends_with(path) && name == wanted,
            Self::Name(wanted) => name == wanted,
        }
    }
}

impl FromStr for ContractFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            anyhow::bail!("Empty contract filter");
        }

        if let Some((path, name)) = s.rsplit_once(':') {
            if path.is_empty() || name.is_empty() {
                anyhow::bail!("Invalid contract filter `{s}`, expected `path/to/File.sol:Name`");
            }
            return Ok(Self::FileContract(PathBuf::from(path), name.to_string()));
        }

        if Path::new(s).extension().is_some_and(|ext| ext == SOURCE_EXTENSION) {
            Ok(Self::File(PathBuf::from(s)))
        } else {
            Ok(Self::Name(s.to_string()))
        }
    }
}

impl fmt::Display for ContractFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::FileContract(path, name) => write!(f, "{}:{name}", path.display()),
            Self::Name(name) => write!(f, "{name}"),
        }
    }
}

/// Find every contract source under `dir`, sorted by path.
///
/// A file reachable through several paths (symlinked directories) is listed once,
/// under its first path in sort order.
pub fn find_contract_sources(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        anyhow::bail!("Contracts directory {} does not exist", dir.display());
    }

    let pattern = format!(
        "{}/**/*.{SOURCE_EXTENSION}",
        glob::Pattern::escape(&dir.display().to_string())
    );
    let mut candidates: Vec<PathBuf> = glob::glob(&pattern)
        .with_context(|| format!("Invalid source pattern {pattern}"))?
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(path = %e.path().display(), error = %e.error(), "Skipping unreadable path");
                None
            }
        })
        .filter(|path| path.is_file())
        .collect();
    candidates.sort();

    let mut seen = BTreeSet::new();
    let mut sources = Vec::with_capacity(candidates.len());
    for path in candidates {
        let canonical = path
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", path.display()))?;
        if seen.insert(canonical) {
            sources.push(path);
        }
    }

    Ok(sources)
}

/// What a project compile produced.
#[derive(Debug, Clone)]
pub struct CompileResult {
    /// Source files handed to the compiler.
    pub source_paths: Vec<PathBuf>,
    pub contracts: CompiledSet,
    /// Where the build artifact was written.
    pub output_path: PathBuf,
}

/// Compile the sources of `contracts_dir` and write the build artifact to `artifact_path`.
///
/// Each source file is compiled on its own. A contract reported by several
/// files (through imports) is kept once when the outputs agree; differing
/// contracts sharing a name are rejected. Nothing is written on failure.
pub fn compile_project<T: CompilerTool>(
    solc: &Solc<T>,
    contracts_dir: &Path,
    artifact_path: &Path,
    filters: &[ContractFilter],
) -> Result<CompileResult> {
    let source_paths: Vec<PathBuf> = find_contract_sources(contracts_dir)?
        .into_iter()
        .filter(|path| filters.is_empty() || filters.iter().any(|f| f.selects_file(path)))
        .collect();

    tracing::info!(
        dir = %contracts_dir.display(),
        sources = source_paths.len(),
        "Compiling contract sources"
    );

    let mut contracts = CompiledSet::default();
    let mut digests = Vec::with_capacity(source_paths.len());

    for path in &source_paths {
        let source = ContractSource::read(path)?;
        digests.push(SourceDigest::of(&source));

        let compiled = solc
            .compile_contracts(&SourceInput::Files(vec![path.clone()]))
            .with_context(|| format!("Failed to compile {}", path.display()))?;

        for contract in compiled {
            let keep = filters.is_empty() || filters.iter().any(|f| f.selects(path, &contract.name));
            if !keep {
                continue;
            }

            let contract = CompiledContract {
                source: Some(path.clone()),
                ..contract
            };
            add_contract(&mut contracts, contract)?;
        }
    }

    if contracts.is_empty() && !filters.is_empty() {
        tracing::warn!(
            filters = %filters.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
            "No contract matched the given filters"
        );
    }

    let compiler_version = match solc.version() {
        Ok(version) => Some(version),
        Err(e) => {
            tracing::warn!(error = %e, "Could not determine compiler version");
            None
        }
    };

    let artifact = BuildArtifact::new(compiler_version, digests, contracts);
    artifact.save_to_file(artifact_path)?;

    Ok(CompileResult {
        source_paths,
        contracts: artifact.contracts,
        output_path: artifact_path.to_path_buf(),
    })
}

/// Add `contract`, merging a re-reported import and rejecting a real name clash.
fn add_contract(contracts: &mut CompiledSet, contract: CompiledContract) -> Result<()> {
    if let Some(existing) = contracts.get(&contract.name) {
        if existing.bytecode == contract.bytecode && existing.abi == contract.abi {
            tracing::debug!(contract = %contract.name, "Contract already compiled through an import");
            return Ok(());
        }
    }

    contracts.push(contract).map_err(|e| match e {
        Error::DuplicateContract { .. } => anyhow::Error::new(e)
            .context("Contract names must be unique across all source files"),
        other => other.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::tests::FakeTool;
    use serde_json::json;
    use tempdir::TempDir;

    fn flat_output(contracts: &[(&str, &str)]) -> String {
        let contracts: serde_json::Map<String, serde_json::Value> = contracts
            .iter()
            .map(|(name, bin)| {
                (
                    name.to_string(),
                    json!({"abi": "[]", "bin": bin, "devdoc": "{}", "userdoc": "{}"}),
                )
            })
            .collect();
        json!({ "contracts": contracts }).to_string()
    }

    fn project(files: &[&str]) -> TempDir {
        let dir = TempDir::new("kiln-project").unwrap();
        for file in files {
            let path = dir.path().join("contracts").join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, format!("// {file}")).unwrap();
        }
        dir
    }

    #[test]
    fn test_parse_filters() {
        assert_eq!(
            "contracts/Bank.sol".parse::<ContractFilter>().unwrap(),
            ContractFilter::File(PathBuf::from("contracts/Bank.sol"))
        );
        assert_eq!(
            "contracts/Bank.sol:PiggyBank".parse::<ContractFilter>().unwrap(),
            ContractFilter::FileContract(PathBuf::from("contracts/Bank.sol"), "PiggyBank".into())
        );
        assert_eq!(
            "PiggyBank".parse::<ContractFilter>().unwrap(),
            ContractFilter::Name("PiggyBank".into())
        );
        assert!("Bank.sol:".parse::<ContractFilter>().is_err());
        assert!("".parse::<ContractFilter>().is_err());
    }

    #[test]
    fn test_filter_matching() {
        let file = Path::new("/work/contracts/Bank.sol");
        let by_file: ContractFilter = "contracts/Bank.sol".parse().unwrap();
        let by_name: ContractFilter = "PiggyBank".parse().unwrap();
        let pinned: ContractFilter = "Bank.sol:PiggyBank".parse().unwrap();

        assert!(by_file.selects(file, "Anything"));
        assert!(!by_file.selects_file(Path::new("/work/contracts/Other.sol")));
        assert!(by_name.selects(Path::new("/anywhere/X.sol"), "PiggyBank"));
        assert!(pinned.selects(file, "PiggyBank"));
        assert!(!pinned.selects(file, "AccountingLib"));
        // Component-wise, so `Bank.sol` does not match `PiggyBank.sol`.
        assert!(!by_file.selects_file(Path::new("/work/contracts/PiggyBank.sol")));
    }

    #[test]
    fn test_find_sources_recursively_sorted() {
        let dir = project(&["b/Lib.sol", "App.sol", "a/Util.sol"]);
        std::fs::write(dir.path().join("contracts").join("README.md"), "").unwrap();

        let sources = find_contract_sources(&dir.path().join("contracts")).unwrap();
        let names: Vec<_> = sources
            .iter()
            .map(|p| p.strip_prefix(dir.path().join("contracts")).unwrap().to_path_buf())
            .collect();

        assert_eq!(
            names,
            vec![
                PathBuf::from("App.sol"),
                PathBuf::from("a/Util.sol"),
                PathBuf::from("b/Lib.sol")
            ]
        );
    }

    #[test]
    fn test_find_sources_missing_dir() {
        let dir = TempDir::new("kiln-project").unwrap();
        let err = find_contract_sources(&dir.path().join("contracts")).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[cfg(unix)]
    #[test]
    fn test_find_sources_survives_symlink_loop() {
        let dir = project(&["App.sol", "lib/Lib.sol"]);
        let contracts = dir.path().join("contracts");
        std::os::unix::fs::symlink(&contracts, contracts.join("lib").join("loop")).unwrap();

        let sources = find_contract_sources(&contracts).unwrap();

        assert_eq!(
            sources,
            vec![contracts.join("App.sol"), contracts.join("lib").join("Lib.sol")]
        );
    }

    #[test]
    fn test_compile_project_writes_artifact() {
        let dir = project(&["Bank.sol"]);
        let tool = FakeTool::default();
        tool.push(true, &flat_output(&[("AccountingLib", "6001"), ("PiggyBank", "6002")]), "");
        tool.push(true, "solc, the solidity compiler\nVersion: 0.1.1-054b3c3c/Release-Linux/g++/JIT", "");
        let solc = Solc::new(tool);
        let artifact_path = dir.path().join("build").join("contracts.json");

        let result =
            compile_project(&solc, &dir.path().join("contracts"), &artifact_path, &[]).unwrap();

        assert_eq!(result.source_paths.len(), 1);
        assert_eq!(result.contracts.names().collect::<Vec<_>>(), vec!["AccountingLib", "PiggyBank"]);
        assert_eq!(result.output_path, artifact_path);

        let artifact = BuildArtifact::load_from_file(&artifact_path).unwrap();
        assert_eq!(artifact.contracts, result.contracts);
        assert_eq!(artifact.compiler_version.as_deref(), Some("0.1.1-054b3c3c"));
        assert_eq!(artifact.sources[0].path, result.source_paths[0]);
        assert_eq!(
            artifact.contracts.get("PiggyBank").unwrap().source.as_deref(),
            Some(result.source_paths[0].as_path())
        );
    }

    #[test]
    fn test_name_filter_keeps_matching_contracts() {
        let dir = project(&["Bank.sol"]);
        let tool = FakeTool::default();
        tool.push(true, &flat_output(&[("AccountingLib", "6001"), ("PiggyBank", "6002")]), "");
        tool.push(false, "", "no version");
        let solc = Solc::new(tool);

        let result = compile_project(
            &solc,
            &dir.path().join("contracts"),
            &dir.path().join("build/contracts.json"),
            &["PiggyBank".parse().unwrap()],
        )
        .unwrap();

        assert_eq!(result.contracts.names().collect::<Vec<_>>(), vec!["PiggyBank"]);
    }

    #[test]
    fn test_imported_contract_is_merged() {
        let dir = project(&["A.sol", "B.sol"]);
        let tool = FakeTool::default();
        tool.push(true, &flat_output(&[("Shared", "60aa"), ("A", "6001")]), "");
        tool.push(true, &flat_output(&[("Shared", "60aa"), ("B", "6002")]), "");
        tool.push(false, "", "");
        let solc = Solc::new(tool);

        let result = compile_project(
            &solc,
            &dir.path().join("contracts"),
            &dir.path().join("build/contracts.json"),
            &[],
        )
        .unwrap();

        assert_eq!(result.contracts.names().collect::<Vec<_>>(), vec!["Shared", "A", "B"]);
    }

    #[test]
    fn test_name_collision_across_files_writes_nothing() {
        let dir = project(&["A.sol", "B.sol"]);
        let tool = FakeTool::default();
        tool.push(true, &flat_output(&[("Token", "6001")]), "");
        tool.push(true, &flat_output(&[("Token", "6002")]), "");
        let solc = Solc::new(tool);
        let artifact_path = dir.path().join("build/contracts.json");

        let err = compile_project(&solc, &dir.path().join("contracts"), &artifact_path, &[])
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::DuplicateContract { name, .. }) if name == "Token"
        ));
        assert!(!artifact_path.exists());
    }

    #[test]
    fn test_compiler_failure_writes_nothing() {
        let dir = project(&["Broken.sol"]);
        let tool = FakeTool::default();
        tool.push(false, "", "Broken.sol:1:1: Error: Expected pragma");
        let solc = Solc::new(tool);
        let artifact_path = dir.path().join("build/contracts.json");

        let err = compile_project(&solc, &dir.path().join("contracts"), &artifact_path, &[])
            .unwrap_err();

        match err.downcast_ref::<Error>() {
            Some(Error::CompilerInvocation { stderr, .. }) => {
                assert!(stderr.contains("Expected pragma"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!artifact_path.exists());
    }
}
