//! Adapter around the external Solidity compiler.
//!
//! The compiler is a black box reached through [`CompilerTool`]. This module
//! validates the input shape, builds the command line, and normalizes the
//! output into one of three [`OutputMode`]s.

mod output;
mod version;

use std::{
    collections::BTreeMap,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

pub use output::{FlatContract, RichContract};
pub use version::parse_version;

use crate::{
    contract::CompiledContract,
    error::{Error, Result},
};

/// Default compiler binary name.
pub const DEFAULT_SOLC_BINARY: &str = "solc";

/// `--combined-json` selection for flat and raw output.
const FLAT_OUTPUT_FIELDS: &str = "abi,bin,devdoc,userdoc";

/// `--combined-json` selection for rich output.
const RICH_OUTPUT_FIELDS: &str = "json-abi,binary,sol-abi,natspec-dev,natspec-user";

/// Captured result of one compiler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// A way of running the compiler executable.
pub trait CompilerTool {
    /// Run the compiler with `args`, feeding `stdin` when given.
    fn run(&self, args: &[String], stdin: Option<&str>) -> std::io::Result<ToolOutput>;
}

/// Runs a compiler binary as a child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolcBinary {
    path: PathBuf,
}

impl SolcBinary {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for SolcBinary {
    fn default() -> Self {
        Self::new(DEFAULT_SOLC_BINARY)
    }
}

impl CompilerTool for SolcBinary {
    fn run(&self, args: &[String], stdin: Option<&str>) -> std::io::Result<ToolOutput> {
        tracing::debug!(binary = %self.path.display(), ?args, "Running compiler");

        let mut child = Command::new(&self.path)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let pipe = child.stdin.take();

        // Feed stdin while the output is drained, so neither side blocks on a full pipe.
        let output = std::thread::scope(|scope| {
            let writer = match (stdin, pipe) {
                (Some(source), Some(mut pipe)) => Some(scope.spawn(move || {
                    match pipe.write_all(source.as_bytes()) {
                        // The compiler may exit before reading all of it.
                        Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
                        other => other,
                    }
                })),
                _ => None,
            };

            let output = child.wait_with_output()?;

            if let Some(writer) = writer {
                writer
                    .join()
                    .map_err(|_| std::io::Error::other("compiler stdin writer panicked"))??;
            }

            Ok::<_, std::io::Error>(output)
        })?;

        Ok(ToolOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// What the compiler is asked to compile.
///
/// Exactly one of inline source text or input files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceInput {
    Inline(String),
    Files(Vec<PathBuf>),
}

impl SourceInput {
    /// Validate the "one or the other" rule.
    pub fn new(source: Option<&str>, input_files: &[PathBuf]) -> Result<Self> {
        match (source, input_files.is_empty()) {
            (Some(_), false) => Err(Error::AmbiguousSource { got: "both" }),
            (None, true) => Err(Error::AmbiguousSource { got: "neither" }),
            (Some(source), true) => Ok(Self::Inline(source.to_string())),
            (None, false) => Ok(Self::Files(input_files.to_vec())),
        }
    }

    fn args(&self) -> Vec<String> {
        match self {
            Self::Inline(_) => vec!["-".to_string()],
            Self::Files(files) => files.iter().map(|f| f.display().to_string()).collect(),
        }
    }

    fn stdin(&self) -> Option<&str> {
        match self {
            Self::Inline(source) => Some(source),
            Self::Files(_) => None,
        }
    }
}

/// Shape of the normalized compiler output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputMode {
    /// The compiler's stdout, untouched.
    Raw,
    /// Ordered `(name, fields)` pairs.
    StructuredFlat,
    /// Name-keyed records with separately keyed ABI, binary and docs.
    StructuredRich,
}

/// Normalized compiler output.
#[derive(Debug, Clone, PartialEq)]
pub enum CompilerOutput {
    Raw(String),
    Flat(Vec<(String, FlatContract)>),
    Rich(BTreeMap<String, RichContract>),
}

/// The compiler adapter.
#[derive(Debug, Clone, Default)]
pub struct Solc<T = SolcBinary> {
    tool: T,
}

impl<T: CompilerTool> Solc<T> {
    pub fn new(tool: T) -> Self {
        Self { tool }
    }

    /// Compile inline `source` or `input_files` (never both, never neither).
    ///
    /// The input shape is checked before the compiler is started.
    pub fn compile(
        &self,
        source: Option<&str>,
        input_files: &[PathBuf],
        mode: OutputMode,
    ) -> Result<CompilerOutput> {
        let input = SourceInput::new(source, input_files)?;
        self.compile_input(&input, mode)
    }

    /// Compile an already validated input.
    pub fn compile_input(&self, input: &SourceInput, mode: OutputMode) -> Result<CompilerOutput> {
        let fields = match mode {
            OutputMode::Raw | OutputMode::StructuredFlat => FLAT_OUTPUT_FIELDS,
            OutputMode::StructuredRich => RICH_OUTPUT_FIELDS,
        };

        let mut args = vec!["--combined-json".to_string(), fields.to_string()];
        args.extend(input.args());

        let tool_output = self.invoke(&args, input.stdin())?;

        let invalid = |e: output::OutputError| e.into_error(&tool_output.stderr);

        match mode {
            OutputMode::Raw => Ok(CompilerOutput::Raw(tool_output.stdout.clone())),
            OutputMode::StructuredFlat => output::parse_flat(&tool_output.stdout)
                .map(CompilerOutput::Flat)
                .map_err(invalid),
            OutputMode::StructuredRich => output::parse_rich(&tool_output.stdout)
                .map(CompilerOutput::Rich)
                .map_err(invalid),
        }
    }

    /// Compile into [`CompiledContract`]s, in the order the compiler reports them.
    pub fn compile_contracts(&self, input: &SourceInput) -> Result<Vec<CompiledContract>> {
        let mut args = vec![
            "--combined-json".to_string(),
            FLAT_OUTPUT_FIELDS.to_string(),
        ];
        args.extend(input.args());

        let tool_output = self.invoke(&args, input.stdin())?;
        let contracts = output::parse_flat(&tool_output.stdout)
            .map_err(|e| e.into_error(&tool_output.stderr))?;

        Ok(contracts
            .into_iter()
            .map(|(name, fields)| fields.into_compiled(name))
            .collect())
    }

    /// Probe the compiler version.
    pub fn version(&self) -> Result<String> {
        let tool_output = self.invoke(&["--version".to_string()], None)?;
        parse_version(&tool_output.stdout).ok_or_else(|| Error::CompilerInvocation {
            message: format!("no version in compiler banner: {}", tool_output.stdout.trim()),
            stderr: tool_output.stderr,
        })
    }

    fn invoke(&self, args: &[String], stdin: Option<&str>) -> Result<ToolOutput> {
        let output = self
            .tool
            .run(args, stdin)
            .map_err(|e| Error::CompilerInvocation {
                message: format!("failed to run compiler: {e}"),
                stderr: String::new(),
            })?;

        if !output.success {
            return Err(Error::CompilerInvocation {
                message: "compiler exited with a failure status".to_string(),
                stderr: output.stderr,
            });
        }

        Ok(output)
    }
}
