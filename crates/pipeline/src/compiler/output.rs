//! Normalization of the compiler's `--combined-json` output.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{contract::CompiledContract, error::Error};

/// Why compiler output could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OutputError {
    Invalid(String),
    /// Two output keys name the same contract.
    Duplicate {
        name: String,
        first: String,
        second: String,
    },
}

impl OutputError {
    /// Attach the compiler's stderr where the error is about the compiler run.
    pub(crate) fn into_error(self, stderr: &str) -> Error {
        match self {
            Self::Invalid(message) => Error::CompilerInvocation {
                message,
                stderr: stderr.to_string(),
            },
            Self::Duplicate {
                name,
                first,
                second,
            } => Error::DuplicateContract {
                name,
                first,
                second,
            },
        }
    }
}

impl From<String> for OutputError {
    fn from(message: String) -> Self {
        Self::Invalid(message)
    }
}

/// Fields of one contract in flat mode.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatContract {
    pub bin: String,
    pub abi: Vec<Value>,
    pub devdoc: Value,
    pub userdoc: Value,
}

impl FlatContract {
    /// Turn the flat record into a [`CompiledContract`].
    pub fn into_compiled(self, name: String) -> CompiledContract {
        CompiledContract {
            name,
            abi: self.abi,
            bytecode: self.bin,
            dev_doc: self.devdoc,
            user_doc: self.userdoc,
            source: None,
        }
    }
}

/// Fields of one contract in rich mode.
#[derive(Debug, Clone, PartialEq)]
pub struct RichContract {
    pub binary: String,
    pub json_abi: Vec<Value>,
    pub sol_abi: String,
    pub natspec_dev: Value,
    pub natspec_user: Value,
}

#[derive(Debug, Deserialize)]
struct CombinedJson {
    contracts: Map<String, Value>,
}

/// Parse flat output, keeping the compiler's contract order.
pub(crate) fn parse_flat(stdout: &str) -> Result<Vec<(String, FlatContract)>, OutputError> {
    parse_combined(stdout)?
        .into_iter()
        .map(|(name, fields)| {
            let contract = FlatContract {
                bin: string_field(&fields, "bin")?,
                abi: abi_field(&fields, "abi")?,
                devdoc: embedded_json(&fields, "devdoc")?,
                userdoc: embedded_json(&fields, "userdoc")?,
            };
            Ok((name, contract))
        })
        .collect()
}

/// Parse rich output into a name-keyed map.
pub(crate) fn parse_rich(stdout: &str) -> Result<BTreeMap<String, RichContract>, OutputError> {
    parse_combined(stdout)?
        .into_iter()
        .map(|(name, fields)| {
            let contract = RichContract {
                binary: string_field(&fields, "binary")?,
                json_abi: abi_field(&fields, "json-abi")?,
                sol_abi: string_field(&fields, "sol-abi")?,
                natspec_dev: embedded_json(&fields, "natspec-dev")?,
                natspec_user: embedded_json(&fields, "natspec-user")?,
            };
            Ok((name, contract))
        })
        .collect()
}

/// Split the output into per-contract fields, rejecting names that collide once
/// the `path:` qualifier is dropped.
fn parse_combined(stdout: &str) -> Result<Vec<(String, Map<String, Value>)>, OutputError> {
    let combined: CombinedJson = serde_json::from_str(stdout.trim())
        .map_err(|e| format!("failed to parse compiler output as JSON: {e}"))?;

    let mut keys: BTreeMap<String, String> = BTreeMap::new();
    let mut contracts = Vec::with_capacity(combined.contracts.len());

    for (key, value) in combined.contracts {
        let name = contract_name(&key).to_string();
        if let Some(first) = keys.get(&name) {
            return Err(OutputError::Duplicate {
                name,
                first: first.clone(),
                second: key,
            });
        }

        match value {
            Value::Object(fields) => contracts.push((name.clone(), fields)),
            other => {
                return Err(format!("contract `{name}` has non-object output: {other}").into());
            }
        }
        keys.insert(name, key);
    }

    Ok(contracts)
}

/// Newer compilers key contracts as `path:Name`.
fn contract_name(key: &str) -> &str {
    key.rsplit_once(':').map_or(key, |(_, name)| name)
}

fn string_field(fields: &Map<String, Value>, key: &str) -> Result<String, String> {
    match fields.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(format!("field `{key}` is not a string: {other}")),
        None => Err(format!("missing field `{key}`")),
    }
}

/// Older compilers embed JSON documents as strings, newer ones inline them.
fn embedded_json(fields: &Map<String, Value>, key: &str) -> Result<Value, String> {
    match fields.get(key) {
        Some(Value::String(s)) if s.trim().is_empty() => Ok(Value::Null),
        Some(Value::String(s)) => serde_json::from_str(s)
            .map_err(|e| format!("field `{key}` does not hold valid JSON: {e}")),
        Some(value) => Ok(value.clone()),
        None => Ok(Value::Null),
    }
}

fn abi_field(fields: &Map<String, Value>, key: &str) -> Result<Vec<Value>, String> {
    match embedded_json(fields, key)? {
        Value::Array(items) => Ok(items),
        Value::Null => Err(format!("missing field `{key}`")),
        other => Err(format!("field `{key}` is not a list: {other}")),
    }
}
