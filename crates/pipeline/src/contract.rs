//! Compiled contract types.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A source unit handed to the compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractSource {
    pub path: PathBuf,
    pub raw_text: String,
}

impl ContractSource {
    /// Read a source file from disk.
    pub fn read(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw_text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read contract source {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            raw_text,
        })
    }
}

/// A contract as produced by the compiler.
///
/// The bytecode may still contain library placeholders. Linking never touches
/// this value; it produces a new linked copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledContract {
    /// Contract name, unique within a compile run.
    pub name: String,
    /// Function and event descriptors, in compiler order.
    pub abi: Vec<Value>,
    /// Hex-encoded bytecode.
    pub bytecode: String,
    #[serde(default)]
    pub dev_doc: Value,
    #[serde(default)]
    pub user_doc: Value,
    /// Source file the contract was compiled from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
}

impl CompiledContract {
    fn origin(&self) -> String {
        self.source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<inline source>".to_string())
    }
}

/// The contracts of one compile run, in declaration order.
///
/// Construction rejects duplicate names, so lookups by name are unambiguous.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<CompiledContract>", into = "Vec<CompiledContract>")]
pub struct CompiledSet {
    contracts: Vec<CompiledContract>,
}

impl CompiledSet {
    /// Build a set, failing on the first duplicate name.
    pub fn new(contracts: impl IntoIterator<Item = CompiledContract>) -> Result<Self> {
        let mut set = Self::default();
        for contract in contracts {
            set.push(contract)?;
        }
        Ok(set)
    }

    /// Append a contract at the end of the declaration order.
    pub fn push(&mut self, contract: CompiledContract) -> Result<()> {
        if let Some(existing) = self.get(&contract.name) {
            return Err(Error::DuplicateContract {
                name: contract.name.clone(),
                first: existing.origin(),
                second: contract.origin(),
            });
        }
        self.contracts.push(contract);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&CompiledContract> {
        self.contracts.iter().find(|c| c.name == name)
    }

    /// Contract names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.contracts.iter().map(|c| c.name.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CompiledContract> {
        self.contracts.iter()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

impl TryFrom<Vec<CompiledContract>> for CompiledSet {
    type Error = Error;

    fn try_from(contracts: Vec<CompiledContract>) -> Result<Self> {
        Self::new(contracts)
    }
}

impl From<CompiledSet> for Vec<CompiledContract> {
    fn from(set: CompiledSet) -> Self {
        set.contracts
    }
}

impl<'a> IntoIterator for &'a CompiledSet {
    type Item = &'a CompiledContract;
    type IntoIter = std::slice::Iter<'a, CompiledContract>;

    fn into_iter(self) -> Self::IntoIter {
        self.contracts.iter()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn contract(name: &str, bytecode: &str) -> CompiledContract {
        CompiledContract {
            name: name.to_string(),
            abi: Vec::new(),
            bytecode: bytecode.to_string(),
            dev_doc: Value::Null,
            user_doc: Value::Null,
            source: None,
        }
    }

    #[test]
    fn test_set_keeps_declaration_order() {
        let set = CompiledSet::new([contract("B", "00"), contract("A", "00")]).unwrap();
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["B", "A"]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_set_rejects_duplicate_names() {
        let mut first = contract("Wallet", "00");
        first.source = Some(PathBuf::from("contracts/Wallet.sol"));
        let mut second = contract("Wallet", "01");
        second.source = Some(PathBuf::from("contracts/Other.sol"));

        let err = CompiledSet::new([first, second]).unwrap_err();
        match err {
            Error::DuplicateContract {
                name,
                first,
                second,
            } => {
                assert_eq!(name, "Wallet");
                assert_eq!(first, "contracts/Wallet.sol");
                assert_eq!(second, "contracts/Other.sol");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_set_deserialization_rejects_duplicates() {
        let json = serde_json::json!([
            { "name": "A", "abi": [], "bytecode": "00" },
            { "name": "A", "abi": [], "bytecode": "00" },
        ]);
        assert!(serde_json::from_value::<CompiledSet>(json).is_err());
    }
}
