//! Library dependency extraction.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    contract::CompiledSet,
    error::{Error, Result},
    placeholder::{LibraryPlaceholder, scan_placeholders},
};

/// Library dependencies between the contracts of one compiled set.
///
/// An edge `A -> B` means the bytecode of `A` holds a placeholder for library
/// `B`. Every placeholder occurrence is kept so the linker can substitute each
/// region, while the edge set collapses repeated references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    /// Contract names in declaration order.
    contracts: Vec<String>,
    dependencies: BTreeMap<String, BTreeSet<String>>,
    placeholders: BTreeMap<String, Vec<LibraryPlaceholder>>,
}

impl DependencyGraph {
    /// Scan every contract of `set` and resolve its library references.
    pub fn extract(set: &CompiledSet) -> Result<Self> {
        let contracts: Vec<String> = set.names().map(String::from).collect();
        let mut graph = Self {
            contracts,
            ..Self::default()
        };

        for contract in set {
            let found = scan_placeholders(&contract.name, &contract.bytecode)?;
            let mut deps = BTreeSet::new();

            for placeholder in &found {
                let library = graph.resolve(placeholder)?;
                deps.insert(library);
            }

            if !deps.is_empty() {
                tracing::debug!(
                    contract = %contract.name,
                    libraries = ?deps,
                    placeholders = found.len(),
                    "Resolved library dependencies"
                );
            }

            graph.dependencies.insert(contract.name.clone(), deps);
            graph.placeholders.insert(contract.name.clone(), found);
        }

        Ok(graph)
    }

    fn resolve(&self, placeholder: &LibraryPlaceholder) -> Result<String> {
        let candidates: Vec<&String> = self
            .contracts
            .iter()
            .filter(|name| placeholder.refers_to(name))
            .collect();

        match candidates.as_slice() {
            [library] => Ok((*library).clone()),
            [] => Err(Error::UnresolvedLibrary {
                contract: placeholder.contract_name.clone(),
                library: placeholder.referenced_library_name.clone(),
            }),
            many => Err(Error::AmbiguousLibrary {
                contract: placeholder.contract_name.clone(),
                library: placeholder.referenced_library_name.clone(),
                candidates: many.iter().map(|c| c.to_string()).collect(),
            }),
        }
    }

    /// Contract names in declaration order.
    pub fn contracts(&self) -> &[String] {
        &self.contracts
    }

    /// Libraries `contract` depends on.
    pub fn dependencies(&self, contract: &str) -> impl Iterator<Item = &str> {
        self.dependencies
            .get(contract)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Every placeholder found in `contract`, in order of appearance.
    pub fn placeholders(&self, contract: &str) -> &[LibraryPlaceholder] {
        self.placeholders
            .get(contract)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// All edges as `(contract, library)` pairs.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.dependencies.iter().flat_map(|(contract, libs)| {
            libs.iter()
                .map(move |lib| (contract.as_str(), lib.as_str()))
        })
    }

    pub fn edge_count(&self) -> usize {
        self.dependencies.values().map(BTreeSet::len).sum()
    }

    /// Contracts with at least one library dependency, mapped to those libraries.
    pub fn linker_dependencies(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.dependencies
            .iter()
            .filter(|(_, libs)| !libs.is_empty())
            .map(|(contract, libs)| (contract.clone(), libs.clone()))
            .collect()
    }
}
