//! Deployment ordering.

use std::collections::BTreeSet;

use derive_more::Deref;

use crate::{
    error::{Error, Result},
    graph::DependencyGraph,
};

/// Contract names in the order they have to be deployed.
///
/// Every library comes before the contracts linking against it. Among
/// contracts that become deployable at the same time, declaration order wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deref)]
pub struct DeploymentPlan(Vec<String>);

impl DeploymentPlan {
    /// Topologically sort `graph` with Kahn's algorithm.
    pub fn from_graph(graph: &DependencyGraph) -> Result<Self> {
        let names = graph.contracts();
        let index_of = |name: &str| names.iter().position(|n| n == name);

        // pending[i]: libraries of contract i not yet planned.
        // dependents[j]: contracts waiting on library j.
        let mut pending = vec![0usize; names.len()];
        let mut dependents = vec![Vec::new(); names.len()];

        for (i, name) in names.iter().enumerate() {
            for library in graph.dependencies(name) {
                let Some(j) = index_of(library) else {
                    return Err(Error::UnresolvedLibrary {
                        contract: name.clone(),
                        library: library.to_string(),
                    });
                };
                pending[i] += 1;
                dependents[j].push(i);
            }
        }

        // Ordered by declaration index, so the first entry is the tie-break winner.
        let mut ready: BTreeSet<usize> = (0..names.len()).filter(|&i| pending[i] == 0).collect();
        let mut order = Vec::with_capacity(names.len());

        while let Some(next) = ready.pop_first() {
            order.push(names[next].clone());
            for &dependent in &dependents[next] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() < names.len() {
            let cycle = find_cycle(graph, &pending);
            tracing::debug!(cycle = ?cycle, "Dependency graph is cyclic");
            return Err(Error::CyclicDependency { cycle });
        }

        tracing::debug!(plan = ?order, "Computed deployment plan");

        Ok(Self(order))
    }

    /// Position of `contract` in the plan.
    pub fn position(&self, contract: &str) -> Option<usize> {
        self.0.iter().position(|c| c == contract)
    }

    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

/// Walk unplanned contracts along their dependencies until one repeats.
///
/// Each unplanned contract still waits on at least one unplanned library, so
/// the walk cannot get stuck and must revisit a contract.
fn find_cycle(graph: &DependencyGraph, pending: &[usize]) -> Vec<String> {
    let names = graph.contracts();
    let stuck = |name: &str| {
        names
            .iter()
            .position(|n| n == name)
            .is_some_and(|i| pending[i] > 0)
    };

    let Some(start) = names.iter().map(String::as_str).find(|&n| stuck(n)) else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut current = start;

    loop {
        // Follow the earliest-declared stuck dependency to keep reports stable.
        let next = names
            .iter()
            .map(String::as_str)
            .find(|&candidate| {
                stuck(candidate) && graph.dependencies(current).any(|d| d == candidate)
            });

        let Some(next) = next else {
            return path.iter().map(|s| s.to_string()).collect();
        };

        if let Some(seen) = path.iter().position(|p| *p == next) {
            let mut cycle: Vec<String> = path[seen..].iter().map(|s| s.to_string()).collect();
            cycle.push(next.to_string());
            return cycle;
        }

        path.push(next);
        current = next;
    }
}
