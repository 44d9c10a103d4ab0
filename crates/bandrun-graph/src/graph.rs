//! Variable dependency graph
//!
//! Tracks which variables reference which other variables, detects
//! circular references, and computes the evaluation order the variable
//! runtime follows. Built once per run from the declared variable
//! definitions, immutable thereafter. All operations are pure.

use crate::error::{GraphError, GraphResult};
use bandrun_ast::VariableDefinition;
use bandrun_eval::extract_field_references;
use indexmap::{IndexMap, IndexSet};

/// Adjacency map from variable name to the variables it depends on.
///
/// Insertion order is declaration order, which keeps every derived
/// ordering deterministic: independent variables stay in the order they
/// were declared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyGraph {
    edges: IndexMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Build the graph from declared variables.
    ///
    /// Each variable's expression (and `count_where` condition, when
    /// present) is statically scanned for field references; references
    /// naming another declared variable become edges. Plain record-field
    /// references are data, not dependencies. Native function expressions
    /// are opaque and contribute no edges.
    pub fn build(variables: &[VariableDefinition]) -> Self {
        let declared: IndexSet<&str> = variables.iter().map(|v| v.name.as_str()).collect();

        let mut edges = IndexMap::with_capacity(variables.len());
        for variable in variables {
            let mut refs = extract_field_references(&variable.expression);
            if let Some(condition) = &variable.condition {
                for name in extract_field_references(condition) {
                    if !refs.contains(&name) {
                        refs.push(name);
                    }
                }
            }
            refs.retain(|name| declared.contains(name.as_str()));
            edges.insert(variable.name.clone(), refs);
        }

        Self { edges }
    }

    /// Build a graph from raw adjacency pairs.
    ///
    /// Unlike [`build`](Self::build), edge targets are kept verbatim, so
    /// the result may reference undeclared names; `validate_dependencies`
    /// exists for exactly that case.
    pub fn from_edges<N, D>(edges: impl IntoIterator<Item = (N, Vec<D>)>) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Self {
            edges: edges
                .into_iter()
                .map(|(name, deps)| (name.into(), deps.into_iter().map(Into::into).collect()))
                .collect(),
        }
    }

    /// Variable names, in declaration order
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    /// Direct dependencies of a variable (empty for unknown names)
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of variables in the graph
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether the graph is empty
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Full evaluation order: every dependency before its dependents.
    ///
    /// Stable Kahn's algorithm - among variables whose dependencies are
    /// all satisfied, declaration order wins. A cyclic graph always
    /// returns `CircularDependency`, never a partial order.
    pub fn resolve_order(&self) -> GraphResult<Vec<String>> {
        let mut remaining_deps: IndexMap<&str, usize> = self
            .edges
            .iter()
            .map(|(name, deps)| {
                let in_graph: IndexSet<&str> = deps
                    .iter()
                    .map(String::as_str)
                    .filter(|dep| self.edges.contains_key(*dep))
                    .collect();
                (name.as_str(), in_graph.len())
            })
            .collect();

        let mut order = Vec::with_capacity(self.edges.len());
        while order.len() < self.edges.len() {
            // First declared variable with all dependencies satisfied
            let next = remaining_deps
                .iter()
                .find(|&(_, &pending)| pending == 0)
                .map(|(&name, _)| name);

            let Some(name) = next else {
                // Everything left participates in (or depends on) a cycle
                let stuck: Vec<&str> = remaining_deps.keys().copied().collect();
                return Err(GraphError::circular(self.trace_cycle(&stuck)));
            };

            remaining_deps.shift_remove(name);
            for (dependent, pending) in remaining_deps.iter_mut() {
                if self
                    .dependencies_of(dependent)
                    .iter()
                    .any(|dep| dep == name)
                {
                    *pending = pending.saturating_sub(1);
                }
            }
            order.push(name.to_string());
        }

        Ok(order)
    }

    /// Evaluation order restricted to `changed` and their transitive
    /// dependents, preserving the relative order of the full resolution.
    pub fn resolve_partial_order(&self, changed: &[String]) -> GraphResult<Vec<String>> {
        let full = self.resolve_order()?;

        let mut affected: IndexSet<&str> = IndexSet::new();
        for name in changed {
            if self.edges.contains_key(name.as_str()) {
                affected.insert(name.as_str());
            }
            for candidate in self.edges.keys() {
                if self.depends_on(candidate, name) {
                    affected.insert(candidate.as_str());
                }
            }
        }

        Ok(full
            .into_iter()
            .filter(|name| affected.contains(name.as_str()))
            .collect())
    }

    /// Whether `a` depends on `b`, directly or transitively
    pub fn depends_on(&self, a: &str, b: &str) -> bool {
        let mut visited: IndexSet<&str> = IndexSet::new();
        let mut stack: Vec<&str> = vec![a];

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            for dep in self.dependencies_of(current) {
                if dep == b {
                    return true;
                }
                stack.push(dep);
            }
        }
        false
    }

    /// All variables declaring `name` as a dependency, directly or
    /// transitively, in declaration order.
    pub fn find_dependents(&self, name: &str) -> Vec<String> {
        self.edges
            .keys()
            .filter(|candidate| self.depends_on(candidate, name))
            .cloned()
            .collect()
    }

    /// Check the graph for cycles without resolving an order
    pub fn detect_cycles(&self) -> GraphResult<()> {
        self.resolve_order().map(|_| ())
    }

    /// Verify every edge target is a known variable.
    ///
    /// Returns `MissingDependencies` listing unknown targets in
    /// first-occurrence order.
    pub fn validate_dependencies(&self, known: &[String]) -> GraphResult<()> {
        let mut missing: Vec<String> = Vec::new();
        for deps in self.edges.values() {
            for dep in deps {
                if !known.contains(dep) && !missing.contains(dep) {
                    missing.push(dep.clone());
                }
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(GraphError::missing(missing))
        }
    }

    /// Longest dependency chain below a variable.
    ///
    /// `0` for leaves and for unknown names, otherwise `1 + max(depth of
    /// dependencies)`. Cycles are guarded; revisited nodes contribute 0
    /// rather than recursing forever.
    pub fn dependency_depth(&self, name: &str) -> usize {
        let mut visiting: IndexSet<&str> = IndexSet::new();
        self.depth_guarded(name, &mut visiting)
    }

    fn depth_guarded<'a>(&'a self, name: &str, visiting: &mut IndexSet<&'a str>) -> usize {
        let Some((key, deps)) = self.edges.get_key_value(name) else {
            return 0;
        };
        if deps.is_empty() || !visiting.insert(key.as_str()) {
            return 0;
        }
        let max_below = deps
            .iter()
            .map(|dep| self.depth_guarded(dep, visiting))
            .max()
            .unwrap_or(0);
        visiting.shift_remove(key.as_str());
        1 + max_below
    }

    /// Reconstruct a concrete cycle path among the stuck nodes, for the
    /// error message. Falls back to listing the participants when no
    /// closed walk is found.
    fn trace_cycle(&self, stuck: &[&str]) -> Vec<String> {
        let Some(&start) = stuck.first() else {
            return Vec::new();
        };

        let mut path: Vec<&str> = vec![start];
        let mut current = start;
        for _ in 0..stuck.len() {
            let next = self
                .dependencies_of(current)
                .iter()
                .find(|dep| stuck.contains(&dep.as_str()));
            let Some(next) = next else { break };
            if let Some(pos) = path.iter().position(|n| n == next) {
                let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
                cycle.push(next.clone());
                return cycle;
            }
            path.push(next.as_str());
            current = next.as_str();
        }

        stuck.iter().map(|s| s.to_string()).collect()
    }
}
