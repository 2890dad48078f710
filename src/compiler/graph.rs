//! Job dependency graph
//!
//! Jobs are stored in a petgraph `DiGraph` with an edge from each
//! dependency to its dependent. Ordering uses Kahn's algorithm with ties
//! broken by insertion order, so the same jobs added in the same order
//! always serialize the same way.

use super::expressions::needs_references;
use super::job::Job;
use crate::error::ErrorCode;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("[E5001] job names must not be empty")]
    EmptyName,

    #[error("[E5001] job `{0}` is defined more than once")]
    DuplicateJob(String),

    #[error("[E5002] job `{job}` needs `{dependency}`, which does not exist")]
    MissingDependency { job: String, dependency: String },

    #[error("[E5003] job dependencies form a cycle through: {}", .jobs.join(", "))]
    Cycle { jobs: Vec<String> },

    #[error("[E5004] the `if` of job `{job}` reads `needs.{reference}` but `{reference}` is not in its needs")]
    GuardReference { job: String, reference: String },
}

impl GraphError {
    pub fn code(&self) -> u16 {
        match self {
            Self::EmptyName | Self::DuplicateJob(_) => ErrorCode::COMPILE_DUPLICATE_JOB,
            Self::MissingDependency { .. } => ErrorCode::COMPILE_MISSING_DEPENDENCY,
            Self::Cycle { .. } => ErrorCode::COMPILE_CYCLE,
            Self::GuardReference { .. } => ErrorCode::COMPILE_GUARD_REFERENCE,
        }
    }
}

/// A validated, acyclic set of jobs
#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    graph: DiGraph<Job, ()>,
    index: HashMap<String, NodeIndex>,
    order: Vec<NodeIndex>,
}

impl JobGraph {
    /// Validate `jobs` and compute their order
    pub fn build(jobs: Vec<Job>) -> Result<Self, GraphError> {
        let mut graph = JobGraph::default();
        for job in jobs {
            graph.insert(job)?;
        }
        graph.link()?;
        graph.order = graph.kahn_order()?;
        Ok(graph)
    }

    fn insert(&mut self, job: Job) -> Result<(), GraphError> {
        if job.name.trim().is_empty() {
            return Err(GraphError::EmptyName);
        }
        if self.index.contains_key(&job.name) {
            return Err(GraphError::DuplicateJob(job.name));
        }
        let name = job.name.clone();
        let node = self.graph.add_node(job);
        self.index.insert(name, node);
        Ok(())
    }

    /// Resolve `needs` into edges and check guards against them
    fn link(&mut self) -> Result<(), GraphError> {
        let mut edges = Vec::new();
        for node in self.graph.node_indices() {
            let job = &self.graph[node];
            for dependency in &job.needs {
                let Some(&from) = self.index.get(dependency) else {
                    return Err(GraphError::MissingDependency {
                        job: job.name.clone(),
                        dependency: dependency.clone(),
                    });
                };
                edges.push((from, node));
            }

            if let Some(condition) = &job.condition {
                for reference in needs_references(condition) {
                    if !job.needs.iter().any(|need| need == &reference) {
                        return Err(GraphError::GuardReference {
                            job: job.name.clone(),
                            reference,
                        });
                    }
                }
            }
        }
        for (from, to) in edges {
            self.graph.update_edge(from, to, ());
        }
        Ok(())
    }

    fn kahn_order(&self) -> Result<Vec<NodeIndex>, GraphError> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|node| (node, self.graph.neighbors_directed(node, Direction::Incoming).count()))
            .collect();

        let mut ready: BinaryHeap<Reverse<NodeIndex>> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(node, _)| Reverse(*node))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(dependent));
                    }
                }
            }
        }

        if order.len() < self.graph.node_count() {
            let placed: HashSet<NodeIndex> = order.iter().copied().collect();
            let jobs = self
                .graph
                .node_indices()
                .filter(|node| !placed.contains(node))
                .map(|node| self.graph[node].name.clone())
                .collect();
            return Err(GraphError::Cycle { jobs });
        }
        Ok(order)
    }

    /// Jobs in dependency order
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.order.iter().map(|node| &self.graph[*node])
    }

    pub fn get(&self, name: &str) -> Option<&Job> {
        self.index.get(name).map(|node| &self.graph[*node])
    }

    pub fn names(&self) -> Vec<&str> {
        self.jobs().map(|job| job.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Every job `name` transitively depends on
    pub fn ancestors(&self, name: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let Some(&start) = self.index.get(name) else {
            return seen;
        };
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for parent in self.graph.neighbors_directed(node, Direction::Incoming) {
                if seen.insert(self.graph[parent].name.clone()) {
                    stack.push(parent);
                }
            }
        }
        seen
    }

    /// Mermaid flowchart of the graph
    pub fn to_mermaid(&self) -> String {
        let mut lines = vec!["graph LR".to_string()];
        for job in self.jobs() {
            lines.push(format!("  {}[\"{}\"]", job.name, job.name));
        }
        for job in self.jobs() {
            for dependency in &job.needs {
                lines.push(format!("  {dependency} --> {}", job.name));
            }
        }
        lines.join("\n")
    }
}
