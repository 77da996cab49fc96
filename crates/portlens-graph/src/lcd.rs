//! Loop-carried dependency search.
//!
//! The kernel is unrolled once: positions `0..n` are the current iteration
//! and `n..2n` the next. Intra-iteration edges exist in both copies and
//! loop-carried edges lead from the first copy into the second. A
//! loop-carried dependency rooted at `i` is a path from `i` to `i + n`; its
//! latency is the sum of the edge latencies along the path.

use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::GraphError;
use crate::graph::DependencyGraph;

/// How often (in edge expansions) the deadline is checked.
const DEADLINE_CHECK_INTERVAL: usize = 256;

/// One dependency chain from an instruction back to itself in the next
/// iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoopCarriedDependency {
    /// Line number of the first instruction of the chain.
    pub root: usize,
    /// `(line, latency)` for each instruction on the chain, in order; the
    /// latency is that of the edge leaving the instruction.
    pub chain: Vec<(usize, f64)>,
    pub latency: f64,
}

impl LoopCarriedDependency {
    pub fn lines(&self) -> Vec<usize> {
        self.chain.iter().map(|&(line, _)| line).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoopCarriedReport {
    /// Longest distinct chain per root line.
    pub dependencies: BTreeMap<usize, LoopCarriedDependency>,
    /// The search stopped at its deadline; results are partial.
    pub timed_out: bool,
}

impl LoopCarriedReport {
    /// Chain with the highest latency; ties go to the lowest root line.
    pub fn longest(&self) -> Option<&LoopCarriedDependency> {
        self.dependencies.values().fold(None, |best, dep| match best {
            Some(b) if b.latency >= dep.latency => Some(b),
            _ => Some(dep),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}

impl DependencyGraph<'_> {
    /// `(successor, latency)` pairs in the two-iteration unrolled graph,
    /// sorted by successor.
    fn unrolled(&self) -> Vec<Vec<(usize, f64)>> {
        let n = self.kernel.len();
        let mut adjacency = vec![Vec::new(); 2 * n];
        for edge in &self.edges {
            adjacency[edge.from].push((edge.to, edge.latency));
            adjacency[edge.from + n].push((edge.to + n, edge.latency));
        }
        for edge in &self.carried {
            adjacency[edge.from].push((edge.to + n, edge.latency));
        }
        for succ in &mut adjacency {
            succ.sort_by_key(|&(v, _)| v);
        }
        adjacency
    }

    /// Enumerate loop-carried dependency chains.
    ///
    /// Every simple path from each root to its copy in the next iteration
    /// is visited. Chains covering the same set of instructions are reported
    /// once, under the first root (by position) that reaches them; each root
    /// keeps its highest-latency chain. With a `timeout`, the search stops
    /// at the deadline and the report is marked as timed out.
    pub fn loop_carried_dependencies(
        &self,
        timeout: Option<Duration>,
    ) -> Result<LoopCarriedReport, GraphError> {
        self.topological_order()?;
        let n = self.kernel.len();
        let deadline = timeout.map(|t| Instant::now() + t);
        let expired = || deadline.is_some_and(|d| Instant::now() >= d);
        let adjacency = self.unrolled();

        let mut report = LoopCarriedReport::default();
        let mut seen: HashSet<Vec<usize>> = HashSet::new();

        for root in 0..n {
            if report.timed_out || expired() {
                report.timed_out = true;
                break;
            }
            let target = root + n;
            let mut best: Option<LoopCarriedDependency> = None;
            let mut path = vec![root];
            // Latency of the edge taken out of each node on `path`.
            let mut taken: Vec<f64> = Vec::new();
            let mut cursors = vec![0usize];
            let mut expansions = 0usize;

            while let Some(&node) = path.last() {
                let depth = path.len() - 1;
                let Some(&(next, latency)) = adjacency[node].get(cursors[depth]) else {
                    path.pop();
                    cursors.pop();
                    taken.pop();
                    continue;
                };
                cursors[depth] += 1;
                expansions += 1;
                if expansions % DEADLINE_CHECK_INTERVAL == 0 && expired() {
                    report.timed_out = true;
                    break;
                }
                if next > target {
                    continue;
                }
                if next < target {
                    path.push(next);
                    taken.push(latency);
                    cursors.push(0);
                    continue;
                }

                let chain: Vec<(usize, f64)> = path
                    .iter()
                    .zip(taken.iter().chain(std::iter::once(&latency)))
                    .map(|(&v, &l)| (self.kernel[v % n].line_number(), l))
                    .collect();
                let mut key: Vec<usize> = chain.iter().map(|&(line, _)| line).collect();
                key.sort_unstable();
                key.dedup();
                if !seen.insert(key) {
                    continue;
                }
                let latency: f64 = chain.iter().map(|&(_, l)| l).sum();
                if best.as_ref().map_or(true, |b| latency > b.latency) {
                    best = Some(LoopCarriedDependency {
                        root: self.kernel[root].line_number(),
                        chain,
                        latency,
                    });
                }
            }

            if let Some(dep) = best {
                report.dependencies.insert(dep.root, dep);
            }
        }

        if report.timed_out {
            tracing::warn!(
                found = report.dependencies.len(),
                "loop-carried dependency search timed out; results are partial"
            );
        }
        Ok(report)
    }
}
