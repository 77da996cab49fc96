//! Critical path through one loop iteration.

use portlens_core::AnnotatedInstruction;
use serde::Serialize;

use crate::error::GraphError;
use crate::graph::{separate_load_latency, DependencyGraph};

/// The longest latency-weighted chain within one iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriticalPath<'k> {
    /// Instructions in dependency order.
    pub instructions: Vec<&'k AnnotatedInstruction>,
    /// Cycles each instruction adds to the chain: the latency of the edge
    /// to its successor, or its own latency without load for the last one.
    /// The first instruction also adds its own load latency.
    pub latencies: Vec<f64>,
    /// Sum of `latencies`.
    pub latency: f64,
}

impl CriticalPath<'_> {
    pub fn lines(&self) -> Vec<usize> {
        self.instructions.iter().map(|i| i.line_number()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

impl<'k> DependencyGraph<'k> {
    /// Longest path by summed edge latency. A path starts with the load
    /// latency of its first instruction (if the load is not part of the
    /// model entry) and ends with the latency without load of its last.
    /// Ties keep the earliest candidate in topological order.
    pub fn critical_path(&self) -> Result<CriticalPath<'k>, GraphError> {
        let order = self.topological_order()?;
        let n = self.kernel.len();
        let mut dist: Vec<f64> = self.kernel.iter().map(separate_load_latency).collect();
        let mut prev: Vec<Option<usize>> = vec![None; n];

        for &u in order {
            for &e in &self.successors[u] {
                let edge = &self.edges[e];
                let through = dist[u] + edge.latency;
                if through > dist[edge.to] {
                    dist[edge.to] = through;
                    prev[edge.to] = Some(e);
                }
            }
        }

        let total = |v: usize| dist[v] + self.kernel[v].latency_without_load;
        let mut end = None;
        for &v in order {
            if end.map_or(true, |best: usize| total(v) > total(best)) {
                end = Some(v);
            }
        }
        let Some(end) = end else {
            return Ok(CriticalPath {
                instructions: Vec::new(),
                latencies: Vec::new(),
                latency: 0.0,
            });
        };

        let mut chain = vec![(end, self.kernel[end].latency_without_load)];
        let mut cursor = end;
        while let Some(e) = prev[cursor] {
            let edge = &self.edges[e];
            chain.push((edge.from, edge.latency));
            cursor = edge.from;
        }
        chain.reverse();
        if let Some(first) = chain.first_mut() {
            first.1 += separate_load_latency(&self.kernel[first.0]);
        }

        let kernel = self.kernel;
        let latency = total(end);
        tracing::debug!(length = chain.len(), latency, "critical path");
        Ok(CriticalPath {
            instructions: chain.iter().map(|&(i, _)| &kernel[i]).collect(),
            latencies: chain.iter().map(|&(_, l)| l).collect(),
            latency,
        })
    }
}

#[cfg(test)]
mod tests {
    use portlens_core::InstructionFlag;

    use crate::graph::tests::{instr, mem, reg};
    use crate::{DependencyGraph, GraphError};

    fn kernel(latencies: &[f64]) -> Vec<portlens_core::AnnotatedInstruction> {
        latencies
            .iter()
            .enumerate()
            .map(|(i, &l)| instr(i + 1, l, vec![], vec![], vec![]))
            .collect()
    }

    #[test]
    fn picks_heaviest_chain() {
        // 1 -> 2 -> 4 (1+1+1) versus 1 -> 3 -> 4 (1+5+1).
        let k = kernel(&[1.0, 1.0, 5.0, 1.0]);
        let g = DependencyGraph::from_edges(&k, &[(0, 1), (0, 2), (1, 3), (2, 3)]).unwrap();
        let cp = g.critical_path().unwrap();
        assert_eq!(cp.lines(), vec![1, 3, 4]);
        assert_eq!(cp.latencies, vec![1.0, 5.0, 1.0]);
        assert_eq!(cp.latency, 7.0);
    }

    #[test]
    fn isolated_heavy_node_wins() {
        let k = kernel(&[1.0, 1.0, 9.0]);
        let g = DependencyGraph::from_edges(&k, &[(0, 1)]).unwrap();
        let cp = g.critical_path().unwrap();
        assert_eq!(cp.lines(), vec![3]);
        assert_eq!(cp.latency, 9.0);
    }

    #[test]
    fn latency_is_at_least_every_path() {
        let k = kernel(&[2.0, 3.0, 4.0, 1.0, 6.0]);
        let edges = [(0, 1), (1, 2), (0, 3), (3, 4), (2, 4)];
        let g = DependencyGraph::from_edges(&k, &edges).unwrap();
        let cp = g.critical_path().unwrap();
        // 0 -> 1 -> 2 -> 4
        assert_eq!(cp.latency, 15.0);
        assert_eq!(cp.lines(), vec![1, 2, 3, 5]);
    }

    #[test]
    fn load_latency_counts_at_the_start_only() {
        // vmulpd (%rsi), %ymm0, %ymm1 ; vaddpd %ymm1, %ymm2, %ymm3
        let mut load = instr(1, 9.0, vec![mem("rsi"), reg("ymm0")], vec![reg("ymm1")], vec![]);
        load.latency_without_load = 4.0;
        load.add_flag(InstructionFlag::PerformsLoad);
        let k = vec![load, instr(2, 4.0, vec![reg("ymm1"), reg("ymm2")], vec![reg("ymm3")], vec![])];
        let g = DependencyGraph::from_edges(&k, &[(0, 1)]).unwrap();
        let cp = g.critical_path().unwrap();
        assert_eq!(cp.lines(), vec![1, 2]);
        // 5 (load) + 4 (multiply) + 4 (add)
        assert_eq!(cp.latencies, vec![9.0, 4.0]);
        assert_eq!(cp.latency, 13.0);
    }

    #[test]
    fn empty_kernel_has_empty_path() {
        let k = kernel(&[]);
        let g = DependencyGraph::from_edges(&k, &[]).unwrap();
        let cp = g.critical_path().unwrap();
        assert!(cp.is_empty());
        assert_eq!(cp.latency, 0.0);
    }

    #[test]
    fn three_node_cycle_fails() {
        let k = kernel(&[1.0, 1.0, 1.0]);
        let g = DependencyGraph::from_edges(&k, &[(0, 1), (1, 2), (2, 0)]).unwrap();
        assert!(matches!(g.critical_path(), Err(GraphError::CycleDetected(_))));
    }
}
