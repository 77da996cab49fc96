//! Instruction dependency graph.
//!
//! Nodes are kernel positions (dense indices into the borrowed annotated
//! kernel). An edge `u -> v` means `v` consumes something `u` produces.
//! Edges carry their own latency: the producer's latency without load for
//! register and flag results, the write-back latency for indexed base
//! registers and the producer's latency plus the forwarding latency for a
//! store read back by a load. When `v` reads the value as a load address
//! and its load latency is not part of its model entry, that load latency
//! is added to the edge. Edges that cross into the next loop iteration are
//! kept apart as loop-carried edges.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;

use portlens_core::{
    AnnotatedInstruction, Flag, InstructionFlag, Memory, Offset, Operand, OperandOrigin, Register,
    RegisterSemantics,
};
use serde::Serialize;

use crate::error::GraphError;

/// What carries a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyKind {
    Register,
    Flag,
    /// Base register written back by pre/post-indexed addressing.
    IndexedBase,
    /// Store followed by a load of the same address.
    Memory,
}

/// A dependency edge between two kernel positions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Edge {
    pub from: usize,
    pub to: usize,
    pub kind: DependencyKind,
    /// Cycles from the start of `from` until `to` can use its result.
    pub latency: f64,
}

/// A consumer found by [`find_depending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependent {
    /// Virtual position of the consumer.
    pub position: usize,
    pub kind: DependencyKind,
    /// The consumer reads the value as the address of a load.
    pub for_load: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphOptions {
    /// Track dependencies through condition flags.
    pub consider_flag_deps: bool,
    /// Latency of a base register written back by indexed addressing.
    pub p_index_latency: f64,
    /// Added to store-to-load edges.
    pub store_to_load_forward_latency: f64,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            consider_flag_deps: false,
            p_index_latency: 1.0,
            store_to_load_forward_latency: 0.0,
        }
    }
}

/// Latency of the load part of `instr` when its model entry does not
/// include it (the form was synthesized from register form and load table).
pub(crate) fn separate_load_latency(instr: &AnnotatedInstruction) -> f64 {
    if instr.has_flag(InstructionFlag::PerformsLoad) && !instr.has_flag(InstructionFlag::LoadIncluded) {
        (instr.latency - instr.latency_without_load).max(0.0)
    } else {
        0.0
    }
}

fn edge_latency(
    kernel: &[AnnotatedInstruction],
    from: usize,
    to: usize,
    dependent: &Dependent,
    options: &GraphOptions,
) -> f64 {
    let producer = &kernel[from];
    let latency = match dependent.kind {
        DependencyKind::IndexedBase => options.p_index_latency,
        DependencyKind::Memory => producer.latency_without_load + options.store_to_load_forward_latency,
        DependencyKind::Register | DependencyKind::Flag => producer.latency_without_load,
    };
    if dependent.for_load {
        latency + separate_load_latency(&kernel[to])
    } else {
        latency
    }
}

#[derive(Default)]
struct EdgeSet {
    edges: Vec<Edge>,
    seen: HashMap<(usize, usize), usize>,
}

impl EdgeSet {
    /// Insert, keeping the heavier of two edges between the same nodes;
    /// on equal latency the first one found stays.
    fn insert(&mut self, from: usize, to: usize, kind: DependencyKind, latency: f64) {
        let edge = Edge {
            from,
            to,
            kind,
            latency,
        };
        match self.seen.get(&(from, to)) {
            Some(&idx) if self.edges[idx].latency < latency => self.edges[idx] = edge,
            Some(_) => {}
            None => {
                self.seen.insert((from, to), self.edges.len());
                self.edges.push(edge);
            }
        }
    }
}

/// Dependency graph over an annotated kernel.
#[derive(Debug, Clone)]
pub struct DependencyGraph<'k> {
    pub(crate) kernel: &'k [AnnotatedInstruction],
    pub(crate) edges: Vec<Edge>,
    /// Edges from a position to a position of the next iteration.
    pub(crate) carried: Vec<Edge>,
    /// Outgoing edge indices per node.
    pub(crate) successors: Vec<Vec<usize>>,
    pub(crate) order: Result<Vec<usize>, GraphError>,
}

impl<'k> DependencyGraph<'k> {
    /// Build the graph by scanning, for every instruction, the rest of the
    /// iteration and the following one for consumers of its results.
    pub fn build(
        kernel: &'k [AnnotatedInstruction],
        rules: &dyn RegisterSemantics,
        options: GraphOptions,
    ) -> Self {
        let n = kernel.len();
        let mut intra = EdgeSet::default();
        let mut carried = EdgeSet::default();
        for (i, instr) in kernel.iter().enumerate() {
            // Virtual positions: the rest of this iteration, then all of the next.
            let candidates: Vec<usize> = (i + 1..2 * n).collect();
            for dep in find_depending(instr, kernel, &candidates, rules, options) {
                let to = dep.position % n;
                let latency = edge_latency(kernel, i, to, &dep, &options);
                if dep.position < n {
                    intra.insert(i, to, dep.kind, latency);
                } else {
                    carried.insert(i, to, dep.kind, latency);
                }
            }
        }
        let graph = Self::assemble(kernel, intra.edges, carried.edges);
        tracing::debug!(
            instructions = n,
            edges = graph.edges.len(),
            carried = graph.carried.len(),
            "dependency graph built"
        );
        graph
    }

    /// A graph with hand-picked register edges between kernel positions,
    /// weighted by the source latency without load.
    pub fn from_edges(
        kernel: &'k [AnnotatedInstruction],
        edges: &[(usize, usize)],
    ) -> Result<Self, GraphError> {
        let set = Self::edge_set(kernel, edges)?;
        Ok(Self::assemble(kernel, set.edges, Vec::new()))
    }

    /// Replace the loop-carried edges (`from` in this iteration, `to` in
    /// the next).
    pub fn with_loop_carried_edges(self, edges: &[(usize, usize)]) -> Result<Self, GraphError> {
        let set = Self::edge_set(self.kernel, edges)?;
        Ok(Self::assemble(self.kernel, self.edges, set.edges))
    }

    fn edge_set(kernel: &[AnnotatedInstruction], edges: &[(usize, usize)]) -> Result<EdgeSet, GraphError> {
        let mut set = EdgeSet::default();
        for &(from, to) in edges {
            if from >= kernel.len() || to >= kernel.len() {
                return Err(GraphError::DanglingEdge { from, to });
            }
            set.insert(from, to, DependencyKind::Register, kernel[from].latency_without_load);
        }
        Ok(set)
    }

    fn assemble(kernel: &'k [AnnotatedInstruction], edges: Vec<Edge>, carried: Vec<Edge>) -> Self {
        let mut successors = vec![Vec::new(); kernel.len()];
        for (idx, edge) in edges.iter().enumerate() {
            successors[edge.from].push(idx);
        }
        let order = topological_sort(&edges, &successors)
            .map_err(|node| GraphError::CycleDetected(kernel[node].line_number()));
        Self {
            kernel,
            edges,
            carried,
            successors,
            order,
        }
    }

    pub fn kernel(&self) -> &'k [AnnotatedInstruction] {
        self.kernel
    }

    pub fn len(&self) -> usize {
        self.kernel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernel.is_empty()
    }

    /// Edges within one iteration.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Edges into the next iteration.
    pub fn loop_carried_edges(&self) -> &[Edge] {
        &self.carried
    }

    pub fn is_acyclic(&self) -> bool {
        self.order.is_ok()
    }

    /// Kernel positions in dependency order.
    pub fn topological_order(&self) -> Result<&[usize], GraphError> {
        self.order.as_deref().map_err(Clone::clone)
    }

    pub fn node_of_line(&self, line: usize) -> Option<usize> {
        self.kernel.iter().position(|i| i.line_number() == line)
    }

    /// Line numbers of the instructions directly depending on `line`.
    pub fn dependents(&self, line: usize) -> Vec<usize> {
        let Some(node) = self.node_of_line(line) else {
            return Vec::new();
        };
        self.successors[node]
            .iter()
            .map(|&e| self.kernel[self.edges[e].to].line_number())
            .collect()
    }

    /// Graphviz rendering; nodes on `highlight` (line numbers) are bold and
    /// loop-carried edges dashed.
    pub fn to_dot(&self, highlight: &[usize]) -> String {
        let mut out = String::from("digraph kernel {\n    node [shape=rectangle];\n");
        for (idx, instr) in self.kernel.iter().enumerate() {
            let label = format!("{}: {}", instr.line_number(), instr.form().text()).replace('"', "\\\"");
            let style = if highlight.contains(&instr.line_number()) {
                ", style=bold"
            } else {
                ""
            };
            let _ = writeln!(out, "    n{idx} [label=\"{label}\"{style}];");
        }
        for edge in &self.edges {
            let _ = writeln!(out, "    n{} -> n{} [label=\"{}\"];", edge.from, edge.to, edge.latency);
        }
        for edge in &self.carried {
            let _ = writeln!(
                out,
                "    n{} -> n{} [label=\"{}\", style=dashed, constraint=false];",
                edge.from, edge.to, edge.latency
            );
        }
        out.push_str("}\n");
        out
    }
}

/// Kahn's algorithm, smallest ready position first. On a cycle, returns a
/// position that could not be ordered.
fn topological_sort(edges: &[Edge], successors: &[Vec<usize>]) -> Result<Vec<usize>, usize> {
    let n = successors.len();
    let mut in_degree = vec![0usize; n];
    for edge in edges {
        in_degree[edge.to] += 1;
    }
    let mut ready: BTreeSet<usize> = (0..n).filter(|&v| in_degree[v] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(node) = ready.pop_first() {
        order.push(node);
        for &e in &successors[node] {
            let target = edges[e].to;
            in_degree[target] -= 1;
            if in_degree[target] == 0 {
                ready.insert(target);
            }
        }
    }
    if order.len() == n {
        Ok(order)
    } else {
        Err(in_degree.iter().position(|&d| d > 0).unwrap_or(0))
    }
}

/// Find the consumers of `source`'s results among `candidates`.
///
/// `candidates` are virtual positions in program order; position `v` is
/// the instruction `kernel[v % kernel.len()]`. The scan for each written
/// operand stops at the first candidate that overwrites it.
pub fn find_depending(
    source: &AnnotatedInstruction,
    kernel: &[AnnotatedInstruction],
    candidates: &[usize],
    rules: &dyn RegisterSemantics,
    options: GraphOptions,
) -> Vec<Dependent> {
    let n = kernel.len();
    let mut found = Vec::new();
    if n == 0 {
        return found;
    }
    let ops = source.operands();
    for dst in ops.destination.iter().chain(&ops.src_dst) {
        match &dst.operand {
            Operand::Register(reg) => {
                let kind = if dst.origin == OperandOrigin::IndexedBase {
                    DependencyKind::IndexedBase
                } else {
                    DependencyKind::Register
                };
                scan_register(reg, kind, kernel, candidates, rules, &mut found);
            }
            Operand::Flag(flag) if options.consider_flag_deps => {
                for &v in candidates {
                    let cand = &kernel[v % n];
                    if reads_flag(cand, flag, rules) {
                        found.push(Dependent {
                            position: v,
                            kind: DependencyKind::Flag,
                            for_load: false,
                        });
                    }
                    if writes_flag(cand, flag, rules) {
                        break;
                    }
                }
            }
            Operand::Memory(mem) => {
                if let (true, Some(base)) = (mem.is_indexed(), &mem.base) {
                    scan_register(base, DependencyKind::IndexedBase, kernel, candidates, rules, &mut found);
                }
                scan_memory(mem, kernel, candidates, rules, &mut found);
            }
            _ => {}
        }
    }
    found
}

fn scan_register(
    reg: &Register,
    kind: DependencyKind,
    kernel: &[AnnotatedInstruction],
    candidates: &[usize],
    rules: &dyn RegisterSemantics,
    found: &mut Vec<Dependent>,
) {
    for &v in candidates {
        let cand = &kernel[v % kernel.len()];
        let read = read_kind(cand, reg, rules);
        if read != ReadKind::NotARead {
            found.push(Dependent {
                position: v,
                kind,
                for_load: read == ReadKind::LoadAddress,
            });
        }
        if writes_register(cand, reg, rules) {
            break;
        }
    }
}

/// Loads of the address `mem` stored to, up to the next store to it.
fn scan_memory(
    mem: &Memory,
    kernel: &[AnnotatedInstruction],
    candidates: &[usize],
    rules: &dyn RegisterSemantics,
    found: &mut Vec<Dependent>,
) {
    let mut tracker = AddressTracker::new(mem);
    for &v in candidates {
        let cand = &kernel[v % kernel.len()];
        tracker.apply_write_backs(cand, rules, |m| m.pre_indexed);
        if tracker.is_lost() {
            break;
        }
        let ops = cand.operands();
        if ops.reads().filter_map(Operand::as_memory).any(|m| tracker.same_address(m)) {
            found.push(Dependent {
                position: v,
                kind: DependencyKind::Memory,
                for_load: false,
            });
        }
        if ops.writes().filter_map(Operand::as_memory).any(|m| tracker.same_address(m)) {
            break;
        }
        tracker.apply_write_backs(cand, rules, |m| m.post_indexed);
        tracker.apply_writes(cand, rules);
        if tracker.is_lost() {
            break;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadKind {
    NotARead,
    /// Address register of a memory operand that is read.
    LoadAddress,
    Other,
}

fn addresses_with(mem: &Memory, reg: &Register, rules: &dyn RegisterSemantics) -> bool {
    mem.base
        .iter()
        .chain(&mem.index)
        .any(|r| rules.is_reg_dependent_of(reg, r))
}

/// How `instr` reads `reg`: as an operand, as the address of a memory
/// source, or as the address of a memory destination.
fn read_kind(instr: &AnnotatedInstruction, reg: &Register, rules: &dyn RegisterSemantics) -> ReadKind {
    let ops = instr.operands();
    let loads_from = ops
        .reads()
        .filter_map(Operand::as_memory)
        .any(|mem| addresses_with(mem, reg, rules));
    if loads_from {
        return ReadKind::LoadAddress;
    }
    let direct = ops.reads().any(|op| match op {
        Operand::Register(r) => rules.is_reg_dependent_of(reg, r),
        _ => false,
    });
    let stores_to = ops
        .writes()
        .filter_map(Operand::as_memory)
        .any(|mem| addresses_with(mem, reg, rules));
    if direct || stores_to {
        ReadKind::Other
    } else {
        ReadKind::NotARead
    }
}

/// Writes `reg` as an operand or through indexed addressing.
fn writes_register(instr: &AnnotatedInstruction, reg: &Register, rules: &dyn RegisterSemantics) -> bool {
    let ops = instr.operands();
    let direct = ops.writes().any(|op| match op {
        Operand::Register(r) => rules.is_reg_dependent_of(reg, r),
        _ => false,
    });
    direct
        || ops
            .all()
            .filter_map(|s| s.operand.as_memory())
            .filter(|mem| mem.is_indexed())
            .filter_map(|mem| mem.base.as_ref())
            .any(|base| rules.is_reg_dependent_of(reg, base))
}

fn reads_flag(instr: &AnnotatedInstruction, flag: &Flag, rules: &dyn RegisterSemantics) -> bool {
    instr
        .operands()
        .reads()
        .filter_map(Operand::as_flag)
        .any(|f| rules.is_flag_dependent_of(flag, f))
}

fn writes_flag(instr: &AnnotatedInstruction, flag: &Flag, rules: &dyn RegisterSemantics) -> bool {
    instr
        .operands()
        .writes()
        .filter_map(Operand::as_flag)
        .any(|f| rules.is_flag_dependent_of(flag, f))
}

/// Constant part of an address: an optional symbol plus a displacement.
/// `None` if the immediate has no known value.
fn displacement(offset: Option<&Offset>) -> Option<(Option<&str>, f64)> {
    match offset {
        None => Some((None, 0.0)),
        Some(Offset::Immediate(imd)) => imd.value.map(|v| (None, v)),
        Some(Offset::Identifier(id)) => Some((Some(id.name.as_str()), 0.0)),
    }
}

/// Constant part of the address an access uses. Indexed accesses address
/// through their base alone (the pre-indexed update is tracked separately).
fn effective_displacement(mem: &Memory) -> Option<(Option<&str>, f64)> {
    if mem.is_indexed() {
        Some((None, 0.0))
    } else {
        displacement(mem.offset.as_ref())
    }
}

/// Amount an indexed access adds to its base register.
fn write_back(mem: &Memory) -> Option<f64> {
    match &mem.offset {
        None => Some(0.0),
        Some(Offset::Immediate(imd)) => imd.value,
        Some(Offset::Identifier(_)) => None,
    }
}

/// Follows the address registers of a store after it executed, so that
/// later accesses through bumped pointers can be compared with it.
///
/// `base` and `index` hold how far each register has moved since the store
/// computed its address; `None` once a write with unknown effect was seen.
struct AddressTracker<'a> {
    mem: &'a Memory,
    base: Option<f64>,
    index: Option<f64>,
}

impl<'a> AddressTracker<'a> {
    fn new(mem: &'a Memory) -> Self {
        // A post-indexed store addressed through the old base value.
        let base = if mem.post_indexed { write_back(mem) } else { Some(0.0) };
        Self {
            mem,
            base,
            index: Some(0.0),
        }
    }

    fn is_lost(&self) -> bool {
        self.base.is_none() || self.index.is_none()
    }

    fn same_address(&self, other: &Memory) -> bool {
        if other.base != self.mem.base || other.index != self.mem.index {
            return false;
        }
        if self.mem.index.is_some() && other.scale != self.mem.scale {
            return false;
        }
        let (Some(base), Some(index)) = (self.base, self.index) else {
            return false;
        };
        match (effective_displacement(other), effective_displacement(self.mem)) {
            (Some((their_symbol, theirs)), Some((our_symbol, ours))) => {
                their_symbol == our_symbol && theirs + base + index * f64::from(other.scale) == ours
            }
            _ => other.offset == self.mem.offset && base == 0.0 && index == 0.0,
        }
    }

    /// Add the write-backs of `instr`'s indexed accesses selected by `when`.
    fn apply_write_backs(
        &mut self,
        instr: &AnnotatedInstruction,
        rules: &dyn RegisterSemantics,
        when: impl Fn(&Memory) -> bool,
    ) {
        for m in instr.operands().all().filter_map(|s| s.operand.as_memory()) {
            if !when(m) {
                continue;
            }
            let Some(written) = &m.base else { continue };
            let step = write_back(m);
            let mem = self.mem;
            for (tracked, change) in [(&mem.base, &mut self.base), (&mem.index, &mut self.index)] {
                if tracked.as_ref().is_some_and(|r| rules.is_reg_dependent_of(r, written)) {
                    *change = (*change).zip(step).map(|(c, s)| c + s);
                }
            }
        }
    }

    /// Forget any address register `instr` writes other than by indexing.
    fn apply_writes(&mut self, instr: &AnnotatedInstruction, rules: &dyn RegisterSemantics) {
        let ops = instr.operands();
        let written: Vec<&Register> = ops
            .destination
            .iter()
            .chain(&ops.src_dst)
            .filter(|s| s.origin != OperandOrigin::IndexedBase)
            .filter_map(|s| s.operand.as_register())
            .collect();
        let mem = self.mem;
        for (tracked, change) in [(&mem.base, &mut self.base), (&mem.index, &mut self.index)] {
            if let Some(tracked) = tracked {
                if written.iter().any(|w| rules.is_reg_dependent_of(tracked, w)) {
                    *change = None;
                }
            }
        }
    }
}
