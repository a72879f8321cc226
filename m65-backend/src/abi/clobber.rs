//! Call graph and transitive clobber analysis
//!
//! A function's transitive clobber set is what its own code writes plus the
//! transitive sets of everything it calls. Recursion makes this a fixed
//! point; it is computed per strongly connected component, callees first,
//! so that the allocator of a caller already knows what each call destroys.

use log::trace;
use m65_codegen::ClobberSet;
use std::collections::{BTreeMap, BTreeSet};

/// Directed call graph over function and routine names
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, name: &str) {
        self.edges.entry(name.to_string()).or_default();
    }

    pub fn add_edge(&mut self, caller: &str, callee: &str) {
        self.add_node(callee);
        self.edges
            .entry(caller.to_string())
            .or_default()
            .insert(callee.to_string());
    }

    pub fn callees(&self, name: &str) -> impl Iterator<Item = &str> {
        self.edges
            .get(name)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    /// Strongly connected components, callees before callers (Tarjan)
    pub fn sccs(&self) -> Vec<Vec<String>> {
        let mut state = Tarjan::default();
        for node in self.edges.keys() {
            if !state.index.contains_key(node.as_str()) {
                state.visit(self, node);
            }
        }
        state.components
    }

    /// True if `callee` can reach `caller` again, i.e. the call is part of
    /// a recursive cycle
    pub fn in_same_scc(&self, sccs: &[Vec<String>], a: &str, b: &str) -> bool {
        sccs.iter()
            .find(|c| c.iter().any(|n| n == a))
            .is_some_and(|c| c.iter().any(|n| n == b))
    }
}

#[derive(Default)]
struct Tarjan {
    next: usize,
    index: BTreeMap<String, usize>,
    low: BTreeMap<String, usize>,
    stack: Vec<String>,
    on_stack: BTreeSet<String>,
    components: Vec<Vec<String>>,
}

impl Tarjan {
    fn visit(&mut self, graph: &CallGraph, node: &str) {
        self.index.insert(node.to_string(), self.next);
        self.low.insert(node.to_string(), self.next);
        self.next += 1;
        self.stack.push(node.to_string());
        self.on_stack.insert(node.to_string());

        for callee in graph.callees(node) {
            if !self.index.contains_key(callee) {
                self.visit(graph, callee);
                let low = self.low[node].min(self.low[callee]);
                self.low.insert(node.to_string(), low);
            } else if self.on_stack.contains(callee) {
                let low = self.low[node].min(self.index[callee]);
                self.low.insert(node.to_string(), low);
            }
        }

        if self.low[node] == self.index[node] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.remove(&member);
                let done = member == node;
                component.push(member);
                if done {
                    break;
                }
            }
            component.sort();
            self.components.push(component);
        }
    }
}

/// Local and transitive clobber sets
#[derive(Debug, Clone)]
pub struct ClobberAnalysis {
    local: BTreeMap<String, ClobberSet>,
    transitive: BTreeMap<String, ClobberSet>,
    /// Assumed for callees nothing is known about
    unknown: ClobberSet,
}

impl ClobberAnalysis {
    pub fn new(unknown: ClobberSet) -> Self {
        Self {
            local: BTreeMap::new(),
            transitive: BTreeMap::new(),
            unknown,
        }
    }

    /// Record what a function's own code writes
    pub fn set_local(&mut self, name: &str, set: ClobberSet) {
        self.local.insert(name.to_string(), set);
    }

    /// Record a set that is already final (runtime routines, declared
    /// externals)
    pub fn set_fixed(&mut self, name: &str, set: ClobberSet) {
        self.local.insert(name.to_string(), set.clone());
        self.transitive.insert(name.to_string(), set);
    }

    pub fn local(&self, name: &str) -> Option<&ClobberSet> {
        self.local.get(name)
    }

    /// Transitive set of a function whose component has been closed
    pub fn transitive(&self, name: &str) -> Option<&ClobberSet> {
        self.transitive.get(name)
    }

    /// Transitive set, or the worst case when nothing is known yet
    pub fn transitive_or_unknown(&self, name: &str) -> ClobberSet {
        self.transitive
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.unknown.clone())
    }

    /// Close one component: iterate until no member's set grows
    pub fn close(&mut self, graph: &CallGraph, members: &[String]) {
        for member in members {
            let local = self.local.get(member).cloned().unwrap_or_else(|| self.unknown.clone());
            self.transitive.insert(member.clone(), local);
        }
        let mut changed = true;
        let mut rounds = 0;
        while changed {
            changed = false;
            rounds += 1;
            for member in members {
                let mut set = self.transitive.get(member).cloned().unwrap_or_default();
                for callee in graph.callees(member) {
                    let callee_set = self.transitive_or_unknown(callee);
                    if set.union_with(&callee_set) {
                        changed = true;
                    }
                }
                self.transitive.insert(member.clone(), set);
            }
        }
        trace!("closed component {:?} in {} rounds", members, rounds);
    }

    /// Recompute every transitive set from the local sets alone
    pub fn recompute(&self, graph: &CallGraph) -> BTreeMap<String, ClobberSet> {
        let mut fresh = ClobberAnalysis::new(self.unknown.clone());
        fresh.local = self.local.clone();
        for component in graph.sccs() {
            fresh.close(graph, &component);
        }
        fresh.transitive
    }

    pub fn all(&self) -> &BTreeMap<String, ClobberSet> {
        &self.transitive
    }
}
