use std::collections::HashSet;

use daggy::{petgraph::algo::toposort, Dag, Walker};
use thiserror::Error;

use crate::kernels::matmul::matmul_shape;

pub mod session;

pub type NodeId = daggy::NodeIndex;

#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("node {0:?} is not part of this graph")]
    UnknownNode(NodeId),
    #[error("variable {name} has invalid dims {dims:?}")]
    InvalidDims { name: String, dims: Vec<i64> },
    #[error("{op} cannot combine shapes {lhs:?} and {rhs:?}: {reason}")]
    Shape {
        op: &'static str,
        lhs: Vec<i64>,
        rhs: Vec<i64>,
        reason: &'static str,
    },
    #[error("graph contains a cycle")]
    Cycle,
}

/// How aggressively a session skips work.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum OptLevel {
    /// Execute every op the target depends on, on every run.
    #[default]
    L0,
    /// Skip ops whose inputs are unchanged since they last ran.
    L1,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Variable { init: f32 },
    MatMul,
    Add,
}

impl Op {
    pub fn is_variable(&self) -> bool {
        matches!(self, Op::Variable { .. })
    }
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub name: String,
    pub op: Op,
    pub dims: Vec<i64>,
}

/// A static dataflow graph of `f32` tensors. Building it does no device work.
#[derive(Debug)]
pub struct Graph {
    // Edge weight is the input slot on the child.
    dag: Dag<GraphNode, u32>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self { dag: Dag::new() }
    }

    pub fn len(&self) -> usize {
        self.dag.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn node(&self, id: NodeId) -> Result<&GraphNode, GraphError> {
        self.dag.node_weight(id).ok_or(GraphError::UnknownNode(id))
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.dag.graph().node_indices()
    }

    pub fn variable(&mut self, name: &str, dims: &[i64], init: f32) -> Result<NodeId, GraphError> {
        if dims.is_empty() || dims.iter().any(|&d| d <= 0) {
            return Err(GraphError::InvalidDims {
                name: name.to_string(),
                dims: dims.to_vec(),
            });
        }

        Ok(self.dag.add_node(GraphNode {
            name: name.to_string(),
            op: Op::Variable { init },
            dims: dims.to_vec(),
        }))
    }

    pub fn matmul(&mut self, a: NodeId, b: NodeId) -> Result<NodeId, GraphError> {
        let lhs = self.node(a)?.dims.clone();
        let rhs = self.node(b)?.dims.clone();
        let (m, _, n) = matmul_shape(&lhs, &rhs).map_err(|reason| GraphError::Shape {
            op: "matmul",
            lhs: lhs.clone(),
            rhs: rhs.clone(),
            reason,
        })?;

        self.add_op(Op::MatMul, "matmul", vec![m, n], a, b)
    }

    pub fn add(&mut self, a: NodeId, b: NodeId) -> Result<NodeId, GraphError> {
        let lhs = self.node(a)?.dims.clone();
        let rhs = self.node(b)?.dims.clone();
        if lhs != rhs {
            return Err(GraphError::Shape {
                op: "add",
                lhs,
                rhs,
                reason: "operands must have the same shape",
            });
        }

        self.add_op(Op::Add, "add", lhs, a, b)
    }

    fn add_op(
        &mut self,
        op: Op,
        kind: &str,
        dims: Vec<i64>,
        a: NodeId,
        b: NodeId,
    ) -> Result<NodeId, GraphError> {
        let name = format!("{kind}_{}", self.len());
        let id = self.dag.add_node(GraphNode { name, op, dims });
        self.dag
            .add_edge(a, id, 0)
            .map_err(|_| GraphError::Cycle)?;
        self.dag
            .add_edge(b, id, 1)
            .map_err(|_| GraphError::Cycle)?;

        Ok(id)
    }

    /// Inputs of `id` ordered by slot.
    pub fn inputs(&self, id: NodeId) -> Result<Vec<NodeId>, GraphError> {
        self.node(id)?;
        let mut parents: Vec<(u32, NodeId)> = self
            .dag
            .parents(id)
            .iter(&self.dag)
            .filter_map(|(edge, parent)| self.dag.edge_weight(edge).map(|slot| (*slot, parent)))
            .collect();
        parents.sort_by_key(|(slot, _)| *slot);

        Ok(parents.into_iter().map(|(_, parent)| parent).collect())
    }

    /// `target` and everything it depends on, in topological order.
    pub fn ancestry(&self, target: NodeId) -> Result<Vec<NodeId>, GraphError> {
        self.node(target)?;

        let mut needed = HashSet::new();
        let mut stack = vec![target];
        while let Some(id) = stack.pop() {
            if needed.insert(id) {
                stack.extend(self.inputs(id)?);
            }
        }

        let order = toposort(self.dag.graph(), None).map_err(|_| GraphError::Cycle)?;
        Ok(order.into_iter().filter(|id| needed.contains(id)).collect())
    }

    /// The ops to dispatch, in order, for one run of `target`.
    ///
    /// `clean` holds nodes whose device value is current. At `L0` it is
    /// ignored and every op in the ancestry runs. At `L1` an op runs when it
    /// is not clean or any of its inputs will be recomputed first.
    pub fn plan(
        &self,
        target: NodeId,
        opt_level: OptLevel,
        clean: &HashSet<NodeId>,
    ) -> Result<Vec<NodeId>, GraphError> {
        let ancestry = self.ancestry(target)?;

        let mut dirty: HashSet<NodeId> = HashSet::new();
        let mut plan = Vec::new();
        for id in ancestry {
            let node = self.node(id)?;
            if node.op.is_variable() {
                if !clean.contains(&id) {
                    dirty.insert(id);
                }
                continue;
            }

            let must_run = match opt_level {
                OptLevel::L0 => true,
                OptLevel::L1 => {
                    !clean.contains(&id)
                        || self.inputs(id)?.iter().any(|input| dirty.contains(input))
                }
            };
            if must_run {
                dirty.insert(id);
                plan.push(id);
            }
        }

        Ok(plan)
    }
}
