use std::collections::{HashMap, HashSet};

use ash::vk::{self, QueueFlags, SubmitInfo};
use thiserror::Error;

use crate::{
    cmd_buff::CommandBufferBuilder,
    descriptor::VultenDescriptor,
    graph::{Graph, GraphError, NodeId, Op, OptLevel},
    kernels::{
        binary::{BinaryKernel, BinaryOp},
        matmul::MatMulKernel,
        KernelError,
    },
    log_session,
    memory::TransferError,
    queue::QueueError,
    tensor::{DeviceTensor, TensorError},
    VultenInstance, DT_FLOAT,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("variable {0} was read before it was initialized")]
    Uninitialized(String),
    #[error("node {0} is not a variable")]
    NotAVariable(String),
    #[error("session run failed: {0}")]
    Vk(#[from] vk::Result),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SessionConfig {
    pub opt_level: OptLevel,
}

/// Executes a [`Graph`] on one device. Every node owns a device buffer for
/// the lifetime of the session.
pub struct Session<'a> {
    inst: &'a VultenInstance,
    graph: Graph,
    config: SessionConfig,
    tensors: HashMap<NodeId, DeviceTensor<'a>>,
    clean: HashSet<NodeId>,
    dispatched: u64,
}

impl<'a> Session<'a> {
    pub fn new(
        inst: &'a VultenInstance,
        graph: Graph,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let mut tensors = HashMap::with_capacity(graph.len());
        for id in graph.node_ids() {
            let node = graph.node(id)?;
            tensors.insert(id, DeviceTensor::uninit(inst, &node.dims, DT_FLOAT)?);
        }
        log_session!(
            "Created session over {} nodes at {:?}",
            graph.len(),
            config.opt_level
        );

        Ok(Self {
            inst,
            graph,
            config,
            tensors,
            clean: HashSet::new(),
            dispatched: 0,
        })
    }

    pub fn config(&self) -> SessionConfig {
        self.config
    }

    /// Total ops dispatched over the life of the session.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Fill every variable with its initial value.
    pub fn init_variables(&mut self) -> Result<(), SessionError> {
        let variables: Vec<(NodeId, f32)> = self
            .graph
            .node_ids()
            .filter_map(|id| match self.graph.node(id) {
                Ok(node) => match node.op {
                    Op::Variable { init } => Some((id, init)),
                    _ => None,
                },
                Err(_) => None,
            })
            .collect();

        for (id, init) in variables {
            self.assign(id, init)?;
        }

        Ok(())
    }

    /// Set every element of variable `id` to `value`.
    pub fn assign(&mut self, id: NodeId, value: f32) -> Result<(), SessionError> {
        let node = self.graph.node(id)?;
        if !node.op.is_variable() {
            return Err(SessionError::NotAVariable(node.name.clone()));
        }

        let tensor = self.tensor(id)?;
        self.inst
            .fill_buffer(tensor.buffer(), tensor.buffer().size, 0, value.to_bits())?;
        log_session!("Assigned {} to {}", value, node.name);

        self.clean.insert(id);
        Ok(())
    }

    /// Evaluate `target`, blocking until the device is done. Returns how
    /// many ops were dispatched.
    pub fn run(&mut self, target: NodeId) -> Result<usize, SessionError> {
        for id in self.graph.ancestry(target)? {
            let node = self.graph.node(id)?;
            if node.op.is_variable() && !self.clean.contains(&id) {
                return Err(SessionError::Uninitialized(node.name.clone()));
            }
        }

        let plan = self.graph.plan(target, self.config.opt_level, &self.clean)?;
        if plan.is_empty() {
            log_session!("Nothing to run for {:?}", target);
            return Ok(0);
        }

        self.dispatch(&plan)?;
        self.clean.extend(plan.iter().copied());
        self.dispatched += plan.len() as u64;

        Ok(plan.len())
    }

    fn dispatch(&self, plan: &[NodeId]) -> Result<(), SessionError> {
        let q = self.inst.get_queue(QueueFlags::COMPUTE)?;
        let cmd_buffs = self.inst.create_cmd_buffers(1, &q)?;

        let result = (|| -> Result<(), SessionError> {
            let mut descriptors: Vec<VultenDescriptor> = Vec::new();
            // Leading barrier orders against the previous run's writes.
            let mut builder = CommandBufferBuilder::new(cmd_buffs[0], &self.inst.device)
                .begin()?
                .compute_barrier();

            for (i, &id) in plan.iter().enumerate() {
                if i > 0 {
                    builder = builder.compute_barrier();
                }
                builder = self.record_node(id, builder, &mut descriptors)?;
            }
            builder
                .end()?
                .build()
                .map_err(KernelError::Record)?;

            let sub_info = SubmitInfo::default().command_buffers(&cmd_buffs);
            let fence = self.inst.create_fence()?;
            let waited = self
                .inst
                .submit_queue(&q, &[sub_info], fence)
                .and_then(|_| self.inst.wait_for_fences(&[fence], true));
            self.inst.destroy_fence(fence);
            Ok(waited?)
        })();

        self.inst.free_cmd_buffers(&q, cmd_buffs);
        result
    }

    fn record_node<'s, 'b>(
        &'s self,
        id: NodeId,
        builder: CommandBufferBuilder<'b>,
        descriptors: &mut Vec<VultenDescriptor<'s>>,
    ) -> Result<CommandBufferBuilder<'b>, SessionError> {
        let node = self.graph.node(id)?;
        let inputs = self.graph.inputs(id)?;
        let (a, b) = match inputs.as_slice() {
            [a, b] => (self.tensor(*a)?, self.tensor(*b)?),
            _ => {
                return Err(KernelError::InvalidInput("ops take exactly two inputs").into());
            }
        };
        let output = self.tensor(id)?;
        log_session!("Recording {} ({:?})", node.name, node.op);

        let builder = match node.op {
            Op::MatMul => {
                let mut kernel = MatMulKernel::new(self.inst, DT_FLOAT)
                    .a(a.input())?
                    .b(b.input())?
                    .output(output.input())?;
                let pipeline = kernel.get_pipeline()?;
                let descs = kernel.get_descriptors(pipeline.clone())?;
                let builder = kernel.record(builder, pipeline, &descs)?;
                descriptors.extend(descs);
                builder
            }
            Op::Add => {
                let mut kernel = BinaryKernel::new(self.inst, DT_FLOAT, BinaryOp::Add)
                    .a(a.input())?
                    .b(b.input())?
                    .output(output.input())?;
                let pipeline = kernel.get_pipeline()?;
                let descs = kernel.get_descriptors(pipeline.clone())?;
                let builder = kernel.record(builder, pipeline, &descs)?;
                descriptors.extend(descs);
                builder
            }
            Op::Variable { .. } => builder,
        };

        Ok(builder)
    }

    fn tensor(&self, id: NodeId) -> Result<&DeviceTensor<'a>, SessionError> {
        self.tensors
            .get(&id)
            .ok_or(SessionError::Graph(GraphError::UnknownNode(id)))
    }

    /// Copy the current value of `id` back to the host.
    pub fn fetch(&self, id: NodeId) -> Result<Vec<f32>, SessionError> {
        Ok(self.tensor(id)?.to_host()?)
    }
}
