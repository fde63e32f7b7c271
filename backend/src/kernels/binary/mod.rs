use ash::vk::{
    self, DescriptorType, PipelineBindPoint, PushConstantRange, QueueFlags, ShaderStageFlags,
    SpecializationInfo, SpecializationMapEntry, SubmitInfo,
};
use std::sync::Arc;
use zerocopy::AsBytes;

use crate::{
    cmd_buff::CommandBufferBuilder,
    compiler,
    descriptor::VultenDescriptor,
    kernels::{Chunkable, KernelError, KernelInput},
    log_ops,
    pipeline::{PipelineCreateError, PipelineSpec, PipelineSpecs, PushConstSpec, VultenPipeline},
    VultenDataType, VultenInstance,
};

pub const BINARY_SOURCE: &str = include_str!("binary.comp");

pub const OP_MUL: u32 = 0;
pub const OP_ADD: u32 = 1;
pub const OP_SUB: u32 = 2;

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum BinaryOp {
    Mul,
    Add,
    Sub,
}

impl TryFrom<u32> for BinaryOp {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            OP_MUL => Ok(Self::Mul),
            OP_ADD => Ok(Self::Add),
            OP_SUB => Ok(Self::Sub),
            _ => Err(()),
        }
    }
}

impl From<BinaryOp> for u32 {
    fn from(value: BinaryOp) -> Self {
        match value {
            BinaryOp::Mul => OP_MUL,
            BinaryOp::Add => OP_ADD,
            BinaryOp::Sub => OP_SUB,
        }
    }
}

impl BinaryOp {
    /// Host side reference used to verify device results.
    pub fn apply(&self, a: f32, b: f32) -> f32 {
        match self {
            Self::Mul => a * b,
            Self::Add => a + b,
            Self::Sub => a - b,
        }
    }
}

#[derive(Debug, Eq, Hash, PartialEq, Clone)]
pub struct BinaryPipelineSpec {
    local_x: u32,
    op: BinaryOp,
    d_type: VultenDataType,
}

impl BinaryPipelineSpec {
    pub fn new(inst: &VultenInstance, op: BinaryOp, d_type: VultenDataType) -> Self {
        Self {
            local_x: inst.device_props.sub_group_size.max(1),
            op,
            d_type,
        }
    }
}

#[derive(Debug, AsBytes, Default)]
#[repr(C, packed)]
pub struct BinaryPushConst {
    start: u32,
    stop: u32,
}

impl PushConstSpec for BinaryPushConst {
    fn get_ranges() -> &'static [PushConstantRange] {
        &[PushConstantRange {
            offset: 0,
            stage_flags: ShaderStageFlags::COMPUTE,
            size: std::mem::size_of::<Self>() as u32,
        }]
    }

    #[inline]
    fn get_slice(&self) -> &[u8] {
        let slice: &[u8; 8] = zerocopy::transmute_ref!(self);

        slice
    }
}

impl PipelineSpec for BinaryPipelineSpec {
    type PushConst = BinaryPushConst;

    fn get_shader(&self) -> Result<Vec<u32>, PipelineCreateError> {
        let mut compiler = compiler::ShaderCompiler::new(BINARY_SOURCE);
        compiler
            .add_type_spec(0, self.d_type)
            .map_err(|e| PipelineCreateError::Compile(e.to_string()))?;

        compiler.compile().map_err(PipelineCreateError::Compile)
    }

    fn get_spec_info(&self) -> (Box<[SpecializationMapEntry]>, Vec<u8>) {
        //offset needs to be the offset in the spec_buffer vec not the struct
        let spec_entrys = [
            SpecializationMapEntry {
                constant_id: 0,
                offset: 0,
                size: std::mem::size_of_val(&self.local_x),
            },
            SpecializationMapEntry {
                constant_id: 1,
                offset: 4,
                size: std::mem::size_of::<u32>(),
            },
        ];

        let mut spec_buffer: Vec<u8> = Vec::new();
        spec_buffer.extend_from_slice(&self.local_x.to_ne_bytes());
        let op_as_u32: u32 = self.op.into();
        spec_buffer.extend_from_slice(&op_as_u32.to_ne_bytes());

        debug_assert!(spec_buffer.len() <= spec_entrys.iter().fold(0, |acc, x| acc + x.size));

        (Box::new(spec_entrys), spec_buffer)
    }

    fn build_pipeline(
        &self,
        inst: &VultenInstance,
    ) -> Result<Arc<VultenPipeline>, PipelineCreateError> {
        let desc_types: Vec<vk::DescriptorType> = vec![vk::DescriptorType::STORAGE_BUFFER; 3];
        let shader = self.get_shader()?;
        let spec_info = self.get_spec_info();

        let pipe = inst.create_compute_pipeline(
            desc_types,
            &shader,
            Some(
                &SpecializationInfo::default()
                    .map_entries(&spec_info.0)
                    .data(&spec_info.1),
            ),
            Self::PushConst::get_ranges(),
        )?;

        Ok(Arc::new(pipe))
    }
}

/// Elementwise `output = a <op> b` over operands with the same element count.
pub struct BinaryKernel<'a> {
    inst: &'a VultenInstance,
    d_type: VultenDataType,
    op: BinaryOp,
    a: Option<KernelInput<'a>>,
    b: Option<KernelInput<'a>>,
    output: Option<KernelInput<'a>>,
    spec: Option<BinaryPipelineSpec>,
}

impl<'a> BinaryKernel<'a> {
    pub fn new(inst: &'a VultenInstance, d_type: VultenDataType, op: BinaryOp) -> Self {
        Self {
            inst,
            d_type,
            op,
            a: None,
            b: None,
            output: None,
            spec: None,
        }
    }

    pub fn a(mut self, a: KernelInput<'a>) -> Result<Self, KernelError> {
        self.a = Some(self.checked(a)?);
        Ok(self)
    }

    pub fn b(mut self, b: KernelInput<'a>) -> Result<Self, KernelError> {
        self.b = Some(self.checked(b)?);
        Ok(self)
    }

    pub fn output(mut self, output: KernelInput<'a>) -> Result<Self, KernelError> {
        self.output = Some(self.checked(output)?);
        Ok(self)
    }

    fn checked(&self, input: KernelInput<'a>) -> Result<KernelInput<'a>, KernelError> {
        let elem_size = self
            .d_type
            .size_of()
            .map_err(KernelError::InvalidInput)?;
        if !input.fits(elem_size) {
            return Err(KernelError::InvalidInput("buffer is smaller than its dims"));
        }
        Ok(input)
    }

    fn total_elements(&self) -> Result<i64, KernelError> {
        let a = self.a.ok_or(KernelError::InvalidInput("No a operand"))?;
        let b = self.b.ok_or(KernelError::InvalidInput("No b operand"))?;
        let output = self
            .output
            .ok_or(KernelError::InvalidInput("No output operand"))?;

        let total = a.num_elements();
        if b.num_elements() != total || output.num_elements() != total {
            return Err(KernelError::InvalidInput(
                "operands must have the same number of elements",
            ));
        }
        if total > u32::MAX as i64 {
            return Err(KernelError::InvalidInput("too many elements"));
        }

        Ok(total)
    }

    pub fn get_pipeline(&mut self) -> Result<Arc<VultenPipeline>, KernelError> {
        let spec = self
            .spec
            .get_or_insert_with(|| BinaryPipelineSpec::new(self.inst, self.op, self.d_type))
            .clone();

        Ok(self
            .inst
            .get_pipeline_from_spec(PipelineSpecs::Binary(spec))?)
    }

    pub fn get_descriptors(
        &self,
        pipeline: Arc<VultenPipeline>,
    ) -> Result<Vec<VultenDescriptor<'a>>, KernelError> {
        let a = self.a.ok_or(KernelError::InvalidInput("No a operand"))?;
        let b = self.b.ok_or(KernelError::InvalidInput("No b operand"))?;
        let output = self
            .output
            .ok_or(KernelError::InvalidInput("No output operand"))?;

        let descriptors = self
            .inst
            .get_descriptor_set(DescriptorType::STORAGE_BUFFER, pipeline)?;
        descriptors.bind_buffers(&[
            a.buff.get_descriptor_info(),
            b.buff.get_descriptor_info(),
            output.buff.get_descriptor_info(),
        ]);

        Ok(vec![descriptors])
    }

    pub fn record<'b>(
        &self,
        mut builder: CommandBufferBuilder<'b>,
        pipeline: Arc<VultenPipeline>,
        descriptors: &[VultenDescriptor],
    ) -> Result<CommandBufferBuilder<'b>, KernelError> {
        let total_elements = self.total_elements()?;
        let spec = self.spec.as_ref().ok_or(KernelError::Record("Missing spec"))?;
        let descriptor = descriptors
            .first()
            .ok_or(KernelError::Record("Missing descriptor set"))?;

        builder = builder
            .bind_pipeline(PipelineBindPoint::COMPUTE, pipeline.clone())
            .bind_descriptor_sets(
                PipelineBindPoint::COMPUTE,
                pipeline.pipeline_layout,
                0,
                &descriptor.descriptor,
                &[],
            );

        let mut push = BinaryPushConst::default();
        let chunk_size = self.inst.device_props.max_work_group[0] as i64 * spec.local_x as i64;
        for chunk in (0..total_elements).as_chunks(chunk_size) {
            push.start = chunk.start as u32;
            push.stop = chunk.end as u32;

            let threads = ((chunk.end - chunk.start) as u64).div_ceil(spec.local_x as u64) as u32;
            builder = builder
                .push_constants(
                    pipeline.pipeline_layout,
                    ShaderStageFlags::COMPUTE,
                    0,
                    push.get_slice(),
                )
                .dispatch(threads, 1, 1);
        }

        Ok(builder)
    }

    /// Record, submit and wait for a single dispatch.
    pub fn run(&mut self) -> Result<(), KernelError> {
        let pipeline = self.get_pipeline()?;
        let descriptors = self.get_descriptors(pipeline.clone())?;
        log_ops!(
            "Running binary {:?} over {} elements",
            self.op,
            self.total_elements()?
        );

        let q = self.inst.get_queue(QueueFlags::COMPUTE)?;
        let cmd_buffs = self.inst.create_cmd_buffers(1, &q)?;

        let submitted = (|| -> Result<(), KernelError> {
            let builder = CommandBufferBuilder::new(cmd_buffs[0], &self.inst.device).begin()?;
            self.record(builder, pipeline, &descriptors)?
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
        submitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{memory::VultenBufferType, DT_FLOAT, DT_INT32, TEST_INST};

    #[test]
    fn op_codes_round_trip() {
        for op in [BinaryOp::Mul, BinaryOp::Add, BinaryOp::Sub] {
            assert_eq!(BinaryOp::try_from(u32::from(op)), Ok(op));
        }
        assert!(BinaryOp::try_from(42).is_err());
    }

    #[test]
    fn push_const_layout() {
        let push = BinaryPushConst { start: 1, stop: 2 };
        assert_eq!(push.get_slice().len(), 8);
        assert_eq!(BinaryPushConst::get_ranges()[0].size, 8);
    }

    fn run_binary<T: Copy + Default>(
        inst: &VultenInstance,
        d_type: VultenDataType,
        op: BinaryOp,
        a: &[T],
        b: &[T],
    ) -> Vec<T> {
        let size = std::mem::size_of_val(a) as u64;
        let dims = [a.len() as i64];
        let a_buff = inst
            .create_buffer(VultenBufferType::Device, size, false, true)
            .unwrap();
        let b_buff = inst
            .create_buffer(VultenBufferType::Device, size, false, true)
            .unwrap();
        let out_buff = inst
            .create_buffer(VultenBufferType::Device, size, true, false)
            .unwrap();
        inst.upload_to_device_buff(a, &a_buff, 0).unwrap();
        inst.upload_to_device_buff(b, &b_buff, 0).unwrap();

        BinaryKernel::new(inst, d_type, op)
            .a(KernelInput { buff: &a_buff, dims: &dims })
            .unwrap()
            .b(KernelInput { buff: &b_buff, dims: &dims })
            .unwrap()
            .output(KernelInput { buff: &out_buff, dims: &dims })
            .unwrap()
            .run()
            .unwrap();

        inst.read_buffer(&out_buff).unwrap()
    }

    #[test]
    fn add_float() {
        let Some(inst) = TEST_INST.as_ref() else {
            return;
        };

        let a: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        let b: Vec<f32> = (0..1000).map(|i| (i * 2) as f32).collect();
        let out = run_binary(inst, DT_FLOAT, BinaryOp::Add, &a, &b);

        for i in 0..a.len() {
            assert_eq!(out[i], a[i] + b[i]);
        }
    }

    #[test]
    fn sub_and_mul_int() {
        let Some(inst) = TEST_INST.as_ref() else {
            return;
        };

        let a: Vec<i32> = (0..257).collect();
        let b: Vec<i32> = (0..257).map(|i| 3 - i).collect();
        let sub = run_binary(inst, DT_INT32, BinaryOp::Sub, &a, &b);
        let mul = run_binary(inst, DT_INT32, BinaryOp::Mul, &a, &b);

        for i in 0..a.len() {
            assert_eq!(sub[i], a[i] - b[i]);
            assert_eq!(mul[i], a[i] * b[i]);
        }
    }

    #[test]
    fn rejects_mismatched_operands() {
        let Some(inst) = TEST_INST.as_ref() else {
            return;
        };

        let small = inst
            .create_buffer(VultenBufferType::Device, 16, false, false)
            .unwrap();
        let big = inst
            .create_buffer(VultenBufferType::Device, 32, false, false)
            .unwrap();

        let too_big = BinaryKernel::new(inst, DT_FLOAT, BinaryOp::Add)
            .a(KernelInput { buff: &small, dims: &[8] });
        assert!(matches!(too_big, Err(KernelError::InvalidInput(_))));

        let mut mismatched = BinaryKernel::new(inst, DT_FLOAT, BinaryOp::Add)
            .a(KernelInput { buff: &small, dims: &[4] })
            .unwrap()
            .b(KernelInput { buff: &big, dims: &[8] })
            .unwrap()
            .output(KernelInput { buff: &big, dims: &[8] })
            .unwrap();
        assert!(matches!(mismatched.run(), Err(KernelError::InvalidInput(_))));
    }
}
