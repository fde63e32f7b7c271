use ash::vk::{
    self, DescriptorType, PipelineBindPoint, PushConstantRange, QueueFlags, ShaderStageFlags,
    SpecializationMapEntry, SubmitInfo,
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

pub const MATMUL_SOURCE: &str = include_str!("matmul.comp");

pub const MAX_TILE_SIZE: u32 = 16;
const MIN_TILE_SIZE: u32 = 8;

#[derive(Debug, Eq, Hash, PartialEq, Clone)]
pub struct MatmulPipelineSpec {
    tile: u32,
    d_type: VultenDataType,
}

impl MatmulPipelineSpec {
    /// Picks the largest square tile the device can run as one workgroup.
    pub fn new(inst: &VultenInstance, d_type: VultenDataType) -> Self {
        let props = &inst.device_props;
        let fits = |tile: u32| {
            tile * tile <= props.max_work_group_invo
                && tile <= props.max_work_group_invo_size[0]
                && tile <= props.max_work_group_invo_size[1]
        };
        let tile = if fits(MAX_TILE_SIZE) {
            MAX_TILE_SIZE
        } else {
            MIN_TILE_SIZE
        };

        Self { tile, d_type }
    }
}

#[derive(Debug, AsBytes, Default)]
#[repr(C, packed)]
pub struct MatmulPushConst {
    m: u32,
    k: u32,
    n: u32,
    row_offset: u32,
}

impl PushConstSpec for MatmulPushConst {
    fn get_ranges() -> &'static [PushConstantRange] {
        &[PushConstantRange {
            offset: 0,
            stage_flags: ShaderStageFlags::COMPUTE,
            size: std::mem::size_of::<Self>() as u32,
        }]
    }

    #[inline]
    fn get_slice(&self) -> &[u8] {
        let slice: &[u8; 16] = zerocopy::transmute_ref!(self);

        slice
    }
}

impl PipelineSpec for MatmulPipelineSpec {
    type PushConst = MatmulPushConst;

    fn get_shader(&self) -> Result<Vec<u32>, PipelineCreateError> {
        let mut compiler = compiler::ShaderCompiler::new(MATMUL_SOURCE);
        compiler
            .add_type_spec(0, self.d_type)
            .map_err(|e| PipelineCreateError::Compile(e.to_string()))?;
        compiler.add_define("TILE".into(), Some(self.tile.to_string()));

        compiler.compile().map_err(PipelineCreateError::Compile)
    }

    // Tile size is baked in through a define since it sizes shared memory.
    fn get_spec_info(&self) -> (Box<[SpecializationMapEntry]>, Vec<u8>) {
        (Box::new([]), Vec::new())
    }

    fn build_pipeline(
        &self,
        inst: &VultenInstance,
    ) -> Result<Arc<VultenPipeline>, PipelineCreateError> {
        let desc_types: Vec<vk::DescriptorType> = vec![vk::DescriptorType::STORAGE_BUFFER; 3];
        let shader = self.get_shader()?;

        let pipe =
            inst.create_compute_pipeline(desc_types, &shader, None, Self::PushConst::get_ranges())?;

        Ok(Arc::new(pipe))
    }
}

/// Shape of `[m, k] x [k, n]`, or why the operands do not multiply.
pub fn matmul_shape(a_dims: &[i64], b_dims: &[i64]) -> Result<(i64, i64, i64), &'static str> {
    if a_dims.len() != 2 || b_dims.len() != 2 {
        return Err("matmul operands must be rank 2");
    }
    if a_dims[1] != b_dims[0] {
        return Err("inner dimensions do not match");
    }
    if a_dims.iter().chain(b_dims).any(|&d| d <= 0 || d > u32::MAX as i64) {
        return Err("matmul dimensions must be positive and fit in 32 bits");
    }

    Ok((a_dims[0], a_dims[1], b_dims[1]))
}

/// Dense `output[m, n] = a[m, k] x b[k, n]` in row major order.
pub struct MatMulKernel<'a> {
    inst: &'a VultenInstance,
    d_type: VultenDataType,
    a: Option<KernelInput<'a>>,
    b: Option<KernelInput<'a>>,
    output: Option<KernelInput<'a>>,
    spec: Option<MatmulPipelineSpec>,
}

impl<'a> MatMulKernel<'a> {
    pub fn new(inst: &'a VultenInstance, d_type: VultenDataType) -> Self {
        Self {
            inst,
            d_type,
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

    fn shape(&self) -> Result<(i64, i64, i64), KernelError> {
        let a = self.a.ok_or(KernelError::InvalidInput("No a operand"))?;
        let b = self.b.ok_or(KernelError::InvalidInput("No b operand"))?;
        let output = self
            .output
            .ok_or(KernelError::InvalidInput("No output operand"))?;

        let (m, k, n) = matmul_shape(a.dims, b.dims).map_err(KernelError::InvalidInput)?;
        if output.dims != [m, n].as_slice() {
            return Err(KernelError::InvalidInput("output must be [m, n]"));
        }

        Ok((m, k, n))
    }

    pub fn get_pipeline(&mut self) -> Result<Arc<VultenPipeline>, KernelError> {
        let spec = self
            .spec
            .get_or_insert_with(|| MatmulPipelineSpec::new(self.inst, self.d_type))
            .clone();

        Ok(self
            .inst
            .get_pipeline_from_spec(PipelineSpecs::Matmul(spec))?)
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
        let (m, k, n) = self.shape()?;
        let spec = self.spec.as_ref().ok_or(KernelError::Record("Missing spec"))?;
        let descriptor = descriptors
            .first()
            .ok_or(KernelError::Record("Missing descriptor set"))?;
        let tile = spec.tile as i64;

        let groups_x = groups_for(n, tile);
        if groups_x > self.inst.device_props.max_work_group[0] as i64 {
            return Err(KernelError::InvalidInput("output has too many columns"));
        }

        builder = builder
            .bind_pipeline(PipelineBindPoint::COMPUTE, pipeline.clone())
            .bind_descriptor_sets(
                PipelineBindPoint::COMPUTE,
                pipeline.pipeline_layout,
                0,
                &descriptor.descriptor,
                &[],
            );

        let mut push = MatmulPushConst {
            m: m as u32,
            k: k as u32,
            n: n as u32,
            row_offset: 0,
        };
        let rows_per_dispatch = self.inst.device_props.max_work_group[1] as i64 * tile;
        for chunk in (0..m).as_chunks(rows_per_dispatch) {
            push.row_offset = chunk.start as u32;
            let groups_y = groups_for(chunk.end - chunk.start, tile);

            builder = builder
                .push_constants(
                    pipeline.pipeline_layout,
                    ShaderStageFlags::COMPUTE,
                    0,
                    push.get_slice(),
                )
                .dispatch(groups_x as u32, groups_y as u32, 1);
        }

        Ok(builder)
    }

    /// Record, submit and wait for a single multiply.
    pub fn run(&mut self) -> Result<(), KernelError> {
        let pipeline = self.get_pipeline()?;
        let descriptors = self.get_descriptors(pipeline.clone())?;
        let (m, k, n) = self.shape()?;
        log_ops!("Running matmul [{m}, {k}] x [{k}, {n}]");

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

fn groups_for(len: i64, tile: i64) -> i64 {
    (len as u64).div_ceil(tile as u64) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{memory::VultenBufferType, DT_FLOAT, TEST_INST};

    #[test]
    fn shape_checks() {
        assert_eq!(matmul_shape(&[2, 3], &[3, 4]), Ok((2, 3, 4)));
        assert!(matmul_shape(&[2, 3], &[4, 3]).is_err());
        assert!(matmul_shape(&[2, 3, 1], &[3, 4]).is_err());
        assert!(matmul_shape(&[0, 3], &[3, 4]).is_err());
    }

    #[test]
    fn tile_fits_workgroup() {
        let Some(inst) = TEST_INST.as_ref() else {
            return;
        };

        let spec = MatmulPipelineSpec::new(inst, DT_FLOAT);
        assert!(spec.tile == MAX_TILE_SIZE || spec.tile == MIN_TILE_SIZE);
        assert!(spec.tile * spec.tile <= inst.device_props.max_work_group_invo);
    }

    fn host_matmul(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
        let mut out = vec![0.0; m * n];
        for row in 0..m {
            for col in 0..n {
                out[row * n + col] = (0..k).map(|i| a[row * k + i] * b[i * n + col]).sum();
            }
        }
        out
    }

    fn check_matmul(m: i64, k: i64, n: i64) {
        let Some(inst) = TEST_INST.as_ref() else {
            return;
        };

        let a: Vec<f32> = (0..m * k).map(|i| (i % 7) as f32).collect();
        let b: Vec<f32> = (0..k * n).rev().map(|i| (i % 5) as f32).collect();

        let a_buff = inst
            .create_buffer(VultenBufferType::Device, (a.len() * 4) as u64, false, true)
            .unwrap();
        let b_buff = inst
            .create_buffer(VultenBufferType::Device, (b.len() * 4) as u64, false, true)
            .unwrap();
        let out_buff = inst
            .create_buffer(VultenBufferType::Device, (m * n * 4) as u64, true, false)
            .unwrap();
        inst.upload_to_device_buff(&a, &a_buff, 0).unwrap();
        inst.upload_to_device_buff(&b, &b_buff, 0).unwrap();

        let a_dims = [m, k];
        let b_dims = [k, n];
        let out_dims = [m, n];
        MatMulKernel::new(inst, DT_FLOAT)
            .a(KernelInput { buff: &a_buff, dims: &a_dims })
            .unwrap()
            .b(KernelInput { buff: &b_buff, dims: &b_dims })
            .unwrap()
            .output(KernelInput { buff: &out_buff, dims: &out_dims })
            .unwrap()
            .run()
            .unwrap();

        let out: Vec<f32> = inst.read_buffer(&out_buff).unwrap();
        let expected = host_matmul(&a, &b, m as usize, k as usize, n as usize);
        assert_eq!(out, expected);
    }

    #[test]
    fn square() {
        check_matmul(64, 64, 64);
    }

    #[test]
    fn ragged_tiles() {
        check_matmul(17, 33, 5);
    }

    #[test]
    fn single_element() {
        check_matmul(1, 1, 1);
    }

    #[test]
    fn rejects_wrong_output_shape() {
        let Some(inst) = TEST_INST.as_ref() else {
            return;
        };

        let buff = inst
            .create_buffer(VultenBufferType::Device, 64, false, false)
            .unwrap();
        let mut kernel = MatMulKernel::new(inst, DT_FLOAT)
            .a(KernelInput { buff: &buff, dims: &[2, 2] })
            .unwrap()
            .b(KernelInput { buff: &buff, dims: &[2, 2] })
            .unwrap()
            .output(KernelInput { buff: &buff, dims: &[4, 1] })
            .unwrap();
        assert!(matches!(kernel.run(), Err(KernelError::InvalidInput(_))));
    }
}
