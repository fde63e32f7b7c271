use ash::vk::{self, PushConstantRange, SpecializationMapEntry};
use std::sync::Arc;
use thiserror::Error;

use crate::{
    kernels::{binary::BinaryPipelineSpec, matmul::MatmulPipelineSpec},
    log_init, VultenInstance,
};

#[derive(Debug, Error)]
pub enum PipelineCreateError {
    #[error("failed to compile shader: {0}")]
    Compile(String),
    #[error("failed to build shader module: {0}")]
    ShaderMod(vk::Result),
    #[error("failed to create descriptor set layout: {0}")]
    DescLayout(vk::Result),
    #[error("failed to create pipeline layout: {0}")]
    PipeLayout(vk::Result),
    #[error("failed to create pipeline: {0}")]
    Pipeline(vk::Result),
}

pub trait PushConstSpec {
    fn get_ranges() -> &'static [PushConstantRange];
    fn get_slice(&self) -> &[u8];
}

pub trait PipelineSpec {
    type PushConst: PushConstSpec;

    fn build_pipeline(&self, inst: &VultenInstance)
        -> Result<Arc<VultenPipeline>, PipelineCreateError>;
    fn get_shader(&self) -> Result<Vec<u32>, PipelineCreateError>;
    fn get_spec_info(&self) -> (Box<[SpecializationMapEntry]>, Vec<u8>);
}

#[derive(Debug, Eq, Hash, PartialEq, Clone)]
pub enum PipelineSpecs {
    Binary(BinaryPipelineSpec),
    Matmul(MatmulPipelineSpec),
}

pub struct VultenPipeline {
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub shader_mod: vk::ShaderModule,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
}

impl super::VultenInstance {
    fn create_shader_mod(
        &self,
        shader_source: &[u32],
    ) -> Result<vk::ShaderModule, PipelineCreateError> {
        let shader_mod_info = vk::ShaderModuleCreateInfo::default().code(shader_source);
        unsafe { self.device.create_shader_module(&shader_mod_info, None) }
            .map_err(PipelineCreateError::ShaderMod)
    }

    fn create_descriptor_set_layout(
        &self,
        buffer_types: Vec<vk::DescriptorType>,
    ) -> Result<vk::DescriptorSetLayout, PipelineCreateError> {
        let descriptor_set_layout_bindings: Vec<vk::DescriptorSetLayoutBinding> = buffer_types
            .into_iter()
            .enumerate()
            .map(|(i, buff_type)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(i as u32)
                    .descriptor_type(buff_type)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
                    .descriptor_count(1)
            })
            .collect();

        let descriptor_set_layout_info =
            vk::DescriptorSetLayoutCreateInfo::default().bindings(&descriptor_set_layout_bindings);
        unsafe {
            self.device
                .create_descriptor_set_layout(&descriptor_set_layout_info, None)
        }
        .map_err(PipelineCreateError::DescLayout)
    }

    pub fn create_compute_pipeline(
        &self,
        buffer_types: Vec<vk::DescriptorType>,
        shader_source: &[u32],
        spec_info: Option<&vk::SpecializationInfo>,
        push_const_ranges: &[vk::PushConstantRange],
    ) -> Result<VultenPipeline, PipelineCreateError> {
        let descriptor_set_layout = self.create_descriptor_set_layout(buffer_types)?;

        let descriptor_set_layouts = [descriptor_set_layout];

        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&descriptor_set_layouts)
            .push_constant_ranges(push_const_ranges);
        let pipeline_layout = match unsafe {
            self.device
                .create_pipeline_layout(&pipeline_layout_info, None)
        } {
            Ok(i) => i,
            Err(e) => {
                unsafe {
                    self.device
                        .destroy_descriptor_set_layout(descriptor_set_layout, None)
                };
                return Err(PipelineCreateError::PipeLayout(e));
            }
        };

        let shader_mod = match self.create_shader_mod(shader_source) {
            Ok(i) => i,
            Err(e) => {
                unsafe {
                    self.device.destroy_pipeline_layout(pipeline_layout, None);
                    self.device
                        .destroy_descriptor_set_layout(descriptor_set_layout, None);
                };
                return Err(e);
            }
        };

        let mut pipeline_shader_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader_mod)
            .name(c"main");
        if let Some(i) = spec_info {
            pipeline_shader_info = pipeline_shader_info.specialization_info(i);
        };

        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(pipeline_shader_info)
            .layout(pipeline_layout);
        let created = unsafe {
            self.device
                .create_compute_pipelines(*self.pipeline_cache, &[pipeline_info], None)
        };

        let mut new_pipeline = VultenPipeline {
            pipeline: vk::Pipeline::null(),
            shader_mod,
            pipeline_layout,
            descriptor_set_layout,
        };
        match created {
            Ok(pipelines) if !pipelines.is_empty() => {
                new_pipeline.pipeline = pipelines[0];
                Ok(new_pipeline)
            }
            Ok(_) => {
                self.destroy_pipeline_handles(&new_pipeline);
                Err(PipelineCreateError::Pipeline(vk::Result::ERROR_UNKNOWN))
            }
            Err((_, e)) => {
                self.destroy_pipeline_handles(&new_pipeline);
                Err(PipelineCreateError::Pipeline(e))
            }
        }
    }

    pub(crate) fn destroy_pipeline_handles(&self, pipeline: &VultenPipeline) {
        unsafe {
            self.device.destroy_pipeline(pipeline.pipeline, None);
            self.device.destroy_shader_module(pipeline.shader_mod, None);
            self.device
                .destroy_pipeline_layout(pipeline.pipeline_layout, None);
            self.device
                .destroy_descriptor_set_layout(pipeline.descriptor_set_layout, None);
        }
    }

    /// Returns the cached pipeline for `spec`, building it on first use.
    pub fn get_pipeline_from_spec(
        &self,
        spec: PipelineSpecs,
    ) -> Result<Arc<VultenPipeline>, PipelineCreateError> {
        let mut locked_map = self.pipelines.upgradable_read();
        if let Some(pipeline) = locked_map.get(&spec) {
            return Ok(pipeline.clone());
        }

        locked_map.with_upgraded(|m| -> Result<Arc<VultenPipeline>, PipelineCreateError> {
            log_init!("Building pipeline {:?}", spec);
            let pipeline = match &spec {
                PipelineSpecs::Binary(pip) => pip.build_pipeline(self)?,
                PipelineSpecs::Matmul(pip) => pip.build_pipeline(self)?,
            };
            m.insert(spec, pipeline.clone());
            Ok(pipeline)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{kernels::binary::BinaryOp, DT_FLOAT, TEST_INST};

    #[test]
    fn pipelines_are_cached() {
        let Some(inst) = TEST_INST.as_ref() else {
            return;
        };

        let spec = PipelineSpecs::Binary(BinaryPipelineSpec::new(inst, BinaryOp::Add, DT_FLOAT));
        let first = inst.get_pipeline_from_spec(spec.clone()).unwrap();
        let second = inst.get_pipeline_from_spec(spec).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }
}
