use arc_swap::ArcSwap;
use ash::{
    prelude::VkResult,
    vk::{
        self, CommandPoolCreateFlags, CommandPoolCreateInfo, CopyDescriptorSet, DescriptorPool,
        Fence, FenceCreateInfo, PhysicalDeviceProperties2, PhysicalDeviceSubgroupProperties,
        PipelineCacheCreateInfo, WriteDescriptorSet,
    },
};
pub use ash::{Device, Entry, Instance, LoadingError};
use core::mem::ManuallyDrop;
use pipeline::{PipelineSpecs, VultenPipeline};
use std::{
    collections::HashMap,
    ffi::{c_char, CStr},
    sync::{Arc, LazyLock, Mutex},
};
use thiserror::Error;
use tracing::warn;

const VK_API_VER: u32 = vk::make_api_version(0, 1, 2, 0);
const VK_ENV_VER: glslang::VulkanVersion = glslang::VulkanVersion::Vulkan1_2;
const VK_SPIRV_VER: glslang::SpirvVersion = glslang::SpirvVersion::SPIRV1_5;

pub mod cmd_buff;
pub mod compiler;
pub mod descriptor;
pub mod graph;
pub mod log;
pub mod memory;
pub mod pipeline;
pub mod queue;
pub mod stream;
pub mod tensor;

pub mod kernels;

#[cfg(test)]
mod test_utills;

#[cfg(test)]
pub(crate) static TEST_INST: LazyLock<Option<VultenInstance>> =
    LazyLock::new(test_utills::get_test_instance);

pub static ENV_SETTINGS: LazyLock<EnvSettings> = LazyLock::new(|| {
    let mut settings = EnvSettings::default();

    match std::env::var("VULTEN_VALIDATION")
        .unwrap_or_default()
        .to_lowercase()
        .as_str()
    {
        "true" | "on" => settings.validation = true,
        _ => (),
    }

    settings
});

#[derive(Debug, Default)]
pub struct EnvSettings {
    pub validation: bool,
}

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("failed to create Vulkan instance: {0}")]
    CreateInstance(vk::Result),
    #[error("no Vulkan device present")]
    NoDevice,
    #[error("device index {index} is out of range, {count} device(s) present")]
    DeviceIndex { index: usize, count: usize },
    #[error("Vulkan call failed during {stage}: {result}")]
    Vk {
        stage: &'static str,
        result: vk::Result,
    },
}

#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub struct VultenDataType(u32);
pub const DT_FLOAT: VultenDataType = VultenDataType(1);
pub const DT_INT32: VultenDataType = VultenDataType(3);
pub const DT_UINT32: VultenDataType = VultenDataType(22);

impl From<u32> for VultenDataType {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl VultenDataType {
    pub fn size_of(&self) -> Result<usize, &'static str> {
        match *self {
            DT_FLOAT | DT_INT32 | DT_UINT32 => Ok(4),
            _ => Err("Unknow type"),
        }
    }
}

pub struct DeviceProperties {
    pub max_work_group: [u32; 3],
    pub max_work_group_invo: u32,
    pub max_work_group_invo_size: [u32; 3],
    pub sub_group_size: u32,
    pub max_storage_buffer_range: u32,
}

/// Loads the Vulkan loader library at runtime.
///
/// Failing here means `libvulkan` is not installed, which is a different
/// condition from a loader that is present but reports no devices.
pub fn load_entry() -> Result<Entry, LoadingError> {
    unsafe { Entry::load() }
}

/// A single Vulkan physical device and everything created against it.
///
/// Every allocation and kernel takes the instance explicitly. There is no
/// process wide current device.
pub struct VultenInstance {
    #[allow(dead_code)]
    entry: Entry, // This cannot be droped
    pub dev_num: u64,
    vk_instance: Instance,
    physical_device: vk::PhysicalDevice,
    pub device: Device,
    queues: Vec<(queue::VultenQueueFlags, Arc<Mutex<queue::VultenQueue>>)>,
    allocator: ManuallyDrop<vk_mem::Allocator>,
    pipeline_cache: ManuallyDrop<vk::PipelineCache>,
    pipelines: parking_lot::RwLock<HashMap<PipelineSpecs, Arc<VultenPipeline>>>,
    descriptor_pools: ArcSwap<Vec<Arc<Mutex<DescriptorPool>>>>,
    pub device_props: DeviceProperties,
}

unsafe impl Send for VultenInstance {}
unsafe impl Sync for VultenInstance {}

impl Drop for VultenInstance {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            for (_, pipeline) in self.pipelines.write().drain() {
                self.destroy_pipeline_handles(&pipeline);
            }
            for pool in self.descriptor_pools.load().iter() {
                let pool = pool.lock().unwrap_or_else(|e| e.into_inner());
                self.device.destroy_descriptor_pool(*pool, None);
            }

            self.device
                .destroy_pipeline_cache(*self.pipeline_cache, None);
            ManuallyDrop::drop(&mut self.pipeline_cache);
            for (_, q) in self.queues.iter() {
                let queue = q.lock().unwrap_or_else(|e| e.into_inner());
                self.device.destroy_command_pool(queue.pool, None);
            }
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            self.vk_instance.destroy_instance(None)
        };
    }
}

impl VultenInstance {
    pub fn new(entry: Entry, device_num: Option<usize>) -> Result<Self, InstanceError> {
        let inst = create_instance(&entry)?;

        let physical_devices = match unsafe { inst.enumerate_physical_devices() } {
            Ok(devices) => devices,
            Err(result) => {
                unsafe { inst.destroy_instance(None) };
                return Err(InstanceError::Vk {
                    stage: "enumerate_physical_devices",
                    result,
                });
            }
        };
        let dev_num = device_num.unwrap_or(0);
        let Some(&physical_device) = physical_devices.get(dev_num) else {
            unsafe { inst.destroy_instance(None) };
            if physical_devices.is_empty() {
                return Err(InstanceError::NoDevice);
            }
            return Err(InstanceError::DeviceIndex {
                index: dev_num,
                count: physical_devices.len(),
            });
        };

        let queue_propertys =
            unsafe { inst.get_physical_device_queue_family_properties(physical_device) };

        let priorities: Vec<f32> = vec![
            1.0;
            queue_propertys
                .iter()
                .map(|x| x.queue_count)
                .max()
                .unwrap_or_default() as usize
        ];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = queue_propertys
            .iter()
            .enumerate()
            .map(|(i, q)| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(i as u32)
                    .queue_priorities(&priorities[..q.queue_count as usize])
            })
            .collect();

        let availble_extens =
            unsafe { inst.enumerate_device_extension_properties(physical_device) }
                .unwrap_or_default();
        let mut extens: Vec<*const c_char> = Vec::new();

        let have_memory_budget =
            enable_if_availble(c"VK_EXT_memory_budget", &mut extens, &availble_extens);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extens);

        let device = match unsafe { inst.create_device(physical_device, &device_create_info, None) }
        {
            Ok(device) => device,
            Err(result) => {
                unsafe { inst.destroy_instance(None) };
                return Err(InstanceError::Vk {
                    stage: "create_device",
                    result,
                });
            }
        };

        // From here on a failure leaks the device until process exit. Every
        // caller aborts on an instance error so nothing is worth unwinding.
        let vk_err = |stage: &'static str| move |result: vk::Result| InstanceError::Vk { stage, result };

        let mut queues: Vec<(queue::VultenQueueFlags, Arc<Mutex<queue::VultenQueue>>)> =
            Vec::new();
        for (i, qp) in queue_propertys.into_iter().enumerate() {
            for qc in 0..qp.queue_count {
                let q = unsafe { device.get_device_queue(i as u32, qc) };
                let q_pool_info = CommandPoolCreateInfo::default()
                    .queue_family_index(i as u32)
                    .flags(CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
                let pool = unsafe { device.create_command_pool(&q_pool_info, None) }
                    .map_err(vk_err("create_command_pool"))?;
                queues.push((
                    qp.queue_flags,
                    Arc::new(Mutex::new(queue::VultenQueue::new(q, pool))),
                ));
            }
        }

        let mut allocator_flags = vk_mem::AllocatorCreateFlags::empty();
        if have_memory_budget {
            allocator_flags |= vk_mem::AllocatorCreateFlags::EXT_MEMORY_BUDGET;
        }

        let mut allocator_create_info =
            vk_mem::AllocatorCreateInfo::new(&inst, &device, physical_device);
        allocator_create_info.vulkan_api_version = VK_API_VER;
        allocator_create_info.flags = allocator_flags;
        let allocator = unsafe { vk_mem::Allocator::new(allocator_create_info) }
            .map_err(vk_err("create_allocator"))?;

        let pipeline_cache_info = PipelineCacheCreateInfo::default();
        let pipeline_cache = unsafe { device.create_pipeline_cache(&pipeline_cache_info, None) }
            .map_err(vk_err("create_pipeline_cache"))?;

        let mut sub_props = PhysicalDeviceSubgroupProperties::default();
        let mut props = PhysicalDeviceProperties2::default().push_next(&mut sub_props);
        unsafe { inst.get_physical_device_properties2(physical_device, &mut props) };
        let limits = props.properties.limits;

        let device_props = DeviceProperties {
            max_work_group: limits.max_compute_work_group_count,
            max_work_group_invo: limits.max_compute_work_group_invocations,
            max_work_group_invo_size: limits.max_compute_work_group_size,
            sub_group_size: sub_props.subgroup_size,
            max_storage_buffer_range: limits.max_storage_buffer_range,
        };

        let new_inst = VultenInstance {
            entry,
            dev_num: dev_num as u64,
            vk_instance: inst,
            physical_device,
            device,
            queues,
            allocator: ManuallyDrop::new(allocator),
            pipeline_cache: ManuallyDrop::new(pipeline_cache),
            pipelines: HashMap::new().into(),
            descriptor_pools: ArcSwap::from_pointee(Vec::new()),
            device_props,
        };
        log_init!(
            "Created instance for device {} ({}) with {} queues",
            new_inst.dev_num,
            new_inst.get_device_name(),
            new_inst.queues.len()
        );

        Ok(new_inst)
    }

    pub fn get_device_name(&self) -> String {
        unsafe {
            CStr::from_ptr(
                self.vk_instance
                    .get_physical_device_properties(self.physical_device)
                    .device_name
                    .as_ptr(),
            )
            .to_string_lossy()
            .to_string()
        }
    }

    pub fn update_descriptor_sets(
        &self,
        descriptors: &[WriteDescriptorSet],
        descriptor_cpys: &[CopyDescriptorSet],
    ) {
        unsafe {
            self.device
                .update_descriptor_sets(descriptors, descriptor_cpys);
        }
    }

    pub fn create_fence(&self) -> VkResult<Fence> {
        unsafe { self.device.create_fence(&FenceCreateInfo::default(), None) }
    }

    pub fn wait_for_fences(&self, fences: &[Fence], wait_all: bool) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(fences, wait_all, u64::MAX) }
    }

    pub fn destroy_fence(&self, fence: Fence) {
        unsafe {
            self.device.destroy_fence(fence, None);
        }
    }
}

fn create_instance(entry: &Entry) -> Result<Instance, InstanceError> {
    let appinfo = vk::ApplicationInfo::default()
        .application_name(c"vulten_bench")
        .api_version(VK_API_VER);

    let mut layers: Vec<*const c_char> = Vec::new();
    if ENV_SETTINGS.validation {
        let availble_layers =
            unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
        let validation = c"VK_LAYER_KHRONOS_validation";
        let present = availble_layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == validation);
        if present {
            layers.push(validation.as_ptr());
        } else {
            warn!("VULTEN_VALIDATION is set but the validation layer is not installed");
        }
    }

    let instance_info = vk::InstanceCreateInfo::default()
        .application_info(&appinfo)
        .enabled_layer_names(&layers);

    unsafe { entry.create_instance(&instance_info, None) }.map_err(InstanceError::CreateInstance)
}

fn enable_if_availble(
    exten: &'static CStr,
    extens: &mut Vec<*const c_char>,
    availble_extens: &[vk::ExtensionProperties],
) -> bool {
    let availble = availble_extens
        .iter()
        .any(|x| unsafe { CStr::from_ptr(x.extension_name.as_ptr()) } == exten);

    if availble {
        extens.push(exten.as_ptr());
    }

    availble
}
