use std::sync::{Arc, Mutex};

use arc_swap::Guard;
use ash::{
    prelude::VkResult,
    vk::{self, DescriptorPool, DescriptorPoolCreateFlags, DescriptorSet},
};
use tracing::warn;

use crate::{log_mem, pipeline::VultenPipeline, VultenInstance};

const POOL_SIZE: u32 = 64;
// Widest pipeline layout in the crate.
const MAX_BINDINGS: u32 = 3;

type PoolGuard = Guard<Arc<Vec<Arc<Mutex<DescriptorPool>>>>>;

pub struct VultenDescriptor<'a> {
    inst: &'a VultenInstance,
    pub descriptor: Vec<DescriptorSet>,
    pool: Arc<Mutex<DescriptorPool>>,
}

impl Drop for VultenDescriptor<'_> {
    fn drop(&mut self) {
        let pool = self.pool.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = unsafe {
            self.inst
                .device
                .free_descriptor_sets(*pool, self.descriptor.as_slice())
        } {
            warn!("Failed to free descriptor sets: {e}");
        }
    }
}

impl VultenDescriptor<'_> {
    /// Point every binding of the first set at the given buffers, in order.
    pub fn bind_buffers(&self, buffers: &[[vk::DescriptorBufferInfo; 1]]) {
        let write_sets: Vec<vk::WriteDescriptorSet> = buffers
            .iter()
            .enumerate()
            .map(|(binding, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(self.descriptor[0])
                    .dst_binding(binding as u32)
                    .dst_array_element(0)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(info)
            })
            .collect();

        self.inst.update_descriptor_sets(&write_sets, &[]);
    }
}

impl VultenInstance {
    pub fn get_descriptor_set(
        &self,
        buff_type: vk::DescriptorType,
        pipeline: Arc<VultenPipeline>,
    ) -> VkResult<VultenDescriptor<'_>> {
        let pools = self.descriptor_pools.load();

        let layout = [pipeline.descriptor_set_layout];

        for pool in pools.iter() {
            let Ok(locked_pool) = pool.try_lock() else {
                continue;
            };

            let disc_alloc_info = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(*locked_pool)
                .set_layouts(&layout);

            if let Ok(i) = unsafe { self.device.allocate_descriptor_sets(&disc_alloc_info) } {
                return Ok(VultenDescriptor {
                    inst: self,
                    descriptor: i,
                    pool: pool.clone(),
                });
            }
        }

        // Every pool is full or busy
        let descriptor_pool = self.allocate_new_pool(buff_type)?;

        let disc_alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(descriptor_pool)
            .set_layouts(&layout);
        let new_descriptor = match unsafe { self.device.allocate_descriptor_sets(&disc_alloc_info) }
        {
            Ok(i) => i,
            Err(e) => {
                unsafe { self.device.destroy_descriptor_pool(descriptor_pool, None) };
                return Err(e);
            }
        };

        let new_pool = self.add_pool_to_pools(descriptor_pool, Some(pools));

        Ok(VultenDescriptor {
            inst: self,
            descriptor: new_descriptor,
            pool: new_pool,
        })
    }

    fn allocate_new_pool(&self, buff_type: vk::DescriptorType) -> VkResult<DescriptorPool> {
        let pool_size = [vk::DescriptorPoolSize::default()
            .descriptor_count(POOL_SIZE * MAX_BINDINGS)
            .ty(buff_type)];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(POOL_SIZE)
            .pool_sizes(&pool_size)
            .flags(DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);

        log_mem!("Allocating descriptor pool of {} sets", POOL_SIZE);
        unsafe { self.device.create_descriptor_pool(&pool_info, None) }
    }

    fn add_pool_to_pools(
        &self,
        pool: DescriptorPool,
        pools_guard: Option<PoolGuard>,
    ) -> Arc<Mutex<DescriptorPool>> {
        let pools = match pools_guard {
            Some(i) => i,
            None => self.descriptor_pools.load(),
        };

        let mut pools_copy = Vec::clone(&pools);
        let new_pool = Arc::new(Mutex::new(pool));
        pools_copy.push(new_pool.clone());
        self.descriptor_pools.store(pools_copy.into());

        new_pool
    }
}
