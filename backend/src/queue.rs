use ash::{
    prelude::VkResult,
    vk::{self, Fence, SubmitInfo},
};
use std::sync::MutexGuard;
use thiserror::Error;

pub type VultenQueueFlags = vk::QueueFlags;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("no queue on this device supports {0:?}")]
    Unsupported(VultenQueueFlags),
}

#[derive(Debug)]
pub struct VultenQueue {
    pub queue: vk::Queue,
    pub pool: vk::CommandPool,
}

impl VultenQueue {
    pub fn new(queue: vk::Queue, pool: vk::CommandPool) -> Self {
        Self { queue, pool }
    }
}

/// Graphics and compute queues can always take transfer commands even
/// when the family does not advertise the bit.
pub fn supports(capability: VultenQueueFlags, flags: VultenQueueFlags) -> bool {
    let mut capability = capability;
    if capability.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE) {
        capability |= vk::QueueFlags::TRANSFER;
    }

    capability.contains(flags)
}

impl super::VultenInstance {
    /// Number of queues able to run work needing `flags`.
    pub fn num_queues_supporting(&self, flags: VultenQueueFlags) -> usize {
        self.queues
            .iter()
            .filter(|(capability, _)| supports(*capability, flags))
            .count()
    }

    /// Spins until a queue supporting `flags` is free and returns it locked.
    ///
    /// Capability is checked without locking, so holding another queue guard
    /// on this thread is fine as long as a second capable queue exists. When
    /// every capable queue is held by the caller (for example a live
    /// [`VultenStream`](crate::stream::VultenStream) on a device with a
    /// single queue) this never returns.
    pub fn get_queue(
        &self,
        flags: VultenQueueFlags,
    ) -> Result<MutexGuard<'_, VultenQueue>, QueueError> {
        if self.num_queues_supporting(flags) == 0 {
            return Err(QueueError::Unsupported(flags));
        }

        loop {
            for (capability, q) in self.queues.iter() {
                if !supports(*capability, flags) {
                    continue;
                }
                if let Ok(i) = q.try_lock() {
                    return Ok(i);
                }
            }
            std::hint::spin_loop();
        }
    }

    pub fn submit_queue(
        &self,
        queue: &MutexGuard<VultenQueue>,
        sub_info: &[SubmitInfo],
        fence: Fence,
    ) -> VkResult<()> {
        unsafe { self.device.queue_submit(queue.queue, sub_info, fence) }
    }

    pub fn wait_queue_idle(&self, queue: &MutexGuard<VultenQueue>) -> VkResult<()> {
        unsafe { self.device.queue_wait_idle(queue.queue) }
    }
}
