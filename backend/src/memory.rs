use ash::vk::{self, Buffer, BufferUsageFlags, DeviceSize};
use std::ffi::c_void;
use thiserror::Error;
use vk_mem::{Alloc, Allocation, AllocationCreateFlags, Allocator};

use crate::log_mem;
use crate::queue::{QueueError, VultenQueueFlags};

pub type VultenCpyInfo = vk::BufferCopy;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("buffer is not host visible")]
    NotMappable,
    #[error("buffers must have a non zero size")]
    ZeroSize,
    #[error("failed to allocate {size} bytes: {result}")]
    Allocation { size: DeviceSize, result: vk::Result },
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer of {len} bytes at offset {offset} does not fit in a {size} byte buffer")]
    SizeMisMatch {
        len: DeviceSize,
        offset: DeviceSize,
        size: DeviceSize,
    },
    #[error("buffer is not a device buffer")]
    NonDeviceBuffer,
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("transfer failed: {0}")]
    Vk(#[from] vk::Result),
}

#[derive(Debug, PartialEq, Clone)]
pub enum VultenBufferType {
    Device,
    Host,
    Staging,
}

pub struct VultenBuffer<'a> {
    pub buff_type: VultenBufferType,
    pub vk_buffer: Buffer,
    pub allocation: Allocation,
    pub size: DeviceSize,
    pub allocator: &'a Allocator,
}

impl Drop for VultenBuffer<'_> {
    fn drop(&mut self) {
        log_mem!("Freeing {:?} buffer of {} bytes", self.buff_type, self.size);
        unsafe {
            self.allocator
                .destroy_buffer(self.vk_buffer, &mut self.allocation)
        };
    }
}

impl VultenBuffer<'_> {
    pub fn get_mapped_ptr(&self) -> Result<*mut c_void, MemoryError> {
        match self.buff_type {
            VultenBufferType::Host | VultenBufferType::Staging => Ok(self
                .allocator
                .get_allocation_info(&self.allocation)
                .mapped_data),
            _ => Err(MemoryError::NotMappable),
        }
    }

    pub fn get_descriptor_info(&self) -> [vk::DescriptorBufferInfo; 1] {
        [vk::DescriptorBufferInfo::default()
            .buffer(self.vk_buffer)
            .range(self.size)
            .offset(0)]
    }
}

impl super::VultenInstance {
    /// Free and total bytes of the first device local heap, when the
    /// allocator can report budgets.
    pub fn get_mem_stats(&self) -> Option<(u64, u64)> {
        let budgets = self.allocator.get_heap_budgets().ok()?;
        let mem_props = unsafe { self.allocator.get_memory_properties() };
        (0..mem_props.memory_heap_count as usize)
            .find(|&i| {
                mem_props.memory_heaps[i]
                    .flags
                    .contains(vk::MemoryHeapFlags::DEVICE_LOCAL)
            })
            .map(|i| {
                (
                    budgets[i].budget.saturating_sub(budgets[i].usage),
                    budgets[i].budget,
                )
            })
    }

    pub fn create_buffer(
        &self,
        buff_type: VultenBufferType,
        size: DeviceSize,
        transfer_src: bool,
        transfer_dst: bool,
    ) -> Result<VultenBuffer<'_>, MemoryError> {
        if size == 0 {
            return Err(MemoryError::ZeroSize);
        }

        let mut create_flags = AllocationCreateFlags::empty();
        match buff_type {
            VultenBufferType::Host => {
                create_flags |=
                    AllocationCreateFlags::MAPPED | AllocationCreateFlags::HOST_ACCESS_RANDOM
            }
            VultenBufferType::Staging => {
                create_flags |= AllocationCreateFlags::MAPPED
                    | AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE
            }
            _ => (),
        }

        let create_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::Auto,
            flags: create_flags,
            ..Default::default()
        };

        let mut usage = BufferUsageFlags::STORAGE_BUFFER;
        if transfer_src {
            usage |= BufferUsageFlags::TRANSFER_SRC;
        }
        if transfer_dst {
            usage |= BufferUsageFlags::TRANSFER_DST;
        }

        let (buffer, allocation) = unsafe {
            self.allocator.create_buffer(
                &ash::vk::BufferCreateInfo::default().size(size).usage(usage),
                &create_info,
            )
        }
        .map_err(|result| MemoryError::Allocation { size, result })?;

        log_mem!("Allocated {:?} buffer of {} bytes", buff_type, size);

        Ok(VultenBuffer {
            buff_type,
            vk_buffer: buffer,
            allocation,
            size,
            allocator: &self.allocator,
        })
    }

    /// Upload a host slice to a device buffer.
    /// # Arguments
    ///
    /// * 'data' - slice of data to upload.
    /// * 'device_buff' - buffer of type Device to upload to.
    /// * 'offset' - offset in bytes into the 'device_buff' to copy into.
    ///
    /// # Considerations
    /// This blocks on the compleation of the transfer.
    pub fn upload_to_device_buff<T: Copy>(
        &self,
        data: &[T],
        device_buff: &VultenBuffer,
        offset: DeviceSize,
    ) -> Result<(), TransferError> {
        if device_buff.buff_type != VultenBufferType::Device {
            return Err(TransferError::NonDeviceBuffer);
        }

        let buffer_size = core::mem::size_of_val(data) as u64;
        if buffer_size + offset > device_buff.size {
            return Err(TransferError::SizeMisMatch {
                len: buffer_size,
                offset,
                size: device_buff.size,
            });
        }

        let staging = self.create_buffer(VultenBufferType::Staging, buffer_size, true, false)?;
        let staging_ptr = staging.get_mapped_ptr()? as *mut u8;
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr() as *const u8,
                staging_ptr,
                buffer_size as usize,
            )
        };

        let cpy_info = vk::BufferCopy::default()
            .size(buffer_size)
            .dst_offset(offset);
        self.blocking_cpy(staging.vk_buffer, device_buff.vk_buffer, cpy_info)
    }

    pub fn blocking_cpy(
        &self,
        src: vk::Buffer,
        dst: vk::Buffer,
        cpy_info: VultenCpyInfo,
    ) -> Result<(), TransferError> {
        let q = self.get_queue(VultenQueueFlags::TRANSFER)?;

        let cmd_buff = self.create_cmd_buffers(1, &q)?;

        let recorded = super::cmd_buff::CommandBufferBuilder::new(cmd_buff[0], &self.device)
            .begin()
            .and_then(|b| b.copy_buffer(src, dst, cpy_info).end());

        let submitted = recorded.and_then(|_| {
            let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_buff);
            self.submit_queue(&q, &[submit_info], vk::Fence::null())?;
            self.wait_queue_idle(&q)
        });

        self.free_cmd_buffers(&q, cmd_buff);
        Ok(submitted?)
    }

    /// Fill `size` bytes of `buff` starting at `offset` with the repeated
    /// 32 bit pattern `data`. Blocks until the fill is done.
    pub fn fill_buffer(
        &self,
        buff: &VultenBuffer,
        size: u64,
        offset: u64,
        data: u32,
    ) -> Result<(), TransferError> {
        if size + offset > buff.size {
            return Err(TransferError::SizeMisMatch {
                len: size,
                offset,
                size: buff.size,
            });
        }

        let q = self.get_queue(VultenQueueFlags::TRANSFER)?;
        let cmd_buff = self.create_cmd_buffers(1, &q)?;

        let recorded = super::cmd_buff::CommandBufferBuilder::new(cmd_buff[0], &self.device)
            .begin()
            .and_then(|b| b.fill_buffer(buff.vk_buffer, offset, size, data).end());

        let submitted = recorded.and_then(|_| {
            let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_buff);
            self.submit_queue(&q, &[submit_info], vk::Fence::null())?;
            self.wait_queue_idle(&q)
        });

        self.free_cmd_buffers(&q, cmd_buff);
        Ok(submitted?)
    }

    /// Copy the whole of `buff` back to the host.
    pub fn read_buffer<T: Copy>(&self, buff: &VultenBuffer) -> Result<Vec<T>, TransferError> {
        let num_vals = (buff.size / size_of::<T>() as u64) as usize;
        if num_vals < 1 {
            return Err(TransferError::SizeMisMatch {
                len: size_of::<T>() as u64,
                offset: 0,
                size: buff.size,
            });
        }

        let read_from = |host_buff: &VultenBuffer| -> Result<Vec<T>, TransferError> {
            let slice: &[T] = unsafe {
                std::slice::from_raw_parts(host_buff.get_mapped_ptr()? as *const T, num_vals)
            };
            Ok(slice.to_vec())
        };

        if buff.buff_type == VultenBufferType::Host {
            return read_from(buff);
        }

        let host_buff = self.create_buffer(VultenBufferType::Host, buff.size, false, true)?;
        let cpy_info = VultenCpyInfo::default()
            .size(buff.size)
            .src_offset(0)
            .dst_offset(0);
        self.blocking_cpy(buff.vk_buffer, host_buff.vk_buffer, cpy_info)?;

        read_from(&host_buff)
    }
}
