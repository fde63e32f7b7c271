use std::collections::VecDeque;
use std::sync::{Arc, MutexGuard};

use ash::vk::{CommandBuffer, Fence, QueueFlags, SubmitInfo};

use crate::{
    cmd_buff::CommandBufferBuilder,
    descriptor::VultenDescriptor,
    kernels::{
        binary::{BinaryKernel, BinaryOp},
        matmul::MatMulKernel,
        KernelError, KernelInput,
    },
    log_ops,
    pipeline::VultenPipeline,
    queue::VultenQueue,
    VultenDataType, VultenInstance,
};

/// Submissions allowed in flight before the oldest is waited on.
pub const MAX_IN_FLIGHT: usize = 256;

struct InFlight<'a> {
    cmd_buffs: Vec<CommandBuffer>,
    fence: Fence,
    _descriptors: Vec<VultenDescriptor<'a>>,
}

/// Eager execution on one compute queue.
///
/// Every op is recorded and submitted immediately without waiting on the
/// host. Work only becomes observable after [`VultenStream::synchronize`].
/// The stream keeps its queue locked until it is dropped, so other users
/// of the same queue block until then.
pub struct VultenStream<'a> {
    inst: &'a VultenInstance,
    queue: MutexGuard<'a, VultenQueue>,
    in_flight: VecDeque<InFlight<'a>>,
}

impl<'a> VultenStream<'a> {
    pub fn new(inst: &'a VultenInstance) -> Result<Self, KernelError> {
        let queue = inst.get_queue(QueueFlags::COMPUTE)?;
        log_ops!("Opened stream on queue {:?}", queue.queue);

        Ok(Self {
            inst,
            queue,
            in_flight: VecDeque::new(),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Queue `output = a <op> b`.
    pub fn binary(
        &mut self,
        op: BinaryOp,
        d_type: VultenDataType,
        a: KernelInput<'a>,
        b: KernelInput<'a>,
        output: KernelInput<'a>,
    ) -> Result<(), KernelError> {
        let mut kernel = BinaryKernel::new(self.inst, d_type, op)
            .a(a)?
            .b(b)?
            .output(output)?;
        let pipeline = kernel.get_pipeline()?;
        let descriptors = kernel.get_descriptors(pipeline.clone())?;

        self.submit(pipeline, descriptors, |builder, pipeline, descriptors| {
            kernel.record(builder, pipeline, descriptors)
        })
    }

    /// Queue `output = a x b`.
    pub fn matmul(
        &mut self,
        d_type: VultenDataType,
        a: KernelInput<'a>,
        b: KernelInput<'a>,
        output: KernelInput<'a>,
    ) -> Result<(), KernelError> {
        let mut kernel = MatMulKernel::new(self.inst, d_type)
            .a(a)?
            .b(b)?
            .output(output)?;
        let pipeline = kernel.get_pipeline()?;
        let descriptors = kernel.get_descriptors(pipeline.clone())?;

        self.submit(pipeline, descriptors, |builder, pipeline, descriptors| {
            kernel.record(builder, pipeline, descriptors)
        })
    }

    fn submit<F>(
        &mut self,
        pipeline: Arc<VultenPipeline>,
        descriptors: Vec<VultenDescriptor<'a>>,
        record: F,
    ) -> Result<(), KernelError>
    where
        F: for<'b> FnOnce(
            CommandBufferBuilder<'b>,
            Arc<VultenPipeline>,
            &[VultenDescriptor],
        ) -> Result<CommandBufferBuilder<'b>, KernelError>,
    {
        if self.in_flight.len() >= MAX_IN_FLIGHT {
            self.retire_oldest()?;
        }

        let cmd_buffs = self.inst.create_cmd_buffers(1, &self.queue)?;
        let fence = match self.inst.create_fence() {
            Ok(fence) => fence,
            Err(e) => {
                self.inst.free_cmd_buffers(&self.queue, cmd_buffs);
                return Err(e.into());
            }
        };

        let submitted = (|| -> Result<(), KernelError> {
            // Order against earlier submissions on this queue.
            let builder = CommandBufferBuilder::new(cmd_buffs[0], &self.inst.device)
                .begin()?
                .compute_barrier();
            record(builder, pipeline, &descriptors)?
                .end()?
                .build()
                .map_err(KernelError::Record)?;

            let sub_info = SubmitInfo::default().command_buffers(&cmd_buffs);
            Ok(self.inst.submit_queue(&self.queue, &[sub_info], fence)?)
        })();

        if let Err(e) = submitted {
            self.inst.destroy_fence(fence);
            self.inst.free_cmd_buffers(&self.queue, cmd_buffs);
            return Err(e);
        }

        self.in_flight.push_back(InFlight {
            cmd_buffs,
            fence,
            _descriptors: descriptors,
        });
        Ok(())
    }

    fn retire_oldest(&mut self) -> Result<(), KernelError> {
        if let Some(work) = self.in_flight.pop_front() {
            let waited = self.inst.wait_for_fences(&[work.fence], true);
            self.release(work);
            waited?;
        }
        Ok(())
    }

    fn release(&self, work: InFlight<'a>) {
        self.inst.destroy_fence(work.fence);
        self.inst.free_cmd_buffers(&self.queue, work.cmd_buffs);
    }

    /// Blocks until every op queued on this stream has finished, then
    /// releases the resources held for them.
    pub fn synchronize(&mut self) -> Result<(), KernelError> {
        log_ops!("Synchronizing stream with {} ops in flight", self.in_flight.len());
        let waited = self.inst.wait_queue_idle(&self.queue);

        // After a failed wait the device is lost and nothing is pending anymore.
        while let Some(work) = self.in_flight.pop_front() {
            self.release(work);
        }

        Ok(waited?)
    }
}

impl Drop for VultenStream<'_> {
    fn drop(&mut self) {
        if !self.in_flight.is_empty() {
            let _ = self.synchronize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tensor::DeviceTensor, DT_FLOAT, TEST_INST};

    #[test]
    fn repeated_adds_then_sync() {
        let Some(inst) = TEST_INST.as_ref() else {
            return;
        };

        let x = DeviceTensor::ones(inst, &[4, 4]).unwrap();
        let y = DeviceTensor::ones(inst, &[4, 4]).unwrap();
        let z = DeviceTensor::zeros(inst, &[4, 4]).unwrap();

        {
            let mut stream = VultenStream::new(inst).unwrap();
            for _ in 0..5 {
                stream
                    .binary(BinaryOp::Add, DT_FLOAT, x.input(), y.input(), z.input())
                    .unwrap();
            }
            assert_eq!(stream.in_flight(), 5);
            stream.synchronize().unwrap();
            assert_eq!(stream.in_flight(), 0);
        }

        let out: Vec<f32> = z.to_host().unwrap();
        assert!(out.iter().all(|&v| v == 2.0));
    }

    #[test]
    fn in_flight_is_bounded() {
        let Some(inst) = TEST_INST.as_ref() else {
            return;
        };

        let x = DeviceTensor::ones(inst, &[8]).unwrap();
        let z = DeviceTensor::zeros(inst, &[8]).unwrap();

        let mut stream = VultenStream::new(inst).unwrap();
        for _ in 0..MAX_IN_FLIGHT + 3 {
            stream
                .binary(BinaryOp::Mul, DT_FLOAT, x.input(), x.input(), z.input())
                .unwrap();
        }
        assert!(stream.in_flight() <= MAX_IN_FLIGHT);
        stream.synchronize().unwrap();
    }

    #[test]
    fn dependent_ops_are_ordered() {
        let Some(inst) = TEST_INST.as_ref() else {
            return;
        };

        let x = DeviceTensor::ones(inst, &[3, 3]).unwrap();
        let y = DeviceTensor::ones(inst, &[3, 3]).unwrap();
        let product = DeviceTensor::zeros(inst, &[3, 3]).unwrap();
        let sum = DeviceTensor::zeros(inst, &[3, 3]).unwrap();

        {
            let mut stream = VultenStream::new(inst).unwrap();
            stream
                .matmul(DT_FLOAT, x.input(), y.input(), product.input())
                .unwrap();
            stream
                .binary(BinaryOp::Add, DT_FLOAT, product.input(), x.input(), sum.input())
                .unwrap();
            stream.synchronize().unwrap();
        }

        let out: Vec<f32> = sum.to_host().unwrap();
        assert!(out.iter().all(|&v| v == 4.0));
    }
}
