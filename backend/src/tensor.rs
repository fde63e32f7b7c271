use thiserror::Error;

use crate::{
    kernels::KernelInput,
    log_mem,
    memory::{MemoryError, TransferError, VultenBuffer, VultenBufferType},
    VultenDataType, VultenInstance, DT_FLOAT,
};

#[derive(Debug, Error)]
pub enum TensorError {
    #[error("tensor dims {0:?} must all be positive")]
    InvalidDims(Vec<i64>),
    #[error("tensor of {bytes} bytes exceeds the device storage buffer limit of {max} bytes")]
    TooLarge { bytes: u64, max: u64 },
    #[error("unsupported data type {0:?}")]
    DataType(VultenDataType),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Byte size of a dense tensor with `dims` of `d_type`.
pub fn dense_bytes(dims: &[i64], d_type: VultenDataType) -> Result<u64, TensorError> {
    if dims.is_empty() || dims.iter().any(|&d| d <= 0) {
        return Err(TensorError::InvalidDims(dims.to_vec()));
    }
    let elem_size = d_type.size_of().map_err(|_| TensorError::DataType(d_type))? as u64;

    dims.iter()
        .try_fold(elem_size, |acc, &d| acc.checked_mul(d as u64))
        .ok_or_else(|| TensorError::InvalidDims(dims.to_vec()))
}

/// [`dense_bytes`], checked against what one storage buffer binding can
/// address on `inst`.
pub fn tensor_bytes(
    inst: &VultenInstance,
    dims: &[i64],
    d_type: VultenDataType,
) -> Result<u64, TensorError> {
    let bytes = dense_bytes(dims, d_type)?;
    let max = inst.device_props.max_storage_buffer_range as u64;
    if bytes > max {
        return Err(TensorError::TooLarge { bytes, max });
    }

    Ok(bytes)
}

/// Dense row major tensor resident in a device local buffer.
pub struct DeviceTensor<'a> {
    inst: &'a VultenInstance,
    buff: VultenBuffer<'a>,
    dims: Vec<i64>,
    d_type: VultenDataType,
}

impl<'a> DeviceTensor<'a> {
    /// Allocates without initializing the contents.
    pub fn uninit(
        inst: &'a VultenInstance,
        dims: &[i64],
        d_type: VultenDataType,
    ) -> Result<Self, TensorError> {
        let bytes = tensor_bytes(inst, dims, d_type)?;
        let buff = inst.create_buffer(VultenBufferType::Device, bytes, true, true)?;
        log_mem!("Created tensor {:?} of {} bytes", dims, bytes);

        Ok(Self {
            inst,
            buff,
            dims: dims.to_vec(),
            d_type,
        })
    }

    /// Every element set to the 32 bit pattern `bits`.
    pub fn full(
        inst: &'a VultenInstance,
        dims: &[i64],
        d_type: VultenDataType,
        bits: u32,
    ) -> Result<Self, TensorError> {
        let tensor = Self::uninit(inst, dims, d_type)?;
        inst.fill_buffer(&tensor.buff, tensor.buff.size, 0, bits)?;

        Ok(tensor)
    }

    pub fn ones(inst: &'a VultenInstance, dims: &[i64]) -> Result<Self, TensorError> {
        Self::full(inst, dims, DT_FLOAT, 1.0f32.to_bits())
    }

    pub fn zeros(inst: &'a VultenInstance, dims: &[i64]) -> Result<Self, TensorError> {
        Self::full(inst, dims, DT_FLOAT, 0)
    }

    pub fn from_slice<T: Copy>(
        inst: &'a VultenInstance,
        dims: &[i64],
        d_type: VultenDataType,
        data: &[T],
    ) -> Result<Self, TensorError> {
        let tensor = Self::uninit(inst, dims, d_type)?;
        inst.upload_to_device_buff(data, &tensor.buff, 0)?;

        Ok(tensor)
    }

    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    pub fn d_type(&self) -> VultenDataType {
        self.d_type
    }

    pub fn num_elements(&self) -> i64 {
        self.dims.iter().product()
    }

    pub fn buffer(&self) -> &VultenBuffer<'a> {
        &self.buff
    }

    pub fn input(&self) -> KernelInput<'_> {
        KernelInput {
            buff: &self.buff,
            dims: &self.dims,
        }
    }

    pub fn to_host<T: Copy>(&self) -> Result<Vec<T>, TensorError> {
        Ok(self.inst.read_buffer(&self.buff)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{queue::VultenQueueFlags, stream::VultenStream, DT_INT32, TEST_INST};

    #[test]
    fn rejects_bad_dims() {
        assert!(matches!(
            dense_bytes(&[4, 0], DT_FLOAT),
            Err(TensorError::InvalidDims(_))
        ));
        assert!(matches!(
            dense_bytes(&[4, -2], DT_FLOAT),
            Err(TensorError::InvalidDims(_))
        ));
        assert!(matches!(
            dense_bytes(&[], DT_FLOAT),
            Err(TensorError::InvalidDims(_))
        ));
        assert!(matches!(
            dense_bytes(&[i64::MAX, 4], DT_FLOAT),
            Err(TensorError::InvalidDims(_))
        ));
        assert!(matches!(
            dense_bytes(&[4], VultenDataType::from(9)),
            Err(TensorError::DataType(_))
        ));
        assert_eq!(dense_bytes(&[3, 5], DT_FLOAT).unwrap(), 60);
        assert_eq!(dense_bytes(&[28000, 28000], DT_INT32).unwrap(), 3_136_000_000);
    }

    #[test]
    fn rejects_oversized_tensor() {
        let Some(inst) = TEST_INST.as_ref() else {
            return;
        };

        let max = inst.device_props.max_storage_buffer_range as i64;
        assert!(matches!(
            tensor_bytes(inst, &[max / 4 + 1], DT_FLOAT),
            Err(TensorError::TooLarge { .. })
        ));
        assert_eq!(tensor_bytes(inst, &[3, 5], DT_FLOAT).unwrap(), 60);
    }

    #[test]
    fn allocate_while_stream_is_open() {
        let Some(inst) = TEST_INST.as_ref() else {
            return;
        };
        if inst.num_queues_supporting(VultenQueueFlags::TRANSFER) < 2 {
            return;
        }

        let stream = VultenStream::new(inst).unwrap();
        let tensor = DeviceTensor::zeros(inst, &[4]).unwrap();
        assert_eq!(tensor.to_host::<f32>().unwrap(), vec![0.0; 4]);
        drop(stream);
    }

    #[test]
    fn ones_reads_back() {
        let Some(inst) = TEST_INST.as_ref() else {
            return;
        };

        let tensor = DeviceTensor::ones(inst, &[7, 3]).unwrap();
        assert_eq!(tensor.num_elements(), 21);
        let host: Vec<f32> = tensor.to_host().unwrap();
        assert_eq!(host, vec![1.0; 21]);
    }

    #[test]
    fn from_slice_round_trips() {
        let Some(inst) = TEST_INST.as_ref() else {
            return;
        };

        let data: Vec<i32> = (-5..5).collect();
        let tensor = DeviceTensor::from_slice(inst, &[10], DT_INT32, &data).unwrap();
        assert_eq!(tensor.to_host::<i32>().unwrap(), data);
    }
}
