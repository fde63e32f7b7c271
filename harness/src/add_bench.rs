//! Eager elementwise add: `z = x + y` repeated on one stream, then a single
//! device wide synchronization.

use backend::{
    kernels::binary::BinaryOp, stream::VultenStream, tensor::DeviceTensor, Entry, DT_FLOAT,
};
use tracing::info;

use crate::{
    config::BenchConfig,
    error::{verify_all, BenchError},
    open_device, progress,
};

pub fn run(config: &BenchConfig, entry: Entry) -> Result<(), BenchError> {
    let inst = open_device(config, entry)?;
    info!("Running add, n = {}, iterations = {}", config.n, config.iterations);

    let dims = [config.n, config.n];
    let x = DeviceTensor::ones(&inst, &dims)?;
    let y = DeviceTensor::ones(&inst, &dims)?;
    let z = DeviceTensor::uninit(&inst, &dims, DT_FLOAT)?;

    let pb = progress::iteration_bar(config.iterations, config.settings.progress, "add");
    {
        let mut stream = VultenStream::new(&inst)?;
        for _ in 0..config.iterations {
            stream.binary(BinaryOp::Add, z.d_type(), x.input(), y.input(), z.input())?;
            pb.inc(1);
        }
        stream.synchronize()?;
    }
    pb.finish();

    if config.settings.verify {
        verify_all(&z.to_host::<f32>()?, BinaryOp::Add.apply(1.0, 1.0))?;
        info!("Verified {} elements of {:?}", z.num_elements(), z.dims());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::InstanceError;

    use crate::{
        config::ADD_DEFAULTS,
        test_utills::{skip_without_device, small_config, test_entry},
    };

    fn run_or_skip(config: &BenchConfig) {
        let Some(entry) = test_entry() else {
            return;
        };
        skip_without_device(run(config, entry));
    }

    #[test]
    fn small_add_passes() {
        run_or_skip(&small_config(4, 5));
    }

    #[test]
    fn single_iteration() {
        run_or_skip(&small_config(10, 1));
    }

    #[test]
    fn missing_device_index_fails() {
        let Some(entry) = test_entry() else {
            return;
        };
        let mut config = small_config(4, 1);
        config.device = usize::MAX;

        match run(&config, entry) {
            Err(BenchError::Instance(InstanceError::DeviceIndex { index, .. })) => {
                assert_eq!(index, usize::MAX)
            }
            Err(BenchError::Instance(
                InstanceError::NoDevice | InstanceError::CreateInstance(_),
            )) => (),
            other => panic!("expected a device index error, got {other:?}"),
        }
    }

    #[test]
    fn defaults_are_unchanged() {
        assert_eq!((ADD_DEFAULTS.n, ADD_DEFAULTS.iterations), (28000, 4000));
    }
}
