use backend::{
    kernels::binary::BinaryOp, stream::VultenStream, tensor::DeviceTensor, VultenInstance,
    DT_FLOAT,
};
use criterion::{BenchmarkId, Criterion};
use rand::Rng;

pub fn bench(c: &mut Criterion, inst: &VultenInstance) {
    let mut group = c.benchmark_group("Add");
    group.noise_threshold(0.05);

    let mut rng = rand::thread_rng();
    for n in [64i64, 256, 1024, 4096] {
        let dims = [n, n];
        let data: Vec<f32> = (0..n * n).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let x = DeviceTensor::from_slice(inst, &dims, DT_FLOAT, &data).unwrap();
        let y = DeviceTensor::from_slice(inst, &dims, DT_FLOAT, &data).unwrap();
        let z = DeviceTensor::zeros(inst, &dims).unwrap();

        // Three f32 accesses per element
        group.throughput(criterion::Throughput::Bytes((n * n * 4 * 3) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bench, _| {
            bench.iter(|| {
                let mut stream = VultenStream::new(inst).unwrap();
                stream
                    .binary(BinaryOp::Add, DT_FLOAT, x.input(), y.input(), z.input())
                    .unwrap();
                stream.synchronize().unwrap();
            })
        });
    }
}
