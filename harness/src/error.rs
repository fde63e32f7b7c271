use backend::{
    graph::{session::SessionError, GraphError},
    kernels::KernelError,
    tensor::TensorError,
    InstanceError,
};
use thiserror::Error;

use crate::{bootstrap::BootstrapError, config::ConfigError};

#[derive(Debug, Error)]
pub enum BenchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error("failed to open device: {0}")]
    Instance(#[from] InstanceError),
    #[error("failed to allocate operand: {0}")]
    Tensor(#[from] TensorError),
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("failed to write report: {0}")]
    Report(#[from] std::io::Error),
    #[error("result mismatch at element {index}: expected {expected}, got {actual}")]
    VerifyMismatch {
        index: usize,
        expected: f32,
        actual: f32,
    },
}

/// Every element of `values` must equal `expected` exactly.
pub fn verify_all(values: &[f32], expected: f32) -> Result<(), BenchError> {
    match values.iter().position(|&v| v != expected) {
        Some(index) => Err(BenchError::VerifyMismatch {
            index,
            expected,
            actual: values[index],
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_reports_first_mismatch() {
        assert!(verify_all(&[2.0; 8], 2.0).is_ok());

        let err = verify_all(&[2.0, 2.0, 3.0, 1.0], 2.0).unwrap_err();
        assert!(matches!(
            err,
            BenchError::VerifyMismatch {
                index: 2,
                actual,
                ..
            } if actual == 3.0
        ));
    }
}
