//! Graph mode matmul: two all ones variables multiplied by a session run
//! repeatedly with the optimizer forced to `L0`.

use backend::{
    graph::{
        session::{Session, SessionConfig},
        Graph, OptLevel,
    },
    Entry,
};
use tracing::info;

use crate::{
    config::BenchConfig,
    error::{verify_all, BenchError},
    open_device, progress,
};

pub fn opt_level(config: &BenchConfig) -> OptLevel {
    if config.settings.opt_l1 {
        OptLevel::L1
    } else {
        OptLevel::L0
    }
}

pub fn run(config: &BenchConfig, entry: Entry) -> Result<(), BenchError> {
    let dims = [config.n, config.n];
    let mut graph = Graph::new();
    let matrix1 = graph.variable("matrix1", &dims, 1.0)?;
    let matrix2 = graph.variable("matrix2", &dims, 1.0)?;
    let product = graph.matmul(matrix1, matrix2)?;

    let inst = open_device(config, entry)?;
    let session_config = SessionConfig {
        opt_level: opt_level(config),
    };
    let mut session = Session::new(&inst, graph, session_config)?;
    info!(
        "Running matmul, n = {}, iterations = {}, {:?}",
        config.n,
        config.iterations,
        session.config().opt_level
    );
    session.init_variables()?;

    let pb = progress::iteration_bar(config.iterations, config.settings.progress, "matmul");
    for _ in 0..config.iterations {
        session.run(product)?;
        pb.inc(1);
    }
    pb.finish();
    info!("Dispatched {} ops", session.dispatched());

    if config.settings.verify {
        verify_all(&session.fetch(product)?, config.n as f32)?;
        info!("Verified {} elements", config.n * config.n);
    }

    Ok(())
}
