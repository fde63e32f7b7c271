use anyhow::Context;
use vulten_bench::{
    config::{BenchConfig, MATMUL_DEFAULTS},
    init_logging,
    loader::VulkanLoader,
    matmul_bench, report,
};

fn main() -> anyhow::Result<()> {
    init_logging();

    let config = BenchConfig::from_env(MATMUL_DEFAULTS).context("invalid configuration")?;
    let mut loader = VulkanLoader::new(config.installer.as_deref());

    report::timed_run(&mut loader, &mut std::io::stdout().lock(), |entry| {
        matmul_bench::run(&config, entry)
    })
    .context("matmul benchmark failed")?;

    Ok(())
}
