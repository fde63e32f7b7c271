use anyhow::Context;
use vulten_bench::{
    add_bench,
    config::{BenchConfig, ADD_DEFAULTS},
    init_logging,
    loader::VulkanLoader,
    report,
};

fn main() -> anyhow::Result<()> {
    init_logging();

    let config = BenchConfig::from_env(ADD_DEFAULTS).context("invalid configuration")?;
    let mut loader = VulkanLoader::new(config.installer.as_deref());

    report::timed_run(&mut loader, &mut std::io::stdout().lock(), |entry| {
        add_bench::run(&config, entry)
    })
    .context("add benchmark failed")?;

    Ok(())
}
