// DPOY dataset builder entry point.
//
// Startup sequence:
// 1. Initialize tracing (stderr, filtered by RUST_LOG)
// 2. Load config, copying missing files from defaults/
// 3. Load every source CSV
// 4. Run the pipeline
// 5. Write the merged table

use std::path::Path;

use anyhow::Context;
use tracing::info;

use dpoy_core::config;
use dpoy_core::pipeline;
use dpoy_core::sources;

fn main() -> anyhow::Result<()> {
    init_tracing()?;
    info!("DPOY dataset builder starting up");

    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: {} sources, {} ranked metrics",
        config.data_paths.len(),
        config.ranking.metrics().len()
    );

    let tables = sources::load_all(&config.data_paths).context("failed to load source data")?;

    let merged = pipeline::run(tables, &config).context("failed to build the merged dataset")?;

    let output = Path::new(&config.output.path);
    merged
        .write_csv_path(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!(
        "Wrote {} rows x {} columns to {}",
        merged.len(),
        merged.width(),
        output.display()
    );

    Ok(())
}

/// Log to stderr; stdout stays free for anything piped out of the run.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("dpoy_core=info,dpoy=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
