use std::path::PathBuf;
use std::sync::Arc;

use diffevo_gpu::fitness::Rosenbrock;
use diffevo_gpu::{CpuDevice, Device, DifferentialEvolutionOptimizer, OptimizerSettings};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // configure Rayon's global thread pool once at startup so worker threads get nice names like "rayon-0".
    let _ = rayon::ThreadPoolBuilder::new()
        .thread_name(|i| format!("rayon-{i}"))
        .build_global();

    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("settings.json"));
    let settings = OptimizerSettings::load(&path);
    let device = Arc::new(CpuDevice::with_threads(settings.device_threads)?);
    tracing::info!(settings = %path.display(), device = %device.name(), "starting optimizer");

    let mut optimizer = DifferentialEvolutionOptimizer::from_settings(device, settings, Rosenbrock::default())?;
    let result = optimizer.run()?;
    optimizer.dispose();

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
