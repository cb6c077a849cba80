#![recursion_limit = "256"]

use std::path::Path;

use hero_depth::{config::GenerateDepthConfig, pipeline};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = GenerateDepthConfig::for_root(Path::new(env!("CARGO_MANIFEST_DIR")));
    log::debug!("{config:?}");

    pipeline::run(&config)?;
    Ok(())
}
