#![recursion_limit = "256"]

use std::path::{Path, PathBuf};

use burn::{backend::NdArray, tensor::backend::Backend};
use burn_store::{ApplyResult, ModuleSnapshot};
use clap::Parser;
use hero_depth::{
    config::{DEFAULT_CHECKPOINT_DIR, DEFAULT_MODEL},
    hub::{ModelHub, load_safetensors, missing_everywhere, save_checkpoint},
    model::DepthAnythingV2,
};

type ImportBackend = NdArray<f32>;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Convert hub safetensors weights into a Burn checkpoint"
)]
struct Args {
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(long, value_name = "PATH", default_value = DEFAULT_CHECKPOINT_DIR)]
    checkpoint_dir: PathBuf,

    /// Overrides `<checkpoint-dir>/<model>.mpk`.
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    #[arg(long, value_name = "BOOL", default_value_t = false)]
    dry_run: bool,

    #[arg(long, value_name = "PATH")]
    dump_template: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let card = ModelHub::resolve(&args.model)?;
    let output = args
        .output
        .unwrap_or_else(|| args.checkpoint_dir.join(card.checkpoint_file_name()));
    let device = <ImportBackend as Backend>::Device::default();

    if let Some(path) = &args.dump_template {
        export_template(&DepthAnythingV2::<ImportBackend>::new(&device, card.config()), path)?;
        if args.dry_run {
            return Ok(());
        }
    }

    let files = ModelHub::new()?.fetch(card)?;
    let (model, results) = load_safetensors::<ImportBackend>(card, &files, &device)?;
    for (path, result) in files.iter().zip(&results) {
        println!("{}:", path.display());
        report_result(result);
    }
    let missing = missing_everywhere(&results);
    println!("{} tensors missing from every file.", missing.len());
    for key in &missing {
        println!("Missing tensor: {key}");
    }

    if args.dry_run {
        println!("Dry run enabled; checkpoint not written.");
        return Ok(());
    }

    save_checkpoint(model, &output)?;
    println!("Saved Burn checkpoint to {}", output.display());
    Ok(())
}

fn report_result(result: &ApplyResult) {
    println!(
        "  applied {} tensors ({} skipped, {} missing, {} unused).",
        result.applied.len(),
        result.skipped.len(),
        result.missing.len(),
        result.unused.len()
    );
    for key in &result.unused {
        println!("  Unused tensor: {key}");
    }
}

fn export_template<B: Backend>(
    model: &DepthAnythingV2<B>,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut paths: Vec<String> = model
        .clone()
        .collect(None, None)
        .into_iter()
        .map(|snapshot| snapshot.full_path())
        .collect();
    paths.sort();
    std::fs::write(path, paths.join("\n"))?;
    println!("Wrote template paths to {}", path.display());
    Ok(())
}
