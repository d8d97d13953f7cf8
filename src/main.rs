// Example runner for the `raster_diff` library: compares two rasterized
// documents from disk, prints the difference regions, and optionally writes
// the JSON sidecar. The real consumer of the library is a GUI viewer; this
// binary exists to exercise the engine end to end from a shell.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use raster_diff::pipeline::{CancelToken, ComparisonOutcome, ComparisonPipeline, PipelineConfig};
use raster_diff::{DiffError, PixelBuffer, sidecar};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let mut args = std::env::args_os().skip(1);
    let (Some(left_path), Some(right_path)) = (args.next(), args.next()) else {
        eprintln!("usage: raster_diff <left.png> <right.png> [sidecar.json]");
        return ExitCode::from(2);
    };
    let left_path = PathBuf::from(left_path);
    let right_path = PathBuf::from(right_path);
    let sidecar_path = args.next().map(PathBuf::from);

    match run(&left_path, &right_path, sidecar_path.as_deref()).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    left_path: &std::path::Path,
    right_path: &std::path::Path,
    sidecar_path: Option<&std::path::Path>,
) -> Result<ExitCode, DiffError> {
    let left = load(left_path)?;
    let right = load(right_path)?;

    let pipeline = ComparisonPipeline::new(PipelineConfig::default());
    let outcome = pipeline
        .compare(&left, &right, &CancelToken::new(), None)
        .await?;

    let code = match outcome {
        ComparisonOutcome::NoDifferences => {
            println!("documents are pixel-identical");
            ExitCode::SUCCESS
        }
        ComparisonOutcome::Differences(result) => {
            println!("{} difference region(s):", result.rectangles.len());
            for rect in &result.rectangles {
                println!("  {}x{} at ({}, {})", rect.w, rect.h, rect.x, rect.y);
            }
            if let Some(path) = sidecar_path {
                sidecar::save(path, &result.rectangles)?;
                println!("sidecar written to {}", path.display());
            }
            ExitCode::FAILURE
        }
        ComparisonOutcome::Cancelled => {
            println!("comparison cancelled");
            ExitCode::FAILURE
        }
    };
    pipeline.shutdown().await;
    Ok(code)
}

fn load(path: &std::path::Path) -> Result<Arc<PixelBuffer>, DiffError> {
    let image = image::open(path)
        .map_err(|error| DiffError::Format(format!("cannot open {}: {error}", path.display())))?;
    Ok(Arc::new(PixelBuffer::from_image(&image)?))
}
