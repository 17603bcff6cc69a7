use clap::{ArgGroup, Parser};
use std::error::Error;
use std::path::PathBuf;

use ortho_hotspots::PipelineConfig;
use ortho_hotspots::pipeline::{job_folder, preprocess};

#[derive(Parser, Debug)]
#[command(
    name = "hotspot_preprocess",
    about = "Cut every orthophoto of a folder into fixed-size patches",
    version,
    group(
        ArgGroup::new("target")
            .required(true)
            .args(["dir", "job"])
    )
)]
struct Cli {
    /// Folder containing the orthophotos
    #[arg(short = 'd', long = "dir")]
    dir: Option<PathBuf>,

    /// Job id; the folder is <root>/<job>/odm_orthophoto
    #[arg(short = 'j', long = "job", requires = "root")]
    job: Option<String>,

    /// Root folder of all jobs
    #[arg(short = 'r', long = "root")]
    root: Option<PathBuf>,

    /// JSON config file overriding the defaults
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Patch width in pixels
    #[arg(long = "patch-width")]
    patch_width: Option<u32>,

    /// Patch height in pixels
    #[arg(long = "patch-height")]
    patch_height: Option<u32>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(w) = cli.patch_width {
        config.patch_width = w;
    }
    if let Some(h) = cli.patch_height {
        config.patch_height = h;
    }

    let folder = match (&cli.dir, &cli.job, &cli.root) {
        (Some(dir), _, _) => dir.clone(),
        (None, Some(job), Some(root)) => job_folder(root, job, &config)?,
        _ => return Err("either --dir or --job with --root is required".into()),
    };
    if !folder.is_dir() {
        return Err(format!("Not a directory: {}", folder.display()).into());
    }

    let meta = preprocess(&folder, &config)?;
    log::info!(
        "{} orthophoto(s), {} patch(es) in {}",
        meta.len(),
        meta.patch_count(),
        folder.display()
    );

    if let Some(job) = &cli.job {
        println!("{job}");
    }
    Ok(())
}
