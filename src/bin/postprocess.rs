use clap::{ArgGroup, Parser};
use std::error::Error;
use std::path::PathBuf;

use ortho_hotspots::PipelineConfig;
use ortho_hotspots::pipeline::{job_folder, postprocess};

#[derive(Parser, Debug)]
#[command(
    name = "hotspot_postprocess",
    about = "Merge patch detections into the mosaic, geocode and save them",
    version,
    group(
        ArgGroup::new("target")
            .required(true)
            .args(["orthophoto", "job"])
    )
)]
struct Cli {
    /// Orthophoto whose folder holds the patches and metadata
    #[arg(short = 'o', long = "orthophoto")]
    orthophoto: Option<PathBuf>,

    /// Job id; the orthophoto is <root>/<job>/odm_orthophoto/odm_orthophoto.tif
    #[arg(short = 'j', long = "job", requires = "root")]
    job: Option<String>,

    /// Root folder of all jobs
    #[arg(short = 'r', long = "root")]
    root: Option<PathBuf>,

    /// JSON config file overriding the defaults
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };

    let orthophoto = match (&cli.orthophoto, &cli.job, &cli.root) {
        (Some(path), _, _) => path.clone(),
        (None, Some(job), Some(root)) => job_folder(root, job, &config)?.join(&config.orthophoto_file),
        _ => return Err("either --orthophoto or --job with --root is required".into()),
    };
    if !orthophoto.is_file() {
        return Err(format!("Not a file: {}", orthophoto.display()).into());
    }

    let anomalies = postprocess(&orthophoto, &config)?;

    match &cli.job {
        Some(job) => println!("{job}"),
        None => println!("{}", anomalies.len()),
    }
    Ok(())
}
