use anyhow::Context;
use clap::{Parser, Subcommand};
use facetag_core::{config::Config, FaceTagger};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "facetag")]
#[command(about = "Label known faces in a photo", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Read configuration from this file instead of the default locations
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize faces in the query image and write an annotated copy
    Run {
        /// Directory of reference images, one per person
        #[arg(short, long)]
        gallery: Option<PathBuf>,
        /// Query image
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Where to write the annotated image
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Maximum embedding distance for a match
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Build the gallery and list who is in it
    Gallery {
        /// Directory of reference images, one per person
        #[arg(short, long)]
        gallery: Option<PathBuf>,
    },
    /// Show configuration
    Config {
        /// Validate configuration
        #[arg(long)]
        validate: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Run {
            gallery,
            input,
            output,
            threshold,
            json,
        } => {
            let mut config = config;
            if let Some(dir) = gallery {
                config.gallery.images_dir = dir;
            }
            if let Some(path) = input {
                config.input.image_path = path;
            }
            if let Some(path) = output {
                config.output.image_path = path;
            }
            if let Some(t) = threshold {
                config.matching.threshold = t;
            }
            cmd_run(config, json)
        }
        Commands::Gallery { gallery } => {
            let mut config = config;
            if let Some(dir) = gallery {
                config.gallery.images_dir = dir;
            }
            cmd_gallery(config)
        }
        Commands::Config { validate } => cmd_config(config, validate),
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(Config::load()?),
    }
}

fn cmd_run(config: Config, json: bool) -> anyhow::Result<()> {
    let query = config.input.image_path.clone();

    let start = Instant::now();
    let mut tagger = FaceTagger::new(config)?;
    let report = tagger
        .run()
        .with_context(|| format!("Failed to tag {}", query.display()))?;
    let duration = start.elapsed();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for result in &report.results {
        let loc = &result.location;
        println!(
            "{:<20} top={} right={} bottom={} left={} distance={:.3}",
            result.label, loc.top, loc.right, loc.bottom, loc.left, result.distance
        );
    }

    println!();
    println!("Recognized faces: {}", report.summary.recognized);
    println!("Unknown faces: {}", report.summary.unknown);
    println!("Annotated image saved to: {}", report.output_path.display());
    log::debug!("Total time: {:.2}ms", duration.as_secs_f64() * 1000.0);

    Ok(())
}

fn cmd_gallery(config: Config) -> anyhow::Result<()> {
    let dir = config.gallery.images_dir.clone();
    let mut tagger = FaceTagger::new(config)?;
    let built = tagger.build_gallery()?;

    if built.gallery.is_empty() {
        println!("No usable reference faces in {}", dir.display());
    } else {
        println!("Known faces in {}:", dir.display());
        for name in built.gallery.names() {
            println!("  {}", name);
        }
    }

    if !built.skipped.is_empty() {
        println!();
        println!("Skipped:");
        for skipped in &built.skipped {
            println!("  {:<20} {}", skipped.name, skipped.reason);
        }
    }

    Ok(())
}

fn cmd_config(config: Config, validate: bool) -> anyhow::Result<()> {
    if validate {
        config.validate()?;
        println!("✓ Configuration is valid");
        return Ok(());
    }

    println!("Configuration:");
    println!();

    println!("[gallery]");
    println!("  images_dir = {:?}", config.gallery.images_dir);
    println!("  extension = {:?}", config.gallery.extension);
    println!("  multi_face = {:?}", config.gallery.multi_face);
    println!();

    println!("[input]");
    println!("  image_path = {:?}", config.input.image_path);
    println!();

    println!("[output]");
    println!("  image_path = {:?}", config.output.image_path);
    println!();

    println!("[detection]");
    println!("  model = {:?}", config.detection.model_path);
    println!(
        "  confidence_threshold = {}",
        config.detection.confidence_threshold
    );
    println!();

    println!("[embedding]");
    println!("  model = {:?}", config.embedding.model_path);
    println!();

    println!("[matching]");
    println!("  threshold = {}", config.matching.threshold);
    println!();

    println!("[annotation]");
    println!("  box_color = {:?}", config.annotation.box_color);
    println!("  text_color = {:?}", config.annotation.text_color);
    println!("  text_scale = {}", config.annotation.text_scale);

    Ok(())
}
