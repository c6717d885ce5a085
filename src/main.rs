//! Command line entry point for the image generation orchestrator

use artgen_orchestrator::{
    config::Settings,
    response::file::FileHandler,
    session::next_event,
    GenerationRequest, GenerationSession, Seed, SessionEvent, StyleSelection,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "artgen", about = "Generate images through built-in or custom providers")]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "config/default.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate one or more images
    Generate {
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        negative: Option<String>,
        #[arg(long)]
        place: Option<String>,
        #[arg(long)]
        style: Option<String>,
        #[arg(long, default_value = "flux")]
        model: String,
        #[arg(long, default_value_t = 1024)]
        width: u32,
        #[arg(long, default_value_t = 1024)]
        height: u32,
        /// Number or "random"
        #[arg(long, default_value = "random")]
        seed: String,
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// Output directory, defaults to storage.output_dir
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List selectable models
    Models,
}

fn init_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    if settings.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

fn parse_seed(raw: &str) -> anyhow::Result<Seed> {
    if raw.eq_ignore_ascii_case("random") {
        return Ok(Seed::Random);
    }
    Ok(Seed::Fixed(raw.parse()?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = Settings::load_from_path(&cli.config)?;
    init_logging(&settings);

    let session = GenerationSession::new(&settings)?;

    match cli.command {
        Command::Models => {
            for model in session.registry().list() {
                println!("{:<24} {:<12} {}", model.id, model.family, model.display_name);
            }
        }
        Command::Generate {
            prompt,
            negative,
            place,
            style,
            model,
            width,
            height,
            seed,
            count,
            out,
        } => {
            let mut request = GenerationRequest::new(prompt, model);
            request.negative_prompt = negative;
            request.place = place;
            request.style = style.map(StyleSelection::named).unwrap_or_default();
            request.width = width;
            request.height = height;
            request.seed = parse_seed(&seed)?;
            request.count = count;

            let mut events = session.subscribe();
            let logger = tokio::spawn(async move {
                while let Some(event) = next_event(&mut events).await {
                    match event {
                        SessionEvent::PromptTruncated { steps } => {
                            warn!(?steps, "Prompt was shortened to fit the provider limit")
                        }
                        SessionEvent::ImageReady { index, image } => {
                            info!(index, id = %image.id, "Image ready")
                        }
                        SessionEvent::ImageFailed { index, message, .. } => {
                            warn!(index, %message, "Image failed")
                        }
                        SessionEvent::Rejected { message } => {
                            error!(%message, "Request rejected");
                            break;
                        }
                        SessionEvent::SaveFailed { image_id, message } => {
                            warn!(%image_id, %message, "Save failed")
                        }
                        SessionEvent::BatchFinished { .. } => break,
                    }
                }
            });

            let result = session.generate(request).await;
            let _ = logger.await;
            let report = result?;

            let out_dir = out.unwrap_or_else(|| PathBuf::from(&settings.storage.output_dir));
            let files = FileHandler::new(out_dir);
            for image in &report.images {
                if let Some(blob) = session.image_data(&image.id) {
                    let path = files.save(&image.id, &blob).await?;
                    println!("{}", path.display());
                }
            }

            info!(
                status = ?report.status,
                succeeded = report.images.len(),
                failed = report.failures.len(),
                "Generation finished"
            );
            session.teardown();
        }
    }

    Ok(())
}
