//! vinvite: generate a wedding invite video from a couple photo.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use vinvite_models::{DevToggles, FormValues};
use vinvite_session::{
    init_tracing, read_artwork, read_photo, Session, SessionConfig, SessionError, SessionStores,
};
use vinvite_storage::{ArtifactCache, RateLimiter};

#[derive(Parser)]
#[command(name = "vinvite", about = "Wedding invite video generator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an invite from a couple photo
    Generate {
        /// Path to the couple photo (JPEG, PNG, WebP or GIF)
        photo: PathBuf,
        #[arg(long)]
        bride: String,
        #[arg(long)]
        groom: String,
        #[arg(long, default_value = "")]
        bride_parents: String,
        #[arg(long, default_value = "")]
        groom_parents: String,
        /// Wedding date, e.g. 2025-12-01
        #[arg(long)]
        date: String,
        #[arg(long, default_value = "")]
        time: String,
        #[arg(long)]
        venue: String,
        /// Directory the invite is written to
        #[arg(long, short, default_value = ".")]
        output: PathBuf,
        /// Character artwork used instead of server generation (dev mode)
        #[arg(long)]
        local_character: Option<PathBuf>,
        #[arg(long)]
        skip_extraction: bool,
        #[arg(long)]
        skip_image_generation: bool,
        #[arg(long)]
        skip_background_removal: bool,
        #[arg(long)]
        skip_video_generation: bool,
    },
    /// Show the weekly generation quota
    Quota,
    /// Drop the cached artwork for a photo
    ClearCache {
        /// Path to the photo whose artwork should be dropped
        photo: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = SessionConfig::from_env();

    match cli.command {
        Commands::Generate {
            photo,
            bride,
            groom,
            bride_parents,
            groom_parents,
            date,
            time,
            venue,
            output,
            local_character,
            skip_extraction,
            skip_image_generation,
            skip_background_removal,
            skip_video_generation,
        } => {
            let local_character = local_character.or_else(|| config.local_character.clone());
            let mut session = Session::open(config)
                .context("Failed to create session. Set API_BASE_URL to the API origin")?;

            if let Some(path) = local_character {
                let artwork = read_artwork(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                session.set_local_character(Some(artwork));
            }

            session.proceed()?;
            session.set_form(FormValues {
                bride_name: bride,
                groom_name: groom,
                bride_parent: bride_parents,
                groom_parent: groom_parents,
                date,
                time,
                venue,
            });
            session.set_dev_toggles(DevToggles {
                skip_extraction,
                skip_image_generation,
                skip_background_removal,
                skip_video_generation,
            });
            session
                .select_photo_file(&photo)
                .await
                .with_context(|| format!("Failed to read {}", photo.display()))?;

            let cancel = session.cancel_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received interrupt, cancelling");
                    cancel.cancel();
                }
            });

            let mut progress = session.watch_progress();
            let printer = tokio::spawn(async move {
                while progress.changed().await.is_ok() {
                    let percent = *progress.borrow();
                    info!(progress = percent, "Generating");
                }
            });

            let outcome = session.submit().await;
            printer.abort();

            match outcome {
                Ok(result) => {
                    let path = result.save_to(&output).await?;
                    println!("{}", path.display());
                }
                Err(SessionError::Cancelled) => {
                    eprintln!("Cancelled");
                }
                Err(e) => {
                    let banner = session.error().unwrap_or("Generation failed").to_string();
                    return Err(anyhow::Error::new(e).context(banner));
                }
            }
        }
        Commands::Quota => {
            let stores = SessionStores::open(&config);
            let status = RateLimiter::new(stores.kv).read();
            println!(
                "{}",
                serde_json::to_string_pretty(&status).context("Serialize quota")?
            );
        }
        Commands::ClearCache { photo } => {
            let photo = read_photo(&photo).await?;
            let stores = SessionStores::open(&config);
            let cache = ArtifactCache::new(stores.kv, stores.blobs);
            cache.invalidate(&photo.content_id()).await;
            println!("Cleared cached artwork for {}", photo.content_id());
        }
    }

    Ok(())
}
