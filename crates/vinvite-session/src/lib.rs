//! Invite session controller.
//!
//! This crate provides:
//! - The screen state machine and the generation hot path
//! - Photo and artwork intake from disk
//! - Finished invite results with download naming
//! - Session configuration and tracing setup for the `vinvite` binary

pub mod config;
pub mod controller;
pub mod error;
pub mod intake;
pub mod metrics;
pub mod result;

pub use config::SessionConfig;
pub use controller::{CancelHandle, Session, SessionStores};
pub use error::{SessionError, SessionResult};
pub use intake::{read_artwork, read_photo, sniff_media_type};
pub use result::InviteResult;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing. `LOG_FORMAT=json` selects JSON output.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            "warn,vinvite=info,vinvite_session=info,vinvite_pipeline=info,\
             vinvite_client=info,vinvite_media=info,vinvite_storage=info",
        )
    });

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}
