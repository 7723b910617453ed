//! ECU Session Orchestration
//!
//! Public surface for collaborators: session lifecycle operations, the
//! broadcast event stream, safety limit updates, and tuning writes.

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod config;
mod events;
mod service;

pub use config::EcuConfig;
pub use events::EcuEvent;
pub use service::{EcuService, SessionError};

/// Initialize logging
pub fn init_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}
