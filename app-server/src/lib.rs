//! Settings and launch helpers behind the `strata-server` binary.

pub mod launch;
pub mod settings;

pub use launch::{run_router, run_standalone, run_tier};
pub use settings::{EmbedderSettings, Settings, TierOverrides};
