//! # Router
//!
//! Classifies questions by keyword, dispatches them to the tier that should
//! answer, and falls back once when that tier is down, failing or slow.
//!
//! ```text
//!  question ─► classify ─► primary tier ──ok──► RoutedAnswer
//!                               │
//!            running=false / error / timeout
//!                               ▼
//!                         fallback tier ──ok──► RoutedAnswer (fallback_used)
//!                               │
//!                             error
//!                               ▼
//!                      AllTiersUnavailable
//! ```
//!
//! Tier services are reached through [`TierClient`]: [`HttpTierClient`] in
//! production, [`LocalTierClient`] when tiers run in the same process.

pub mod classify;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod http;
pub mod rebuild;
pub mod stats;

pub use classify::{Classification, ClassificationRules, Complexity, KeywordRule, classify};
pub use client::{HttpTierClient, LocalTierClient, TierClient};
pub use config::{RouterConfig, TierEndpoint};
pub use dispatch::{Dispatcher, FallbackReason, RouteRequest, RoutedAnswer, RoutingInfo};
pub use error::{Result, RouterError};
pub use health::{HealthMonitor, OverallHealth, ServerStatus, SystemHealth};
pub use http::{RouterErrorBody, RouterLiveness};
pub use rebuild::{IngestOutcome, IngestRequest, RebuildStep, StepAction};
pub use stats::{ServerStats, SystemStats};
