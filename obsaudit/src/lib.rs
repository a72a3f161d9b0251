pub mod checkout;
pub mod classify;
pub mod command;
pub mod config;
pub mod context;
pub mod depends;
pub mod engine;
pub mod manifest;
pub mod osc;
pub mod output;
pub mod pipeline;
pub mod sandbox;
pub mod scan;
pub mod services;
pub mod stages;

#[cfg(test)]
mod testing;

pub use classify::RemediationSets;
pub use config::AuditConfig;
pub use context::PackageContext;
pub use engine::{ClassificationEngine, Collaborators, RunOptions};
pub use output::{formatter, OutputFormatter, RunReport};
pub use scan::ScanOutcome;
