use std::path::PathBuf;

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

/// Audit OBS packages that depend on rust for RustSec advisories and missing
/// cargo_vendor/cargo_audit automation
#[derive(Parser)]
#[command(name = "obsaudit", version)]
pub struct Cli {
    /// OBS API endpoint
    #[arg(short, long, env = "OBSAUDIT_API")]
    pub api: Option<String>,

    /// Project whose packages are audited
    #[arg(short, long)]
    pub repo: Option<String>,

    /// Reuse existing working copies; no update, checkout or service run
    #[arg(long)]
    pub assume_setup: bool,

    /// Only report packages affected by this RustSec advisory
    #[arg(long, value_name = "ID")]
    pub rustsec_id: Option<String>,

    /// Audit these packages instead of everything depending on rust
    #[arg(long, value_name = "PACKAGE", num_args = 1..)]
    pub package: Option<Vec<String>>,

    /// YAML configuration file
    #[arg(short, long, env = "OBSAUDIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the project checkouts
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Packages processed in parallel
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// JSON report on stdout and JSON log lines on stderr
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,
}
