use std::collections::{BTreeSet, HashSet};

use anyhow::Result;
use tracing::{debug, instrument};

use crate::config::{AuditConfig, DuplicatePolicy};
use crate::osc::OscClient;

/// Filter a raw `whatdependson` listing down to auditable package names.
///
/// The first line names the queried component and is dropped. Multibuild
/// flavors (`name:flavor`) and excluded names are removed.
pub fn filter_dependents(
    raw: &str,
    exclude: &BTreeSet<String>,
    duplicates: DuplicatePolicy,
) -> Vec<String> {
    let names = raw
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter(|name| !name.contains(':'))
        .filter(|name| !exclude.contains(*name))
        .map(String::from)
        .collect();

    apply_duplicate_policy(names, duplicates)
}

pub fn apply_duplicate_policy(names: Vec<String>, duplicates: DuplicatePolicy) -> Vec<String> {
    match duplicates {
        DuplicatePolicy::Keep => names,
        DuplicatePolicy::Dedupe => {
            let mut seen = HashSet::new();
            names
                .into_iter()
                .filter(|name| seen.insert(name.clone()))
                .collect()
        }
    }
}

#[instrument(skip_all, fields(component = %config.component, project = %config.project))]
pub async fn list_dependents(osc: &OscClient, config: &AuditConfig) -> Result<Vec<String>> {
    let raw = osc
        .what_depends_on(
            &config.project,
            &config.component,
            &config.repository,
            &config.arch,
        )
        .await?;
    let packages = filter_dependents(&raw, &config.exclude, config.duplicates);
    debug!(count = packages.len(), "dependents listed");
    Ok(packages)
}
