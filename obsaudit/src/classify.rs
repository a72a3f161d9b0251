use std::collections::BTreeSet;

use serde::Serialize;

use crate::context::PackageContext;

/// Final partition of the audited packages, keyed by `devel_project/package`.
///
/// `fast_update` and `slow_update` split `maybe_vuln` by whether vendoring is
/// already automated. `needs_vendor_automation` only holds packages that are
/// not already reported as vulnerable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemediationSets {
    pub maybe_vuln: BTreeSet<String>,
    pub fast_update: BTreeSet<String>,
    pub slow_update: BTreeSet<String>,
    pub needs_vendor_automation: BTreeSet<String>,
}

impl RemediationSets {
    pub fn compute(maybe_vuln: BTreeSet<String>, needs_vendor: BTreeSet<String>) -> Self {
        let slow_update: BTreeSet<String> = maybe_vuln.intersection(&needs_vendor).cloned().collect();
        let fast_update = maybe_vuln.difference(&slow_update).cloned().collect();
        let needs_vendor_automation = needs_vendor.difference(&maybe_vuln).cloned().collect();

        Self {
            maybe_vuln,
            fast_update,
            slow_update,
            needs_vendor_automation,
        }
    }

    pub fn from_packages(packages: &[PackageContext]) -> Self {
        let maybe_vuln = packages
            .iter()
            .filter(|p| p.is_vulnerable())
            .map(PackageContext::qualified)
            .collect();
        let needs_vendor = packages
            .iter()
            .filter(|p| !p.manifest.has_vendor_step)
            .map(PackageContext::qualified)
            .collect();
        Self::compute(maybe_vuln, needs_vendor)
    }

    pub fn is_empty(&self) -> bool {
        self.maybe_vuln.is_empty() && self.needs_vendor_automation.is_empty()
    }
}
