//! Policy listing payload for an external API layer.

use serde::{Deserialize, Serialize};

use gatelab_core::policy::{GateSpec, PolicyError, PolicyModes, PolicyRegistry};

/// One available policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyListingEntry {
    pub selector: String,
    pub resolved_source: String,
    /// `sha256:` fingerprint of the validated document.
    pub hash: String,
    pub modes: PolicyModes,
    pub gates: Vec<GateSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyListing {
    pub entries: Vec<PolicyListingEntry>,
}

/// Every policy in the registry, sorted by selector. Any invalid policy fails the listing.
///
/// Each policy is read once, so an entry's hash always describes the same
/// document as its modes and gates.
pub fn policy_listing(registry: &PolicyRegistry) -> Result<PolicyListing, PolicyError> {
    let entries = registry
        .load_all()?
        .into_iter()
        .map(|policy| PolicyListingEntry {
            selector: policy.selector().to_string(),
            resolved_source: registry.relative_source(&policy),
            hash: policy.fingerprint().to_string(),
            modes: policy.modes(),
            gates: policy.document().gates.clone(),
        })
        .collect();
    Ok(PolicyListing { entries })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::*;

    fn shipped_policies() -> (tempfile::TempDir, PolicyRegistry) {
        let shipped = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../policies");
        let dir = tempfile::tempdir().unwrap();
        for name in ["default.toml", "red_team.toml"] {
            fs::copy(shipped.join(name), dir.path().join(name)).unwrap();
        }
        let registry = PolicyRegistry::new(dir.path()).unwrap();
        (dir, registry)
    }

    #[test]
    fn entries_describe_the_document_they_hash() {
        let (_dir, registry) = shipped_policies();
        let listing = policy_listing(&registry).unwrap();

        let selectors: Vec<&str> = listing.entries.iter().map(|e| e.selector.as_str()).collect();
        assert_eq!(selectors, vec!["default", "red_team"]);
        for entry in &listing.entries {
            let policy = registry.load(&entry.selector).unwrap();
            assert_eq!(entry.hash, policy.fingerprint());
            assert_eq!(entry.gates, policy.document().gates);
            assert_eq!(entry.modes, policy.modes());
        }
        assert_eq!(listing.entries[0].resolved_source, "default.toml");
        assert!(!listing.entries[0].modes.mode_b_enabled);
        assert!(listing.entries[1].modes.mode_b_enabled);
        assert_eq!(listing.entries[1].gates.len(), 4);
    }

    #[test]
    fn one_invalid_policy_fails_the_listing() {
        let (dir, registry) = shipped_policies();
        fs::write(dir.path().join("broken.toml"), "schema_version = 1\n").unwrap();
        assert!(policy_listing(&registry).is_err());
    }
}
