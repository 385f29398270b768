//! Deterministic resource identifiers.
//!
//! Ids are derived from SHA-256 over (seed, scope, kind, counter), so two
//! emulator runs with the same seed and the same sequence of calls hand
//! out the same ids.

use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};

use crate::types::Scope;

/// The kinds of resource the emulator mints ids for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// `sfr-xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`
    FleetRequest,
    /// `i-` followed by 17 hex characters.
    Instance,
    /// `lt-` followed by 17 hex characters.
    LaunchTemplate,
}

impl ResourceKind {
    fn label(self) -> &'static str {
        match self {
            ResourceKind::FleetRequest => "sfr",
            ResourceKind::Instance => "i",
            ResourceKind::LaunchTemplate => "lt",
        }
    }
}

/// Hands out unique, reproducible ids for one scope.
///
/// Uses an `AtomicU64` counter, so a generator can be shared by reference.
pub struct IdGenerator {
    seed: String,
    scope: Scope,
    counter: AtomicU64,
}

impl IdGenerator {
    pub fn new(seed: &str, scope: Scope) -> Self {
        Self {
            seed: seed.to_string(),
            scope,
            counter: AtomicU64::new(0),
        }
    }

    /// Mint the next id of the given kind.
    pub fn next(&self, kind: ResourceKind) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut hasher = Sha256::new();
        hasher.update(self.seed.as_bytes());
        hasher.update(self.scope.to_string().as_bytes());
        hasher.update(kind.label().as_bytes());
        hasher.update(n.to_be_bytes());
        let digest = hex::encode(hasher.finalize());

        match kind {
            ResourceKind::FleetRequest => format!(
                "sfr-{}-{}-{}-{}-{}",
                &digest[0..8],
                &digest[8..12],
                &digest[12..16],
                &digest[16..20],
                &digest[20..32]
            ),
            ResourceKind::Instance | ResourceKind::LaunchTemplate => {
                format!("{}-{}", kind.label(), &digest[..17])
            }
        }
    }

    /// Number of ids handed out so far (for diagnostics).
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(seed: &str) -> IdGenerator {
        IdGenerator::new(seed, Scope::new("123456789012", "us-east-1"))
    }

    #[test]
    fn instance_ids_have_expected_shape() {
        let id = generator("s").next(ResourceKind::Instance);
        assert!(id.starts_with("i-"));
        assert_eq!(id.len(), 2 + 17);
        assert!(id[2..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fleet_ids_are_uuid_shaped() {
        let id = generator("s").next(ResourceKind::FleetRequest);
        let body = id.strip_prefix("sfr-").unwrap();
        let groups: Vec<usize> = body.split('-').map(str::len).collect();
        assert_eq!(groups, vec![8, 4, 4, 4, 12]);
    }

    #[test]
    fn same_seed_same_sequence() {
        let a = generator("seed");
        let b = generator("seed");
        for _ in 0..5 {
            assert_eq!(a.next(ResourceKind::Instance), b.next(ResourceKind::Instance));
        }
        assert_eq!(a.issued(), 5);
    }

    #[test]
    fn ids_do_not_repeat() {
        let g = generator("seed");
        let ids: std::collections::HashSet<String> =
            (0..200).map(|_| g.next(ResourceKind::LaunchTemplate)).collect();
        assert_eq!(ids.len(), 200);
    }

    #[test]
    fn scopes_produce_different_ids() {
        let a = IdGenerator::new("seed", Scope::new("1", "us-east-1"));
        let b = IdGenerator::new("seed", Scope::new("1", "us-west-2"));
        assert_ne!(a.next(ResourceKind::Instance), b.next(ResourceKind::Instance));
    }
}
