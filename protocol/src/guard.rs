//! Access control: a static domain allow-list and a dynamic IP block-list.
//!
//! The allow-list is fixed at construction. The block-list only grows from
//! inside the bridge: the verifier adds an IP when it catches a replay or a
//! forged signature from it. Entries never expire on their own. The only
//! way out is [`AccessGuard::unblock`], an explicit administrative action.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One block-listed source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedIpEntry {
    pub ip: IpAddr,
    pub blocked_at: DateTime<Utc>,
    pub reason: String,
}

/// Domain allow-list plus IP block-list.
#[derive(Debug, Default)]
pub struct AccessGuard {
    /// Lowercased, trailing-dot-stripped registered domains.
    allowed_domains: Vec<String>,
    blocked: DashMap<IpAddr, BlockedIpEntry>,
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

impl AccessGuard {
    /// Creates a guard with the given allow-list and an empty block-list.
    pub fn new<I, S>(allowed_domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_domains: allowed_domains
                .into_iter()
                .map(|d| normalize_domain(d.as_ref()))
                .filter(|d| !d.is_empty())
                .collect(),
            blocked: DashMap::new(),
        }
    }

    /// Whether `domain` is a registered domain or a subdomain of one.
    ///
    /// Suffix matching respects label boundaries: with `partner.example`
    /// registered, `api.partner.example` passes, `evilpartner.example` does
    /// not. Comparison is case-insensitive.
    pub fn is_domain_authorized(&self, domain: &str) -> bool {
        let domain = normalize_domain(domain);
        if domain.is_empty() {
            return false;
        }
        self.allowed_domains.iter().any(|allowed| {
            domain == *allowed
                || domain
                    .strip_suffix(allowed.as_str())
                    .map(|prefix| prefix.ends_with('.'))
                    .unwrap_or(false)
        })
    }

    /// The registered allow-list.
    pub fn allowed_domains(&self) -> &[String] {
        &self.allowed_domains
    }

    /// Block-lists `ip`. If it is already blocked, the original entry (and
    /// its reason) is kept. Returns `true` if this call created the entry.
    pub fn block(&self, ip: IpAddr, reason: &str) -> bool {
        match self.blocked.entry(ip) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(BlockedIpEntry {
                    ip,
                    blocked_at: Utc::now(),
                    reason: reason.to_owned(),
                });
                warn!(source_ip = %ip, reason, "source IP blocked");
                true
            }
        }
    }

    pub fn is_blocked(&self, ip: &IpAddr) -> bool {
        self.blocked.contains_key(ip)
    }

    /// The block entry for `ip`, if any.
    pub fn blocked_entry(&self, ip: &IpAddr) -> Option<BlockedIpEntry> {
        self.blocked.get(ip).map(|e| e.value().clone())
    }

    /// Snapshot of all blocked sources, oldest block first.
    pub fn list_blocked(&self) -> Vec<BlockedIpEntry> {
        let mut entries: Vec<BlockedIpEntry> =
            self.blocked.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.blocked_at.cmp(&b.blocked_at).then(a.ip.cmp(&b.ip)));
        entries
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }

    /// Administrative clear. The verifier never calls this.
    pub fn unblock(&self, ip: &IpAddr) -> Option<BlockedIpEntry> {
        let removed = self.blocked.remove(ip).map(|(_, entry)| entry);
        if removed.is_some() {
            info!(source_ip = %ip, "source IP unblocked by administrator");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn exact_domain_match() {
        let guard = AccessGuard::new(["partner.example"]);
        assert!(guard.is_domain_authorized("partner.example"));
        assert!(guard.is_domain_authorized("PARTNER.example."));
    }

    #[test]
    fn suffix_match_respects_labels() {
        let guard = AccessGuard::new(["partner.example"]);
        assert!(guard.is_domain_authorized("api.partner.example"));
        assert!(guard.is_domain_authorized("a.b.partner.example"));
        assert!(!guard.is_domain_authorized("evilpartner.example"));
        assert!(!guard.is_domain_authorized("partner.example.evil"));
        assert!(!guard.is_domain_authorized(""));
    }

    #[test]
    fn empty_allow_list_authorizes_nothing() {
        let guard = AccessGuard::new(Vec::<String>::new());
        assert!(!guard.is_domain_authorized("anything.example"));
    }

    #[test]
    fn block_is_sticky_and_keeps_first_reason() {
        let guard = AccessGuard::default();
        assert!(guard.block(ip("10.0.0.1"), "nonce reuse"));
        assert!(!guard.block(ip("10.0.0.1"), "signature mismatch"));

        let entry = guard.blocked_entry(&ip("10.0.0.1")).unwrap();
        assert_eq!(entry.reason, "nonce reuse");
        assert!(guard.is_blocked(&ip("10.0.0.1")));
        assert!(!guard.is_blocked(&ip("10.0.0.2")));
    }

    #[test]
    fn list_blocked_snapshot() {
        let guard = AccessGuard::default();
        guard.block(ip("10.0.0.1"), "nonce reuse");
        guard.block(ip("::1"), "signature mismatch");
        let list = guard.list_blocked();
        assert_eq!(list.len(), 2);
        assert_eq!(guard.blocked_count(), 2);
    }

    #[test]
    fn unblock_is_the_only_way_out() {
        let guard = AccessGuard::default();
        guard.block(ip("10.0.0.1"), "nonce reuse");
        let removed = guard.unblock(&ip("10.0.0.1")).unwrap();
        assert_eq!(removed.reason, "nonce reuse");
        assert!(!guard.is_blocked(&ip("10.0.0.1")));
        assert!(guard.unblock(&ip("10.0.0.1")).is_none());
    }

    #[test]
    fn blocked_entry_serializes_camel_case() {
        let guard = AccessGuard::default();
        guard.block(ip("192.0.2.7"), "nonce reuse");
        let v = serde_json::to_value(guard.list_blocked()).unwrap();
        assert_eq!(v[0]["ip"], "192.0.2.7");
        assert!(v[0]["blockedAt"].is_string());
    }
}
