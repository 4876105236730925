// Whitelist generation and publishing.
//
// The whitelist is the list of VRChat display names of verified members holding
// a whitelist role. It is pushed to a git repository (served raw to the world)
// and the CDN copy is purged afterwards.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::errors::{BotError, BotResult};
use crate::core::vrchat::AccountStore;

const HEADER: &str = "# S.H.I.E.L.D. whitelist";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhitelistEntry {
    pub discord_id: u64,
    pub vrchat_user_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Remote content already matched.
    Unchanged,
    Updated { commit_sha: String },
}

/// Where the rendered whitelist goes. Implemented over the GitHub contents API.
#[async_trait]
pub trait WhitelistPublisher: Send + Sync {
    async fn publish(&self, content: &str) -> BotResult<PublishOutcome>;
}

/// CDN cache invalidation for the public whitelist URL.
#[async_trait]
pub trait CachePurger: Send + Sync {
    async fn purge(&self) -> BotResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhitelistSyncReport {
    pub entries: usize,
    pub outcome: PublishOutcome,
    pub purged: bool,
}

pub struct WhitelistService<A: AccountStore> {
    accounts: A,
    publisher: Option<Arc<dyn WhitelistPublisher>>,
    purger: Option<Arc<dyn CachePurger>>,
    signing_key: Option<String>,
    /// Set when a publish went out but its cache purge failed.
    purge_owed: AtomicBool,
}

impl<A: AccountStore> WhitelistService<A> {
    pub fn new(
        accounts: A,
        publisher: Option<Arc<dyn WhitelistPublisher>>,
        purger: Option<Arc<dyn CachePurger>>,
        signing_key: Option<String>,
    ) -> Self {
        Self {
            accounts,
            publisher,
            purger,
            signing_key,
            purge_owed: AtomicBool::new(false),
        }
    }

    pub fn is_publishing_enabled(&self) -> bool {
        self.publisher.is_some()
    }

    /// Entries for the given Discord users, skipping anyone not verified.
    pub async fn build(&self, discord_ids: &[u64]) -> BotResult<Vec<WhitelistEntry>> {
        let unique: BTreeSet<u64> = discord_ids.iter().copied().collect();
        let mut entries = Vec::with_capacity(unique.len());
        for discord_id in unique {
            if let Some(account) = self.accounts.get_account(discord_id).await? {
                if account.verified {
                    entries.push(WhitelistEntry {
                        discord_id,
                        vrchat_user_id: account.vrchat_user_id,
                        display_name: account.display_name,
                    });
                }
            }
        }
        entries.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
                .then_with(|| a.vrchat_user_id.cmp(&b.vrchat_user_id))
        });
        Ok(entries)
    }

    pub fn render(&self, entries: &[WhitelistEntry]) -> BotResult<String> {
        render_whitelist(entries, self.signing_key.as_deref())
    }

    pub async fn sync(&self, discord_ids: &[u64]) -> BotResult<WhitelistSyncReport> {
        let publisher = self.publisher.as_ref().ok_or_else(|| {
            BotError::whitelist(
                "WHITELIST_NOT_CONFIGURED",
                "Whitelist publishing is not configured.",
            )
        })?;

        let entries = self.build(discord_ids).await?;
        let content = self.render(&entries)?;
        let outcome = publisher.publish(&content).await?;

        let mut purged = false;
        let changed = matches!(outcome, PublishOutcome::Updated { .. });
        if let Some(purger) = &self.purger {
            if changed || self.purge_owed.load(Ordering::Acquire) {
                match purger.purge().await {
                    Ok(()) => {
                        purged = true;
                        self.purge_owed.store(false, Ordering::Release);
                    }
                    // Retried on the next sync even if the file is unchanged
                    Err(e) => {
                        self.purge_owed.store(true, Ordering::Release);
                        tracing::warn!(error = %e, "Cache purge failed");
                    }
                }
            }
        }

        tracing::info!(entries = entries.len(), ?outcome, purged, "Whitelist synced");
        Ok(WhitelistSyncReport {
            entries: entries.len(),
            outcome,
            purged,
        })
    }
}

/// Render entries as a newline separated file with a comment header.
///
/// The output only depends on the entries and key so that an unchanged roster
/// produces byte-identical content.
pub fn render_whitelist(
    entries: &[WhitelistEntry],
    signing_key: Option<&str>,
) -> BotResult<String> {
    let body: String = entries
        .iter()
        .map(|e| format!("{}\n", e.display_name))
        .collect();

    let mut out = String::new();
    out.push_str(HEADER);
    out.push('\n');
    out.push_str(&format!("# entries: {}\n", entries.len()));
    if let Some(key) = signing_key {
        out.push_str(&format!("# signature: {}\n", sign(key, &body)?));
    }
    out.push_str(&body);
    Ok(out)
}

/// Hex HMAC-SHA256 of the body under `key`.
pub fn sign(key: &str, body: &str) -> BotResult<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
        .map_err(|e| BotError::whitelist("SIGNING_FAILED", e.to_string()))?;
    mac.update(body.as_bytes());
    let digest = mac.finalize().into_bytes();
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vrchat::verification_service::tests::InMemoryAccountStore;
    use crate::core::vrchat::VrchatAccount;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakePublisher {
        current: Mutex<Option<String>>,
    }

    #[async_trait]
    impl WhitelistPublisher for FakePublisher {
        async fn publish(&self, content: &str) -> BotResult<PublishOutcome> {
            let mut current = self.current.lock().unwrap();
            if current.as_deref() == Some(content) {
                return Ok(PublishOutcome::Unchanged);
            }
            *current = Some(content.to_string());
            Ok(PublishOutcome::Updated {
                commit_sha: "abc".into(),
            })
        }
    }

    #[derive(Default)]
    struct CountingPurger {
        calls: Mutex<usize>,
        failures_left: Mutex<usize>,
    }

    #[async_trait]
    impl CachePurger for CountingPurger {
        async fn purge(&self) -> BotResult<()> {
            *self.calls.lock().unwrap() += 1;
            let mut failures = self.failures_left.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(BotError::whitelist("PURGE_FAILED", "cloudflare said no"));
            }
            Ok(())
        }
    }

    fn accounts() -> InMemoryAccountStore {
        let store = InMemoryAccountStore::default();
        for (id, user, name, verified) in [
            (1, "usr_1", "zeta", true),
            (2, "usr_2", "Alpha", true),
            (3, "usr_3", "beta", false),
        ] {
            store.accounts.lock().unwrap().insert(
                id,
                VrchatAccount {
                    discord_id: id,
                    vrchat_user_id: user.into(),
                    display_name: name.into(),
                    verified,
                    verification_code: None,
                    verified_at: None,
                },
            );
        }
        store
    }

    #[tokio::test]
    async fn test_build_sorts_and_skips_unverified() {
        let service = WhitelistService::new(accounts(), None, None, None);
        let entries = service.build(&[1, 2, 3, 2, 99]).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.display_name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "zeta"]);

        let text = service.render(&entries).unwrap();
        assert_eq!(text, format!("{}\n# entries: 2\nAlpha\nzeta\n", HEADER));
    }

    #[test]
    fn test_signature_depends_on_key_and_body() {
        let entries = vec![WhitelistEntry {
            discord_id: 1,
            vrchat_user_id: "usr_1".into(),
            display_name: "Alpha".into(),
        }];
        let a = render_whitelist(&entries, Some("k1")).unwrap();
        let b = render_whitelist(&entries, Some("k2")).unwrap();
        assert!(a.contains(&format!("# signature: {}", sign("k1", "Alpha\n").unwrap())));
        assert_ne!(a, b);
        assert_ne!(sign("k1", "Alpha\n").unwrap(), sign("k1", "Alpha\nMallory\n").unwrap());
    }

    #[test]
    fn test_signature_is_hmac_sha256() {
        // RFC 4231 test case 2
        assert_eq!(
            sign("Jefe", "what do ya want for nothing?").unwrap(),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[tokio::test]
    async fn test_sync_skips_unchanged_and_purges_on_change() {
        let purger = Arc::new(CountingPurger::default());
        let service = WhitelistService::new(
            accounts(),
            Some(Arc::new(FakePublisher::default())),
            Some(purger.clone()),
            None,
        );

        let first = service.sync(&[1, 2]).await.unwrap();
        assert!(matches!(first.outcome, PublishOutcome::Updated { .. }));
        assert!(first.purged);

        let second = service.sync(&[2, 1]).await.unwrap();
        assert_eq!(second.outcome, PublishOutcome::Unchanged);
        assert!(!second.purged);
        assert_eq!(*purger.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_purge_is_retried_when_unchanged() {
        let purger = Arc::new(CountingPurger::default());
        *purger.failures_left.lock().unwrap() = 1;
        let service = WhitelistService::new(
            accounts(),
            Some(Arc::new(FakePublisher::default())),
            Some(purger.clone()),
            None,
        );

        let first = service.sync(&[1, 2]).await.unwrap();
        assert!(matches!(first.outcome, PublishOutcome::Updated { .. }));
        assert!(!first.purged);

        let second = service.sync(&[1, 2]).await.unwrap();
        assert_eq!(second.outcome, PublishOutcome::Unchanged);
        assert!(second.purged);

        let third = service.sync(&[1, 2]).await.unwrap();
        assert!(!third.purged);
        assert_eq!(*purger.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sync_requires_publisher() {
        let service = WhitelistService::new(accounts(), None, None, None);
        assert_eq!(
            service.sync(&[1]).await.unwrap_err().code,
            "WHITELIST_NOT_CONFIGURED"
        );
    }
}
