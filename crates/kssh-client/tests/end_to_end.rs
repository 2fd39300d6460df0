use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use kssh_ca::audit::AuditLedger;
use kssh_ca::config::CaConfig;
use kssh_ca::service::ServiceHandle;
use kssh_channel::fs::{self as fs_channel, FsChannel};
use kssh_channel::memory::MemoryHub;
use kssh_channel::Channel;
use kssh_client::local_config;
use kssh_client::provision::{KeyAgent, ProvisioningAdapter};
use kssh_client::{
    bundle, CaRequester, CacheOutcome, CertificateCache, ClientError, ClientPaths,
    TeamConfigResolver,
};
use kssh_crypto::{certificate, keys};
use tokio_util::sync::CancellationToken;

const STAGING: &str = "acme.ssh.staging";
const PROD: &str = "acme.ssh.prod";
const ROOT_EVERYWHERE: &str = "acme.ssh.root_everywhere";
const SECONDARY: &str = "other.ssh";
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

struct RunningCa {
    handle: ServiceHandle,
    ledger: Arc<AuditLedger>,
    cancel: CancellationToken,
    ca_public_key: ssh_key::PublicKey,
    _dir: tempfile::TempDir,
}

impl RunningCa {
    async fn audit_count(&self) -> usize {
        self.ledger.read_entries().await.unwrap().len()
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.handle.join().await.unwrap();
    }
}

fn ca_config(dir: &Path, bot: &str, teams: &[&str]) -> CaConfig {
    let mut raw = format!(
        "ca_key_location = {:?}\nbot_name = \"{bot}\"\n",
        dir.join("ca_key").display().to_string()
    );
    for team in teams {
        raw.push_str(&format!("[[teams]]\nname = \"{team}\"\n"));
    }
    CaConfig::parse(&raw).unwrap()
}

async fn start_ca(channel: Arc<dyn Channel>, teams: &[&str]) -> RunningCa {
    let dir = tempfile::tempdir().unwrap();
    let config = ca_config(dir.path(), channel.identity(), teams);
    let key = kssh_ca::ca::generate(&config, false).unwrap();

    let (service, ledger) = kssh_ca::build_service(&config, channel).unwrap();
    let cancel = CancellationToken::new();
    let handle = service
        .with_poll_interval(Duration::from_millis(5))
        .start(cancel.clone())
        .await
        .unwrap();

    RunningCa {
        handle,
        ledger,
        cancel,
        ca_public_key: key.public_key().clone(),
        _dir: dir,
    }
}

/// One CA ("cabot") serving staging, prod and root_everywhere; alice is in
/// staging and root_everywhere.
async fn primary(hub: &MemoryHub) -> RunningCa {
    for team in [STAGING, PROD, ROOT_EVERYWHERE] {
        hub.add_member(team, "cabot");
    }
    hub.add_member(STAGING, "alice");
    hub.add_member(ROOT_EVERYWHERE, "alice");
    start_ca(Arc::new(hub.handle("cabot")), &[STAGING, PROD, ROOT_EVERYWHERE]).await
}

/// A second, independent CA that alice can also reach.
async fn secondary(hub: &MemoryHub) -> RunningCa {
    hub.add_member(SECONDARY, "otherbot");
    hub.add_member(SECONDARY, "alice");
    start_ca(Arc::new(hub.handle("otherbot")), &[SECONDARY]).await
}

fn cache_for(channel: Arc<dyn Channel>, ssh_dir: &Path) -> CertificateCache {
    let requester = CaRequester::new(channel)
        .with_timeout(Duration::from_secs(5))
        .with_poll_interval(Duration::from_millis(5));
    CertificateCache::new(ClientPaths::new(ssh_dir), requester)
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Agent stand-in that records every key it is handed.
#[derive(Clone, Default)]
struct RecordingAgent {
    loaded: Arc<Mutex<Vec<(PathBuf, Option<Duration>)>>>,
}

#[async_trait::async_trait]
impl KeyAgent for RecordingAgent {
    async fn add_identity(
        &self,
        private_key: &Path,
        lifetime: Option<Duration>,
    ) -> kssh_client::Result<()> {
        self.loaded
            .lock()
            .unwrap()
            .push((private_key.to_path_buf(), lifetime));
        Ok(())
    }
}

#[tokio::test]
async fn single_team_resolves_and_signs_the_grant_set() {
    let hub = MemoryHub::new();
    let ca = primary(&hub).await;
    let ssh_dir = tempfile::tempdir().unwrap();
    let alice = Arc::new(hub.handle("alice"));

    let config = TeamConfigResolver::new(alice.as_ref())
        .resolve(None, None)
        .await
        .unwrap();
    let cache = cache_for(alice.clone(), ssh_dir.path());
    let credential = cache.ensure(&config).await.unwrap();
    assert_eq!(credential.outcome, CacheOutcome::Refreshed);

    let cached = bundle::load(cache.paths()).unwrap().unwrap();
    assert_eq!(
        certificate::principals(&cached.certificate),
        set(&["root_everywhere", "staging"])
    );
    certificate::verify_issued_by(
        &cached.certificate,
        &ca.ca_public_key,
        cached.private_key.public_key(),
        cached.certificate.valid_after() + 61,
    )
    .unwrap();

    let entries = ca.ledger.read_entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].requester, "alice");
    assert_eq!(entries[0].principals, set(&["root_everywhere", "staging"]));
    assert_eq!(entries[0].expiration, "+1h");

    ca.stop().await;
}

#[tokio::test]
async fn valid_bundle_is_reused_quickly_without_audit() {
    let hub = MemoryHub::new();
    let ca = primary(&hub).await;
    let ssh_dir = tempfile::tempdir().unwrap();
    let alice = Arc::new(hub.handle("alice"));
    let config = TeamConfigResolver::new(alice.as_ref())
        .resolve(None, None)
        .await
        .unwrap();
    let cache = cache_for(alice.clone(), ssh_dir.path());
    cache.ensure(&config).await.unwrap();
    let deliveries = hub.delivery_count();

    let started = Instant::now();
    let credential = cache.ensure(&config).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(750));
    assert_eq!(credential.outcome, CacheOutcome::Reused);
    assert_eq!(hub.delivery_count(), deliveries);
    assert_eq!(ca.audit_count().await, 1);

    ca.stop().await;
}

#[tokio::test]
async fn switching_teams_behind_one_ca_reuses_the_certificate() {
    let hub = MemoryHub::new();
    let ca = primary(&hub).await;
    let ssh_dir = tempfile::tempdir().unwrap();
    let alice = Arc::new(hub.handle("alice"));
    let resolver = TeamConfigResolver::new(alice.as_ref());
    let cache = cache_for(alice.clone(), ssh_dir.path());

    let plain = resolver.resolve(None, None).await.unwrap();
    assert_eq!(
        cache.ensure(&plain).await.unwrap().outcome,
        CacheOutcome::Refreshed
    );

    let other = if plain.team == STAGING { ROOT_EVERYWHERE } else { STAGING };
    let flagged = resolver.resolve(Some(other), None).await.unwrap();
    assert_ne!(flagged.team, plain.team);
    let deliveries = hub.delivery_count();

    assert_eq!(
        cache.ensure(&flagged).await.unwrap().outcome,
        CacheOutcome::Reused
    );
    assert_eq!(hub.delivery_count(), deliveries);
    assert_eq!(ca.audit_count().await, 1);

    ca.stop().await;
}

#[tokio::test]
async fn provisioning_a_cold_cache_signs_once_and_loads_once() {
    let hub = MemoryHub::new();
    let ca = primary(&hub).await;
    let ssh_dir = tempfile::tempdir().unwrap();
    let alice = Arc::new(hub.handle("alice"));
    let config = TeamConfigResolver::new(alice.as_ref())
        .resolve(None, None)
        .await
        .unwrap();
    let cache = cache_for(alice.clone(), ssh_dir.path());
    let agent = RecordingAgent::default();

    let credential = ProvisioningAdapter::new(&cache, agent.clone())
        .provision(&config)
        .await
        .unwrap();
    assert_eq!(credential.outcome, CacheOutcome::Refreshed);
    assert_eq!(ca.audit_count().await, 1);

    let loaded = agent.loaded.lock().unwrap().clone();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].0, cache.paths().private_key());
    let lifetime = loaded[0].1.unwrap();
    assert!(lifetime <= Duration::from_secs(3600));
    assert!(lifetime > Duration::from_secs(3000));
    assert!(bundle::load(cache.paths()).unwrap().is_some());

    ca.stop().await;
}

#[tokio::test]
async fn expired_bundle_is_replaced_with_one_signing() {
    let hub = MemoryHub::new();
    let ca = primary(&hub).await;
    let ssh_dir = tempfile::tempdir().unwrap();
    let alice = Arc::new(hub.handle("alice"));
    let config = TeamConfigResolver::new(alice.as_ref())
        .resolve(None, None)
        .await
        .unwrap();

    // Plant a bundle that expired an hour ago.
    let old_ca = keys::generate_ca_keypair().unwrap();
    let old_key = keys::generate_keypair(&config.team).unwrap();
    let issued_at = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
        - 7200;
    let old_cert = certificate::issue_user_certificate(
        &old_ca,
        &certificate::CertificateSpec {
            subject: old_key.public_key(),
            key_id: "alice:old",
            principals: &set(&["staging"]),
            issued_at,
            validity_secs: 3600,
        },
    )
    .unwrap();
    let paths = ClientPaths::new(ssh_dir.path());
    bundle::write(
        &paths,
        &bundle::Bundle {
            private_key: old_key.clone(),
            certificate: old_cert,
        },
    )
    .unwrap();

    let cache = cache_for(alice.clone(), ssh_dir.path());
    let credential = cache.ensure(&config).await.unwrap();
    assert_eq!(credential.outcome, CacheOutcome::Refreshed);
    assert_eq!(ca.audit_count().await, 1);

    let replaced = bundle::load(&paths).unwrap().unwrap();
    assert_ne!(replaced.private_key.public_key(), old_key.public_key());
    assert!(replaced.valid_before() > issued_at + 3600);

    ca.stop().await;
}

#[tokio::test]
async fn two_cas_without_choice_fail_before_any_request() {
    let hub = MemoryHub::new();
    let first = primary(&hub).await;
    let second = secondary(&hub).await;
    let deliveries = hub.delivery_count();
    let alice = hub.handle("alice");

    let err = TeamConfigResolver::new(&alice)
        .resolve(None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::AmbiguousTeam { count: 2, .. }));
    assert!(err.to_string().contains("Found 2 config files"));

    assert_eq!(hub.delivery_count(), deliveries);
    assert_eq!(first.audit_count().await, 0);
    assert_eq!(second.audit_count().await, 0);

    first.stop().await;
    second.stop().await;
}

#[tokio::test]
async fn team_flag_selects_among_two_cas() {
    let hub = MemoryHub::new();
    let first = primary(&hub).await;
    let second = secondary(&hub).await;
    let ssh_dir = tempfile::tempdir().unwrap();
    let alice = Arc::new(hub.handle("alice"));

    let config = TeamConfigResolver::new(alice.as_ref())
        .resolve(Some(STAGING), None)
        .await
        .unwrap();
    cache_for(alice.clone(), ssh_dir.path())
        .ensure(&config)
        .await
        .unwrap();

    assert_eq!(first.audit_count().await, 1);
    assert_eq!(second.audit_count().await, 0);

    let err = TeamConfigResolver::new(alice.as_ref())
        .resolve(Some("acme.ssh.nope"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::UnknownTeam(_)));

    first.stop().await;
    second.stop().await;
}

#[tokio::test]
async fn stored_default_resolves_and_override_wins_for_one_call() {
    let hub = MemoryHub::new();
    let first = primary(&hub).await;
    let second = secondary(&hub).await;
    let ssh_dir = tempfile::tempdir().unwrap();
    let paths = ClientPaths::new(ssh_dir.path());
    let alice = Arc::new(hub.handle("alice"));

    local_config::set_default_team(&paths, SECONDARY, LOCK_TIMEOUT)
        .await
        .unwrap();
    // Setting the default does not sign anything.
    assert_eq!(second.audit_count().await, 0);

    let default = local_config::default_team(&paths, LOCK_TIMEOUT).await.unwrap();
    let resolver = TeamConfigResolver::new(alice.as_ref());
    let config = resolver.resolve(None, default.as_deref()).await.unwrap();
    assert_eq!(config.team, SECONDARY);
    let cache = cache_for(alice.clone(), ssh_dir.path());
    cache.ensure(&config).await.unwrap();
    assert_eq!(second.audit_count().await, 1);

    let config = resolver
        .resolve(Some(STAGING), default.as_deref())
        .await
        .unwrap();
    assert_eq!(config.team, STAGING);
    // The cached bundle came from the other CA, so this signs again.
    assert_eq!(
        cache.ensure(&config).await.unwrap().outcome,
        CacheOutcome::Refreshed
    );
    assert_eq!(first.audit_count().await, 1);

    assert_eq!(
        local_config::default_team(&paths, LOCK_TIMEOUT)
            .await
            .unwrap()
            .as_deref(),
        Some(SECONDARY)
    );

    first.stop().await;
    second.stop().await;
}

#[tokio::test]
async fn certificate_is_signed_even_when_it_cannot_reach_prod() {
    let hub = MemoryHub::new();
    for team in [STAGING, PROD] {
        hub.add_member(team, "cabot");
    }
    hub.add_member(STAGING, "bob");
    let ca = start_ca(Arc::new(hub.handle("cabot")), &[STAGING, PROD]).await;
    let ssh_dir = tempfile::tempdir().unwrap();
    let bob = Arc::new(hub.handle("bob"));

    let config = TeamConfigResolver::new(bob.as_ref())
        .resolve(None, None)
        .await
        .unwrap();
    cache_for(bob.clone(), ssh_dir.path())
        .ensure(&config)
        .await
        .unwrap();

    // Signed and audited; only the destination host can refuse it.
    let cached = bundle::load(&ClientPaths::new(ssh_dir.path())).unwrap().unwrap();
    let principals = certificate::principals(&cached.certificate);
    assert_eq!(principals, set(&["staging"]));
    assert!(!principals.contains("prod"));
    assert_eq!(ca.audit_count().await, 1);

    ca.stop().await;
}

#[tokio::test]
async fn concurrent_invocations_sign_once() {
    let hub = MemoryHub::new();
    let ca = primary(&hub).await;
    let ssh_dir = tempfile::tempdir().unwrap();
    let alice = Arc::new(hub.handle("alice"));
    let config = TeamConfigResolver::new(alice.as_ref())
        .resolve(None, None)
        .await
        .unwrap();

    let a = cache_for(alice.clone(), ssh_dir.path());
    let b = cache_for(alice.clone(), ssh_dir.path());
    let (ra, rb) = tokio::join!(a.ensure(&config), b.ensure(&config));
    let mut outcomes = vec![ra.unwrap().outcome, rb.unwrap().outcome];
    outcomes.sort_by_key(|o| *o == CacheOutcome::Reused);

    assert_eq!(outcomes, vec![CacheOutcome::Refreshed, CacheOutcome::Reused]);
    assert_eq!(ca.audit_count().await, 1);

    ca.stop().await;
}

#[tokio::test]
async fn stopping_the_ca_withdraws_its_configs() {
    let hub = MemoryHub::new();
    let ca = primary(&hub).await;
    ca.stop().await;

    let alice = hub.handle("alice");
    let err = TeamConfigResolver::new(&alice)
        .resolve(None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NoTeams));
}

#[tokio::test]
async fn works_over_the_directory_channel() {
    let root = tempfile::tempdir().unwrap();
    for team in [STAGING, ROOT_EVERYWHERE] {
        fs_channel::add_member(root.path(), team, "cabot").unwrap();
        fs_channel::add_member(root.path(), team, "alice").unwrap();
    }
    let ca = start_ca(
        Arc::new(FsChannel::new(root.path(), "cabot")),
        &[STAGING, ROOT_EVERYWHERE],
    )
    .await;

    let ssh_dir = tempfile::tempdir().unwrap();
    let alice = Arc::new(FsChannel::new(root.path(), "alice"));
    let config = TeamConfigResolver::new(alice.as_ref())
        .resolve(None, None)
        .await
        .unwrap();
    let cache = cache_for(alice.clone(), ssh_dir.path());
    assert_eq!(
        cache.ensure(&config).await.unwrap().outcome,
        CacheOutcome::Refreshed
    );
    assert_eq!(
        cache.ensure(&config).await.unwrap().outcome,
        CacheOutcome::Reused
    );
    assert_eq!(ca.audit_count().await, 1);

    ca.stop().await;
}
