use super::*;
use crate::http::HttpError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Provisioner that counts calls and can fail the first few.
#[derive(Default)]
struct FakeProvisioner {
    calls: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Duration,
}

impl FakeProvisioner {
    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn create_instance(&self, user_id: &str) -> Result<ServerInstance, ProvisionError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ProvisionError::Http(HttpError::Decode("upstream down".into())));
        }
        Ok(ServerInstance {
            instance_id: format!("inst-{user_id}-{n}"),
            server_url: format!("https://mcp.example.com/{user_id}/{n}"),
        })
    }
}

fn registry_with(provisioner: Arc<FakeProvisioner>) -> InstanceRegistry {
    InstanceRegistry::new(
        Arc::new(MemoryStore::new()),
        provisioner,
        AuthorizationUrlBuilder::new("api.klavis.ai", "gmail", "client-1"),
    )
}

#[tokio::test]
async fn test_get_or_create_provisions_once() {
    let provisioner = Arc::new(FakeProvisioner::default());
    let registry = registry_with(provisioner.clone());

    let first = registry.get_or_create("u1").await.unwrap();
    let second = registry.get_or_create("u1").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(provisioner.calls(), 1);
    assert!(!first.authorized);
    assert_eq!(
        first.authorization_url,
        "https://api.klavis.ai/oauth/gmail/authorize?instance_id=inst-u1-1&client_id=client-1"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_requests_provision_once() {
    let provisioner = Arc::new(FakeProvisioner::slow(Duration::from_millis(50)));
    let registry = Arc::new(registry_with(provisioner.clone()));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.get_or_create("u1").await })
        })
        .collect();

    let results = futures::future::join_all(tasks).await;
    let instance_ids: Vec<String> = results
        .into_iter()
        .map(|r| r.unwrap().unwrap().instance_id)
        .collect();

    assert_eq!(provisioner.calls(), 1);
    assert!(instance_ids.iter().all(|id| id == "inst-u1-1"));
    assert_eq!(registry.in_flight_len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_users_provision_independently() {
    let provisioner = Arc::new(FakeProvisioner::slow(Duration::from_millis(20)));
    let registry = Arc::new(registry_with(provisioner.clone()));

    let tasks: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|user| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.get_or_create(user).await })
        })
        .collect();
    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }

    assert_eq!(provisioner.calls(), 3);
    assert_eq!(registry.list().unwrap().len(), 3);
}

#[tokio::test]
async fn test_failed_provisioning_stores_nothing_and_retries() {
    let provisioner = Arc::new(FakeProvisioner::failing(1));
    let registry = registry_with(provisioner.clone());

    let err = registry.get_or_create("u1").await.unwrap_err();
    assert!(matches!(err, RegistryError::Provisioning { .. }));
    assert!(registry.get("u1").unwrap().is_none());
    assert!(!registry.is_authorized("u1"));

    let instance = registry.get_or_create("u1").await.unwrap();
    assert_eq!(instance.instance_id, "inst-u1-2");
    assert_eq!(provisioner.calls(), 2);
}

#[tokio::test]
async fn test_authorization_is_gated() {
    let registry = registry_with(Arc::new(FakeProvisioner::default()));

    assert!(!registry.is_authorized("u1"));
    assert!(matches!(
        registry.server_url("u1"),
        Err(RegistryError::NotAuthorized(_))
    ));

    let instance = registry.get_or_create("u1").await.unwrap();
    assert!(!registry.is_authorized("u1"));
    assert!(matches!(
        registry.server_url("u1"),
        Err(RegistryError::NotAuthorized(_))
    ));

    registry.mark_authorized("u1").unwrap();
    assert!(registry.is_authorized("u1"));
    assert_eq!(registry.server_url("u1").unwrap(), instance.server_url);

    // Stays authorized; repeated marking is harmless.
    registry.mark_authorized("u1").unwrap();
    let again = registry.get_or_create("u1").await.unwrap();
    assert!(again.authorized);
    assert_eq!(again.instance_id, instance.instance_id);
}

#[test]
fn test_mark_authorized_unknown_user_is_rejected() {
    let registry = registry_with(Arc::new(FakeProvisioner::default()));

    let err = registry.mark_authorized("ghost").unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(_)));
    assert!(registry.get("ghost").unwrap().is_none());
    assert!(!registry.is_authorized("ghost"));
}

#[tokio::test]
async fn test_revoke() {
    let registry = registry_with(Arc::new(FakeProvisioner::default()));
    registry.get_or_create("u1").await.unwrap();
    registry.mark_authorized("u1").unwrap();

    registry.revoke("u1").unwrap();
    assert!(!registry.is_authorized("u1"));
    assert!(matches!(
        registry.revoke("ghost"),
        Err(RegistryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_sqlite_backed_registry() {
    let registry = InstanceRegistry::new(
        Arc::new(SqliteStore::open_in_memory().unwrap()),
        Arc::new(FakeProvisioner::default()),
        AuthorizationUrlBuilder::new("api.klavis.ai", "gmail", "client-1"),
    );

    let instance = registry.get_or_create("u1").await.unwrap();
    registry.mark_authorized("u1").unwrap();
    assert_eq!(registry.server_url("u1").unwrap(), instance.server_url);
}

#[tokio::test]
async fn test_cancelled_creation_releases_guard() {
    let provisioner = Arc::new(FakeProvisioner::slow(Duration::from_millis(200)));
    let registry = registry_with(provisioner.clone());

    let timed_out = tokio::time::timeout(Duration::from_millis(20), registry.get_or_create("u1")).await;
    assert!(timed_out.is_err());
    assert_eq!(registry.in_flight_len(), 0);
    assert!(registry.get("u1").unwrap().is_none());

    let instance = registry.get_or_create("u1").await.unwrap();
    assert_eq!(instance.instance_id, "inst-u1-2");
    assert_eq!(registry.in_flight_len(), 0);
}

#[tokio::test]
async fn test_set_ready() {
    let registry = registry_with(Arc::new(FakeProvisioner::default()));
    assert!(!registry.get_or_create("u1").await.unwrap().ready);

    registry.set_ready("u1", true).unwrap();
    assert!(registry.get("u1").unwrap().unwrap().ready);
    assert!(matches!(
        registry.set_ready("ghost", true),
        Err(RegistryError::NotFound(_))
    ));
}
