//! Integration tests for kvlink-core

use futures::future::join_all;
use kvlink_core::memory::{MemoryBackend, RecordingSink};
use kvlink_core::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const ADDRESS: &str = "mem://local";

struct Bridge {
    backend: MemoryBackend,
    sink: RecordingSink,
    ctx: Arc<BridgeContext>,
    lifecycle: LifecycleManager,
    router: CapabilityRouter,
}

fn bridge_with_sink(sink: RecordingSink) -> Bridge {
    let backend = MemoryBackend::new();
    let ctx = BridgeContext::builder(Arc::new(backend.clone()), Arc::new(sink.clone()))
        .link_defaults(LinkDefaults::default().with_backend_url(ADDRESS))
        .build();
    Bridge {
        backend,
        sink,
        lifecycle: LifecycleManager::new(Arc::clone(&ctx)),
        router: CapabilityRouter::new(Arc::clone(&ctx)),
        ctx,
    }
}

fn bridge() -> Bridge {
    bridge_with_sink(RecordingSink::new())
}

fn caller_link(name: &str, bucket: &str) -> LinkDefinition {
    LinkDefinition::inbound(name, "kvlink").with_option("bucket", bucket)
}

fn watcher_link(name: &str, bucket: &str) -> LinkDefinition {
    LinkDefinition::outbound("kvlink", name)
        .with_option("bucket", bucket)
        .with_option("startup_time", "0")
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

async fn wait_relaying(bridge: &Bridge, identity: &str) {
    let mut state = bridge.ctx.relays().subscribe_state(identity).unwrap();
    state
        .wait_for(|s| *s == RelayState::Relaying)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unlinked_identity_never_reaches_backend() {
    let bridge = bridge();
    assert_ok!(bridge.lifecycle.link_put(caller_link("svc-1", "stuff")).await);
    let before = bridge.backend.operations();
    let stranger = TenantIdentity::new("stranger");

    assert_eq!(bridge.router.get(&stranger, "k").await.unwrap_err(), BridgeError::Unauthorized);
    assert_eq!(
        bridge.router.put(&stranger, "k", b"v".to_vec()).await.unwrap_err(),
        BridgeError::Unauthorized
    );
    assert_eq!(
        bridge.router.create(&stranger, "k", b"v".to_vec()).await.unwrap_err(),
        BridgeError::Unauthorized
    );
    assert_eq!(bridge.router.delete(&stranger, "k").await.unwrap_err(), BridgeError::Unauthorized);
    assert_eq!(bridge.router.purge(&stranger, "k").await.unwrap_err(), BridgeError::Unauthorized);
    assert_eq!(bridge.router.list_keys(&stranger).await.unwrap_err(), BridgeError::Unauthorized);

    assert_eq!(bridge.backend.operations(), before);
}

#[tokio::test]
async fn test_watch_role_does_not_authorize_calls() {
    let bridge = bridge();
    assert_ok!(bridge.lifecycle.link_put(watcher_link("watcher", "stuff")).await);

    let err = assert_err!(bridge.router.list_keys(&"watcher".into()).await);
    assert_eq!(err, BridgeError::Unauthorized);
}

#[tokio::test]
async fn test_put_then_get() {
    let bridge = bridge();
    assert_ok!(bridge.lifecycle.link_put(caller_link("svc-1", "stuff")).await);
    let caller = TenantIdentity::new("svc-1");

    assert_ok!(bridge.router.put(&caller, "color", b"blue".to_vec()).await);
    let entry = assert_ok!(bridge.router.get(&caller, "color").await);
    assert_eq!(entry.key, "color");
    assert_eq!(entry.value, b"blue".to_vec());
}

#[tokio::test]
async fn test_create_existing_key_keeps_value() {
    let bridge = bridge();
    assert_ok!(bridge.lifecycle.link_put(caller_link("svc-1", "stuff")).await);
    let caller = TenantIdentity::new("svc-1");

    assert_ok!(bridge.router.create(&caller, "k", b"first".to_vec()).await);
    let err = assert_err!(bridge.router.create(&caller, "k", b"second".to_vec()).await);
    assert_eq!(err, BridgeError::AlreadyExists("k".into()));

    let entry = assert_ok!(bridge.router.get(&caller, "k").await);
    assert_eq!(entry.value, b"first".to_vec());
}

#[tokio::test]
async fn test_delete_then_get_is_not_found() {
    let bridge = bridge();
    assert_ok!(bridge.lifecycle.link_put(caller_link("svc-1", "stuff")).await);
    let caller = TenantIdentity::new("svc-1");

    assert_ok!(bridge.router.put(&caller, "k", b"v".to_vec()).await);
    assert_ok!(bridge.router.delete(&caller, "k").await);
    assert_eq!(
        bridge.router.get(&caller, "k").await.unwrap_err(),
        BridgeError::NotFound("k".into())
    );

    assert_ok!(bridge.router.put(&caller, "p", b"v".to_vec()).await);
    assert_ok!(bridge.router.purge(&caller, "p").await);
    assert_err!(bridge.router.get(&caller, "p").await);
}

#[tokio::test]
async fn test_list_keys_is_scoped_to_bucket() {
    let bridge = bridge();
    assert_ok!(bridge.lifecycle.link_put(caller_link("svc-1", "stuff")).await);
    assert_ok!(bridge.lifecycle.link_put(caller_link("svc-2", "other")).await);
    bridge.backend.seed(ADDRESS, "elsewhere", "foreign", "x");

    let one = TenantIdentity::new("svc-1");
    let two = TenantIdentity::new("svc-2");
    assert_ok!(bridge.router.put(&one, "a", b"1".to_vec()).await);
    assert_ok!(bridge.router.put(&one, "b", b"2".to_vec()).await);
    assert_ok!(bridge.router.put(&two, "z", b"3".to_vec()).await);

    let keys = assert_ok!(bridge.router.list_keys(&one).await);
    assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn test_closing_one_tenant_leaves_others() {
    let bridge = bridge();
    assert_ok!(bridge.lifecycle.link_put(caller_link("a", "stuff")).await);
    assert_ok!(bridge.lifecycle.link_put(caller_link("b", "stuff")).await);

    bridge.lifecycle.link_delete(LinkDirection::Inbound, "a").await;

    assert!(!bridge.ctx.registry().is_linked(LinkDirection::Inbound, "a"));
    assert!(bridge.ctx.registry().is_linked(LinkDirection::Inbound, "b"));
    assert!(bridge.ctx.inbound_pool().contains("b"));

    let b = TenantIdentity::new("b");
    assert_ok!(bridge.router.put(&b, "k", b"v".to_vec()).await);
    assert_eq!(
        bridge.router.get(&"a".into(), "k").await.unwrap_err(),
        BridgeError::Unauthorized
    );
}

#[tokio::test]
async fn test_relay_delivers_bucket_changes() {
    let bridge = bridge();
    assert_ok!(bridge.lifecycle.link_put(caller_link("writer", "stuff")).await);
    assert_ok!(bridge.lifecycle.link_put(watcher_link("watcher", "stuff")).await);
    wait_relaying(&bridge, "watcher").await;

    let writer = TenantIdentity::new("writer");
    assert_ok!(bridge.router.put(&writer, "k", b"v".to_vec()).await);
    assert_ok!(bridge.router.delete(&writer, "k").await);

    wait_until(|| bridge.sink.delivered_to("watcher").len() == 2).await;
    let ops: Vec<_> = bridge
        .sink
        .delivered_to("watcher")
        .into_iter()
        .map(|e| e.operation)
        .collect();
    assert_eq!(ops, vec![Operation::Put, Operation::Delete]);
}

#[tokio::test]
async fn test_new_watcher_receives_existing_keys() {
    let bridge = bridge();
    bridge.backend.seed(ADDRESS, "stuff", "existing", "1");

    assert_ok!(bridge.lifecycle.link_put(watcher_link("watcher", "stuff")).await);
    wait_until(|| bridge.sink.delivered_to("watcher").len() == 1).await;

    let replayed = &bridge.sink.delivered_to("watcher")[0];
    assert_eq!(replayed.key, "existing");
    assert_eq!(replayed.value, b"1".to_vec());
    assert_eq!(replayed.operation, Operation::Put);

    bridge.backend.seed(ADDRESS, "stuff", "later", "2");
    wait_until(|| bridge.sink.delivered_to("watcher").len() == 2).await;
    assert_eq!(bridge.sink.delivered_to("watcher")[1].key, "later");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_links_stay_isolated() {
    let bridge = Arc::new(bridge());

    let links = (0..8).map(|i| {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            let link = caller_link(&format!("svc-{i}"), &format!("bucket-{i}"));
            bridge.lifecycle.link_put(link).await
        })
    });
    for outcome in join_all(links).await {
        assert_ok!(outcome.unwrap());
    }
    assert_eq!(bridge.ctx.registry().len(LinkDirection::Inbound), 8);
    assert_eq!(bridge.backend.open_connections(), 8);

    let writes = (0..8).map(|i| {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            let caller = TenantIdentity::new(format!("svc-{i}"));
            bridge
                .router
                .put(&caller, "owner", caller.as_str().as_bytes().to_vec())
                .await
        })
    });
    for outcome in join_all(writes).await {
        assert_ok!(outcome.unwrap());
    }

    for i in 0..8 {
        let caller = TenantIdentity::new(format!("svc-{i}"));
        let keys = assert_ok!(bridge.router.list_keys(&caller).await);
        assert_eq!(keys, vec!["owner".to_string()]);
        let entry = assert_ok!(bridge.router.get(&caller, "owner").await);
        assert_eq!(entry.value, caller.as_str().as_bytes().to_vec());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_calls_racing_link_delete() {
    let bridge = Arc::new(bridge());
    assert_ok!(bridge.lifecycle.link_put(caller_link("leaving", "stuff")).await);
    assert_ok!(bridge.lifecycle.link_put(caller_link("staying", "stuff")).await);

    let calls: Vec<_> = (0..64)
        .map(|i| {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move {
                let caller = TenantIdentity::new("leaving");
                let key = format!("k{i}");
                bridge.router.put(&caller, &key, b"v".to_vec()).await
            })
        })
        .collect();

    let unlink = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            bridge
                .lifecycle
                .link_delete(LinkDirection::Inbound, "leaving")
                .await
        })
    };

    for outcome in join_all(calls).await {
        match outcome.unwrap() {
            Ok(()) | Err(BridgeError::Unauthorized) => {}
            // pool closed, registry entry not yet removed
            Err(BridgeError::InternalInconsistency(identity)) => assert_eq!(identity, "leaving"),
            Err(other) => panic!("unexpected outcome {other:?}"),
        }
    }
    unlink.await.unwrap();

    let err = assert_err!(bridge.router.put(&"leaving".into(), "late", b"v".to_vec()).await);
    assert_eq!(err, BridgeError::Unauthorized);
    assert!(bridge.ctx.registry().is_linked(LinkDirection::Inbound, "staying"));
    assert_ok!(bridge.router.put(&"staying".into(), "k", b"v".to_vec()).await);
    assert_eq!(bridge.backend.open_connections(), 1);
}

#[tokio::test]
async fn test_link_delete_stops_deliveries() {
    let bridge = bridge();
    assert_ok!(bridge.lifecycle.link_put(watcher_link("watcher", "stuff")).await);
    wait_relaying(&bridge, "watcher").await;

    bridge.backend.seed(ADDRESS, "stuff", "before", "1");
    wait_until(|| bridge.sink.delivered_to("watcher").len() == 1).await;

    tokio::time::timeout(
        Duration::from_secs(1),
        bridge.lifecycle.link_delete(LinkDirection::Outbound, "watcher"),
    )
    .await
    .unwrap();

    bridge.backend.seed(ADDRESS, "stuff", "after", "2");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(bridge.sink.delivered_to("watcher").len(), 1);
    assert_eq!(bridge.backend.watchers(ADDRESS, "stuff"), 0);
}

#[tokio::test]
async fn test_link_delete_abandons_slow_delivery() {
    let bridge = bridge_with_sink(RecordingSink::new().with_latency(Duration::from_secs(3600)));
    assert_ok!(bridge.lifecycle.link_put(watcher_link("watcher", "stuff")).await);
    wait_relaying(&bridge, "watcher").await;

    bridge.backend.seed(ADDRESS, "stuff", "k", "v");
    wait_until(|| bridge.sink.attempts() == 1).await;

    tokio::time::timeout(
        Duration::from_secs(1),
        bridge.lifecycle.link_delete(LinkDirection::Outbound, "watcher"),
    )
    .await
    .unwrap();
    assert_eq!(bridge.ctx.relays().active_count(), 0);
}

#[tokio::test]
async fn test_relink_replaces_relay() {
    let bridge = bridge();
    assert_ok!(bridge.lifecycle.link_put(watcher_link("watcher", "old")).await);
    assert_ok!(bridge.lifecycle.link_put(watcher_link("watcher", "new")).await);
    wait_relaying(&bridge, "watcher").await;

    assert_eq!(bridge.ctx.relays().active_count(), 1);
    assert_eq!(bridge.backend.watchers(ADDRESS, "old"), 0);
    assert_eq!(bridge.backend.watchers(ADDRESS, "new"), 1);
    assert_eq!(bridge.backend.open_connections(), 1);
}

#[tokio::test]
async fn test_shutdown_releases_everything() {
    let bridge = bridge();
    assert_ok!(bridge.lifecycle.link_put(caller_link("svc-1", "stuff")).await);
    assert_ok!(bridge.lifecycle.link_put(caller_link("svc-2", "stuff")).await);
    assert_ok!(bridge.lifecycle.link_put(watcher_link("watcher", "stuff")).await);
    assert_eq!(bridge.backend.open_connections(), 3);

    bridge.lifecycle.shutdown().await;

    assert_eq!(bridge.backend.open_connections(), 0);
    assert_eq!(bridge.ctx.relays().active_count(), 0);
    assert!(bridge.ctx.registry().is_empty());
    assert_eq!(
        bridge.router.get(&"svc-1".into(), "k").await.unwrap_err(),
        BridgeError::Unauthorized
    );
}

#[tokio::test]
async fn test_same_identity_in_both_roles() {
    let bridge = bridge();
    assert_ok!(bridge.lifecycle.link_put(caller_link("svc-1", "stuff")).await);
    assert_ok!(bridge.lifecycle.link_put(watcher_link("svc-1", "stuff")).await);
    assert_eq!(bridge.backend.open_connections(), 2);

    bridge.lifecycle.link_delete(LinkDirection::Outbound, "svc-1").await;
    assert!(bridge.ctx.registry().is_linked(LinkDirection::Inbound, "svc-1"));
    assert_ok!(bridge.router.list_keys(&"svc-1".into()).await);
}

#[tokio::test]
async fn test_credentials_are_validated_at_link_time() {
    let bridge = bridge();
    let link = caller_link("svc-1", "stuff").with_secret("nats-credentials", "%%%");

    let err = assert_err!(bridge.lifecycle.link_put(link).await);
    assert_eq!(err.kind(), "credentials");
    assert_eq!(bridge.backend.connects(), 0);
}
