//! End-to-end flow across two caches sharing one bus, standing in for two
//! bot processes of the same deployment.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use vigil_trigger::{
    connect_cache_to_bus, match_reaction, submit_command_tree, ApplicationCommandKind,
    CommandNode, CommandRegistrar, InProcessTriggerBus, MatcherConfig, MemoryTriggerStore,
    ReactionEvent, TenantId, Trigger, TriggerBus, TriggerCache, TriggerError, TriggerEventKind,
    TriggerId, TriggerMatcher, TriggerService, TriggerStore, TRIGGER_CACHE_TOPIC,
};

const TENANT: TenantId = TenantId(500);
const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(2);

async fn peer_caches() -> (Arc<TriggerCache>, Arc<TriggerCache>, Arc<InProcessTriggerBus>) {
    let bus = Arc::new(InProcessTriggerBus::new());
    let store = MemoryTriggerStore::new();

    let cache_a = Arc::new(TriggerCache::new());
    cache_a.load(&store, &[TENANT]).await;
    connect_cache_to_bus(&cache_a, bus.clone());

    let cache_b = Arc::new(TriggerCache::new());
    cache_b.load(&store, &[TENANT]).await;
    connect_cache_to_bus(&cache_b, bus.clone());

    (cache_a, cache_b, bus)
}

async fn wait_until(probe: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + VISIBILITY_TIMEOUT;
    while Instant::now() < deadline {
        if probe() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    probe()
}

#[tokio::test(flavor = "multi_thread")]
async fn integration_global_upsert_in_one_process_becomes_visible_in_the_peer() {
    let (cache_a, cache_b, _bus) = peer_caches().await;

    let row = Trigger::new(TriggerId(1), None, "motd", "welcome!");
    cache_a.upsert(None, row.clone()).await.expect("global upsert");

    let peer = Arc::clone(&cache_b);
    assert!(
        wait_until(move || {
            peer.get_all(None)
                .iter()
                .any(|candidate| candidate.id == row.id)
        })
        .await,
        "peer cache never observed the broadcast upsert"
    );

    cache_a.remove(None, TriggerId(1)).await.expect("global remove");
    let peer = Arc::clone(&cache_b);
    assert!(
        wait_until(move || peer.get_all(None).is_empty()).await,
        "peer cache never observed the broadcast remove"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn integration_tenant_mutations_stay_process_local() {
    let (cache_a, cache_b, _bus) = peer_caches().await;

    cache_a
        .upsert(Some(TENANT), Trigger::new(TriggerId(1), Some(TENANT), "ping", "pong"))
        .await
        .expect("tenant upsert");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cache_a.get_all(Some(TENANT)).len(), 1);
    assert!(cache_b.get_all(Some(TENANT)).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn integration_redelivered_broadcasts_apply_idempotently() {
    let (cache_a, cache_b, bus) = peer_caches().await;

    let row = Trigger::new(TriggerId(7), None, "motd", "hello");
    cache_a.upsert(None, row.clone()).await.expect("global upsert");

    let peer = Arc::clone(&cache_b);
    assert!(wait_until(move || peer.get_all(None).len() == 1).await);

    // Simulate at-least-once redelivery of the same envelope.
    let envelope = serde_json::json!({
        "schema_version": 1,
        "origin": "some-other-process",
        "event": { "type": "upsert", "trigger": serde_json::to_value(&row).expect("render") }
    });
    for _ in 0..3 {
        bus.publish(TRIGGER_CACHE_TOPIC, envelope.clone())
            .await
            .expect("redeliver");
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cache_b.get_all(None).len(), 1);
    assert_eq!(cache_a.get_all(None).len(), 1);
}

struct RecordingRegistrar {
    submissions: std::sync::Mutex<Vec<(TenantId, Vec<CommandNode>)>>,
}

#[async_trait]
impl CommandRegistrar for RecordingRegistrar {
    async fn overwrite_tenant_commands(
        &self,
        tenant_id: TenantId,
        commands: &[CommandNode],
    ) -> Result<(), TriggerError> {
        self.submissions
            .lock()
            .expect("submissions lock poisoned")
            .push((tenant_id, commands.to_vec()));
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn integration_admin_mutation_flows_through_matcher_and_registrar() {
    let store = Arc::new(MemoryTriggerStore::new());
    let cache = Arc::new(TriggerCache::new());
    cache.load(store.as_ref(), &[TENANT]).await;
    let service = TriggerService::new(store, Arc::clone(&cache));

    let mut row = Trigger::new(TriggerId(0), Some(TENANT), "ping", "pong");
    row.application_command_type = ApplicationCommandKind::Slash;
    let created = service.create_trigger(row).await.expect("create");

    let matcher = TriggerMatcher::new(MatcherConfig::default());
    let snapshot = cache.get_all(Some(TENANT));
    let hit = matcher
        .match_message("ping", &snapshot, None)
        .expect("created trigger should match");
    assert_eq!(hit.trigger.id, created.id);

    let registrar = RecordingRegistrar {
        submissions: std::sync::Mutex::new(Vec::new()),
    };
    let roots = service
        .sync_tenant_commands(TENANT, &registrar)
        .await
        .expect("submission");
    assert_eq!(roots, 1);
    let submissions = registrar.submissions.lock().expect("submissions lock poisoned");
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].0, TENANT);
    assert_eq!(submissions[0].1[0].name, "ping");
}

#[tokio::test(flavor = "multi_thread")]
async fn integration_conflicting_commands_block_submission_entirely() {
    let store = Arc::new(MemoryTriggerStore::new());
    let cache = Arc::new(TriggerCache::new());
    cache.load(store.as_ref(), &[TENANT]).await;

    for name in ["mod", "mod ban"] {
        let mut row = Trigger::new(TriggerId(0), Some(TENANT), name, "x");
        row.application_command_type = ApplicationCommandKind::Slash;
        let id = store.insert(&row).await.expect("insert");
        row.id = id;
        cache.upsert(Some(TENANT), row).await.expect("upsert");
    }

    let registrar = RecordingRegistrar {
        submissions: std::sync::Mutex::new(Vec::new()),
    };
    let error = submit_command_tree(&cache, TENANT, &registrar)
        .await
        .expect_err("conflict must fail closed");
    assert!(matches!(error, TriggerError::StructuralConflicts(_)));
    assert!(registrar
        .submissions
        .lock()
        .expect("submissions lock poisoned")
        .is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn integration_reaction_events_fire_every_matching_trigger() {
    let cache = Arc::new(TriggerCache::new());
    cache.load(&MemoryTriggerStore::new(), &[TENANT]).await;

    for (id, text) in [(1u64, "wave"), (2, "wave"), (3, "clap")] {
        let mut row = Trigger::new(TriggerId(id), Some(TENANT), text, "hi");
        row.valid_trigger_types = std::collections::BTreeSet::from([TriggerEventKind::Reaction]);
        cache.upsert(Some(TENANT), row).await.expect("upsert");
    }

    let snapshot = cache.get_all(Some(TENANT));
    let event = ReactionEvent {
        emote_name: "WAVE".to_string(),
        emote_id: None,
    };
    assert_eq!(match_reaction(&event, &snapshot).len(), 2);
}
