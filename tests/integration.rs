//! Integration tests for the sync engine.

use chrono::NaiveDate;
use podsync::{
    ActionKind, ActionQuery, DeviceType, DeviceUpdate, EpisodeAction, Offset, StoreConfig,
    SubscriptionChanges, SubscriptionQuery, SyncCoordinator, SyncStore, Version,
};
use std::sync::Arc;
use tempfile::TempDir;

fn test_store(dir: &TempDir) -> SyncStore {
    SyncStore::create(StoreConfig {
        path: dir.path().join("store"),
        snapshot_cache_size: 64,
        ..Default::default()
    })
    .unwrap()
}

fn coordinator(dir: &TempDir) -> SyncCoordinator {
    SyncCoordinator::new(Arc::new(test_store(dir)))
}

fn changes(add: &[&str], remove: &[&str]) -> SubscriptionChanges {
    SubscriptionChanges {
        add: add.iter().map(|s| s.to_string()).collect(),
        remove: remove.iter().map(|s| s.to_string()).collect(),
    }
}

fn since(v: u64) -> SubscriptionQuery {
    SubscriptionQuery {
        since: Some(Version(v)),
    }
}

fn play(episode: &str) -> EpisodeAction {
    let ts = NaiveDate::from_ymd_opt(2022, 5, 1)
        .unwrap()
        .and_hms_opt(8, 30, 0)
        .unwrap();
    EpisodeAction::new("http://feed", episode, "phone", ActionKind::Play, ts)
}

// --- Protocol Scenarios ---

#[test]
fn test_subscription_round_trip_scenario() {
    let dir = TempDir::new().unwrap();
    let sync = coordinator(&dir);

    let up = sync
        .push_subscriptions("alice", "phone", &changes(&["http://a"], &[]))
        .unwrap();
    assert_eq!(up.timestamp, 1);

    let down = sync.pull_subscriptions("alice", "phone", &since(0)).unwrap();
    assert_eq!(down.add, vec!["http://a".to_string()]);
    assert!(down.remove.is_empty());
    assert_eq!(down.timestamp, Version(1));

    let up = sync
        .push_subscriptions("alice", "phone", &changes(&[], &["http://a"]))
        .unwrap();
    assert_eq!(up.timestamp, 2);

    let down = sync.pull_subscriptions("alice", "phone", &since(1)).unwrap();
    assert!(down.add.is_empty());
    assert_eq!(down.remove, vec!["http://a".to_string()]);
    assert_eq!(down.timestamp, Version(2));
}

#[test]
fn test_action_log_scenario() {
    let dir = TempDir::new().unwrap();
    let sync = coordinator(&dir);

    assert_eq!(sync.push_actions("alice", &[play("e1")]).unwrap().timestamp, 1);
    assert_eq!(sync.push_actions("alice", &[play("e2")]).unwrap().timestamp, 2);

    let page = sync
        .pull_actions(
            "alice",
            &ActionQuery {
                since: Some(Offset(1)),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(page.actions, vec![play("e2")]);
    assert_eq!(page.timestamp, Offset(2));
}

// --- Realistic Workflow Tests ---

#[test]
fn test_client_catch_up_workflow() {
    let dir = TempDir::new().unwrap();
    let sync = coordinator(&dir);

    // Client registers and uploads its initial feeds
    sync.update_device(
        "alice",
        "phone",
        &DeviceUpdate::new("gPodder on pixel", DeviceType::Mobile),
    )
    .unwrap();
    sync.push_subscriptions(
        "alice",
        "phone",
        &changes(&["http://a", "http://b", "http://c"], &[]),
    )
    .unwrap();

    // Client remembers cursor 1, server state moves on
    sync.push_subscriptions("alice", "phone", &changes(&["http://d"], &["http://b"]))
        .unwrap();
    sync.push_subscriptions("alice", "phone", &changes(&["http://b"], &["http://c"]))
        .unwrap();

    let delta = sync.pull_subscriptions("alice", "phone", &since(1)).unwrap();
    assert_eq!(delta.add, vec!["http://d".to_string()]);
    assert_eq!(delta.remove, vec!["http://c".to_string()]);
    assert_eq!(delta.timestamp, Version(3));

    // Caught-up client sees nothing new
    let delta = sync.pull_subscriptions("alice", "phone", &since(3)).unwrap();
    assert!(delta.add.is_empty());
    assert!(delta.remove.is_empty());

    let devices = sync.list_devices("alice").unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].caption, "gPodder on pixel");
    assert_eq!(devices[0].subscriptions, 3);
}

#[test]
fn test_default_since_returns_full_state() {
    let dir = TempDir::new().unwrap();
    let sync = coordinator(&dir);

    sync.push_subscriptions("alice", "phone", &changes(&["http://a", "http://b"], &[]))
        .unwrap();

    let delta = sync
        .pull_subscriptions("alice", "phone", &SubscriptionQuery::default())
        .unwrap();
    assert_eq!(delta.add.len(), 2);

    sync.push_actions("alice", &[play("e1"), play("e2")]).unwrap();
    let page = sync.pull_actions("alice", &ActionQuery::default()).unwrap();
    assert_eq!(page.actions.len(), 2);
}

#[test]
fn test_actions_shared_across_devices() {
    let dir = TempDir::new().unwrap();
    let sync = coordinator(&dir);

    let mut laptop_action = play("e1");
    laptop_action.device = "laptop".into();
    laptop_action = laptop_action.with_playback(0, 300, 1800).with_guid("guid-1");

    sync.push_actions("alice", &[play("e0")]).unwrap();
    sync.push_actions("alice", &[laptop_action.clone()]).unwrap();

    // The phone catches up from its cursor and sees the laptop's progress
    let page = sync
        .pull_actions(
            "alice",
            &ActionQuery {
                since: Some(Offset(1)),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(page.actions, vec![laptop_action]);
    assert_eq!(page.actions[0].position, Some(300));
}

#[test]
fn test_state_survives_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let sync = coordinator(&dir);
        sync.push_subscriptions("alice", "phone", &changes(&["http://a"], &[]))
            .unwrap();
        sync.push_subscriptions("alice", "phone", &changes(&["http://b"], &[]))
            .unwrap();
        sync.push_actions("alice", &[play("e1"), play("e2"), play("e3")])
            .unwrap();
    }

    let store = SyncStore::open(StoreConfig {
        path: dir.path().join("store"),
        ..Default::default()
    })
    .unwrap();
    let sync = SyncCoordinator::new(Arc::new(store));

    let delta = sync.pull_subscriptions("alice", "phone", &since(1)).unwrap();
    assert_eq!(delta.add, vec!["http://b".to_string()]);
    assert_eq!(delta.timestamp, Version(2));

    let up = sync
        .push_subscriptions("alice", "phone", &changes(&["http://c"], &[]))
        .unwrap();
    assert_eq!(up.timestamp, 3);

    let up = sync.push_actions("alice", &[play("e4")]).unwrap();
    assert_eq!(up.timestamp, 4);
}

#[test]
fn test_users_never_see_each_other() {
    let dir = TempDir::new().unwrap();
    let sync = coordinator(&dir);

    sync.push_subscriptions("alice", "phone", &changes(&["http://a"], &[]))
        .unwrap();
    sync.push_actions("alice", &[play("e1")]).unwrap();

    let delta = sync.pull_subscriptions("bob", "phone", &since(0)).unwrap();
    assert!(delta.add.is_empty());
    assert_eq!(delta.timestamp, Version(0));

    let page = sync.pull_actions("bob", &ActionQuery::default()).unwrap();
    assert!(page.actions.is_empty());
    assert_eq!(page.timestamp, Offset(0));
    assert!(sync.list_devices("bob").unwrap().is_empty());
}

#[test]
fn test_wire_json_round_trip() {
    let dir = TempDir::new().unwrap();
    let sync = coordinator(&dir);

    let body = r#"[
        {"podcast": "http://example.com/feed.rss",
         "episode": "http://example.com/files/s01e20.mp3",
         "device": "gpodder_abcdef123",
         "action": "download",
         "timestamp": "2009-12-12T09:00:00"},
        {"podcast": "http://example.org/podcast.php",
         "episode": "http://ftp.example.org/foo.ogg",
         "device": "gpodder_abcdef123",
         "action": "play",
         "started": 15,
         "position": 120,
         "total":  500,
         "timestamp": "2009-12-12T09:05:21"}
    ]"#;
    let actions: Vec<EpisodeAction> = serde_json::from_str(body).unwrap();
    let up = sync.push_actions("alice", &actions).unwrap();
    assert_eq!(serde_json::to_value(&up).unwrap()["timestamp"], 2);

    let page = sync.pull_actions("alice", &ActionQuery::default()).unwrap();
    let json = serde_json::to_value(&page).unwrap();
    assert_eq!(json["timestamp"], 2);
    assert_eq!(json["actions"][0]["timestamp"], "2009-12-12T09:00:00");
    assert_eq!(json["actions"][1]["total"], 500);
    assert!(json["actions"][0].get("position").is_none());
}
