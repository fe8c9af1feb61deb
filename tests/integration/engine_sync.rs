//! Sync engine against an in-memory store, bus and mock panel.

use std::time::Duration;

use serde_json::json;

use sds::codec::plus::LCD_COMMAND;
use sds::device::{DeviceModel, PRODUCT_ID_XL};
use sds::engine::{EngineConfig, EngineHandle, SyncEngine};
use sds::error::SdError;
use sds::model::{ButtonRecord, PageScope, PageTemplate};
use sds::store::Store;

use crate::common::{INSTANCE, Rig, quiet_config, wait_until, write_png};

const MUTE: &str = "com.example.toggle-mute";

/// Give slot 3 of the engine's page an action.
async fn assign_mute(rig: &Rig, engine: &EngineHandle) {
    let mut button = rig.hierarchy.get_button(engine.scope(), 3).await.unwrap();
    button.uuid = MUTE.to_string();
    rig.hierarchy.put_button(engine.scope(), 3, &button).await.unwrap();
}

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_fresh_xl_bootstraps_default_profile() {
    let rig = Rig::new();
    let (ctx, _channel) = rig.context("ABC123", DeviceModel::Xl, quiet_config());
    assert_eq!(DeviceModel::classify(0x0fd9, PRODUCT_ID_XL), DeviceModel::Xl);

    let engine = SyncEngine::start(ctx).await.unwrap();

    let pointer = rig
        .store
        .get("instances.inst1.devices.ABC123.profiles.current")
        .await
        .unwrap();
    let pointer: serde_json::Value = serde_json::from_slice(&pointer).unwrap();
    let profile_id = pointer["id"].as_str().unwrap().to_string();
    assert_eq!(profile_id, engine.scope().profile_id);

    let profile = rig
        .store
        .get(&format!("instances.inst1.devices.ABC123.profiles.{profile_id}"))
        .await
        .unwrap();
    let profile: serde_json::Value = serde_json::from_slice(&profile).unwrap();
    assert_eq!(profile["name"], "Default");
    assert_eq!(profile["currentPage"], json!(engine.scope().page_id));

    let buttons = rig.hierarchy.list_buttons(engine.scope()).await.unwrap();
    assert_eq!(buttons.len(), 32);
    assert!(buttons.iter().all(|(_, button)| !button.is_assigned()));

    engine.stop().await;
}

#[tokio::test]
async fn test_stored_buffer_reaches_the_key() {
    let rig = Rig::new();
    let (ctx, channel) = rig.context("ABC123", DeviceModel::Xl, quiet_config());
    let engine = SyncEngine::start(ctx).await.unwrap();

    rig.store
        .put(&engine.scope().buffer(7), vec![0x5A; 3000])
        .await
        .unwrap();

    wait_until(WAIT, "three frames for key 7", || {
        let channel = channel.clone();
        async move { channel.frames_for_slot(7).len() == 3 }
    })
    .await;
    assert!(channel.frames_for_slot(6).is_empty());

    engine.stop().await;
}

#[tokio::test]
async fn test_press_publishes_only_assigned_buttons() {
    let rig = Rig::new();
    let (ctx, channel) = rig.context("ABC123", DeviceModel::Xl, quiet_config());
    let engine = SyncEngine::start(ctx).await.unwrap();
    let scope = engine.scope().clone();

    let mut button = rig.hierarchy.get_button(&scope, 3).await.unwrap();
    button.uuid = "com.example.toggle-mute".to_string();
    button.title = "Mute".to_string();
    rig.hierarchy.put_button(&scope, 3, &button).await.unwrap();

    // Slot 5 still has no action; its press must be a no-op
    channel.queue_tap(5);
    channel.queue_tap(3);

    wait_until(WAIT, "action published", || {
        let bus = rig.bus.clone();
        async move { !bus.is_empty() }
    })
    .await;

    let messages = rig.bus.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].topic, "com.example.toggle-mute");
    let payload = messages[0].json().unwrap();
    assert_eq!(payload["uuid"], "com.example.toggle-mute");
    assert_eq!(payload["title"], "Mute");
    assert_eq!(payload["state"], "0");

    engine.stop().await;
}

#[tokio::test]
async fn test_button_edit_is_rendered_and_uploaded() {
    let rig = Rig::new();
    let assets = tempfile::tempdir().unwrap();
    write_png(assets.path(), "green.png", [20, 200, 20]);

    let config = EngineConfig {
        render_buffers: true,
        asset_dir: assets.path().to_path_buf(),
        ..quiet_config()
    };
    let (ctx, channel) = rig.context("ABC123", DeviceModel::Xl, config);
    let engine = SyncEngine::start(ctx).await.unwrap();
    let scope = engine.scope().clone();

    rig.hierarchy
        .put_button(&scope, 12, &ButtonRecord::unassigned(12, "green.png"))
        .await
        .unwrap();

    let store = rig.store.clone();
    let buffer_key = scope.buffer(12);
    wait_until(WAIT, "rendered buffer", || {
        let (store, key) = (store.clone(), buffer_key.clone());
        async move { store.get(&key).await.is_ok() }
    })
    .await;
    wait_until(WAIT, "key 12 upload", || {
        let channel = channel.clone();
        async move { !channel.frames_for_slot(12).is_empty() }
    })
    .await;

    engine.stop().await;
}

#[tokio::test]
async fn test_page_switch_follows_pointer_when_tracking() {
    let rig = Rig::new();
    let config = EngineConfig {
        track_pointer_changes: true,
        ..quiet_config()
    };
    let (ctx, channel) = rig.context("ABC123", DeviceModel::Xl, config);
    let dk = ctx.key.clone();
    let engine = SyncEngine::start(ctx).await.unwrap();
    let first = engine.scope().clone();

    let template = PageTemplate::new(&DeviceModel::Xl.capabilities(), "images/correct.png");
    let page = rig
        .hierarchy
        .create_page(&dk, &first.profile_id, &template)
        .await
        .unwrap();
    rig.hierarchy
        .set_current_page(&dk, &first.profile_id, &page.id)
        .await
        .unwrap();

    let second = PageScope::new(dk.clone(), first.profile_id.clone(), page.id.clone(), "buttons");
    let store = rig.store.clone();
    let channel_probe = channel.clone();
    let key = second.buffer(2);
    // The new page's watch may open after the first write, so keep rewriting
    wait_until(WAIT, "upload from the new page", || {
        let (store, channel, key) = (store.clone(), channel_probe.clone(), key.clone());
        async move {
            if channel.frames_for_slot(2).len() >= 4 {
                return true;
            }
            let _ = store.put(&key, vec![0x11; 3000]).await;
            false
        }
    })
    .await;

    // The old page no longer drives the keys
    let before = channel.frames_for_slot(9).len();
    rig.store.put(&first.buffer(9), vec![0x22; 100]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(channel.frames_for_slot(9).len(), before);

    engine.stop().await;
}

#[tokio::test]
async fn test_pedal_has_no_display_tasks() {
    let rig = Rig::new();
    let (ctx, channel) = rig.context("PEDAL1", DeviceModel::Pedal, EngineConfig::default());
    let engine = SyncEngine::start(ctx).await.unwrap();

    assert_eq!(engine.scope().segment, "switches");
    assert_eq!(rig.hierarchy.list_buttons(engine.scope()).await.unwrap().len(), 3);
    let switch_key = format!(
        "instances.{INSTANCE}.devices.PEDAL1.profiles.{}.pages.{}.switches.3",
        engine.scope().profile_id,
        engine.scope().page_id
    );
    assert!(rig.store.get(&switch_key).await.is_ok());

    engine.stop().await;
    channel.assert_no_writes();
}

#[tokio::test]
async fn test_plus_dials_and_touch_strip() {
    let rig = Rig::new();
    let (ctx, channel) = rig.context("PLUS1", DeviceModel::Plus, quiet_config());
    let engine = SyncEngine::start(ctx).await.unwrap();

    // Blank layout still draws the strip once at startup
    assert!(channel.frames().iter().any(|frame| frame.get(1) == Some(&LCD_COMMAND)));

    let mut report = vec![0x01, 0x03, 0x05, 0x00, 0x01, 0xFF, 0x00, 0x00, 0x00];
    report.resize(64, 0);
    channel.queue_report(report);

    wait_until(WAIT, "dial event", || {
        let bus = rig.bus.clone();
        async move { !bus.is_empty() }
    })
    .await;

    let messages = rig.bus.messages_on("instances.inst1.devices.PLUS1.dials.1");
    assert_eq!(messages.len(), 1);
    let event = messages[0].json().unwrap();
    assert_eq!(event["isTurning"], true);
    assert_eq!(event["direction"], -1);

    engine.stop().await;
}

#[tokio::test]
async fn test_read_error_does_not_stop_the_reader() {
    let rig = Rig::new();
    let (ctx, channel) = rig.context("ABC123", DeviceModel::Xl, quiet_config());
    let engine = SyncEngine::start(ctx).await.unwrap();
    assign_mute(&rig, &engine).await;

    channel.inject_error(SdError::DeviceCommunication("transfer aborted".to_string()));
    channel.queue_tap(3);

    wait_until(WAIT, "action after a failed read", || {
        let bus = rig.bus.clone();
        async move { !bus.is_empty() }
    })
    .await;

    assert_eq!(rig.bus.messages_on(MUTE).len(), 1);
    assert!(engine.is_running());
    channel.assert_no_writes();

    engine.stop().await;
}

#[tokio::test]
async fn test_press_during_store_outage_is_dropped() {
    let rig = Rig::new();
    let (ctx, channel) = rig.context("ABC123", DeviceModel::Xl, quiet_config());
    let engine = SyncEngine::start(ctx).await.unwrap();
    assign_mute(&rig, &engine).await;

    rig.store.set_unavailable(true);
    channel.queue_tap(3);
    wait_until(WAIT, "reports consumed", || {
        let channel = channel.clone();
        async move { channel.pending_reports() == 0 }
    })
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(rig.bus.is_empty());
    assert!(engine.is_running());

    rig.store.set_unavailable(false);
    channel.queue_tap(3);
    wait_until(WAIT, "action after the outage", || {
        let bus = rig.bus.clone();
        async move { !bus.is_empty() }
    })
    .await;

    let messages = rig.bus.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].topic, MUTE);

    engine.stop().await;
}
