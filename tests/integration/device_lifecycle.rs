//! Lifecycle watcher driving the device manager end to end.

use std::time::Duration;

use tokio::sync::watch;

use sds::device::{PRODUCT_ID_PEDAL, PRODUCT_ID_XL};
use sds::lifecycle::LifecycleWatcher;
use sds::model::{DeviceKey, DeviceStatus};

use crate::common::{INSTANCE, Rig, quiet_config, wait_until};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_plug_and_unplug_flip_device_status() {
    let rig = Rig::new();
    let manager = rig.manager(quiet_config());
    let mut watcher = LifecycleWatcher::new(
        INSTANCE,
        rig.devices.clone(),
        manager.clone(),
        Duration::from_millis(10),
    );

    rig.plug("ABC123", PRODUCT_ID_XL);
    let report = watcher.tick().await.unwrap();
    assert_eq!(report.connected, vec!["ABC123"]);

    let dk = DeviceKey::new(INSTANCE, "ABC123");
    let record = rig.hierarchy.get_device(&dk).await.unwrap();
    assert_eq!(record.status, DeviceStatus::Connected);
    assert_eq!(record.model.as_str(), "xl");
    assert!(record.created_at.is_some());
    let created = record.created_at;

    rig.devices.unplug("ABC123");
    let report = watcher.tick().await.unwrap();
    assert_eq!(report.disconnected, vec!["ABC123"]);
    assert!(manager.running().await.is_empty());

    let record = rig.hierarchy.get_device(&dk).await.unwrap();
    assert_eq!(record.status, DeviceStatus::Disconnected);

    // Replugging keeps the original creation time and profile
    let profile = rig.hierarchy.current_profile_id(&dk).await.unwrap();
    rig.plug("ABC123", PRODUCT_ID_XL);
    watcher.tick().await.unwrap();
    let record = rig.hierarchy.get_device(&dk).await.unwrap();
    assert_eq!(record.status, DeviceStatus::Connected);
    assert_eq!(record.created_at, created);
    assert_eq!(rig.hierarchy.current_profile_id(&dk).await.unwrap(), profile);

    manager.stop_all().await;
}

#[tokio::test]
async fn test_unknown_product_is_rejected_without_record() {
    let rig = Rig::new();
    let manager = rig.manager(quiet_config());
    let mut watcher = LifecycleWatcher::new(
        INSTANCE,
        rig.devices.clone(),
        manager.clone(),
        Duration::from_millis(10),
    );

    rig.plug("MK2", 0x0080);
    rig.plug("PEDAL1", PRODUCT_ID_PEDAL);
    let report = watcher.tick().await.unwrap();

    assert_eq!(report.rejected, vec!["MK2"]);
    assert_eq!(report.connected, vec!["PEDAL1"]);
    assert_eq!(manager.running().await, vec!["PEDAL1"]);

    let devices = rig.hierarchy.list_devices(INSTANCE).await.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id, "PEDAL1");

    manager.stop_all().await;
}

#[tokio::test]
async fn test_two_devices_run_independently() {
    let rig = Rig::new();
    let manager = rig.manager(quiet_config());
    let watcher = LifecycleWatcher::new(
        INSTANCE,
        rig.devices.clone(),
        manager.clone(),
        Duration::from_millis(10),
    );
    let (stop, shutdown) = watch::channel(false);
    let task = tokio::spawn(watcher.run(shutdown));

    let xl = rig.plug("ABC123", PRODUCT_ID_XL);
    rig.plug("PEDAL1", PRODUCT_ID_PEDAL);

    let probe = manager.clone();
    wait_until(WAIT, "both engines", || {
        let manager = probe.clone();
        async move { manager.running().await.len() == 2 }
    })
    .await;

    rig.devices.unplug("PEDAL1");
    let probe = manager.clone();
    wait_until(WAIT, "pedal engine stopped", || {
        let manager = probe.clone();
        async move { manager.running().await == vec!["ABC123".to_string()] }
    })
    .await;

    // The XL keeps serving presses after its neighbour left
    let dk = DeviceKey::new(INSTANCE, "ABC123");
    let profile_id = rig.hierarchy.current_profile_id(&dk).await.unwrap().unwrap();
    let page_id = rig.hierarchy.current_page_id(&dk, &profile_id).await.unwrap().unwrap();
    let scope = sds::model::PageScope::new(dk, profile_id, page_id, "buttons");
    let mut button = rig.hierarchy.get_button(&scope, 1).await.unwrap();
    button.uuid = "com.example.next-scene".to_string();
    rig.hierarchy.put_button(&scope, 1, &button).await.unwrap();
    xl.queue_tap(1);

    wait_until(WAIT, "press published", || {
        let bus = rig.bus.clone();
        async move { !bus.messages_on("com.example.next-scene").is_empty() }
    })
    .await;

    stop.send_replace(true);
    task.await.unwrap();
    manager.stop_all().await;
}
