//! Typed accessor for instances, devices, profiles, pages and buttons.
//!
//! Every operation is a handful of [`Store`] calls plus key-prefix
//! filtering. Records are read and written whole; nothing here caches.

use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::keys::{self, DeviceKey, PageScope};
use super::records::{
    ButtonRecord, CurrentPointer, DeviceRecord, DeviceStatus, PageRecord, PageRef, ProfileRecord,
};
use crate::device::{Capabilities, DeviceModel};
use crate::error::{Result, SdError};
use crate::store::{DELIMITER, Store};

/// Listing passes made by a cascading delete before giving up on a key.
const CASCADE_PASSES: usize = 2;

/// What a new page is populated with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTemplate {
    pub segment: &'static str,
    pub slots: usize,
    /// Image of state `0` of every new button.
    pub default_image: String,
}

impl PageTemplate {
    pub fn new(caps: &Capabilities, default_image: impl Into<String>) -> Self {
        Self {
            segment: caps.segment,
            slots: caps.slot_count,
            default_image: default_image.into(),
        }
    }
}

/// Outcome of a best-effort cascading delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub deleted: usize,
    /// Keys that could not be deleted.
    pub failed: Vec<String>,
}

impl CascadeReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub(crate) fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| SdError::Malformed {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn encode<T: Serialize>(key: &str, record: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| SdError::Other(format!("Failed to encode {key}: {e}")))
}

#[derive(Clone)]
pub struct Hierarchy {
    store: Arc<dyn Store>,
}

impl Hierarchy {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let bytes = self.store.get(key).await?;
        decode(key, &bytes)
    }

    async fn put_json<T: Serialize + Sync>(&self, key: &str, record: &T) -> Result<()> {
        self.store.put(key, encode(key, record)?).await
    }

    async fn create_json<T: Serialize + Sync>(&self, key: &str, record: &T) -> Result<()> {
        self.store.create(key, encode(key, record)?).await
    }

    /// Direct children of `prefix`, skipping pointers, nested keys and
    /// undecodable records.
    async fn list_records<T: DeserializeOwned + Send>(&self, prefix: &str) -> Result<Vec<(String, T)>> {
        let found = self.store.list_keys(prefix).await?;
        let mut records = Vec::new();

        for key in &found {
            let Some(id) = keys::child_id(prefix, key) else {
                continue;
            };
            match self.get_json::<T>(key).await {
                Ok(record) => records.push((id.to_string(), record)),
                Err(e) if e.is_not_found() => trace!(%key, "Record vanished while listing"),
                Err(e @ SdError::Malformed { .. }) => {
                    warn!(%key, error = %e, "Skipping malformed record");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    async fn read_pointer(&self, key: &str) -> Result<Option<String>> {
        match self.get_json::<CurrentPointer>(key).await {
            Ok(pointer) if pointer.id.is_empty() => Ok(None),
            Ok(pointer) => Ok(Some(pointer.id)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn claim_pointer(&self, key: &str, id: &str) -> Result<bool> {
        match self.create_json(key, &CurrentPointer::new(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_conflict() => {
                debug!(%key, "Pointer already claimed");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete everything under `parent`, deepest keys first, then `parent`.
    ///
    /// Individual failures are logged and retried once on a second listing.
    async fn cascade(&self, parent: &str) -> Result<CascadeReport> {
        let prefix = format!("{parent}{DELIMITER}");
        let mut report = CascadeReport::default();

        for pass in 1..=CASCADE_PASSES {
            let mut remaining = match self.store.list_keys(&prefix).await {
                Ok(found) => found,
                Err(e) if pass == 1 => return Err(e),
                Err(e) => {
                    warn!(%prefix, error = %e, "Listing for cascade sweep failed");
                    report.failed.push(prefix.clone());
                    break;
                }
            };
            if remaining.is_empty() {
                break;
            }
            remaining.sort_by_key(|key| Reverse(key.matches(DELIMITER).count()));

            for key in remaining {
                match self.store.delete(&key).await {
                    Ok(()) => report.deleted += 1,
                    Err(e) => {
                        warn!(%key, pass, error = %e, "Cascade delete failed, continuing");
                        if pass == CASCADE_PASSES {
                            report.failed.push(key);
                        }
                    }
                }
            }
        }

        match self.store.delete(parent).await {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                warn!(key = %parent, error = %e, "Failed to delete record");
                report.failed.push(parent.to_string());
            }
        }
        Ok(report)
    }

    // --- instances and devices ---

    /// Instance ids that own at least one key.
    pub async fn list_instances(&self) -> Result<Vec<String>> {
        let prefix = keys::instances_prefix();
        let ids: BTreeSet<String> = self
            .store
            .list_keys(&prefix)
            .await?
            .iter()
            .filter_map(|key| key.strip_prefix(&prefix)?.split(DELIMITER).next())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        Ok(ids.into_iter().collect())
    }

    pub async fn get_device(&self, dk: &DeviceKey) -> Result<DeviceRecord> {
        self.get_json(&dk.record()).await
    }

    pub async fn put_device(&self, dk: &DeviceKey, record: &DeviceRecord) -> Result<()> {
        self.put_json(&dk.record(), record).await
    }

    pub async fn list_devices(&self, instance_id: &str) -> Result<Vec<DeviceRecord>> {
        let records = self.list_records(&keys::devices_prefix(instance_id)).await?;
        Ok(records.into_iter().map(|(_, record)| record).collect())
    }

    /// Upsert the device record as connected, keeping what others wrote.
    pub async fn mark_connected(&self, dk: &DeviceKey, model: DeviceModel) -> Result<DeviceRecord> {
        let now = Utc::now();
        let mut record = match self.get_device(dk).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => DeviceRecord::default(),
            Err(e @ SdError::Malformed { .. }) => {
                warn!(key = %dk.record(), error = %e, "Replacing malformed device record");
                DeviceRecord::default()
            }
            Err(e) => return Err(e),
        };

        record.id.clone_from(&dk.device_id);
        record.instance.clone_from(&dk.instance_id);
        record.model = model;
        record.status = DeviceStatus::Connected;
        record.created_at.get_or_insert(now);
        record.updated_at = Some(now);

        self.put_device(dk, &record).await?;
        info!(instance_id = %dk.instance_id, serial = %dk.device_id, %model, "Device marked connected");
        Ok(record)
    }

    /// Flip status to disconnected. The record itself is never removed.
    pub async fn mark_disconnected(&self, dk: &DeviceKey) -> Result<DeviceRecord> {
        let mut record = self.get_device(dk).await?;
        record.status = DeviceStatus::Disconnected;
        record.updated_at = Some(Utc::now());
        self.put_device(dk, &record).await?;
        info!(instance_id = %dk.instance_id, serial = %dk.device_id, "Device marked disconnected");
        Ok(record)
    }

    // --- profiles ---

    pub async fn get_profile(&self, dk: &DeviceKey, profile_id: &str) -> Result<ProfileRecord> {
        self.get_json(&dk.profile(profile_id)).await
    }

    pub async fn put_profile(&self, dk: &DeviceKey, profile: &ProfileRecord) -> Result<()> {
        self.put_json(&dk.profile(&profile.id), profile).await
    }

    /// Create a profile under a fresh id.
    pub async fn create_profile(&self, dk: &DeviceKey, name: &str) -> Result<ProfileRecord> {
        let profile = ProfileRecord::new(Uuid::new_v4().to_string(), name);
        self.create_json(&dk.profile(&profile.id), &profile).await?;
        debug!(serial = %dk.device_id, profile_id = %profile.id, name, "Profile created");
        Ok(profile)
    }

    pub async fn list_profiles(&self, dk: &DeviceKey) -> Result<Vec<ProfileRecord>> {
        let records = self.list_records(&dk.profiles_prefix()).await?;
        Ok(records.into_iter().map(|(_, record)| record).collect())
    }

    /// Delete a profile with all of its pages and buttons.
    ///
    /// When it was current, the pointer moves to another profile or is
    /// removed so the next bootstrap creates a fresh one.
    pub async fn delete_profile(&self, dk: &DeviceKey, profile_id: &str) -> Result<CascadeReport> {
        let report = self.cascade(&dk.profile(profile_id)).await?;

        if self.current_profile_id(dk).await?.as_deref() == Some(profile_id) {
            match self.list_profiles(dk).await?.first() {
                Some(next) => self.set_current_profile(dk, &next.id).await?,
                None => self.store.delete(&dk.current_profile()).await?,
            }
        }

        if report.is_complete() {
            info!(serial = %dk.device_id, profile_id, deleted = report.deleted, "Profile deleted");
        } else {
            warn!(
                serial = %dk.device_id,
                profile_id,
                failed = report.failed.len(),
                "Profile deleted with leftovers"
            );
        }
        Ok(report)
    }

    /// Active profile id; `None` when not configured yet.
    pub async fn current_profile_id(&self, dk: &DeviceKey) -> Result<Option<String>> {
        self.read_pointer(&dk.current_profile()).await
    }

    /// Create the current-profile pointer if absent. `false` when another
    /// writer got there first.
    pub async fn claim_current_profile(&self, dk: &DeviceKey, profile_id: &str) -> Result<bool> {
        let claimed = self.claim_pointer(&dk.current_profile(), profile_id).await?;
        if claimed {
            self.mirror_current_profile(dk, profile_id).await;
        }
        Ok(claimed)
    }

    pub async fn set_current_profile(&self, dk: &DeviceKey, profile_id: &str) -> Result<()> {
        self.put_json(&dk.current_profile(), &CurrentPointer::new(profile_id))
            .await?;
        self.mirror_current_profile(dk, profile_id).await;
        Ok(())
    }

    /// Copy the pointer into the device record for readers that only look there.
    async fn mirror_current_profile(&self, dk: &DeviceKey, profile_id: &str) {
        let result = match self.get_device(dk).await {
            Ok(mut record) if record.current_profile != profile_id => {
                record.current_profile = profile_id.to_string();
                self.put_device(dk, &record).await
            }
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(serial = %dk.device_id, profile_id, error = %e, "Could not mirror current profile");
        }
    }

    // --- pages ---

    pub async fn get_page(&self, dk: &DeviceKey, profile_id: &str, page_id: &str) -> Result<PageRecord> {
        self.get_json(&dk.page(profile_id, page_id)).await
    }

    pub async fn list_pages(&self, dk: &DeviceKey, profile_id: &str) -> Result<Vec<PageRecord>> {
        let records = self.list_records(&dk.pages_prefix(profile_id)).await?;
        Ok(records.into_iter().map(|(_, record)| record).collect())
    }

    /// Create a page with one button per slot and append it to the profile.
    ///
    /// The profile must already exist.
    pub async fn create_page(
        &self,
        dk: &DeviceKey,
        profile_id: &str,
        template: &PageTemplate,
    ) -> Result<PageRecord> {
        self.get_profile(dk, profile_id).await?;

        let page = PageRecord {
            id: Uuid::new_v4().to_string(),
        };
        self.create_json(&dk.page(profile_id, &page.id), &page).await?;

        let scope = PageScope::new(dk.clone(), profile_id, &page.id, template.segment);
        self.ensure_buttons(&scope, template).await?;

        let mut profile = self.get_profile(dk, profile_id).await?;
        if !profile.has_page(&page.id) {
            profile.pages.push(PageRef {
                id: page.id.clone(),
            });
        }
        if profile.current_page.is_empty() {
            profile.current_page.clone_from(&page.id);
        }
        self.put_profile(dk, &profile).await?;

        debug!(serial = %dk.device_id, profile_id, page_id = %page.id, "Page created");
        Ok(page)
    }

    /// Delete a page and its buttons.
    ///
    /// A current page is replaced by the previous page in the profile, the
    /// first one when there is no previous, or a new page when none remain.
    pub async fn delete_page(
        &self,
        dk: &DeviceKey,
        profile_id: &str,
        page_id: &str,
        template: &PageTemplate,
    ) -> Result<CascadeReport> {
        let report = self.cascade(&dk.page(profile_id, page_id)).await?;

        let replacement = match self.detach_page(dk, profile_id, page_id).await {
            Ok(replacement) => replacement,
            Err(e) if e.is_not_found() => {
                debug!(profile_id, page_id, "Profile gone, nothing to repoint");
                return Ok(report);
            }
            Err(e) => return Err(e),
        };

        let current = self.current_page_id(dk, profile_id).await?;
        if current.is_none() || current.as_deref() == Some(page_id) {
            let next = match replacement {
                Some(id) => id,
                None => self.create_page(dk, profile_id, template).await?.id,
            };
            self.set_current_page(dk, profile_id, &next).await?;
            info!(serial = %dk.device_id, profile_id, page_id = %next, "Current page moved");
        }
        Ok(report)
    }

    /// Delete a page nobody points at, without repointing anything.
    pub async fn discard_page(&self, dk: &DeviceKey, profile_id: &str, page_id: &str) -> Result<CascadeReport> {
        let report = self.cascade(&dk.page(profile_id, page_id)).await?;
        match self.detach_page(dk, profile_id, page_id).await {
            Ok(_) => Ok(report),
            Err(e) if e.is_not_found() => Ok(report),
            Err(e) => Err(e),
        }
    }

    /// Remove `page_id` from the profile's page list and return the page
    /// that should take its place.
    async fn detach_page(&self, dk: &DeviceKey, profile_id: &str, page_id: &str) -> Result<Option<String>> {
        let mut profile = self.get_profile(dk, profile_id).await?;

        let replacement = match profile.pages.iter().position(|p| p.id == page_id) {
            Some(0) => profile.pages.get(1),
            Some(index) => profile.pages.get(index - 1),
            None => profile.pages.first(),
        }
        .map(|p| p.id.clone());

        profile.pages.retain(|p| p.id != page_id);
        if profile.current_page == page_id {
            profile.current_page = replacement.clone().unwrap_or_default();
        }
        self.put_profile(dk, &profile).await?;
        Ok(replacement)
    }

    /// Active page id of a profile; `None` when not configured yet.
    pub async fn current_page_id(&self, dk: &DeviceKey, profile_id: &str) -> Result<Option<String>> {
        self.read_pointer(&dk.current_page(profile_id)).await
    }

    pub async fn claim_current_page(&self, dk: &DeviceKey, profile_id: &str, page_id: &str) -> Result<bool> {
        let claimed = self
            .claim_pointer(&dk.current_page(profile_id), page_id)
            .await?;
        if claimed {
            self.mirror_current_page(dk, profile_id, page_id).await;
        }
        Ok(claimed)
    }

    pub async fn set_current_page(&self, dk: &DeviceKey, profile_id: &str, page_id: &str) -> Result<()> {
        self.put_json(&dk.current_page(profile_id), &CurrentPointer::new(page_id))
            .await?;
        self.mirror_current_page(dk, profile_id, page_id).await;
        Ok(())
    }

    async fn mirror_current_page(&self, dk: &DeviceKey, profile_id: &str, page_id: &str) {
        let result = match self.get_profile(dk, profile_id).await {
            Ok(mut profile) if profile.current_page != page_id => {
                profile.current_page = page_id.to_string();
                self.put_profile(dk, &profile).await
            }
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(profile_id, page_id, error = %e, "Could not mirror current page");
        }
    }

    // --- buttons ---

    /// Create the default record of every slot that has none. Returns how
    /// many were created.
    pub async fn ensure_buttons(&self, scope: &PageScope, template: &PageTemplate) -> Result<usize> {
        let mut created = 0;
        for slot in 1..=template.slots {
            let button = ButtonRecord::unassigned(slot, template.default_image.as_str());
            match self.create_json(&scope.slot(slot), &button).await {
                Ok(()) => created += 1,
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }
        if created > 0 {
            debug!(page_id = %scope.page_id, created, "Default buttons created");
        }
        Ok(created)
    }

    pub async fn get_button(&self, scope: &PageScope, slot: usize) -> Result<ButtonRecord> {
        self.get_json(&scope.slot(slot)).await
    }

    pub async fn put_button(&self, scope: &PageScope, slot: usize, button: &ButtonRecord) -> Result<()> {
        self.put_json(&scope.slot(slot), button).await
    }

    /// Buttons of a page ordered by slot; rendered buffers are skipped.
    pub async fn list_buttons(&self, scope: &PageScope) -> Result<Vec<(usize, ButtonRecord)>> {
        let mut buttons: Vec<(usize, ButtonRecord)> = self
            .list_records(&scope.slots_prefix())
            .await?
            .into_iter()
            .filter_map(|(id, record)| Some((id.parse().ok()?, record)))
            .collect();
        buttons.sort_by_key(|(slot, _)| *slot);
        Ok(buttons)
    }

    /// Delete a button record and its rendered buffer.
    pub async fn delete_button(&self, scope: &PageScope, slot: usize) -> Result<()> {
        self.store.delete(&scope.buffer(slot)).await?;
        self.store.delete(&scope.slot(slot)).await
    }

    /// Store the rendered buffer next to a button key.
    pub async fn put_buffer(&self, slot_key: &str, buffer: Vec<u8>) -> Result<()> {
        self.store.put(&keys::buffer_key(slot_key), buffer).await
    }
}
