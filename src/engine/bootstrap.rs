//! Default profile and page bootstrap.
//!
//! Pointers are claimed with create-if-absent so concurrent instances agree
//! on one winner; every path re-reads the pointer at the end instead of
//! trusting what it wrote.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::DeviceContext;
use crate::error::{Result, SdError};
use crate::model::{DeviceKey, Hierarchy, PageScope, PageTemplate};

/// Attempts made while a pointer names a record that is not written yet.
const BOOTSTRAP_ATTEMPTS: u32 = 5;
const BOOTSTRAP_RETRY: Duration = Duration::from_millis(200);

/// Ensure the device has a current profile and page, with a button record
/// for every slot of that page.
pub async fn bootstrap(ctx: &DeviceContext) -> Result<PageScope> {
    let template = ctx.page_template();
    let mut attempt = 1;

    loop {
        match try_bootstrap(&ctx.hierarchy, &ctx.key, &ctx.config.default_profile_name, &template).await {
            Ok(scope) => {
                info!(
                    serial = %ctx.serial(),
                    profile_id = %scope.profile_id,
                    page_id = %scope.page_id,
                    "Bootstrap complete"
                );
                return Ok(scope);
            }
            Err(e) if e.is_not_found() && attempt < BOOTSTRAP_ATTEMPTS => {
                debug!(serial = %ctx.serial(), attempt, error = %e, "Hierarchy not configured yet, retrying");
                tokio::time::sleep(BOOTSTRAP_RETRY).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn try_bootstrap(
    hierarchy: &Hierarchy,
    dk: &DeviceKey,
    profile_name: &str,
    template: &PageTemplate,
) -> Result<PageScope> {
    let profile_id = ensure_current_profile(hierarchy, dk, profile_name).await?;
    let page_id = ensure_current_page(hierarchy, dk, &profile_id, template).await?;

    // A pointer may be visible before its target; treat that as not yet configured
    hierarchy.get_page(dk, &profile_id, &page_id).await?;

    let scope = PageScope::new(dk.clone(), profile_id, page_id, template.segment);
    hierarchy.ensure_buttons(&scope, template).await?;
    Ok(scope)
}

/// Current profile id, creating and claiming a profile named `name` when
/// the device has none.
pub async fn ensure_current_profile(hierarchy: &Hierarchy, dk: &DeviceKey, name: &str) -> Result<String> {
    if let Some(id) = hierarchy.current_profile_id(dk).await? {
        return Ok(id);
    }

    // Adopt a profile the device record already names
    let adopted = match hierarchy.get_device(dk).await {
        Ok(device) if !device.current_profile.is_empty() => hierarchy
            .get_profile(dk, &device.current_profile)
            .await
            .ok()
            .map(|profile| profile.id),
        _ => None,
    };

    let (candidate, created) = match adopted {
        Some(id) => (id, false),
        None => (hierarchy.create_profile(dk, name).await?.id, true),
    };

    if !hierarchy.claim_current_profile(dk, &candidate).await? {
        info!(serial = %dk.device_id, "Another instance set the current profile first");
        if created {
            if let Err(e) = hierarchy.delete_profile(dk, &candidate).await {
                warn!(profile_id = %candidate, error = %e, "Failed to discard unused profile");
            }
        }
    }

    hierarchy
        .current_profile_id(dk)
        .await?
        .ok_or_else(|| SdError::NotFound {
            key: dk.current_profile(),
        })
}

/// Current page id of `profile_id`, adopting or creating a page when the
/// profile has no pointer yet.
pub async fn ensure_current_page(
    hierarchy: &Hierarchy,
    dk: &DeviceKey,
    profile_id: &str,
    template: &PageTemplate,
) -> Result<String> {
    if let Some(id) = hierarchy.current_page_id(dk, profile_id).await? {
        return Ok(id);
    }

    let profile = hierarchy.get_profile(dk, profile_id).await?;
    let mut adopted = None;
    for id in std::iter::once(&profile.current_page).chain(profile.pages.iter().map(|p| &p.id)) {
        if !id.is_empty() && hierarchy.get_page(dk, profile_id, id).await.is_ok() {
            adopted = Some(id.clone());
            break;
        }
    }

    let (candidate, created) = match adopted {
        Some(id) => (id, false),
        None => (hierarchy.create_page(dk, profile_id, template).await?.id, true),
    };

    if !hierarchy.claim_current_page(dk, profile_id, &candidate).await? {
        info!(serial = %dk.device_id, profile_id, "Another instance set the current page first");
        if created {
            if let Err(e) = hierarchy.discard_page(dk, profile_id, &candidate).await {
                warn!(page_id = %candidate, error = %e, "Failed to discard unused page");
            }
        }
    }

    hierarchy
        .current_page_id(dk, profile_id)
        .await?
        .ok_or_else(|| SdError::NotFound {
            key: dk.current_page(profile_id),
        })
}

/// Page the device is currently on, read fresh from the pointers.
pub async fn current_scope(ctx: &DeviceContext) -> Result<PageScope> {
    let dk = &ctx.key;
    let profile_id = ctx
        .hierarchy
        .current_profile_id(dk)
        .await?
        .ok_or_else(|| SdError::NotFound {
            key: dk.current_profile(),
        })?;
    let page_id = ctx
        .hierarchy
        .current_page_id(dk, &profile_id)
        .await?
        .ok_or_else(|| SdError::NotFound {
            key: dk.current_page(&profile_id),
        })?;
    Ok(PageScope::new(dk.clone(), profile_id, page_id, ctx.caps.segment))
}
