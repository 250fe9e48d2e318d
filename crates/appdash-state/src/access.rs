//! Access gate over the cached user accounts.
//!
//! Identity is established upstream; the gate only answers whether a known
//! email may act. Anonymous callers are always denied and cloud admins are
//! always allowed.

use std::collections::BTreeMap;

use crate::error::StateResult;
use crate::store::StateStore;
use crate::types::AppId;

/// What an operation needs from its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// Any identified user.
    LoggedIn,
    /// A cloud administrator.
    AnyAdmin,
    /// An administrator of the given app.
    AppOwner(AppId),
    /// A user allowed to upload apps.
    CanUpload,
}

/// Decide whether `user` satisfies `requirement`.
///
/// Store failures propagate; an unknown user is simply denied.
pub fn authorize(
    store: &StateStore,
    user: Option<&str>,
    requirement: &Requirement,
) -> StateResult<bool> {
    let Some(email) = user else {
        return Ok(false);
    };
    if *requirement == Requirement::LoggedIn {
        return Ok(true);
    }
    let Some(account) = store.user_account(email)? else {
        return Ok(false);
    };
    if account.is_cloud_admin {
        return Ok(true);
    }
    Ok(match requirement {
        Requirement::LoggedIn => true,
        Requirement::AnyAdmin => false,
        Requirement::AppOwner(app_id) => account.owns(app_id),
        Requirement::CanUpload => account.can_upload_apps,
    })
}

/// Apps the user may see: every cached app for admins, the owned subset of
/// cached apps otherwise.
pub fn visible_apps(
    store: &StateStore,
    user: Option<&str>,
) -> StateResult<BTreeMap<AppId, Option<String>>> {
    let Some(email) = user else {
        return Ok(BTreeMap::new());
    };
    let Some(account) = store.user_account(email)? else {
        return Ok(BTreeMap::new());
    };
    let mut apps = store.app_entries()?;
    if !account.is_cloud_admin {
        apps.retain(|app_id, _| account.owns(app_id));
    }
    Ok(apps)
}
