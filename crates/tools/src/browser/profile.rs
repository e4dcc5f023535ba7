//! Locate the Chrome profile directory signed in with a given account.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::launcher::ChromeChannel;

/// Profiles scanned when `Local State` has no match.
const MAX_NUMBERED_PROFILES: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileLocation {
    pub user_data_dir: PathBuf,
    pub profile_directory: String,
}

pub fn find_profile_dir_by_email(email: &str, channel: ChromeChannel) -> Option<ProfileLocation> {
    let user_data_dir = channel.user_data_dir()?;
    find_profile_in(&user_data_dir, email)
}

/// Search `Local State` first, then each profile's `Preferences`.
/// Unreadable or malformed files are skipped.
pub fn find_profile_in(user_data_dir: &Path, email: &str) -> Option<ProfileLocation> {
    let needle = email.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    let found = |dir: &str| ProfileLocation {
        user_data_dir: user_data_dir.to_path_buf(),
        profile_directory: dir.to_string(),
    };

    if let Some(dir) = search_local_state(&user_data_dir.join("Local State"), &needle) {
        return Some(found(&dir));
    }

    let numbered = (1..=MAX_NUMBERED_PROFILES).map(|i| format!("Profile {}", i));
    for dir in std::iter::once("Default".to_string()).chain(numbered) {
        let prefs = user_data_dir.join(&dir).join("Preferences");
        match std::fs::read_to_string(&prefs) {
            Ok(text) if text.to_lowercase().contains(&needle) => return Some(found(&dir)),
            Ok(_) => {}
            Err(e) => debug!(path = %prefs.display(), error = %e, "Skipping profile preferences"),
        }
    }
    None
}

fn search_local_state(path: &Path, needle: &str) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let state: Value = serde_json::from_str(&raw).ok()?;
    let profile = state.get("profile")?;
    let info = profile
        .get("info_cache")
        .or_else(|| profile.get("profiles"))?
        .as_object()?;

    info.iter()
        .find(|(_, meta)| meta.to_string().to_lowercase().contains(needle))
        .map(|(dir, _)| dir.clone())
}
