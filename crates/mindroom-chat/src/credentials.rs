//! Per-entity session credential cache: one JSON file per bot account under
//! a configurable directory, owner-only permissions on Unix. Mirrors the
//! teacher's "read a long-lived token from a file path" providers
//! (`CopilotConfig::token_path`, `QwenOAuthConfig::credentials_path`), but
//! owns both the read and the write side since bots persist a session
//! token themselves after login rather than expecting a setup script to
//! have written one.

use std::path::PathBuf;

use crate::error::Result;
use crate::types::BotCredentials;

pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, entity_id: &str) -> PathBuf {
        self.dir.join(format!("{entity_id}.json"))
    }

    pub fn load(&self, entity_id: &str) -> Result<Option<BotCredentials>> {
        let path = self.path_for(entity_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let creds: BotCredentials = serde_json::from_str(&content)?;
        Ok(Some(creds))
    }

    pub fn save(&self, creds: &BotCredentials) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&creds.entity_id);
        let content = serde_json::to_string_pretty(creds)?;
        std::fs::write(&path, content)?;
        set_owner_only(&path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_owner_only(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only(_path: &std::path::Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        let creds = BotCredentials {
            entity_id: "agent-a".to_string(),
            homeserver: "https://matrix.example.org".to_string(),
            user_id: "@agent-a:example.org".to_string(),
            access_token: "syt_abc123".to_string(),
        };
        store.save(&creds).unwrap();
        let loaded = store.load("agent-a").unwrap().unwrap();
        assert_eq!(loaded.access_token, "syt_abc123");
    }

    #[test]
    fn missing_entity_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        assert!(store.load("ghost").unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        let creds = BotCredentials {
            entity_id: "agent-a".to_string(),
            homeserver: "https://matrix.example.org".to_string(),
            user_id: "@agent-a:example.org".to_string(),
            access_token: "secret".to_string(),
        };
        store.save(&creds).unwrap();
        let meta = std::fs::metadata(dir.path().join("agent-a.json")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }
}
