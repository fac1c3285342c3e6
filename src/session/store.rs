//! Encrypted on-disk session persistence
//!
//! The last session is written to ~/.config/murmur/session.enc, encrypted
//! with AES-256-GCM. The key is derived from machine-specific identifiers so
//! the file is useless when copied elsewhere.

use std::fs;
use std::path::{Path, PathBuf};

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use anyhow::{Context, Result, anyhow};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::models::Session;
use crate::paths;

const NONCE_SIZE: usize = 12;

/// Best-effort machine identifier
fn machine_id() -> String {
    #[cfg(target_os = "linux")]
    {
        for candidate in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
            if let Ok(id) = fs::read_to_string(candidate) {
                return id.trim().to_string();
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(output) = std::process::Command::new("ioreg")
            .args(["-rd1", "-c", "IOPlatformExpertDevice"])
            .output()
        {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if let Some(uuid) = stdout
                .lines()
                .find(|line| line.contains("IOPlatformUUID"))
                .and_then(|line| line.split('"').nth(3))
            {
                return uuid.to_string();
            }
        }
    }

    dirs::home_dir().map_or_else(|| "murmur-fallback-key".to_string(), |p| p.to_string_lossy().to_string())
}

/// Derive the file key from machine-specific data
fn derive_key() -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(machine_id().as_bytes());
    if let Some(home) = dirs::home_dir() {
        hasher.update(home.to_string_lossy().as_bytes());
    }
    hasher.update(b"murmur-session-v1");
    hasher.finalize().into()
}

/// Encrypted single-session file
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
    key: [u8; 32],
}

impl SessionStore {
    /// Store at the default location with the machine-derived key
    pub fn open_default() -> Result<Self> {
        Ok(Self::with_key(paths::session_path()?, derive_key()))
    }

    /// Store at `path` with an explicit key
    pub fn with_key(path: impl Into<PathBuf>, key: [u8; 32]) -> Self {
        Self {
            path: path.into(),
            key,
        }
    }

    /// File location
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key).map_err(|_| anyhow!("Invalid key length"))
    }

    /// Read the persisted session, if any
    pub fn load(&self) -> Result<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let encrypted = fs::read(&self.path).context("Failed to read session file")?;
        if encrypted.len() < NONCE_SIZE {
            return Ok(None);
        }

        let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher()?
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| anyhow!("Failed to decrypt session"))?;

        let session = serde_json::from_slice(&plaintext).context("Invalid session file")?;
        Ok(Some(session))
    }

    /// Persist a session, replacing any previous one
    pub fn save(&self, session: &Session) -> Result<()> {
        let json = serde_json::to_vec(session)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill(&mut nonce_bytes);

        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce_bytes), json.as_slice())
            .map_err(|_| anyhow!("Failed to encrypt session"))?;

        let mut output = nonce_bytes.to_vec();
        output.extend(ciphertext);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create session directory")?;
        }
        fs::write(&self.path, output).context("Failed to write session file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&self.path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&self.path, perms)?;
        }

        Ok(())
    }

    /// Forget the persisted session
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove session file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{User, UserMetadata};
    use tempfile::tempdir;

    fn session() -> Session {
        Session {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            expires_at: None,
            user: User {
                id: "u1".into(),
                email: Some("ada@example.com".into()),
                user_metadata: UserMetadata::default(),
            },
        }
    }

    #[test]
    fn test_save_load_clear() {
        let dir = tempdir().unwrap();
        let store = SessionStore::with_key(dir.path().join("session.enc"), [7; 32]);

        assert_eq!(store.load().unwrap(), None);
        store.save(&session()).unwrap();
        assert_eq!(store.load().unwrap(), Some(session()));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
        store.clear().unwrap();
    }

    #[test]
    fn test_file_is_not_plaintext() {
        let dir = tempdir().unwrap();
        let store = SessionStore::with_key(dir.path().join("session.enc"), [7; 32]);
        store.save(&session()).unwrap();

        let raw = fs::read(store.path()).unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("access"));
    }

    #[test]
    fn test_wrong_key_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.enc");
        SessionStore::with_key(&path, [1; 32]).save(&session()).unwrap();
        assert!(SessionStore::with_key(&path, [2; 32]).load().is_err());
    }
}
