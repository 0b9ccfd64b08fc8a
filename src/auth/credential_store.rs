//! Credential Storage
//! Mission: Own the username -> credential mapping and the bootstrap admin

use crate::auth::models::{Credential, Role, UserSummary};
use crate::crypto::{self, CryptoError};
use anyhow::{Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const SCHEMA_VERSION: u32 = 1;
const MIN_PASSWORD_CODEPOINTS: usize = 8;
const MAX_USERNAME_LEN: usize = 64;

/// Typed failures raised by the credential store.
#[derive(Debug, PartialEq, Eq)]
pub enum CredentialError {
    Conflict,
    Invalid(&'static str),
    Unauthorized,
    Forbidden,
    NotFound,
    Io(String),
}

impl std::fmt::Display for CredentialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialError::Conflict => write!(f, "username already exists"),
            CredentialError::Invalid(reason) => write!(f, "invalid input: {}", reason),
            CredentialError::Unauthorized => write!(f, "invalid username or password"),
            CredentialError::Forbidden => write!(f, "operation not permitted"),
            CredentialError::NotFound => write!(f, "user not found"),
            CredentialError::Io(detail) => write!(f, "credential persistence failed: {}", detail),
        }
    }
}

impl std::error::Error for CredentialError {}

/// Serialized shape of the sealed credentials file.
#[derive(serde::Serialize, serde::Deserialize)]
struct CredentialsFile {
    schema_version: u32,
    users: BTreeMap<String, Credential>,
}

/// Credential store backed by one sealed file. Every mutation re-seals the
/// full mapping and installs it with an atomic rename.
pub struct CredentialStore {
    path: PathBuf,
    key: Option<[u8; crypto::KEY_SIZE]>,
    bootstrap_admin: String,
    dummy_hash: String,
    users: RwLock<BTreeMap<String, Credential>>,
}

impl CredentialStore {
    /// Open the store, rehydrating from the sealed file when present and
    /// creating the bootstrap admin when absent. A corrupt file is fatal:
    /// the operator is expected to restore a backup.
    pub fn open(
        path: &Path,
        key: Option<[u8; crypto::KEY_SIZE]>,
        admin_username: &str,
        admin_password: &str,
    ) -> Result<Self> {
        let mut users = if path.exists() {
            let raw = fs::read(path)
                .with_context(|| format!("Failed to read credentials file {}", path.display()))?;
            let envelope: crypto::SealedFile = serde_json::from_slice(&raw)
                .context("Credentials file envelope is not valid JSON")?;
            let body = crypto::open_envelope(key.as_ref(), &envelope)
                .context("Credentials file failed decryption or integrity check")?;
            let file: CredentialsFile =
                serde_json::from_slice(&body).context("Credentials file body is schema-invalid")?;
            if file.schema_version != SCHEMA_VERSION {
                anyhow::bail!(
                    "Unsupported credentials schema version {}",
                    file.schema_version
                );
            }
            file.users
        } else {
            BTreeMap::new()
        };

        let created_admin = if !users.contains_key(admin_username) {
            let password_hash =
                hash(admin_password, DEFAULT_COST).context("Failed to hash admin password")?;
            users.insert(
                admin_username.to_string(),
                Credential {
                    username: admin_username.to_string(),
                    password_hash,
                    role: Role::Admin,
                    created_at: Utc::now().to_rfc3339(),
                },
            );
            true
        } else {
            false
        };

        // Hashed once so authenticate() can burn the same work for unknown
        // usernames as for known ones.
        let dummy_hash =
            hash("spintrack-dummy-password", DEFAULT_COST).context("Failed to hash dummy")?;

        let store = Self {
            path: path.to_path_buf(),
            key,
            bootstrap_admin: admin_username.to_string(),
            dummy_hash,
            users: RwLock::new(users),
        };

        if created_admin {
            store
                .persist(&store.users.read())
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            info!(username = admin_username, "Bootstrap admin created");
        }

        Ok(store)
    }

    /// Register a new user with role `user`.
    pub fn register(&self, username: &str, password: &str) -> Result<Credential, CredentialError> {
        validate_username(username)?;
        if password.chars().count() < MIN_PASSWORD_CODEPOINTS {
            return Err(CredentialError::Invalid(
                "password must be at least 8 characters",
            ));
        }

        {
            let users = self.users.read();
            if users.contains_key(username) {
                return Err(CredentialError::Conflict);
            }
        }

        let password_hash = hash(password, DEFAULT_COST)
            .map_err(|e| CredentialError::Io(format!("hash failure: {e}")))?;

        let credential = Credential {
            username: username.to_string(),
            password_hash,
            role: Role::User,
            created_at: Utc::now().to_rfc3339(),
        };

        let mut users = self.users.write();
        // Re-check under the write lock; a concurrent register may have won.
        if users.contains_key(username) {
            return Err(CredentialError::Conflict);
        }
        users.insert(username.to_string(), credential.clone());

        if let Err(e) = self.persist(&users) {
            users.remove(username);
            return Err(e);
        }

        info!(username, "User registered");
        Ok(credential)
    }

    /// Verify a username/password pair. Unknown usernames burn a dummy
    /// bcrypt verification so response latency does not reveal existence.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Credential, CredentialError> {
        let credential = { self.users.read().get(username).cloned() };

        match credential {
            Some(credential) => {
                let valid = verify(password, &credential.password_hash)
                    .map_err(|e| CredentialError::Io(format!("verify failure: {e}")))?;
                if valid {
                    Ok(credential)
                } else {
                    Err(CredentialError::Unauthorized)
                }
            }
            None => {
                let _ = verify(password, &self.dummy_hash);
                Err(CredentialError::Unauthorized)
            }
        }
    }

    /// Sanitized listing of every credential, username-ordered.
    pub fn list(&self) -> Vec<UserSummary> {
        self.users
            .read()
            .values()
            .map(UserSummary::from_credential)
            .collect()
    }

    pub fn user_count(&self) -> usize {
        self.users.read().len()
    }

    /// Delete a credential. The bootstrap admin is protected.
    pub fn delete(&self, username: &str) -> Result<(), CredentialError> {
        if username == self.bootstrap_admin {
            return Err(CredentialError::Forbidden);
        }

        let mut users = self.users.write();
        let removed = users.remove(username).ok_or(CredentialError::NotFound)?;

        if let Err(e) = self.persist(&users) {
            users.insert(username.to_string(), removed);
            return Err(e);
        }

        info!(username, "User deleted");
        Ok(())
    }

    fn persist(&self, users: &BTreeMap<String, Credential>) -> Result<(), CredentialError> {
        let file = CredentialsFile {
            schema_version: SCHEMA_VERSION,
            users: users.clone(),
        };
        let body = serde_json::to_vec(&file)
            .map_err(|e| CredentialError::Io(format!("serialize failure: {e}")))?;

        let envelope = crypto::seal_envelope(self.key.as_ref(), &body).map_err(|e| match e {
            CryptoError::Integrity => CredentialError::Io("seal rejected".to_string()),
            other => CredentialError::Io(other.to_string()),
        })?;
        let raw = serde_json::to_vec(&envelope)
            .map_err(|e| CredentialError::Io(format!("serialize failure: {e}")))?;

        let tmp = self.path.with_extension("enc.tmp");
        fs::write(&tmp, &raw).map_err(|e| CredentialError::Io(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            warn!(error = %e, "Atomic rename of credentials file failed");
            CredentialError::Io(e.to_string())
        })?;
        Ok(())
    }
}

fn validate_username(username: &str) -> Result<(), CredentialError> {
    if username.is_empty() {
        return Err(CredentialError::Invalid("username must not be empty"));
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(CredentialError::Invalid("username too long"));
    }
    // Usernames name tenant files on disk, so the alphabet stays path-safe.
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(CredentialError::Invalid(
            "username may only contain letters, digits, '-', '_' and '.'",
        ));
    }
    Ok(())
}
