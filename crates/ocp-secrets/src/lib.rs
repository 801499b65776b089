// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! The secret vault.
//!
//! Secrets are stored as an envelope-encrypted ciphertext/nonce/auth-tag
//! triple under a workspace-unique name. Plaintext is only materialized
//! during an access by a non-revoked service principal, and every access
//! appends a `secret.accessed` audit event. Plaintext is never persisted
//! and never placed in an event.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use chrono::{DateTime, Utc};
use ocp_capability::{PrincipalRegistry, PrincipalType};
use ocp_core::{Actor, EventDraft, SharedClock, event_types, ids};
use ocp_error::{CoreError, ReasonCode};
use ocp_store::EventStore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Algorithm identifier stored on every row this vault writes.
pub const ALGORITHM: &str = "chacha20poly1305";

const TAG_LEN: usize = 16;

// ---------------------------------------------------------------------------
// MasterKey
// ---------------------------------------------------------------------------

/// The vault master key: 32 bytes, configured out of band.
#[derive(Clone)]
pub struct MasterKey([u8; 32]);

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material never reaches logs.
        f.write_str("MasterKey(..)")
    }
}

/// Master key parse failures.
#[derive(Debug, Error)]
pub enum MasterKeyError {
    /// The value is not valid hex.
    #[error("master key is not valid hex")]
    NotHex,
    /// The decoded key is not 32 bytes.
    #[error("master key must be 32 bytes, got {got}")]
    WrongLength {
        /// Decoded length.
        got: usize,
    },
}

impl MasterKey {
    /// Parse a hex-encoded 32-byte key.
    ///
    /// # Errors
    ///
    /// [`MasterKeyError`] on malformed input.
    pub fn from_hex(hex_key: &str) -> Result<Self, MasterKeyError> {
        let bytes = hex::decode(hex_key.trim()).map_err(|_| MasterKeyError::NotHex)?;
        let got = bytes.len();
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| MasterKeyError::WrongLength { got })?;
        Ok(Self(key))
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// A secret row (`sec_secrets`). Only ciphertext material is held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRow {
    /// Identifier (`sec_…`).
    pub secret_id: String,
    /// Tenant boundary.
    pub workspace_id: String,
    /// Unique per workspace.
    pub secret_name: String,
    /// Cipher identifier.
    pub algorithm: String,
    /// Hex ciphertext (without the tag).
    pub ciphertext_hex: String,
    /// Hex nonce.
    pub nonce_hex: String,
    /// Hex authentication tag.
    pub auth_tag_hex: String,
    /// Creating principal.
    pub created_by_principal_id: String,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last plaintext materialization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// SecretVault
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tables {
    rows: HashMap<String, SecretRow>,
    names: HashMap<(String, String), String>,
}

/// The vault. Clones share state.
#[derive(Clone)]
pub struct SecretVault {
    master: Option<MasterKey>,
    tables: Arc<Mutex<Tables>>,
    principals: PrincipalRegistry,
    store: EventStore,
    clock: SharedClock,
}

impl fmt::Debug for SecretVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretVault")
            .field("configured", &self.master.is_some())
            .finish_non_exhaustive()
    }
}

impl SecretVault {
    /// Create a vault. `master = None` leaves the vault unconfigured; every
    /// operation then reports `secrets_vault_not_configured`.
    #[must_use]
    pub fn new(
        master: Option<MasterKey>,
        principals: PrincipalRegistry,
        store: EventStore,
        clock: SharedClock,
    ) -> Self {
        Self {
            master,
            tables: Arc::new(Mutex::new(Tables::default())),
            principals,
            store,
            clock,
        }
    }

    /// Whether a master key is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.master.is_some()
    }

    /// Store a secret under a workspace-unique name.
    ///
    /// # Errors
    ///
    /// `secrets_vault_not_configured` without a master key;
    /// `secret_name_taken` on a name collision; `internal_error` if the
    /// cipher fails.
    pub fn put(
        &self,
        workspace_id: &str,
        secret_name: &str,
        plaintext: &[u8],
        created_by_principal_id: &str,
    ) -> Result<SecretRow, CoreError> {
        let master = self.require_master()?;
        let now = self.clock.now();

        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let sealed = master
            .cipher()
            .encrypt(&nonce, plaintext)
            .map_err(|_| CoreError::new(ReasonCode::InternalError, "secret seal failed"))?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        let row = SecretRow {
            secret_id: ids::secret_id(),
            workspace_id: workspace_id.to_string(),
            secret_name: secret_name.to_string(),
            algorithm: ALGORITHM.to_string(),
            ciphertext_hex: hex::encode(ciphertext),
            nonce_hex: hex::encode(nonce),
            auth_tag_hex: hex::encode(tag),
            created_by_principal_id: created_by_principal_id.to_string(),
            created_at: now,
            last_accessed_at: None,
        };

        let mut tables = self.tables.lock().expect("vault lock poisoned");
        let name_key = (workspace_id.to_string(), secret_name.to_string());
        if tables.names.contains_key(&name_key) {
            return Err(
                CoreError::new(ReasonCode::SecretNameTaken, "secret name already in use")
                    .with_detail("secret_name", secret_name),
            );
        }
        tables.names.insert(name_key, row.secret_id.clone());
        tables.rows.insert(row.secret_id.clone(), row.clone());
        Ok(row)
    }

    /// Materialize a secret's plaintext for a non-revoked service
    /// principal, stamping `last_accessed_at` and appending the
    /// `secret.accessed` audit event.
    ///
    /// # Errors
    ///
    /// `unauthorized_workspace` unless the principal is an active service
    /// principal; `secrets_vault_not_configured` without a master key;
    /// `secret_not_found` for an unknown id; `internal_error` if the
    /// ciphertext fails authentication.
    pub fn access(
        &self,
        workspace_id: &str,
        secret_id: &str,
        principal_id: &str,
    ) -> Result<Vec<u8>, CoreError> {
        let principal = self
            .principals
            .get(principal_id)
            .filter(|p| p.is_active())
            .filter(|p| p.principal_type == PrincipalType::Service)
            .ok_or_else(|| {
                CoreError::new(
                    ReasonCode::UnauthorizedWorkspace,
                    "secret access requires an active service principal",
                )
            })?;
        let master = self.require_master()?;
        let now = self.clock.now();

        let row = {
            let mut tables = self.tables.lock().expect("vault lock poisoned");
            let row = tables
                .rows
                .get_mut(secret_id)
                .filter(|r| r.workspace_id == workspace_id)
                .ok_or_else(|| {
                    CoreError::new(ReasonCode::SecretNotFound, "no such secret")
                        .with_detail("secret_id", secret_id)
                })?;
            row.last_accessed_at = Some(now);
            row.clone()
        };

        let mut sealed = hex::decode(&row.ciphertext_hex)
            .map_err(|_| CoreError::new(ReasonCode::InternalError, "corrupt ciphertext"))?;
        let tag = hex::decode(&row.auth_tag_hex)
            .map_err(|_| CoreError::new(ReasonCode::InternalError, "corrupt auth tag"))?;
        let nonce = hex::decode(&row.nonce_hex)
            .ok()
            .filter(|n| n.len() == 12)
            .ok_or_else(|| CoreError::new(ReasonCode::InternalError, "corrupt nonce"))?;
        sealed.extend_from_slice(&tag);

        let plaintext = master
            .cipher()
            .decrypt(Nonce::from_slice(&nonce), sealed.as_slice())
            .map_err(|_| CoreError::new(ReasonCode::InternalError, "secret open failed"))?;

        let draft = EventDraft::new(
            event_types::SECRET_ACCESSED,
            workspace_id,
            Actor::service(principal.principal_id.clone()),
        )
        .principal(principal.principal_id)
        .data(json!({
            "secret_id": row.secret_id,
            "secret_name": row.secret_name,
            "algorithm": row.algorithm,
        }));
        if let Err(err) = self.store.append(draft) {
            tracing::error!(secret_id, error = %err, "failed to audit secret access");
        }

        Ok(plaintext)
    }

    /// Row metadata by id, without touching plaintext.
    #[must_use]
    pub fn get(&self, workspace_id: &str, secret_id: &str) -> Option<SecretRow> {
        self.tables
            .lock()
            .expect("vault lock poisoned")
            .rows
            .get(secret_id)
            .filter(|r| r.workspace_id == workspace_id)
            .cloned()
    }

    fn require_master(&self) -> Result<&MasterKey, CoreError> {
        self.master.as_ref().ok_or_else(|| {
            CoreError::new(
                ReasonCode::SecretsVaultNotConfigured,
                "secrets master key is not configured",
            )
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
