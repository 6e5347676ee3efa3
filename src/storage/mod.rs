// ABOUTME: Narrow collaborator interfaces for persistence, alerting, and secret handling
// ABOUTME: Concrete implementations are wired at startup; no late-bound lookups
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 SellerSync Contributors

/// In-memory implementations for tests and defaults
pub mod memory;

use crate::auth::SellerCredential;
use crate::classify::ErrorKind;
use crate::errors::AppResult;
use crate::scheduler::{SyncScheduleEntry, SyncType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable credential storage. The single source of truth for rotated refresh
/// tokens; caches are invalidated, never treated as authoritative.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load a seller credential by its identifier
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails
    async fn get_credential(&self, id: Uuid) -> AppResult<Option<SellerCredential>>;

    /// Durably replace the refresh token for a credential
    ///
    /// # Errors
    ///
    /// Returns an error if the write does not reach durable storage
    async fn update_refresh_token(&self, id: Uuid, refresh_token: &str) -> AppResult<()>;
}

/// Per-account, per-data-type sync cadence storage
#[async_trait::async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Entries that are enabled, have a positive interval, and are due at `now`
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails
    async fn due_entries(&self, now: DateTime<Utc>) -> AppResult<Vec<SyncScheduleEntry>>;

    /// Create or update a schedule entry
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails
    async fn upsert_entry(&self, entry: &SyncScheduleEntry) -> AppResult<()>;

    /// Record a completed run and the next due time
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails
    async fn mark_run(
        &self,
        account_id: Uuid,
        sync_type: SyncType,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> AppResult<()>;
}

/// Durable record of a job that will not be retried further
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Identifier of the failed job
    pub job_id: String,
    /// Classified kind of the terminal error
    pub error_kind: ErrorKind,
    /// Size-bounded excerpt of the error message
    pub error_excerpt: String,
    /// Attempts made before the job was dead-lettered
    pub attempts_made: u32,
    /// Whether an operator must intervene before the work can resume
    pub requires_manual_intervention: bool,
    /// When the terminal failure occurred
    pub failed_at: DateTime<Utc>,
    /// Full original payload, kept for manual replay
    pub original_payload: serde_json::Value,
}

/// Dead-letter persistence for audit and manual replay
#[async_trait::async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Persist a dead-letter record
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails
    async fn create_record(&self, record: &DeadLetterRecord) -> AppResult<()>;

    /// List retained records, newest first
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails
    async fn list_records(&self) -> AppResult<Vec<DeadLetterRecord>>;
}

/// Operator-visible alert raised when automated recovery gives up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Account the alert concerns, when known
    pub account_id: Option<Uuid>,
    /// Job that triggered the alert
    pub job_id: String,
    /// Classified error kind
    pub error_kind: ErrorKind,
    /// Attempts made before giving up
    pub attempts_made: u32,
    /// Human-readable summary
    pub message: String,
}

/// Sink for operator-visible alerts
#[async_trait::async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver an alert to operators
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails
    async fn raise(&self, alert: &Alert) -> AppResult<()>;
}

/// Opaque encrypt/decrypt capability for stored secrets. This crate never
/// implements cryptography; it only consumes the codec.
#[async_trait::async_trait]
pub trait SecretCodec: Send + Sync {
    /// Encrypt a plaintext secret
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails
    async fn encrypt(&self, plaintext: &str) -> AppResult<String>;

    /// Decrypt a stored ciphertext
    ///
    /// # Errors
    ///
    /// Returns an error if decryption fails
    async fn decrypt(&self, ciphertext: &str) -> AppResult<String>;
}

/// Credential store adapter keeping secrets encrypted at rest
///
/// The inner store only ever sees ciphertext for the refresh token and client
/// secret; consumers of this adapter only ever see plaintext.
pub struct EncryptedCredentialStore {
    inner: std::sync::Arc<dyn CredentialStore>,
    codec: std::sync::Arc<dyn SecretCodec>,
}

impl EncryptedCredentialStore {
    #[must_use]
    pub fn new(
        inner: std::sync::Arc<dyn CredentialStore>,
        codec: std::sync::Arc<dyn SecretCodec>,
    ) -> Self {
        Self { inner, codec }
    }
}

#[async_trait::async_trait]
impl CredentialStore for EncryptedCredentialStore {
    async fn get_credential(&self, id: Uuid) -> AppResult<Option<SellerCredential>> {
        let Some(mut credential) = self.inner.get_credential(id).await? else {
            return Ok(None);
        };

        credential.refresh_token = self.codec.decrypt(&credential.refresh_token).await?;
        if let Some(secret) = credential.client_secret.take() {
            credential.client_secret = Some(self.codec.decrypt(&secret).await?);
        }
        Ok(Some(credential))
    }

    async fn update_refresh_token(&self, id: Uuid, refresh_token: &str) -> AppResult<()> {
        let ciphertext = self.codec.encrypt(refresh_token).await?;
        self.inner.update_refresh_token(id, &ciphertext).await
    }
}
