// ABOUTME: In-memory implementations of the collaborator traits
// ABOUTME: Used by tests and as engine defaults when no durable store is wired
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 SellerSync Contributors

use super::{Alert, AlertSink, CredentialStore, DeadLetterRecord, DeadLetterStore, ScheduleStore, SecretCodec};
use crate::auth::SellerCredential;
use crate::errors::{AppError, AppResult};
use crate::scheduler::{SyncScheduleEntry, SyncType};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// Credential store backed by a map
#[derive(Default)]
pub struct InMemoryCredentialStore {
    credentials: RwLock<HashMap<Uuid, SellerCredential>>,
}

impl InMemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a credential
    pub async fn insert(&self, credential: SellerCredential) {
        self.credentials
            .write()
            .await
            .insert(credential.id, credential);
    }
}

#[async_trait::async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get_credential(&self, id: Uuid) -> AppResult<Option<SellerCredential>> {
        Ok(self.credentials.read().await.get(&id).cloned())
    }

    async fn update_refresh_token(&self, id: Uuid, refresh_token: &str) -> AppResult<()> {
        let mut credentials = self.credentials.write().await;
        let credential = credentials
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("credential {id}")))?;
        credential.refresh_token = refresh_token.to_owned();
        Ok(())
    }
}

/// Schedule store backed by a map keyed on (account, sync type)
#[derive(Default)]
pub struct InMemoryScheduleStore {
    entries: RwLock<HashMap<(Uuid, SyncType), SyncScheduleEntry>>,
}

impl InMemoryScheduleStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up one entry
    pub async fn entry(&self, account_id: Uuid, sync_type: SyncType) -> Option<SyncScheduleEntry> {
        self.entries
            .read()
            .await
            .get(&(account_id, sync_type))
            .cloned()
    }
}

#[async_trait::async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn due_entries(&self, now: DateTime<Utc>) -> AppResult<Vec<SyncScheduleEntry>> {
        let entries = self.entries.read().await;
        let mut due: Vec<SyncScheduleEntry> = entries
            .values()
            .filter(|e| e.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|e| (e.account_id, e.sync_type as u8));
        Ok(due)
    }

    async fn upsert_entry(&self, entry: &SyncScheduleEntry) -> AppResult<()> {
        self.entries
            .write()
            .await
            .insert((entry.account_id, entry.sync_type), entry.clone());
        Ok(())
    }

    async fn mark_run(
        &self,
        account_id: Uuid,
        sync_type: SyncType,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&(account_id, sync_type))
            .ok_or_else(|| {
                AppError::not_found(format!("schedule entry {account_id}/{sync_type}"))
            })?;
        entry.last_run_at = Some(last_run_at);
        entry.next_run_at = Some(next_run_at);
        Ok(())
    }
}

/// Dead-letter store backed by a vector, newest first on listing
#[derive(Default)]
pub struct InMemoryDeadLetterStore {
    records: RwLock<Vec<DeadLetterRecord>>,
}

impl InMemoryDeadLetterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn create_record(&self, record: &DeadLetterRecord) -> AppResult<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn list_records(&self) -> AppResult<Vec<DeadLetterRecord>> {
        let mut records = self.records.read().await.clone();
        records.reverse();
        Ok(records)
    }
}

/// Alert sink that records alerts and logs them
#[derive(Default)]
pub struct InMemoryAlertSink {
    alerts: RwLock<Vec<Alert>>,
}

impl InMemoryAlertSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Alerts raised so far, oldest first
    pub async fn raised(&self) -> Vec<Alert> {
        self.alerts.read().await.clone()
    }
}

#[async_trait::async_trait]
impl AlertSink for InMemoryAlertSink {
    async fn raise(&self, alert: &Alert) -> AppResult<()> {
        warn!(
            job_id = %alert.job_id,
            error_kind = %alert.error_kind,
            attempts = alert.attempts_made,
            "ALERT: {}",
            alert.message
        );
        self.alerts.write().await.push(alert.clone());
        Ok(())
    }
}

/// Reversible but non-cryptographic codec. A stand-in for tests and local
/// development only; production wires a real implementation.
#[derive(Default)]
pub struct Base64Codec;

impl Base64Codec {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl SecretCodec for Base64Codec {
    async fn encrypt(&self, plaintext: &str) -> AppResult<String> {
        Ok(BASE64.encode(plaintext.as_bytes()))
    }

    async fn decrypt(&self, ciphertext: &str) -> AppResult<String> {
        let bytes = BASE64
            .decode(ciphertext)
            .map_err(|e| AppError::storage(format!("stored secret is not valid base64: {e}")))?;
        String::from_utf8(bytes)
            .map_err(|e| AppError::storage(format!("stored secret is not UTF-8: {e}")))
    }
}
