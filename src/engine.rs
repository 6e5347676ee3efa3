// ABOUTME: Explicit registry wiring cache, brokers, gateway, queue, and scheduler
// ABOUTME: Owns subsystem lifecycle; open() constructs everything, close() drains it
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 SellerSync Contributors

use crate::auth::identity::IdentityBroker;
use crate::auth::token_broker::TokenBroker;
use crate::cache::factory::Cache;
use crate::config::EngineConfig;
use crate::errors::AppResult;
use crate::gateway::ApiGatewayClient;
use crate::queue::worker::{JobProcessor, WorkerPool};
use crate::queue::WorkQueue;
use crate::recovery::ErrorRecoveryCoordinator;
use crate::scheduler::{SchedulerHandle, SyncScheduler};
use crate::storage::memory::{
    Base64Codec, InMemoryAlertSink, InMemoryCredentialStore, InMemoryDeadLetterStore,
    InMemoryScheduleStore,
};
use crate::storage::{
    AlertSink, CredentialStore, DeadLetterStore, EncryptedCredentialStore, ScheduleStore,
    SecretCodec,
};
use std::sync::Arc;
use tracing::info;

const SYNC_QUEUE_NAME: &str = "sync";

/// Collaborators wired into the engine at startup
///
/// Every dependency is explicit; there are no module-level singletons or
/// late-bound lookups. `in_memory()` covers tests and local development.
pub struct EngineStores {
    pub credentials: Arc<dyn CredentialStore>,
    pub schedules: Arc<dyn ScheduleStore>,
    pub dead_letters: Arc<dyn DeadLetterStore>,
    pub alerts: Arc<dyn AlertSink>,
    pub secrets: Arc<dyn SecretCodec>,
}

impl EngineStores {
    /// In-memory collaborators with a reversible non-cryptographic codec
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            credentials: Arc::new(InMemoryCredentialStore::new()),
            schedules: Arc::new(InMemoryScheduleStore::new()),
            dead_letters: Arc::new(InMemoryDeadLetterStore::new()),
            alerts: Arc::new(InMemoryAlertSink::new()),
            secrets: Arc::new(Base64Codec::new()),
        }
    }
}

/// The assembled engine
///
/// Construction order matters: the cache feeds the brokers, the brokers feed
/// the gateway, the queue feeds the scheduler, and the recovery coordinator
/// closes the loop as the queue's outcome handler.
pub struct SyncEngine {
    cache: Cache,
    tokens: Arc<TokenBroker>,
    identity: Arc<IdentityBroker>,
    gateway: Arc<ApiGatewayClient>,
    queue: Arc<WorkQueue>,
    scheduler: Arc<SyncScheduler>,
    scheduler_handle: Option<SchedulerHandle>,
    workers: Option<WorkerPool>,
}

impl SyncEngine {
    /// Wire every subsystem and start the scheduler tick and worker pool
    ///
    /// # Errors
    ///
    /// Returns an error if the cache backend or an HTTP client cannot be
    /// constructed
    pub async fn open(
        config: EngineConfig,
        stores: EngineStores,
        processor: Arc<dyn JobProcessor>,
    ) -> AppResult<Self> {
        let cache = Cache::new(config.cache).await?;

        // Secrets stay encrypted at rest; everything downstream of this
        // wrapper works with plaintext
        let credentials: Arc<dyn CredentialStore> = Arc::new(EncryptedCredentialStore::new(
            Arc::clone(&stores.credentials),
            Arc::clone(&stores.secrets),
        ));

        let tokens = Arc::new(TokenBroker::new(
            cache.clone(),
            Arc::clone(&credentials),
            config.upstream.token_endpoint.clone(),
        )?);
        let identity = Arc::new(IdentityBroker::new(
            cache.clone(),
            config.upstream.identity_endpoint.clone(),
        )?);
        let gateway = Arc::new(ApiGatewayClient::new(
            Arc::clone(&tokens),
            Arc::clone(&identity),
            &config.upstream,
        )?);

        let queue = WorkQueue::new(SYNC_QUEUE_NAME, config.queue);
        let scheduler = SyncScheduler::new(
            Arc::clone(&queue),
            Arc::clone(&stores.schedules),
            Arc::clone(&processor),
            config.scheduler,
        );
        let coordinator = ErrorRecoveryCoordinator::new(
            Arc::clone(&stores.dead_letters),
            Arc::clone(&stores.alerts),
            Arc::clone(&scheduler),
        );

        let workers = WorkerPool::start(Arc::clone(&queue), processor, coordinator);
        let scheduler_handle = scheduler.start();

        info!("Sync engine started");

        Ok(Self {
            cache,
            tokens,
            identity,
            gateway,
            queue,
            scheduler,
            scheduler_handle: Some(scheduler_handle),
            workers: Some(workers),
        })
    }

    /// Shared cache backend
    #[must_use]
    pub const fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Access token broker
    #[must_use]
    pub fn tokens(&self) -> Arc<TokenBroker> {
        Arc::clone(&self.tokens)
    }

    /// Signing credential broker
    #[must_use]
    pub fn identity(&self) -> Arc<IdentityBroker> {
        Arc::clone(&self.identity)
    }

    /// Signed upstream API client
    #[must_use]
    pub fn gateway(&self) -> Arc<ApiGatewayClient> {
        Arc::clone(&self.gateway)
    }

    /// Sync work queue
    #[must_use]
    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Sync scheduler, for manual triggers
    #[must_use]
    pub fn scheduler(&self) -> Arc<SyncScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Stop the scheduler tick and drain the worker pool
    pub async fn close(mut self) {
        if let Some(handle) = self.scheduler_handle.take() {
            handle.stop().await;
        }
        if let Some(workers) = self.workers.take() {
            workers.shutdown().await;
        }
        info!("Sync engine stopped");
    }
}
