// ABOUTME: Redis authoritative store with leader-elected SQLite projection
// ABOUTME: Publishes every mutation on a pub/sub channel and repairs cache misses from SQLite
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use super::sqlite::SqliteStore;
use super::{MutationOp, Persistence, ProjectionEntity, ProjectionMutation};
use crate::config::{RedisConnectionConfig, StoreConfig};
use crate::constants::store;
use crate::models::{
    AuthorizationCodeRecord, ClientRecord, RefreshTokenReuseRecord, TokenRecord,
};
use anyhow::{anyhow, Result};
use chrono::Utc;
use futures_util::StreamExt;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Atomic get-and-delete used for refresh-token consumption
const CONSUME_SCRIPT: &str =
    "local value = redis.call('GET', KEYS[1]) if value then redis.call('DEL', KEYS[1]) end return value";

/// Compare-and-delete used to release the projection lock without
/// clobbering a lock re-acquired by another process after a TTL race
const RELEASE_LOCK_SCRIPT: &str =
    "if redis.call('GET', KEYS[1]) == ARGV[1] then return redis.call('DEL', KEYS[1]) else return 0 end";

/// Durable-tier handle shared with the background tasks.
///
/// Mutation appliers hold the read lock while writing; ownership
/// transitions swap the handle under the write lock, so an in-flight
/// application can never observe a half-swapped store.
struct DurableHandle {
    sqlite: Option<SqliteStore>,
    writable: bool,
}

/// State shared between the store facade and its background tasks
struct Shared {
    instance_id: String,
    manager: ConnectionManager,
    client: redis::Client,
    key_prefix: String,
    lock_key: String,
    lock_ttl_secs: u64,
    channel: String,
    database_path: Option<String>,
    durable: Arc<RwLock<DurableHandle>>,
    owner: Arc<AtomicBool>,
    subscriber_task: Mutex<Option<JoinHandle<()>>>,
    subscriber_shutdown: Mutex<Option<tokio::sync::mpsc::Sender<()>>>,
}

/// Redis-backed authoritative store replicated into SQLite.
///
/// Every process serves reads and writes from Redis. Processes race an
/// atomic set-if-absent on the lock key; the holder is the projection
/// owner and mirrors all mutations (its own directly, everyone else's
/// via pub/sub) into the durable SQLite store. Everyone else opens
/// SQLite read-only so cache misses can still fall back after a Redis
/// eviction or flush, and keeps retrying the lock so a dead owner is
/// replaced within roughly one lock TTL.
pub struct RedisProjectionStore {
    shared: Arc<Shared>,
    election_task: Mutex<Option<JoinHandle<()>>>,
}

impl RedisProjectionStore {
    /// Connect to Redis, run leader election, and bring up whichever
    /// durable-tier role this process won.
    ///
    /// # Errors
    ///
    /// Returns an error if Redis is unreachable or, for the elected
    /// owner, if the durable store cannot be opened read-write.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let redis_url = config
            .redis_url
            .as_ref()
            .ok_or_else(|| anyhow!("Redis URL is required for the replicated store backend"))?;

        let conn_config = &config.redis_connection;
        info!(
            "Connecting to Redis at {} (timeout={}s, response_timeout={}s, retries={})",
            redis_url,
            conn_config.connection_timeout_secs,
            conn_config.response_timeout_secs,
            conn_config.initial_connection_retries
        );

        let client = redis::Client::open(redis_url.as_str())
            .map_err(|e| anyhow!("failed to create Redis client: {e}"))?;
        let manager = Self::connect_with_retry(&client, conn_config).await?;
        info!("Successfully connected to Redis");

        let shared = Arc::new(Shared {
            instance_id: Uuid::new_v4().to_string(),
            manager,
            client,
            key_prefix: config.key_prefix.clone(),
            lock_key: config.lock_key.clone(),
            lock_ttl_secs: config.lock_ttl_secs.max(1),
            channel: config.projection_channel.clone(),
            database_path: config.database_path.clone(),
            durable: Arc::new(RwLock::new(DurableHandle {
                sqlite: None,
                writable: false,
            })),
            owner: Arc::new(AtomicBool::new(false)),
            subscriber_task: Mutex::new(None),
            subscriber_shutdown: Mutex::new(None),
        });

        let store = Self {
            shared,
            election_task: Mutex::new(None),
        };
        store.init(config.enable_projection).await?;
        Ok(store)
    }

    /// Connect to Redis with exponential backoff retry on failure
    async fn connect_with_retry(
        client: &redis::Client,
        conn_config: &RedisConnectionConfig,
    ) -> Result<ConnectionManager> {
        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(Duration::from_secs(conn_config.connection_timeout_secs))
            .set_response_timeout(Duration::from_secs(conn_config.response_timeout_secs))
            .set_number_of_retries(conn_config.reconnection_retries)
            .set_exponent_base(conn_config.retry_exponent_base)
            .set_max_delay(conn_config.max_retry_delay_ms);

        let max_retries = conn_config.initial_connection_retries;
        let mut delay_ms = conn_config.initial_retry_delay_ms;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            match ConnectionManager::new_with_config(client.clone(), manager_config.clone()).await {
                Ok(manager) => {
                    if attempt > 0 {
                        info!("Redis connection established after {} retries", attempt);
                    }
                    return Ok(manager);
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < max_retries {
                        warn!(
                            "Redis connection attempt {}/{} failed, retrying in {}ms",
                            attempt + 1,
                            max_retries + 1,
                            delay_ms
                        );
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        delay_ms = (delay_ms * 2).min(conn_config.max_retry_delay_ms);
                    }
                }
            }
        }

        Err(anyhow!(
            "failed to connect to Redis after {} retries: {}",
            max_retries + 1,
            last_error.map_or_else(|| "unknown error".to_owned(), |e| e.to_string())
        ))
    }

    /// Run the initial election and start the election heartbeat
    async fn init(&self, enable_projection: bool) -> Result<()> {
        if self.shared.database_path.is_none() {
            warn!("no durable store path configured; running in fast-store-only mode");
            return Ok(());
        }

        if !enable_projection {
            match self.shared.open_durable(false).await {
                Ok(()) => info!("projection disabled; durable read-only fallback enabled"),
                Err(e) => warn!("projection disabled and read-only fallback unavailable: {e:#}"),
            }
            return Ok(());
        }

        if self.shared.acquire_projection_lock().await? {
            // a failed first promotion is a startup error: holding the
            // lock without a writable durable store would stall the
            // projection for a full TTL
            Shared::promote(&self.shared).await?;
        } else {
            match self.shared.open_durable(false).await {
                Ok(()) => warn!(
                    "projection lock held by another process; running non-owner read-only mode"
                ),
                Err(e) => warn!(
                    "projection lock held by another process; running fast-store-only mode: {e:#}"
                ),
            }
        }

        self.start_election_heartbeat().await;
        Ok(())
    }

    /// Heartbeat at a third of the lock TTL: the owner renews the lock
    /// (stepping down if another instance took it), everyone else keeps
    /// trying to acquire it so a dead owner is replaced within roughly
    /// one TTL.
    async fn start_election_heartbeat(&self) {
        let shared = Arc::clone(&self.shared);
        let tick_secs = (shared.lock_ttl_secs / 3).max(1);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(tick_secs));
            // the first tick fires immediately; the initial election
            // already ran, so skip it
            interval.tick().await;
            loop {
                interval.tick().await;
                if shared.owner.load(Ordering::Acquire) {
                    shared.renew_or_step_down().await;
                } else {
                    match shared.acquire_projection_lock().await {
                        Ok(true) => {
                            info!("acquired projection lock after owner loss");
                            if let Err(e) = Shared::promote(&shared).await {
                                error!("failed to promote to projection owner: {e:#}");
                                shared.release_lock().await;
                            }
                        }
                        Ok(false) => {}
                        Err(e) => warn!("projection lock acquisition failed: {e}"),
                    }
                }
            }
        });

        *self.election_task.lock().await = Some(handle);
    }
}

impl Shared {
    /// Atomic set-if-absent on the lock key with this instance's id
    async fn acquire_projection_lock(&self) -> Result<bool> {
        let mut conn = self.manager.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(&self.lock_key)
            .arg(&self.instance_id)
            .arg("NX")
            .arg("EX")
            .arg(self.lock_ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow!("failed to acquire projection lock: {e}"))?;
        Ok(result.is_some())
    }

    /// Compare-and-delete the lock so a lock re-acquired by another
    /// process after a TTL race is never clobbered
    async fn release_lock(&self) {
        let mut conn = self.manager.clone();
        let released: Result<i64, redis::RedisError> = redis::Script::new(RELEASE_LOCK_SCRIPT)
            .key(&self.lock_key)
            .arg(&self.instance_id)
            .invoke_async(&mut conn)
            .await;
        match released {
            Ok(1) => info!("released projection lock"),
            Ok(_) => warn!("projection lock was already held by another process"),
            Err(e) => warn!("failed to release projection lock: {e}"),
        }
    }

    /// Replace the durable handle, closing any previous one first
    async fn open_durable(&self, writable: bool) -> Result<()> {
        let path = self
            .database_path
            .as_deref()
            .ok_or_else(|| anyhow!("no durable store path configured"))?;
        let mut guard = self.durable.write().await;
        if let Some(old) = guard.sqlite.take() {
            old.close().await;
        }
        guard.writable = false;
        let sqlite = SqliteStore::open(path, !writable).await?;
        *guard = DurableHandle {
            sqlite: Some(sqlite),
            writable,
        };
        Ok(())
    }

    /// Become the projection owner: writable durable store, replication
    /// subscription, then a full resync of the fast store.
    async fn promote(shared: &Arc<Self>) -> Result<()> {
        shared.open_durable(true).await?;
        shared.owner.store(true, Ordering::Release);
        shared.start_subscription().await?;
        if let Err(e) = shared.resync().await {
            warn!("initial fast-store resync into durable store failed: {e:#}");
        }
        info!(instance_id = %shared.instance_id, "projection owner enabled");
        Ok(())
    }

    /// Renew the held lock, or step down if another instance took it
    async fn renew_or_step_down(&self) {
        let mut conn = self.manager.clone();
        let current: Option<String> = match conn.get(&self.lock_key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("failed to check projection lock: {e}");
                return;
            }
        };

        if current.as_deref() == Some(self.instance_id.as_str()) {
            if let Err(e) = conn
                .expire::<_, ()>(&self.lock_key, self.lock_ttl_secs as i64)
                .await
            {
                warn!("failed to refresh projection lock: {e}");
            }
            return;
        }

        error!("lost projection lock; disabling durable projection");
        self.stop_subscription().await;
        // Swap the durable handle before clearing the flag so in-flight
        // mutation applications (which hold the read lock) drain
        // against the writable handle first.
        {
            let mut guard = self.durable.write().await;
            if let Some(old) = guard.sqlite.take() {
                old.close().await;
            }
            guard.writable = false;
            if let Some(path) = self.database_path.as_deref() {
                match SqliteStore::open(path, true).await {
                    Ok(sqlite) => guard.sqlite = Some(sqlite),
                    Err(e) => {
                        warn!("failed to reopen durable store read-only after lock loss: {e:#}");
                    }
                }
            }
        }
        self.owner.store(false, Ordering::Release);
    }

    /// Subscribe to the replication channel and apply peer mutations
    async fn start_subscription(&self) -> Result<()> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| anyhow!("failed to open replication subscription: {e}"))?;
        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| anyhow!("failed to subscribe to replication channel: {e}"))?;

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
        let durable = Arc::clone(&self.durable);
        let owner = Arc::clone(&self.owner);
        let own_id = self.instance_id.clone();
        let channel = self.channel.clone();

        let handle = tokio::spawn(async move {
            {
                let mut stream = pubsub.on_message();
                loop {
                    tokio::select! {
                        maybe = stream.next() => {
                            let Some(msg) = maybe else { break };
                            let payload: String = match msg.get_payload() {
                                Ok(payload) => payload,
                                Err(e) => {
                                    warn!("undecodable replication message: {e}");
                                    continue;
                                }
                            };
                            let Some(mutation) = parse_mutation(&payload) else {
                                continue;
                            };
                            if mutation.source_id == own_id {
                                continue;
                            }
                            apply_to_durable(&durable, &owner, &mutation).await;
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            }
            if let Err(e) = pubsub.unsubscribe(&channel).await {
                warn!("failed to unsubscribe from replication channel: {e}");
            }
        });

        *self.subscriber_task.lock().await = Some(handle);
        *self.subscriber_shutdown.lock().await = Some(shutdown_tx);
        Ok(())
    }

    /// Stop the replication subscription, if one is running
    async fn stop_subscription(&self) {
        if let Some(tx) = self.subscriber_shutdown.lock().await.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.subscriber_task.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// One-time full copy of every fast-store keyspace into SQLite
    async fn resync(&self) -> Result<()> {
        if !self.owner.load(Ordering::Acquire) {
            return Ok(());
        }
        for entity in ProjectionEntity::ALL {
            self.resync_entity(entity).await?;
        }
        Ok(())
    }

    async fn resync_entity(&self, entity: ProjectionEntity) -> Result<()> {
        let prefix = format!("{}:{}:", self.key_prefix, entity.namespace());
        let pattern = format!("{prefix}*");
        let mut conn = self.manager.clone();
        let mut cursor = 0u64;
        let mut applied = 0u64;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(store::RESYNC_SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(|e| anyhow!("resync SCAN failed: {e}"))?;

            if !keys.is_empty() {
                let values: Vec<Option<String>> = conn
                    .mget(&keys)
                    .await
                    .map_err(|e| anyhow!("resync MGET failed: {e}"))?;
                for (full_key, raw) in keys.iter().zip(values) {
                    let Some(raw) = raw else { continue };
                    let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
                        continue;
                    };
                    let Some(key) = full_key.strip_prefix(&prefix) else {
                        continue;
                    };
                    apply_to_durable(
                        &self.durable,
                        &self.owner,
                        &ProjectionMutation {
                            entity,
                            operation: MutationOp::Set,
                            key: key.to_string(),
                            value: Some(value),
                            source_id: "resync".to_string(),
                        },
                    )
                    .await;
                    applied += 1;
                }
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        if applied > 0 {
            info!(
                "resynced {applied} {} records into durable store",
                entity.namespace()
            );
        }
        Ok(())
    }

    fn entity_key(&self, entity: ProjectionEntity, key: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, entity.namespace(), key)
    }

    /// SETEX with the TTL recomputed from the record's absolute expiry
    async fn set_json_with_expiry<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        expires_at: i64,
    ) -> Result<()> {
        let ttl_secs = (expires_at - Utc::now().timestamp()).max(store::MIN_REPAIR_TTL_SECS);
        let payload = serde_json::to_string(value)?;
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, payload, ttl_secs as u64)
            .await
            .map_err(|e| {
                error!("Redis SET operation failed: {}", e);
                anyhow!("authoritative store error: {e}")
            })
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn.get(key).await.map_err(|e| {
            error!("Redis GET operation failed: {}", e);
            anyhow!("authoritative store error: {e}")
        })?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("discarding undecodable record at {key}: {e}");
                Ok(None)
            }
        }
    }

    async fn delete_key(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await.map_err(|e| {
            error!("Redis DEL operation failed: {}", e);
            anyhow!("authoritative store error: {e}")
        })
    }

    /// Broadcast a mutation and, when owner, mirror it into SQLite.
    /// Both halves are best-effort: replication degrades durability,
    /// never the authoritative write that already succeeded.
    async fn project(&self, mutation: ProjectionMutation) {
        match serde_json::to_string(&mutation) {
            Ok(payload) => {
                let mut conn = self.manager.clone();
                if let Err(e) = conn.publish::<_, _, ()>(&self.channel, payload).await {
                    warn!("failed to publish projection mutation: {e}");
                }
            }
            Err(e) => warn!("failed to encode projection mutation: {e}"),
        }
        apply_to_durable(&self.durable, &self.owner, &mutation).await;
    }

    fn set_mutation<T: Serialize>(
        &self,
        entity: ProjectionEntity,
        key: &str,
        value: &T,
    ) -> ProjectionMutation {
        ProjectionMutation {
            entity,
            operation: MutationOp::Set,
            key: key.to_string(),
            value: serde_json::to_value(value).ok(),
            source_id: self.instance_id.clone(),
        }
    }

    fn delete_mutation(&self, entity: ProjectionEntity, key: &str) -> ProjectionMutation {
        ProjectionMutation {
            entity,
            operation: MutationOp::Delete,
            key: key.to_string(),
            value: None,
            source_id: self.instance_id.clone(),
        }
    }

    /// Repopulate a missed fast-store key from the durable copy,
    /// recomputing the TTL from the record's own expiry.
    async fn repair_fast_store<T: Serialize + Sync>(&self, key: &str, value: &T, expires_at: i64) {
        if let Err(e) = self.set_json_with_expiry(key, value, expires_at).await {
            warn!("failed to repair fast store from durable copy: {e:#}");
        }
    }

    async fn code_from_durable(&self, code: &str) -> Option<AuthorizationCodeRecord> {
        let guard = self.durable.read().await;
        let sqlite = guard.sqlite.as_ref()?;
        match sqlite.get_code(code).await {
            Ok(Some(record)) => {
                drop(guard);
                let key = self.entity_key(ProjectionEntity::Code, code);
                self.repair_fast_store(&key, &record, record.expires_at).await;
                Some(record)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("durable store fallback read failed: {e:#}");
                None
            }
        }
    }

    async fn access_token_from_durable(&self, token: &str) -> Option<TokenRecord> {
        let guard = self.durable.read().await;
        let sqlite = guard.sqlite.as_ref()?;
        match sqlite.get_access_token(token).await {
            Ok(Some(record)) => {
                drop(guard);
                let key = self.entity_key(ProjectionEntity::AccessToken, token);
                self.repair_fast_store(&key, &record, record.expires_at).await;
                Some(record)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("durable store fallback read failed: {e:#}");
                None
            }
        }
    }

    async fn refresh_token_from_durable(&self, token: &str) -> Option<TokenRecord> {
        let guard = self.durable.read().await;
        let sqlite = guard.sqlite.as_ref()?;
        match sqlite.get_refresh_token(token).await {
            Ok(Some(record)) => {
                drop(guard);
                let key = self.entity_key(ProjectionEntity::RefreshToken, token);
                self.repair_fast_store(&key, &record, record.expires_at).await;
                Some(record)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("durable store fallback read failed: {e:#}");
                None
            }
        }
    }

    async fn reuse_marker_from_durable(
        &self,
        old_refresh_token: &str,
    ) -> Option<RefreshTokenReuseRecord> {
        let guard = self.durable.read().await;
        let sqlite = guard.sqlite.as_ref()?;
        match sqlite.get_refresh_token_reuse(old_refresh_token).await {
            Ok(Some(record)) => {
                drop(guard);
                let key = self.entity_key(ProjectionEntity::RefreshTokenReuse, old_refresh_token);
                self.repair_fast_store(&key, &record, record.expires_at).await;
                Some(record)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("durable store fallback read failed: {e:#}");
                None
            }
        }
    }

    async fn client_from_durable(&self, client_id: &str) -> Option<ClientRecord> {
        let guard = self.durable.read().await;
        let sqlite = guard.sqlite.as_ref()?;
        match sqlite.get_client(client_id).await {
            Ok(Some(record)) => {
                drop(guard);
                // clients carry no expiry, so the repair has no TTL
                let key = self.entity_key(ProjectionEntity::Client, client_id);
                match serde_json::to_string(&record) {
                    Ok(payload) => {
                        let mut conn = self.manager.clone();
                        if let Err(e) = conn.set::<_, _, ()>(&key, payload).await {
                            warn!("failed to repair fast store from durable copy: {e}");
                        }
                    }
                    Err(e) => warn!("failed to encode client for repair: {e}"),
                }
                Some(record)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("durable store fallback read failed: {e:#}");
                None
            }
        }
    }
}

/// Parse a replication message, rejecting structurally invalid ones
fn parse_mutation(raw: &str) -> Option<ProjectionMutation> {
    match serde_json::from_str::<ProjectionMutation>(raw) {
        Ok(mutation) if !mutation.key.is_empty() => Some(mutation),
        Ok(_) => None,
        Err(e) => {
            warn!("ignoring malformed replication message: {e}");
            None
        }
    }
}

/// Apply a mutation to the durable store if this process is the owner.
///
/// Failures are logged, never propagated: losing a projection write
/// degrades durability but must not fail the fast-store operation that
/// already committed.
async fn apply_to_durable(
    durable: &RwLock<DurableHandle>,
    owner: &AtomicBool,
    mutation: &ProjectionMutation,
) {
    if !owner.load(Ordering::Acquire) {
        return;
    }
    let guard = durable.read().await;
    let Some(sqlite) = guard.sqlite.as_ref() else {
        return;
    };
    if !guard.writable {
        return;
    }

    let result = match mutation.operation {
        MutationOp::Delete => match mutation.entity {
            ProjectionEntity::Code => sqlite.delete_code(&mutation.key).await,
            ProjectionEntity::AccessToken => sqlite.delete_access_token(&mutation.key).await,
            ProjectionEntity::RefreshToken => sqlite.delete_refresh_token(&mutation.key).await,
            // reuse markers age out via the expiry sweep; clients are
            // never deleted through this channel
            ProjectionEntity::RefreshTokenReuse | ProjectionEntity::Client => Ok(()),
        },
        MutationOp::Set => {
            let Some(value) = mutation.value.clone() else {
                return;
            };
            match mutation.entity {
                ProjectionEntity::Code => match serde_json::from_value(value) {
                    Ok(record) => sqlite.set_code(&mutation.key, &record).await,
                    Err(e) => Err(e.into()),
                },
                ProjectionEntity::AccessToken => match serde_json::from_value(value) {
                    Ok(record) => sqlite.set_access_token(&mutation.key, &record).await,
                    Err(e) => Err(e.into()),
                },
                ProjectionEntity::RefreshToken => match serde_json::from_value(value) {
                    Ok(record) => sqlite.set_refresh_token(&mutation.key, &record).await,
                    Err(e) => Err(e.into()),
                },
                ProjectionEntity::RefreshTokenReuse => match serde_json::from_value(value) {
                    Ok(record) => sqlite.set_refresh_token_reuse(&mutation.key, &record).await,
                    Err(e) => Err(e.into()),
                },
                ProjectionEntity::Client => match serde_json::from_value(value) {
                    Ok(record) => sqlite.set_client(&mutation.key, &record).await,
                    Err(e) => Err(e.into()),
                },
            }
        }
    };

    if let Err(e) = result {
        warn!(
            "failed to apply {:?} {:?} to durable store: {e:#}",
            mutation.operation, mutation.entity
        );
    }
}

#[async_trait::async_trait]
impl Persistence for RedisProjectionStore {
    async fn get_code(&self, code: &str) -> Result<Option<AuthorizationCodeRecord>> {
        let key = self.shared.entity_key(ProjectionEntity::Code, code);
        if let Some(record) = self.shared.get_json(&key).await? {
            return Ok(Some(record));
        }
        Ok(self.shared.code_from_durable(code).await)
    }

    async fn set_code(&self, code: &str, value: &AuthorizationCodeRecord) -> Result<()> {
        let key = self.shared.entity_key(ProjectionEntity::Code, code);
        self.shared
            .set_json_with_expiry(&key, value, value.expires_at)
            .await?;
        self.shared
            .project(self.shared.set_mutation(ProjectionEntity::Code, code, value))
            .await;
        Ok(())
    }

    async fn delete_code(&self, code: &str) -> Result<()> {
        self.shared
            .delete_key(&self.shared.entity_key(ProjectionEntity::Code, code))
            .await?;
        self.shared
            .project(self.shared.delete_mutation(ProjectionEntity::Code, code))
            .await;
        Ok(())
    }

    async fn get_access_token(&self, token: &str) -> Result<Option<TokenRecord>> {
        let key = self.shared.entity_key(ProjectionEntity::AccessToken, token);
        if let Some(record) = self.shared.get_json(&key).await? {
            return Ok(Some(record));
        }
        Ok(self.shared.access_token_from_durable(token).await)
    }

    async fn set_access_token(&self, token: &str, value: &TokenRecord) -> Result<()> {
        let key = self.shared.entity_key(ProjectionEntity::AccessToken, token);
        self.shared
            .set_json_with_expiry(&key, value, value.expires_at)
            .await?;
        self.shared
            .project(
                self.shared
                    .set_mutation(ProjectionEntity::AccessToken, token, value),
            )
            .await;
        Ok(())
    }

    async fn delete_access_token(&self, token: &str) -> Result<()> {
        self.shared
            .delete_key(&self.shared.entity_key(ProjectionEntity::AccessToken, token))
            .await?;
        self.shared
            .project(
                self.shared
                    .delete_mutation(ProjectionEntity::AccessToken, token),
            )
            .await;
        Ok(())
    }

    async fn get_refresh_token(&self, token: &str) -> Result<Option<TokenRecord>> {
        let key = self.shared.entity_key(ProjectionEntity::RefreshToken, token);
        if let Some(record) = self.shared.get_json(&key).await? {
            return Ok(Some(record));
        }
        Ok(self.shared.refresh_token_from_durable(token).await)
    }

    async fn set_refresh_token(&self, token: &str, value: &TokenRecord) -> Result<()> {
        let key = self.shared.entity_key(ProjectionEntity::RefreshToken, token);
        self.shared
            .set_json_with_expiry(&key, value, value.expires_at)
            .await?;
        self.shared
            .project(
                self.shared
                    .set_mutation(ProjectionEntity::RefreshToken, token, value),
            )
            .await;
        Ok(())
    }

    async fn delete_refresh_token(&self, token: &str) -> Result<()> {
        self.shared
            .delete_key(&self.shared.entity_key(ProjectionEntity::RefreshToken, token))
            .await?;
        self.shared
            .project(
                self.shared
                    .delete_mutation(ProjectionEntity::RefreshToken, token),
            )
            .await;
        Ok(())
    }

    async fn consume_refresh_token(&self, token: &str) -> Result<Option<TokenRecord>> {
        let key = self.shared.entity_key(ProjectionEntity::RefreshToken, token);
        let mut conn = self.shared.manager.clone();
        let raw: Option<String> = redis::Script::new(CONSUME_SCRIPT)
            .key(&key)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                error!("Redis consume script failed: {}", e);
                anyhow!("authoritative store error: {e}")
            })?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        let Ok(record) = serde_json::from_str::<TokenRecord>(&raw) else {
            warn!("consumed refresh token had an undecodable record");
            return Ok(None);
        };

        self.shared
            .project(
                self.shared
                    .delete_mutation(ProjectionEntity::RefreshToken, token),
            )
            .await;
        Ok(Some(record))
    }

    async fn get_refresh_token_reuse(
        &self,
        old_refresh_token: &str,
    ) -> Result<Option<RefreshTokenReuseRecord>> {
        let key = self
            .shared
            .entity_key(ProjectionEntity::RefreshTokenReuse, old_refresh_token);
        if let Some(record) = self.shared.get_json(&key).await? {
            return Ok(Some(record));
        }
        Ok(self.shared.reuse_marker_from_durable(old_refresh_token).await)
    }

    async fn set_refresh_token_reuse(
        &self,
        old_refresh_token: &str,
        value: &RefreshTokenReuseRecord,
    ) -> Result<()> {
        let key = self
            .shared
            .entity_key(ProjectionEntity::RefreshTokenReuse, old_refresh_token);
        self.shared
            .set_json_with_expiry(&key, value, value.expires_at)
            .await?;
        self.shared
            .project(self.shared.set_mutation(
                ProjectionEntity::RefreshTokenReuse,
                old_refresh_token,
                value,
            ))
            .await;
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<ClientRecord>> {
        let key = self.shared.entity_key(ProjectionEntity::Client, client_id);
        if let Some(record) = self.shared.get_json(&key).await? {
            return Ok(Some(record));
        }
        Ok(self.shared.client_from_durable(client_id).await)
    }

    async fn set_client(&self, client_id: &str, value: &ClientRecord) -> Result<()> {
        let key = self.shared.entity_key(ProjectionEntity::Client, client_id);
        let payload = serde_json::to_string(value)?;
        let mut conn = self.shared.manager.clone();
        conn.set::<_, _, ()>(&key, payload).await.map_err(|e| {
            error!("Redis SET operation failed: {}", e);
            anyhow!("authoritative store error: {e}")
        })?;
        self.shared
            .project(
                self.shared
                    .set_mutation(ProjectionEntity::Client, client_id, value),
            )
            .await;
        Ok(())
    }

    async fn cleanup(&self) -> Result<u64> {
        // Redis evicts via native TTL; only the owner sweeps SQLite
        if !self.shared.owner.load(Ordering::Acquire) {
            return Ok(0);
        }
        let guard = self.shared.durable.read().await;
        let Some(sqlite) = guard.sqlite.as_ref() else {
            return Ok(0);
        };
        sqlite.cleanup().await
    }

    async fn stop(&self) -> Result<()> {
        if let Some(handle) = self.election_task.lock().await.take() {
            handle.abort();
        }
        self.shared.stop_subscription().await;

        {
            let mut guard = self.shared.durable.write().await;
            if let Some(sqlite) = guard.sqlite.take() {
                sqlite.close().await;
            }
            guard.writable = false;
        }

        if self.shared.owner.swap(false, Ordering::AcqRel) {
            self.shared.release_lock().await;
        }
        Ok(())
    }
}
