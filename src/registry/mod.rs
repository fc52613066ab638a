//! Multi-Database Pool Registry
//!
//! Owns one bounded connection pool per configured database and lends
//! connections out as [`ScopedConnection`]s.
//!
//! # Pool Model
//! - Capacity is a semaphore of `max_pool_size` permits; a scoped connection
//!   holds one permit for its whole life
//! - `min_pool_size` connections are opened eagerly when the pool is created
//! - Idle connections are reused; broken or interrupted ones are discarded
//! - Dropping a scoped connection always returns its permit, on every exit
//!   path including cancellation
//!
//! # Shutdown
//! [`PoolRegistry::close_all`] marks every pool closing, which rejects new and
//! waiting acquirers, then waits for checked-out connections to come back
//! before closing idle ones.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::{Notify, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinSet;

use crate::engine::{DatabaseConfig, Driver, QueryResult};
use crate::error::{DriverError, RegistryError};

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Point-in-time view of one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Live connections (idle plus checked out)
    pub size: usize,
    /// Connections waiting in the pool
    pub idle: usize,
    /// Scoped connections currently lent out
    pub outstanding: usize,
    /// Capacity bound
    pub max_size: usize,
}

struct PoolShared<D: Driver> {
    config: DatabaseConfig,
    driver: Arc<D>,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<D::Connection>>,
    size: AtomicUsize,
    outstanding: AtomicUsize,
    closing: AtomicBool,
    returned: Notify,
}

impl<D: Driver> PoolShared<D> {
    fn lock_idle(&self) -> MutexGuard<'_, Vec<D::Connection>> {
        // The idle list stays consistent even if a holder panicked
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // `closing` and `outstanding` pair up as a store-then-load handshake
    // between acquire and drain, so both sides use SeqCst
    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Drop a connection from the pool and close it in the background
    fn discard(&self, conn: D::Connection) {
        self.size.fetch_sub(1, Ordering::AcqRel);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let driver = Arc::clone(&self.driver);
                runtime.spawn(async move { driver.close(conn).await });
            }
            Err(_) => drop(conn),
        }
    }

    fn begin_close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.permits.close();
    }

    /// Wait until every scoped connection is back, then close idle ones
    async fn drain(&self) {
        loop {
            let notified = self.returned.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.outstanding.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }

        let idle = std::mem::take(&mut *self.lock_idle());
        for conn in idle {
            self.size.fetch_sub(1, Ordering::AcqRel);
            self.driver.close(conn).await;
        }
    }
}

/// Cloneable handle to one live pool
///
/// Handles can acquire connections and report status; only the registry can
/// close the pool.
pub struct PoolHandle<D: Driver> {
    shared: Arc<PoolShared<D>>,
}

impl<D: Driver> Clone for PoolHandle<D> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<D: Driver> std::fmt::Debug for PoolHandle<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("database", &self.shared.config.name)
            .field("status", &self.status())
            .finish()
    }
}

impl<D: Driver> PoolHandle<D> {
    /// Database name this pool serves
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Configuration the pool was created from
    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.shared.config
    }

    /// Current pool counters
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let shared = &self.shared;
        PoolStatus {
            size: shared.size.load(Ordering::Acquire),
            idle: shared.lock_idle().len(),
            outstanding: shared.outstanding.load(Ordering::SeqCst),
            max_size: shared.config.max_pool_size as usize,
        }
    }

    /// Borrow a connection for one operation
    ///
    /// Waits at most `pool_timeout` for capacity. An idle connection is
    /// reused when one is healthy, otherwise a new one is opened.
    pub async fn acquire(&self) -> Result<ScopedConnection<D>> {
        let shared = &self.shared;
        let database = &shared.config.name;

        if shared.is_closing() {
            return Err(RegistryError::RegistryClosing(database.clone()));
        }

        let timeout = shared.config.pool_timeout();
        let permit =
            match tokio::time::timeout(timeout, Arc::clone(&shared.permits).acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(RegistryError::RegistryClosing(database.clone())),
                Err(_) => {
                    tracing::warn!(
                        database = %database,
                        waited_ms = shared.config.pool_timeout_ms,
                        "Pool exhausted"
                    );
                    return Err(RegistryError::PoolExhausted {
                        database: database.clone(),
                        waited_ms: shared.config.pool_timeout_ms,
                    });
                }
            };

        // From here on the scoped connection restores the counters on drop
        shared.outstanding.fetch_add(1, Ordering::SeqCst);
        let mut scoped = ScopedConnection {
            shared: Arc::clone(shared),
            conn: None,
            permit: Some(permit),
            poisoned: false,
        };

        if shared.is_closing() {
            return Err(RegistryError::RegistryClosing(database.clone()));
        }

        loop {
            let next = shared.lock_idle().pop();
            let Some(conn) = next else {
                break;
            };
            if shared.driver.is_broken(&conn) {
                tracing::debug!(database = %database, "Discarding broken idle connection");
                shared.discard(conn);
                continue;
            }
            scoped.conn = Some(conn);
            return Ok(scoped);
        }

        let conn = open_connection(shared.driver.as_ref(), &shared.config)
            .await
            .map_err(|cause| RegistryError::Connect { database: database.clone(), cause })?;
        shared.size.fetch_add(1, Ordering::AcqRel);
        scoped.conn = Some(conn);

        tracing::debug!(database = %database, "Opened new pooled connection");
        Ok(scoped)
    }
}

/// A connection borrowed from a pool for one operation
///
/// Returned to its pool when dropped. A connection whose statement was
/// interrupted is discarded instead, since its session state is unknown.
pub struct ScopedConnection<D: Driver> {
    shared: Arc<PoolShared<D>>,
    conn: Option<D::Connection>,
    permit: Option<OwnedSemaphorePermit>,
    poisoned: bool,
}

impl<D: Driver> std::fmt::Debug for ScopedConnection<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedConnection")
            .field("database", &self.shared.config.name)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

impl<D: Driver> ScopedConnection<D> {
    /// Database this connection belongs to
    #[must_use]
    pub fn database(&self) -> &str {
        &self.shared.config.name
    }

    /// Run one statement, bounded by the pool's `command_timeout`
    ///
    /// On timeout the statement is cancelled on the server and the connection
    /// is discarded. Dropping the returned future mid-statement does the same.
    pub async fn execute(&mut self, sql: &str) -> std::result::Result<QueryResult, DriverError> {
        let shared = Arc::clone(&self.shared);
        let timeout_ms = shared.config.command_timeout_ms;

        // Stays set unless the statement runs to completion
        self.poisoned = true;
        let Some(conn) = self.conn.as_mut() else {
            return Err(DriverError::ConnectionLost("connection was discarded".to_string()));
        };

        let mut cancel = CancelOnDrop {
            driver: Arc::clone(&shared.driver),
            handle: Some(shared.driver.cancel_handle(conn)),
        };

        let outcome =
            tokio::time::timeout(shared.config.command_timeout(), shared.driver.execute(conn, sql))
                .await;

        match outcome {
            Ok(result) => {
                cancel.disarm();
                self.poisoned = false;
                result
            }
            Err(_) => {
                tracing::warn!(
                    database = %shared.config.name,
                    timeout_ms,
                    "Statement timed out, cancelling"
                );
                drop(cancel);
                if let Some(conn) = self.conn.take() {
                    shared.discard(conn);
                }
                Err(DriverError::Timeout(timeout_ms))
            }
        }
    }
}

impl<D: Driver> Drop for ScopedConnection<D> {
    fn drop(&mut self) {
        let shared = &self.shared;

        if let Some(conn) = self.conn.take() {
            if self.poisoned || shared.is_closing() || shared.driver.is_broken(&conn) {
                shared.discard(conn);
            } else {
                shared.lock_idle().push(conn);
            }
        }

        // Check the connection in before freeing capacity
        drop(self.permit.take());
        shared.outstanding.fetch_sub(1, Ordering::SeqCst);
        shared.returned.notify_waiters();
    }
}

/// Cancels the in-flight statement unless disarmed
struct CancelOnDrop<D: Driver> {
    driver: Arc<D>,
    handle: Option<D::CancelHandle>,
}

impl<D: Driver> CancelOnDrop<D> {
    fn disarm(&mut self) {
        self.handle = None;
    }
}

impl<D: Driver> Drop for CancelOnDrop<D> {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let driver = Arc::clone(&self.driver);
            runtime.spawn(async move { driver.cancel(handle).await });
        }
    }
}

/// Open one connection bounded by `connect_timeout`
async fn open_connection<D: Driver>(
    driver: &D,
    config: &DatabaseConfig,
) -> std::result::Result<D::Connection, String> {
    match tokio::time::timeout(config.connect_timeout(), driver.connect(config)).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("connection attempt exceeded {}ms", config.connect_timeout_ms)),
    }
}

/// Build a pool and open its `min_pool_size` connections
async fn build_pool<D: Driver>(
    driver: Arc<D>,
    config: DatabaseConfig,
) -> std::result::Result<PoolHandle<D>, String> {
    config.validate().map_err(|e| e.to_string())?;

    let mut opened = Vec::with_capacity(config.min_pool_size as usize);
    for _ in 0..config.min_pool_size {
        match open_connection(driver.as_ref(), &config).await {
            Ok(conn) => opened.push(conn),
            Err(cause) => {
                for conn in opened {
                    driver.close(conn).await;
                }
                return Err(cause);
            }
        }
    }

    let size = opened.len();
    let permits = Arc::new(Semaphore::new(config.max_pool_size as usize));
    Ok(PoolHandle {
        shared: Arc::new(PoolShared {
            config,
            driver,
            permits,
            idle: Mutex::new(opened),
            size: AtomicUsize::new(size),
            outstanding: AtomicUsize::new(0),
            closing: AtomicBool::new(false),
            returned: Notify::new(),
        }),
    })
}

/// Registry of named connection pools
///
/// At most one pool exists per database name. The registry is the only
/// component that closes pools.
pub struct PoolRegistry<D: Driver> {
    driver: Arc<D>,
    pools: RwLock<HashMap<String, PoolHandle<D>>>,
    closing: AtomicBool,
}

impl<D: Driver> PoolRegistry<D> {
    /// Create an empty registry backed by `driver`
    pub fn new(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
            pools: RwLock::new(HashMap::new()),
            closing: AtomicBool::new(false),
        }
    }

    /// Engine name of the underlying driver
    #[must_use]
    pub fn engine(&self) -> &'static str {
        self.driver.engine()
    }

    fn ensure_open(&self, database: &str) -> Result<()> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(RegistryError::RegistryClosing(database.to_string()));
        }
        Ok(())
    }

    /// Create and register one pool
    ///
    /// Creation is never retried; an unreachable database or rejected
    /// credentials fail with [`RegistryError::PoolCreation`].
    pub async fn create_pool(&self, config: DatabaseConfig) -> Result<PoolHandle<D>> {
        let name = config.name.clone();
        self.ensure_open(&name)?;

        if self.pools.read().await.contains_key(&name) {
            return Err(RegistryError::DuplicateDatabase(name));
        }

        let handle = build_pool(Arc::clone(&self.driver), config).await.map_err(|cause| {
            tracing::warn!(database = %name, error = %cause, "Pool creation failed");
            RegistryError::PoolCreation { database: name.clone(), cause, created: Vec::new() }
        })?;

        self.register(vec![handle.clone()]).await?;
        Ok(handle)
    }

    /// Create and register several pools concurrently
    ///
    /// Returns the handles in input order. If any creation fails, the error
    /// names the first failing database in input order. Pools that were
    /// created successfully in the same call stay registered and open; their
    /// names are listed in `created` so the caller can keep them or call
    /// [`PoolRegistry::close_all`].
    pub async fn create_pools(&self, configs: Vec<DatabaseConfig>) -> Result<Vec<PoolHandle<D>>> {
        let Some(first) = configs.first() else {
            return Ok(Vec::new());
        };
        self.ensure_open(&first.name)?;

        {
            let pools = self.pools.read().await;
            let mut seen = HashSet::new();
            for config in &configs {
                if pools.contains_key(&config.name) || !seen.insert(config.name.as_str()) {
                    return Err(RegistryError::DuplicateDatabase(config.name.clone()));
                }
            }
        }

        let names: Vec<String> = configs.iter().map(|c| c.name.clone()).collect();
        let mut tasks = JoinSet::new();
        for (index, config) in configs.into_iter().enumerate() {
            let driver = Arc::clone(&self.driver);
            tasks.spawn(async move { (index, build_pool(driver, config).await) });
        }

        let mut outcomes: Vec<Option<std::result::Result<PoolHandle<D>, String>>> =
            (0..names.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            if let Ok((index, outcome)) = joined {
                outcomes[index] = Some(outcome);
            }
        }

        let mut created = Vec::new();
        let mut first_failure = None;
        for (name, outcome) in names.iter().zip(outcomes) {
            match outcome {
                Some(Ok(handle)) => created.push(handle),
                Some(Err(cause)) => {
                    tracing::warn!(database = %name, error = %cause, "Pool creation failed");
                    first_failure.get_or_insert((name.clone(), cause));
                }
                None => {
                    first_failure
                        .get_or_insert((name.clone(), "pool creation task panicked".to_string()));
                }
            }
        }

        self.register(created.clone()).await?;

        match first_failure {
            None => Ok(created),
            Some((database, cause)) => Err(RegistryError::PoolCreation {
                database,
                cause,
                created: created.iter().map(|h| h.name().to_string()).collect(),
            }),
        }
    }

    /// Insert freshly built pools, closing them if the registry can't take them
    async fn register(&self, handles: Vec<PoolHandle<D>>) -> Result<()> {
        let mut pools = self.pools.write().await;

        let conflict = if self.closing.load(Ordering::SeqCst) {
            handles.first().map(|h| RegistryError::RegistryClosing(h.name().to_string()))
        } else {
            handles
                .iter()
                .find(|h| pools.contains_key(h.name()))
                .map(|h| RegistryError::DuplicateDatabase(h.name().to_string()))
        };

        if let Some(err) = conflict {
            drop(pools);
            for handle in handles {
                handle.shared.begin_close();
                handle.shared.drain().await;
            }
            return Err(err);
        }

        for handle in handles {
            tracing::info!(
                database = %handle.name(),
                min_pool_size = handle.config().min_pool_size,
                max_pool_size = handle.config().max_pool_size,
                "Pool created"
            );
            pools.insert(handle.name().to_string(), handle);
        }
        Ok(())
    }

    /// Handle of a registered pool
    pub async fn pool(&self, name: &str) -> Option<PoolHandle<D>> {
        self.pools.read().await.get(name).cloned()
    }

    /// Borrow a connection from the named pool
    pub async fn acquire(&self, name: &str) -> Result<ScopedConnection<D>> {
        self.ensure_open(name)?;
        let handle = self
            .pool(name)
            .await
            .ok_or_else(|| RegistryError::UnknownDatabase(name.to_string()))?;
        handle.acquire().await
    }

    /// Registered database names, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether `name` has a registered pool
    pub async fn contains(&self, name: &str) -> bool {
        self.pools.read().await.contains_key(name)
    }

    /// Configurations of every registered pool, sorted by name
    pub async fn database_configs(&self) -> Vec<DatabaseConfig> {
        let mut configs: Vec<DatabaseConfig> =
            self.pools.read().await.values().map(|h| h.config().clone()).collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        configs
    }

    /// Counters of the named pool
    pub async fn status(&self, name: &str) -> Result<PoolStatus> {
        self.pool(name)
            .await
            .map(|h| h.status())
            .ok_or_else(|| RegistryError::UnknownDatabase(name.to_string()))
    }

    /// Scoped connections currently lent out by the named pool
    pub async fn outstanding(&self, name: &str) -> Option<usize> {
        self.pool(name).await.map(|h| h.status().outstanding)
    }

    /// Close every pool
    ///
    /// Waiting acquirers are rejected with [`RegistryError::RegistryClosing`];
    /// checked-out connections are waited for, then idle ones are closed.
    /// Afterwards no pool is registered and new pools are refused.
    pub async fn close_all(&self) {
        self.closing.store(true, Ordering::SeqCst);

        let pools: Vec<PoolHandle<D>> = self.pools.write().await.drain().map(|(_, h)| h).collect();
        for handle in &pools {
            handle.shared.begin_close();
        }
        for handle in pools {
            handle.shared.drain().await;
            tracing::info!(database = %handle.name(), "Pool closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Driver whose connections are plain ids
    #[derive(Default)]
    struct CountingDriver {
        opened: AtomicUsize,
        closed: Arc<AtomicUsize>,
    }

    struct Conn {
        id: usize,
        broken: bool,
    }

    impl Driver for CountingDriver {
        type Connection = Conn;
        type CancelHandle = ();

        fn engine(&self) -> &'static str {
            "counting"
        }

        async fn connect(
            &self,
            _config: &DatabaseConfig,
        ) -> std::result::Result<Conn, DriverError> {
            let id = self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Conn { id, broken: false })
        }

        async fn execute(
            &self,
            conn: &mut Conn,
            sql: &str,
        ) -> std::result::Result<QueryResult, DriverError> {
            if sql == "break" {
                conn.broken = true;
                return Err(DriverError::ConnectionLost("reset by peer".to_string()));
            }
            if sql == "sleep" {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(QueryResult::affected(conn.id as u64))
        }

        fn cancel_handle(&self, _conn: &Conn) {}

        async fn cancel(&self, _handle: ()) {}

        fn is_broken(&self, conn: &Conn) -> bool {
            conn.broken
        }

        async fn close(&self, _conn: Conn) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config(name: &str) -> DatabaseConfig {
        DatabaseConfig::new(name)
            .with_pool_size(1, 2)
            .with_pool_timeout(Duration::from_millis(50))
            .with_command_timeout(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_create_pool_opens_min_connections() {
        let registry = PoolRegistry::new(CountingDriver::default());
        let handle = registry.create_pool(config("sales")).await.unwrap();

        let status = handle.status();
        assert_eq!(status.size, 1);
        assert_eq!(status.idle, 1);
        assert_eq!(status.outstanding, 0);
        assert_eq!(status.max_size, 2);
        assert_eq!(registry.names().await, vec!["sales"]);
    }

    #[tokio::test]
    async fn test_duplicate_pool_rejected() {
        let registry = PoolRegistry::new(CountingDriver::default());
        registry.create_pool(config("sales")).await.unwrap();

        let err = registry.create_pool(config("sales")).await.unwrap_err();
        assert_eq!(err, RegistryError::DuplicateDatabase("sales".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_config_fails_creation() {
        let registry = PoolRegistry::new(CountingDriver::default());
        let err = registry.create_pool(config("sales").with_pool_size(3, 1)).await.unwrap_err();
        assert_eq!(err.error_code(), "POOL_CREATION_FAILED");
        assert!(registry.names().await.is_empty());
    }

    #[tokio::test]
    async fn test_idle_connection_reused() {
        let registry = PoolRegistry::new(CountingDriver::default());
        registry.create_pool(config("sales")).await.unwrap();

        for _ in 0..3 {
            let mut conn = registry.acquire("sales").await.unwrap();
            let result = conn.execute("select").await.unwrap();
            assert_eq!(result.rows_affected, Some(0));
        }
        assert_eq!(registry.status("sales").await.unwrap().size, 1);
    }

    #[tokio::test]
    async fn test_broken_connection_discarded() {
        let registry = PoolRegistry::new(CountingDriver::default());
        registry.create_pool(config("sales")).await.unwrap();

        {
            let mut conn = registry.acquire("sales").await.unwrap();
            assert!(conn.execute("break").await.is_err());
        }

        let status = registry.status("sales").await.unwrap();
        assert_eq!(status.size, 0);
        assert_eq!(status.outstanding, 0);

        let mut conn = registry.acquire("sales").await.unwrap();
        assert_eq!(conn.execute("select").await.unwrap().rows_affected, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_statement_timeout_discards_connection() {
        let registry = PoolRegistry::new(CountingDriver::default());
        registry.create_pool(config("sales")).await.unwrap();

        let mut conn = registry.acquire("sales").await.unwrap();
        let err = conn.execute("sleep").await.unwrap_err();
        assert_eq!(err, DriverError::Timeout(100));
        drop(conn);

        let status = registry.status("sales").await.unwrap();
        assert_eq!(status.size, 0);
        assert_eq!(status.outstanding, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_exhausted_after_timeout() {
        let registry = PoolRegistry::new(CountingDriver::default());
        registry.create_pool(config("sales")).await.unwrap();

        let _a = registry.acquire("sales").await.unwrap();
        let _b = registry.acquire("sales").await.unwrap();
        let err = registry.acquire("sales").await.unwrap_err();
        assert_eq!(
            err,
            RegistryError::PoolExhausted { database: "sales".to_string(), waited_ms: 50 }
        );
    }

    #[tokio::test]
    async fn test_unknown_database() {
        let registry = PoolRegistry::new(CountingDriver::default());
        let err = registry.acquire("nope").await.unwrap_err();
        assert_eq!(err, RegistryError::UnknownDatabase("nope".to_string()));
        assert!(registry.status("nope").await.is_err());
        assert_eq!(registry.outstanding("nope").await, None);
    }

    #[tokio::test]
    async fn test_close_all_closes_idle_and_refuses_new_pools() {
        let driver = CountingDriver::default();
        let closed = Arc::clone(&driver.closed);
        let registry = PoolRegistry::new(driver);
        registry.create_pool(config("sales").with_pool_size(2, 2)).await.unwrap();

        registry.close_all().await;

        assert_eq!(closed.load(Ordering::SeqCst), 2);
        assert!(registry.names().await.is_empty());
        let err = registry.create_pool(config("hr")).await.unwrap_err();
        assert_eq!(err, RegistryError::RegistryClosing("hr".to_string()));
    }
}
