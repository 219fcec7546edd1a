//! Opening and closing physical connections. The only code that talks to a database server
//! on behalf of the registry.

use crate::config::{ConnectionConfig, Engine};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Opens the connection behind one alias.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Clone + Send + Sync + 'static;

    /// May be slow; concurrent callers for the same alias wait on a single call.
    async fn open(&self, config: &ConnectionConfig) -> Result<Self::Conn, sqlx::Error>;

    /// Round trip over an open connection.
    async fn ping(&self, conn: &Self::Conn) -> Result<(), sqlx::Error>;

    async fn close(&self, conn: Self::Conn);
}

/// Pool for one alias, for whichever engine the deployment runs.
#[derive(Clone, Debug)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
}

impl DbPool {
    /// Round trip to the server.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        match self {
            DbPool::MySql(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
            DbPool::Postgres(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
        }
    }

    pub async fn close(&self) {
        match self {
            DbPool::MySql(pool) => pool.close().await,
            DbPool::Postgres(pool) => pool.close().await,
        }
    }
}

/// Connects with sqlx pools built from the alias' config.
#[derive(Clone, Copy, Debug, Default)]
pub struct SqlxConnector;

#[async_trait]
impl Connector for SqlxConnector {
    type Conn = DbPool;

    async fn open(&self, config: &ConnectionConfig) -> Result<DbPool, sqlx::Error> {
        let connect = async {
            match config.engine {
                Engine::MySql => {
                    let opts = MySqlConnectOptions::new()
                        .host(&config.host)
                        .port(config.port)
                        .username(&config.user)
                        .password(&config.password)
                        .database(&config.database)
                        .timezone(Some(config.time_zone.clone()));
                    MySqlPoolOptions::new()
                        .max_connections(config.max_connections)
                        .acquire_timeout(config.connect_timeout)
                        .test_before_acquire(config.health_checks)
                        .max_lifetime(config.max_age)
                        .connect_with(opts)
                        .await
                        .map(DbPool::MySql)
                }
                Engine::Postgres => {
                    let opts = PgConnectOptions::new()
                        .host(&config.host)
                        .port(config.port)
                        .username(&config.user)
                        .password(&config.password)
                        .database(&config.database)
                        .options([("timezone", config.time_zone.as_str())]);
                    PgPoolOptions::new()
                        .max_connections(config.max_connections)
                        .acquire_timeout(config.connect_timeout)
                        .test_before_acquire(config.health_checks)
                        .max_lifetime(config.max_age)
                        .connect_with(opts)
                        .await
                        .map(DbPool::Postgres)
                }
            }
        };
        // connect_with may block on DNS or TCP beyond the acquire timeout.
        match tokio::time::timeout(config.connect_timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(sqlx::Error::PoolTimedOut),
        }
    }

    async fn ping(&self, conn: &DbPool) -> Result<(), sqlx::Error> {
        conn.ping().await
    }

    async fn close(&self, conn: DbPool) {
        conn.close().await;
    }
}

/// Connection opened by [`MemoryConnector`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryConn {
    pub serial: u64,
    pub database: String,
    pub host: String,
}

/// Connector without a server. Counts open attempts, opens and closes; can be slowed down
/// or made to refuse particular hosts.
#[derive(Default)]
pub struct MemoryConnector {
    attempts: AtomicU64,
    opened: AtomicU64,
    closed: AtomicU64,
    open_delay: Duration,
    failing_hosts: HashSet<String>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn failing_host(mut self, host: impl Into<String>) -> Self {
        self.failing_hosts.insert(host.into());
        self
    }

    /// Calls to `open`, failed ones included.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Conn = MemoryConn;

    async fn open(&self, config: &ConnectionConfig) -> Result<MemoryConn, sqlx::Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        if self.failing_hosts.contains(&config.host) {
            return Err(sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("{}:{} refused connection", config.host, config.port),
            )));
        }
        let serial = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MemoryConn {
            serial,
            database: config.database.clone(),
            host: config.host.clone(),
        })
    }

    async fn ping(&self, _conn: &MemoryConn) -> Result<(), sqlx::Error> {
        Ok(())
    }

    async fn close(&self, _conn: MemoryConn) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
