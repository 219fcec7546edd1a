//! Connection registry: alias -> handle, created lazily and at most once per alias.
//!
//! The alias map is only locked for lookups and inserts. Each alias owns a slot that runs
//! one open attempt; every caller waiting on that attempt gets its outcome, success or
//! failure. Reads of published handles never wait on an open in progress.

use crate::config::ConnectionConfig;
use crate::connector::Connector;
use crate::error::RoutingError;
use crate::role::Alias;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;

/// Lifecycle of a handle. `Unregistered` is reported for aliases without a live handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleState {
    Unregistered,
    Active,
    Idle,
    Closed,
}

/// A registered connection. Closed handles are never reopened; the alias gets a new handle.
pub struct ConnectionHandle<C> {
    alias: Alias,
    config: Arc<ConnectionConfig>,
    conn: C,
    generation: u64,
    last_used: Mutex<Instant>,
    closed: AtomicBool,
}

impl<C> ConnectionHandle<C> {
    pub fn alias(&self) -> &Alias {
        &self.alias
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn conn(&self) -> &C {
        &self.conn
    }

    /// Increases every time the registry creates a handle.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_used(&self) -> Instant {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn state_at(&self, now: Instant, idle_after: Duration) -> HandleState {
        if self.is_closed() {
            HandleState::Closed
        } else if now.saturating_duration_since(self.last_used()) >= idle_after {
            HandleState::Idle
        } else {
            HandleState::Active
        }
    }
}

/// Read-only view of one handle.
#[derive(Clone, Debug, Serialize)]
pub struct HandleSnapshot {
    pub alias: Alias,
    pub state: HandleState,
    pub generation: u64,
    #[serde(skip)]
    pub last_used: Instant,
    pub last_used_at: DateTime<Utc>,
}

type Opened<C> = Result<Arc<ConnectionHandle<C>>, Arc<sqlx::Error>>;

struct Slot<C> {
    /// Outcome of the single open attempt made for this slot.
    opened: OnceCell<Opened<C>>,
    /// Set once the slot has been dropped from the map; callers must look the alias up again.
    /// Touches and removals of the published handle serialize on this lock.
    retired: Mutex<bool>,
}

impl<C> Slot<C> {
    fn new() -> Self {
        Slot {
            opened: OnceCell::new(),
            retired: Mutex::new(false),
        }
    }

    /// The handle, once the open has succeeded.
    fn handle(&self) -> Option<&Arc<ConnectionHandle<C>>> {
        self.opened.get().and_then(|opened| opened.as_ref().ok())
    }

    fn retired(&self) -> MutexGuard<'_, bool> {
        self.retired.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type SlotRef<C> = Arc<Slot<C>>;

pub struct ConnectionRegistry<K: Connector> {
    connector: K,
    slots: RwLock<HashMap<Alias, SlotRef<K::Conn>>>,
    idle_after: Duration,
    generations: AtomicU64,
}

impl<K: Connector> ConnectionRegistry<K> {
    /// `idle_after`: how long a live handle may go unused before it is reported idle.
    pub fn new(connector: K, idle_after: Duration) -> Self {
        ConnectionRegistry {
            connector,
            slots: RwLock::new(HashMap::new()),
            idle_after,
            generations: AtomicU64::new(0),
        }
    }

    pub fn connector(&self) -> &K {
        &self.connector
    }

    /// Existing live handle for `alias`, or a new one built from `config_factory`.
    /// Concurrent first use of an alias makes exactly one open attempt.
    pub async fn get_or_create<F>(
        &self,
        alias: &Alias,
        config_factory: F,
    ) -> Result<Arc<ConnectionHandle<K::Conn>>, RoutingError>
    where
        F: Fn() -> ConnectionConfig,
    {
        self.open_or_reuse(alias, config_factory, false).await
    }

    /// `get_or_create` plus a touch, both under the alias' lock so the reaper cannot
    /// close the handle in between.
    pub async fn acquire<F>(
        &self,
        alias: &Alias,
        config_factory: F,
    ) -> Result<Arc<ConnectionHandle<K::Conn>>, RoutingError>
    where
        F: Fn() -> ConnectionConfig,
    {
        self.open_or_reuse(alias, config_factory, true).await
    }

    /// Record use of `alias`. Reaching an alias that was never routed is a programming error.
    pub fn touch(&self, alias: &Alias) -> Result<(), RoutingError> {
        let unregistered = || RoutingError::UnregisteredAlias(alias.clone());
        let slot = self.existing_slot(alias).ok_or_else(unregistered)?;
        let handle = slot.handle().ok_or_else(unregistered)?;
        let retired = slot.retired();
        if *retired {
            return Err(unregistered());
        }
        handle.touch();
        tracing::trace!(alias = %alias, "touched");
        Ok(())
    }

    /// Close and deregister `alias`. Returns false when there was nothing to remove.
    /// An open still in progress has nothing to remove yet.
    pub async fn remove(&self, alias: &Alias) -> bool {
        self.retire_if(alias, |_| true).await
    }

    /// Remove `alias` only if, checked under its lock, it has gone unused for longer than
    /// `idle_timeout` as of `now`. The control alias is never removed this way.
    pub async fn remove_if_idle(&self, alias: &Alias, idle_timeout: Duration, now: Instant) -> bool {
        if alias.is_control() {
            return false;
        }
        self.retire_if(alias, |handle| {
            now.saturating_duration_since(handle.last_used()) > idle_timeout
        })
        .await
    }

    /// State of `alias` right now. An alias whose open is still in progress is `Unregistered`.
    pub fn state(&self, alias: &Alias) -> HandleState {
        self.existing_slot(alias)
            .and_then(|slot| slot.handle().map(|h| h.state_at(Instant::now(), self.idle_after)))
            .unwrap_or(HandleState::Unregistered)
    }

    /// Every registered handle. Aliases still opening are left out.
    pub fn snapshot(&self) -> Vec<HandleSnapshot> {
        let slots: Vec<SlotRef<K::Conn>> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let now = Instant::now();
        let wall_now = Utc::now();
        let mut out: Vec<HandleSnapshot> = slots
            .iter()
            .filter_map(|slot| slot.handle())
            .map(|handle| {
                let last_used = handle.last_used();
                let since = now.saturating_duration_since(last_used);
                let last_used_at = chrono::Duration::from_std(since)
                    .ok()
                    .and_then(|d| wall_now.checked_sub_signed(d))
                    .unwrap_or(wall_now);
                HandleSnapshot {
                    alias: handle.alias.clone(),
                    state: handle.state_at(now, self.idle_after),
                    generation: handle.generation,
                    last_used,
                    last_used_at,
                }
            })
            .collect();
        out.sort_by(|a, b| a.alias.cmp(&b.alias));
        out
    }

    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every handle, control included.
    pub async fn shutdown(&self) {
        let slots: Vec<(Alias, SlotRef<K::Conn>)> = self
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        let mut count = 0;
        for (_, slot) in slots {
            let handle = {
                let mut retired = slot.retired();
                *retired = true;
                slot.handle()
                    .filter(|h| !h.closed.swap(true, Ordering::AcqRel))
                    .cloned()
            };
            if let Some(handle) = handle {
                self.connector.close(handle.conn.clone()).await;
                count += 1;
            }
        }
        tracing::info!(count, "connection registry shut down");
    }

    fn existing_slot(&self, alias: &Alias) -> Option<SlotRef<K::Conn>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(alias)
            .cloned()
    }

    fn slot_or_insert(&self, alias: &Alias) -> SlotRef<K::Conn> {
        if let Some(slot) = self.existing_slot(alias) {
            return slot;
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            slots
                .entry(alias.clone())
                .or_insert_with(|| Arc::new(Slot::new())),
        )
    }

    async fn open_or_reuse<F>(
        &self,
        alias: &Alias,
        config_factory: F,
        touch: bool,
    ) -> Result<Arc<ConnectionHandle<K::Conn>>, RoutingError>
    where
        F: Fn() -> ConnectionConfig,
    {
        loop {
            let slot = self.slot_or_insert(alias);
            let opened = slot
                .opened
                .get_or_init(|| self.open(alias, &slot, &config_factory))
                .await;
            let handle = match opened {
                Ok(handle) => Arc::clone(handle),
                Err(source) => {
                    return Err(RoutingError::ConnectionUnavailable {
                        alias: alias.clone(),
                        source: Arc::clone(source),
                    });
                }
            };

            let live = {
                let retired = slot.retired();
                if !*retired && touch {
                    handle.touch();
                }
                !*retired
            };
            if live {
                return Ok(handle);
            }
            // Removed or shut down under us. A handle nobody received yet is still open.
            if !handle.closed.swap(true, Ordering::AcqRel) {
                self.connector.close(handle.conn.clone()).await;
            }
        }
    }

    /// The slot's one open attempt. On failure the slot leaves the map before its waiters
    /// are woken, so only later callers start a new attempt.
    async fn open<F>(
        &self,
        alias: &Alias,
        slot: &SlotRef<K::Conn>,
        config_factory: &F,
    ) -> Opened<K::Conn>
    where
        F: Fn() -> ConnectionConfig,
    {
        let config = Arc::new(config_factory());
        match self.connector.open(&config).await {
            Ok(conn) => {
                let handle = Arc::new(ConnectionHandle {
                    alias: alias.clone(),
                    config,
                    conn,
                    generation: self.generations.fetch_add(1, Ordering::Relaxed) + 1,
                    last_used: Mutex::new(Instant::now()),
                    closed: AtomicBool::new(false),
                });
                tracing::info!(alias = %alias, generation = handle.generation, "registered connection");
                Ok(handle)
            }
            Err(source) => {
                tracing::warn!(alias = %alias, host = %config.host, error = %source, "failed to open connection");
                self.forget_slot(alias, slot);
                Err(Arc::new(source))
            }
        }
    }

    fn forget_slot(&self, alias: &Alias, slot: &SlotRef<K::Conn>) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.get(alias).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            slots.remove(alias);
        }
    }

    /// Marks the handle closed and drops the slot atomically under the slot lock, then
    /// closes the connection outside of it.
    async fn retire_if<P>(&self, alias: &Alias, predicate: P) -> bool
    where
        P: FnOnce(&ConnectionHandle<K::Conn>) -> bool,
    {
        let Some(slot) = self.existing_slot(alias) else {
            return false;
        };
        let Some(handle) = slot.handle().cloned() else {
            return false;
        };
        {
            let mut retired = slot.retired();
            if *retired || !predicate(&handle) {
                return false;
            }
            *retired = true;
            handle.closed.store(true, Ordering::Release);
            self.forget_slot(alias, &slot);
        }

        self.connector.close(handle.conn.clone()).await;
        tracing::info!(alias = %alias, generation = handle.generation, "closed connection");
        true
    }
}
