// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Bounded connection pools keyed by pool name.
//!
//! Each named pool keeps its own idle list and active count. A request that
//! finds no idle connection and no free slot is rejected with
//! [`PoolError::PoolFull`] instead of waiting; callers decide whether to retry.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on connections checked out of one pool at a time.
    pub max_connections: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError<E: std::error::Error> {
    #[error("Connection pool '{pool}' is full ({max} active)")]
    PoolFull { pool: String, max: usize },
    #[error("Failed to create connection for pool '{pool}': {source}")]
    Factory { pool: String, source: E },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolStats {
    pub active: usize,
    pub idle: usize,
    pub max: usize,
    /// Connections created by the factory over the pool's lifetime.
    pub created: u64,
}

struct PoolSlot<C> {
    idle: Vec<C>,
    active: usize,
    created: u64,
}

impl<C> Default for PoolSlot<C> {
    fn default() -> Self {
        Self {
            idle: Vec::new(),
            active: 0,
            created: 0,
        }
    }
}

pub struct ConnectionPool<C> {
    pools: DashMap<String, PoolSlot<C>>,
    config: PoolConfig,
}

impl<C> ConnectionPool<C> {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            pools: DashMap::new(),
            config,
        }
    }

    /// Borrow a connection from `pool_name`, reusing an idle one when present
    /// and otherwise creating one with `factory` if a slot is free.
    pub async fn get_connection<F, Fut, E>(
        &self,
        pool_name: &str,
        factory: F,
    ) -> Result<C, PoolError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C, E>>,
        E: std::error::Error,
    {
        {
            let mut slot = self.pools.entry(pool_name.to_string()).or_default();
            if let Some(conn) = slot.idle.pop() {
                slot.active += 1;
                return Ok(conn);
            }
            if slot.active >= self.config.max_connections {
                tracing::debug!(
                    pool = pool_name,
                    max = self.config.max_connections,
                    "Connection pool exhausted"
                );
                return Err(PoolError::PoolFull {
                    pool: pool_name.to_string(),
                    max: self.config.max_connections,
                });
            }
            // Reserve the slot before the factory runs so concurrent callers
            // cannot overshoot the limit.
            slot.active += 1;
        }

        match factory().await {
            Ok(conn) => {
                if let Some(mut slot) = self.pools.get_mut(pool_name) {
                    slot.created += 1;
                }
                Ok(conn)
            }
            Err(source) => {
                if let Some(mut slot) = self.pools.get_mut(pool_name) {
                    slot.active = slot.active.saturating_sub(1);
                }
                Err(PoolError::Factory {
                    pool: pool_name.to_string(),
                    source,
                })
            }
        }
    }

    /// Hand a borrowed connection back for reuse.
    pub fn return_connection(&self, pool_name: &str, conn: C) {
        let mut slot = self.pools.entry(pool_name.to_string()).or_default();
        slot.active = slot.active.saturating_sub(1);
        slot.idle.push(conn);
    }

    pub fn get_pool_stats(&self) -> BTreeMap<String, PoolStats> {
        self.pools
            .iter()
            .map(|entry| {
                let slot = entry.value();
                (
                    entry.key().clone(),
                    PoolStats {
                        active: slot.active,
                        idle: slot.idle.len(),
                        max: self.config.max_connections,
                        created: slot.created,
                    },
                )
            })
            .collect()
    }

    pub fn max_connections(&self) -> usize {
        self.config.max_connections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Debug, Error)]
    #[error("factory failed")]
    struct FactoryFailed;

    #[derive(Debug, PartialEq)]
    struct Conn(u64);

    fn pool(max: usize) -> ConnectionPool<Conn> {
        ConnectionPool::new(PoolConfig {
            max_connections: max,
        })
    }

    #[tokio::test]
    async fn test_pool_full_beyond_max() {
        let pool = pool(2);
        let counter = AtomicU64::new(0);
        let next = &counter;
        let make = move || async move {
            Ok::<_, FactoryFailed>(Conn(next.fetch_add(1, Ordering::SeqCst)))
        };

        let _a = pool.get_connection("git", make).await.unwrap();
        let _b = pool.get_connection("git", make).await.unwrap();
        let third = pool.get_connection("git", make).await;
        assert!(matches!(third, Err(PoolError::PoolFull { max: 2, .. })));

        // Other pools are accounted independently.
        assert!(pool.get_connection("network", make).await.is_ok());
    }

    #[tokio::test]
    async fn test_returned_connection_is_reused() {
        let pool = pool(1);
        let counter = AtomicU64::new(0);
        let created = &counter;
        let make = move || async move {
            Ok::<_, FactoryFailed>(Conn(created.fetch_add(1, Ordering::SeqCst) + 100))
        };

        let conn = pool.get_connection("default", make).await.unwrap();
        assert_eq!(conn, Conn(100));
        pool.return_connection("default", conn);

        let again = pool.get_connection("default", make).await.unwrap();
        assert_eq!(again, Conn(100));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let stats = pool.get_pool_stats();
        assert_eq!(stats["default"].active, 1);
        assert_eq!(stats["default"].idle, 0);
        assert_eq!(stats["default"].created, 1);
    }

    #[tokio::test]
    async fn test_factory_failure_releases_slot() {
        let pool = pool(1);
        let failed = pool
            .get_connection("default", || async { Err::<Conn, _>(FactoryFailed) })
            .await;
        assert!(matches!(failed, Err(PoolError::Factory { .. })));

        let ok = pool
            .get_connection("default", || async { Ok::<_, FactoryFailed>(Conn(1)) })
            .await;
        assert!(ok.is_ok());
    }
}
