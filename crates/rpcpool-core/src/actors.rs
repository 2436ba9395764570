//! Actor registry: named worker pools for coarse load distribution.
//!
//! Every pool is built from the same registry loader, so actors shard load
//! rather than partition methods.

use crate::error::{Result, RpcError};
use crate::pool::{PoolOptions, WorkerPool};
use crate::registry::RegistryLoader;
use rand::Rng;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Fixed set of named pools. Never empty.
#[derive(Debug)]
pub struct ActorRegistry {
    pools: BTreeMap<String, Arc<WorkerPool>>,
    ordered: Vec<Arc<WorkerPool>>,
}

impl ActorRegistry {
    /// Start one pool of `pool_size` workers per name.
    ///
    /// Duplicate names collapse into one actor. An empty name list is a
    /// configuration error, as is a pool that fails to start; pools already
    /// started are closed before returning the error.
    pub async fn initialize<S: AsRef<str>>(
        loader: RegistryLoader,
        pool_size: usize,
        names: &[S],
        options: PoolOptions,
    ) -> Result<Self> {
        if names.is_empty() {
            return Err(RpcError::Config {
                message: "at least one actor name is required".to_string(),
            });
        }

        let options = PoolOptions {
            size: pool_size,
            ..options
        };

        let mut pools = BTreeMap::new();
        for name in names {
            let name = name.as_ref();
            if pools.contains_key(name) {
                continue;
            }
            match WorkerPool::spawn(name, loader, options.clone()).await {
                Ok(pool) => {
                    pools.insert(name.to_string(), Arc::new(pool));
                }
                Err(e) => {
                    for pool in pools.values() {
                        pool.close().await;
                    }
                    return Err(e);
                }
            }
        }

        info!("Initialized {} actors", pools.len());
        Ok(Self::new(pools))
    }

    /// Build a registry from pools that are already running.
    pub fn from_pools(pools: impl IntoIterator<Item = WorkerPool>) -> Result<Self> {
        let pools: BTreeMap<String, Arc<WorkerPool>> = pools
            .into_iter()
            .map(|pool| (pool.name().to_string(), Arc::new(pool)))
            .collect();
        if pools.is_empty() {
            return Err(RpcError::NoActors);
        }
        Ok(Self::new(pools))
    }

    fn new(pools: BTreeMap<String, Arc<WorkerPool>>) -> Self {
        let ordered = pools.values().cloned().collect();
        Self { pools, ordered }
    }

    /// The named pool if present, otherwise a uniformly random one.
    pub fn select(&self, name: Option<&str>) -> Arc<WorkerPool> {
        if let Some(pool) = name.and_then(|name| self.pools.get(name)) {
            return pool.clone();
        }
        let index = rand::rng().random_range(0..self.ordered.len());
        self.ordered[index].clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<WorkerPool>> {
        self.pools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.pools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Close every pool.
    pub async fn close_all(&self) {
        for pool in self.pools.values() {
            pool.close().await;
        }
    }
}

/// Pass-through to [`WorkerPool::exec`].
pub async fn dispatch(pool: &WorkerPool, method: &str, params: Value) -> Result<Value> {
    pool.exec(method, params).await
}
