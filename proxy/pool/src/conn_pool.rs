// Copyright 2022 SphereEx Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use async_trait::async_trait;
use crossbeam_queue::ArrayQueue;
use dashmap::DashMap;
use tracing::debug;

/// In order to be managed by the connection pool, Both the `ConnLike` and `ConnAttr` trait
/// needs to be implemented. The registered value acts as the factory of its endpoint.
#[async_trait]
pub trait ConnLike: Sized + Send + Sync + std::fmt::Debug + 'static {
    type Error: Send + std::fmt::Debug + 'static;

    // Method for create connection
    async fn build_conn(&self) -> Result<Self, Self::Error>;
}

/// `ConnAttr` traits is used to get attribute of current connection
pub trait ConnAttr {
    fn get_endpoint(&self) -> String;
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError<E: std::fmt::Debug> {
    #[error("no connection factory registered for endpoint {0:?}")]
    FactoryNotFound(String),

    #[error("build connection error: {0:?}")]
    Build(E),
}

#[derive(Debug)]
pub struct PoolInner<T: ConnLike + ConnAttr> {
    pub inner: ArrayQueue<T>,
}

impl<T: ConnLike + ConnAttr> PoolInner<T> {
    fn new(size: usize) -> PoolInner<T> {
        PoolInner { inner: ArrayQueue::new(size.max(1)) }
    }

    fn get_conn(&self) -> Option<T> {
        self.inner.pop()
    }

    fn put_conn(&self, conn: T) {
        if !self.inner.is_full() {
            let _ = self.inner.push(conn);
        }
    }
}

/// Scoped connection, goes back to its endpoint queue when dropped unless
/// it was discarded or dropped while busy.
#[derive(Debug)]
pub struct PoolConn<T>
where
    T: ConnLike + ConnAttr,
{
    pub pool: Arc<DashMap<String, PoolInner<T>>>,
    pub conn: Option<T>,
    endpoint: String,
    busy: bool,
}

impl<T> PoolConn<T>
where
    T: ConnLike + ConnAttr,
{
    // A conn dropped between `set_busy` and `set_idle` (e.g. its task was
    // aborted mid statement) is not recycled.
    pub fn set_busy(&mut self) {
        self.busy = true;
    }

    pub fn set_idle(&mut self) {
        self.busy = false;
    }

    // Drop the physical connection instead of recycling it.
    pub fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            debug!("discard conn {:?}", conn.get_endpoint());
        }
    }
}

#[derive(Debug)]
pub struct Pool<T>
where
    T: ConnLike + ConnAttr,
{
    factories: Arc<DashMap<String, Arc<T>>>,
    size: usize,
    pool: Arc<DashMap<String, PoolInner<T>>>,
}

impl<T> Clone for Pool<T>
where
    T: ConnLike + ConnAttr,
{
    fn clone(&self) -> Self {
        Pool {
            factories: Arc::clone(&self.factories),
            size: self.size,
            pool: Arc::clone(&self.pool),
        }
    }
}

impl<T> Pool<T>
where
    T: ConnLike + ConnAttr,
{
    pub fn new(size: usize) -> Pool<T> {
        Pool {
            factories: Arc::new(DashMap::new()),
            size,
            pool: Arc::new(DashMap::<String, PoolInner<T>>::new()),
        }
    }

    pub fn set_factory(&self, endpoint: &str, factory: T) {
        self.pool.entry(endpoint.to_string()).or_insert_with(|| PoolInner::new(self.size));
        self.factories.insert(endpoint.to_string(), Arc::new(factory));
    }

    // Build a fresh connection, bypassing the idle queue
    pub async fn build_conn(&self, endpoint: &str) -> Result<T, PoolError<T::Error>> {
        let factory = self
            .factories
            .get(endpoint)
            .map(|x| Arc::clone(x.value()))
            .ok_or_else(|| PoolError::FactoryNotFound(endpoint.to_string()))?;
        factory.build_conn().await.map_err(PoolError::Build)
    }

    // Get connection by endpoint attribute
    pub async fn get_conn_with_endpoint(
        &self,
        endpoint: &str,
    ) -> Result<PoolConn<T>, PoolError<T::Error>> {
        let conn = self.pool.get(endpoint).and_then(|val| val.get_conn());

        let conn = match conn {
            Some(conn) => conn,
            None => self.build_conn(endpoint).await?,
        };

        Ok(PoolConn {
            pool: Arc::clone(&self.pool),
            conn: Some(conn),
            endpoint: endpoint.to_string(),
            busy: false,
        })
    }

    pub fn len(&self, endpoint: &str) -> usize {
        match self.pool.get(endpoint) {
            Some(inner) => inner.inner.len(),
            None => 0,
        }
    }

    // Drop every idle connection of an endpoint
    pub fn clear(&self, endpoint: &str) {
        if let Some(inner) = self.pool.get(endpoint) {
            while inner.get_conn().is_some() {}
        }
    }
}

impl<T> Deref for PoolConn<T>
where
    T: ConnLike + ConnAttr,
{
    type Target = T;

    fn deref(&self) -> &T {
        self.conn.as_ref().expect("connection is only taken on drop or discard")
    }
}

impl<T> DerefMut for PoolConn<T>
where
    T: ConnLike + ConnAttr,
{
    fn deref_mut(&mut self) -> &mut T {
        self.conn.as_mut().expect("connection is only taken on drop or discard")
    }
}

impl<T> Drop for PoolConn<T>
where
    T: ConnLike + ConnAttr,
{
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.busy {
                debug!("discard busy conn {:?}", &conn);
                return;
            }
            debug!("put conn {:?}", &conn);
            if let Some(inner) = self.pool.get(&self.endpoint) {
                inner.put_conn(conn);
            }
        }
    }
}
