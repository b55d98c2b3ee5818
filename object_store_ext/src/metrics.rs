//! Metrics-decorating [`BucketStore`] wrapper, mirroring the teacher's
//! `object_store_metrics` crate (§1.1 ambient stack).

use crate::error::Result;
use crate::store::{BucketStore, ObjectAttributes};
use async_trait::async_trait;
use bytes::Bytes;
use metric::{Attributes, DurationHistogram, Metric, Registry, U64Counter};
use std::sync::Arc;
use time_provider::TimeProvider;

/// Wraps an inner [`BucketStore`], recording per-operation call counts and
/// latency.
#[derive(Debug)]
pub struct MetricsBucketStore<S> {
    inner: S,
    time_provider: Arc<dyn TimeProvider>,
    calls: Arc<Metric<U64Counter>>,
    errors: Arc<Metric<U64Counter>>,
    duration: Arc<Metric<DurationHistogram>>,
}

impl<S: BucketStore> MetricsBucketStore<S> {
    /// Wrap `inner`, registering metrics in `registry`.
    pub fn new(inner: S, time_provider: Arc<dyn TimeProvider>, registry: &Registry) -> Self {
        Self {
            inner,
            time_provider,
            calls: registry.register_counter("object_store_calls_total", "bucket operations issued"),
            errors: registry.register_counter("object_store_errors_total", "bucket operations that failed"),
            duration: registry
                .register_histogram("object_store_op_duration", "bucket operation duration"),
        }
    }

    async fn timed<T>(
        &self,
        op: &'static str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        let start = self.time_provider.now();
        self.calls.recorder(Attributes::from([("op", op)])).inc(1);
        let result = fut.await;
        let elapsed = self
            .time_provider
            .now()
            .checked_duration_since(start);
        self.duration
            .recorder(Attributes::from([("op", op)]))
            .record(elapsed);
        if result.is_err() {
            self.errors.recorder(Attributes::from([("op", op)])).inc(1);
        }
        result
    }
}

#[async_trait]
impl<S: BucketStore> BucketStore for MetricsBucketStore<S> {
    async fn iter(&self, prefix: &str, callback: &mut (dyn FnMut(String) + Send)) -> Result<()> {
        self.timed("iter", self.inner.iter(prefix, callback)).await
    }

    async fn get(&self, name: &str) -> Result<Bytes> {
        self.timed("get", self.inner.get(name)).await
    }

    async fn upload(&self, name: &str, data: Bytes) -> Result<()> {
        self.timed("upload", self.inner.upload(name, data)).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.timed("delete", self.inner.delete(name)).await
    }

    async fn attributes(&self, name: &str) -> Result<ObjectAttributes> {
        self.timed("attributes", self.inner.attributes(name)).await
    }
}
