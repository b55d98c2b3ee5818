//! A small in-process metric registry.
//!
//! Components register a named [`Metric`] once at construction time, then
//! obtain per-label-set recorders (`U64Counter`, `U64Gauge`,
//! `DurationHistogram`) from it on the hot path. A [`Registry`] can render
//! its current state as Prometheus text exposition format via
//! [`Registry::report`], consumed by the admin HTTP surface.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, missing_docs, clippy::use_self)]

use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    fmt::Write as _,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

/// A set of label key/value pairs identifying one time series within a
/// named metric (e.g. `{tenant="acme", stage="merge"}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Attributes(BTreeMap<&'static str, String>);

impl Attributes {
    /// Create an empty attribute set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a label.
    pub fn insert(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.0.insert(key, value.into());
        self
    }

    fn render(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let mut out = String::from("{");
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let _ = write!(out, "{k}=\"{v}\"");
        }
        out.push('}');
        out
    }
}

impl<const N: usize> From<[(&'static str, &str); N]> for Attributes {
    fn from(kvs: [(&'static str, &str); N]) -> Self {
        let mut attrs = Self::new();
        for (k, v) in kvs {
            attrs = attrs.insert(k, v);
        }
        attrs
    }
}

/// A monotonically increasing counter.
#[derive(Debug, Clone, Default)]
pub struct U64Counter(Arc<AtomicU64>);

impl U64Counter {
    /// Increment the counter by `delta`.
    pub fn inc(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    /// Current value.
    pub fn fetch(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A value that can move up or down.
#[derive(Debug, Clone, Default)]
pub struct U64Gauge(Arc<AtomicU64>);

impl U64Gauge {
    /// Set the gauge's value.
    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    /// Current value.
    pub fn fetch(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Running count and total of observed durations, for a coarse
/// count/sum-style histogram (sufficient for "how long did this cycle
/// take" style observability without a full bucketed histogram).
#[derive(Debug, Default)]
pub struct DurationHistogram {
    count: AtomicU64,
    total_nanos: AtomicU64,
}

impl DurationHistogram {
    /// Record one observed duration.
    pub fn record(&self, d: Duration) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_nanos
            .fetch_add(d.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Number of observations recorded.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of all observed durations.
    pub fn total(&self) -> Duration {
        Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed))
    }
}

/// A named, registered metric; hands out per-[`Attributes`] recorders of
/// type `T`.
#[derive(Debug)]
pub struct Metric<T> {
    name: &'static str,
    description: &'static str,
    instruments: Mutex<BTreeMap<Attributes, Arc<T>>>,
}

impl<T: Default> Metric<T> {
    fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            instruments: Mutex::new(BTreeMap::new()),
        }
    }

    /// Obtain (creating if necessary) the recorder for the given label set.
    pub fn recorder(&self, attributes: impl Into<Attributes>) -> Arc<T> {
        let attributes = attributes.into();
        Arc::clone(
            self.instruments
                .lock()
                .entry(attributes)
                .or_insert_with(|| Arc::new(T::default())),
        )
    }
}

trait Reportable: Send + Sync + std::fmt::Debug {
    fn report(&self, out: &mut String);
}

impl Reportable for Metric<U64Counter> {
    fn report(&self, out: &mut String) {
        let _ = writeln!(out, "# HELP {} {}", self.name, self.description);
        let _ = writeln!(out, "# TYPE {} counter", self.name);
        for (attrs, v) in self.instruments.lock().iter() {
            let _ = writeln!(out, "{}{} {}", self.name, attrs.render(), v.fetch());
        }
    }
}

impl Reportable for Metric<U64Gauge> {
    fn report(&self, out: &mut String) {
        let _ = writeln!(out, "# HELP {} {}", self.name, self.description);
        let _ = writeln!(out, "# TYPE {} gauge", self.name);
        for (attrs, v) in self.instruments.lock().iter() {
            let _ = writeln!(out, "{}{} {}", self.name, attrs.render(), v.fetch());
        }
    }
}

impl Reportable for Metric<DurationHistogram> {
    fn report(&self, out: &mut String) {
        let _ = writeln!(out, "# HELP {}_seconds {}", self.name, self.description);
        let _ = writeln!(out, "# TYPE {}_seconds summary", self.name);
        for (attrs, v) in self.instruments.lock().iter() {
            let rendered = attrs.render();
            let _ = writeln!(
                out,
                "{}_seconds_count{} {}",
                self.name,
                rendered,
                v.count()
            );
            let _ = writeln!(
                out,
                "{}_seconds_sum{} {}",
                self.name,
                rendered,
                v.total().as_secs_f64()
            );
        }
    }
}

/// Process-wide registry of metrics. One is constructed at start-up and
/// shared (via `Arc`) by every component that records metrics.
#[derive(Debug, Default)]
pub struct Registry {
    metrics: Mutex<Vec<Arc<dyn Reportable>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new named counter metric.
    pub fn register_counter(
        &self,
        name: &'static str,
        description: &'static str,
    ) -> Arc<Metric<U64Counter>> {
        let m = Arc::new(Metric::new(name, description));
        self.metrics.lock().push(m.clone());
        m
    }

    /// Register a new named gauge metric.
    pub fn register_gauge(
        &self,
        name: &'static str,
        description: &'static str,
    ) -> Arc<Metric<U64Gauge>> {
        let m = Arc::new(Metric::new(name, description));
        self.metrics.lock().push(m.clone());
        m
    }

    /// Register a new named duration-histogram metric.
    pub fn register_histogram(
        &self,
        name: &'static str,
        description: &'static str,
    ) -> Arc<Metric<DurationHistogram>> {
        let m = Arc::new(Metric::new(name, description));
        self.metrics.lock().push(m.clone());
        m
    }

    /// Render all registered metrics in Prometheus text exposition format.
    pub fn report(&self) -> String {
        let mut out = String::new();
        for m in self.metrics.lock().iter() {
            m.report(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates_per_label_set() {
        let registry = Registry::new();
        let metric = registry.register_counter("jobs_total", "number of jobs run");

        metric.recorder(Attributes::from([("tenant", "a")])).inc(2);
        metric.recorder(Attributes::from([("tenant", "a")])).inc(3);
        metric.recorder(Attributes::from([("tenant", "b")])).inc(1);

        assert_eq!(
            metric.recorder(Attributes::from([("tenant", "a")])).fetch(),
            5
        );
        assert_eq!(
            metric.recorder(Attributes::from([("tenant", "b")])).fetch(),
            1
        );

        let report = registry.report();
        assert!(report.contains("jobs_total{tenant=\"a\"} 5"));
        assert!(report.contains("jobs_total{tenant=\"b\"} 1"));
    }

    #[test]
    fn histogram_tracks_count_and_sum() {
        let registry = Registry::new();
        let metric = registry.register_histogram("cycle_duration", "cycle wall time");
        let recorder = metric.recorder(Attributes::new());
        recorder.record(Duration::from_secs(1));
        recorder.record(Duration::from_secs(3));
        assert_eq!(recorder.count(), 2);
        assert_eq!(recorder.total(), Duration::from_secs(4));
    }
}
