// Centralized Observability Infrastructure
// Structured logging, process-wide operation counters and per-store health
// tracking. Counter reads are approximate; only monotonicity is guaranteed.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// Global atomic counters for metrics
static OPERATION_COUNTER: AtomicU64 = AtomicU64::new(0);
static ERROR_COUNTER: AtomicU64 = AtomicU64::new(0);
static QUERY_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Error-rate ceiling below which a store still reports healthy.
pub const HEALTHY_ERROR_RATE: f64 = 0.1;

/// Tracing verbosity for the storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Errors only. Wins over any `RUST_LOG` setting.
    Quiet,
    /// Store warnings, errors elsewhere.
    #[default]
    Normal,
    /// Per-operation debug output from the stores.
    Verbose,
}

impl LogLevel {
    /// The env-filter directive this level stands for.
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::Quiet => "error",
            LogLevel::Normal => "headkey=warn,error",
            LogLevel::Verbose => "headkey=debug,info",
        }
    }
}

/// Install the process-wide tracing subscriber at the given verbosity.
///
/// `RUST_LOG` overrides the level except under `Quiet`, which always
/// silences. Calling this more than once is a no-op, so tests can invoke
/// it freely.
pub fn init_logging(level: LogLevel) {
    let filter = match (level, std::env::var("RUST_LOG")) {
        (LogLevel::Quiet, _) | (_, Err(_)) => EnvFilter::new(level.directive()),
        (_, Ok(spec)) => {
            EnvFilter::try_new(spec).unwrap_or_else(|_| EnvFilter::new(level.directive()))
        }
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .try_init();
}

/// Metric types for performance monitoring
#[derive(Debug, Clone)]
pub enum MetricType {
    Counter {
        name: &'static str,
        value: u64,
    },
    Gauge {
        name: &'static str,
        value: f64,
    },
    Timer {
        name: &'static str,
        duration: Duration,
    },
}

/// Record a metric
pub fn record_metric(metric: MetricType) {
    match metric {
        MetricType::Counter { name, value } => {
            debug!("metric.counter {} = {}", name, value);
        }
        MetricType::Gauge { name, value } => {
            debug!("metric.gauge {} = {}", name, value);
        }
        MetricType::Timer { name, duration } => {
            debug!("metric.timer {} = {:?}", name, duration);
        }
    }
}

/// Execute a future under a fresh trace id, logging outcome and duration.
pub async fn with_trace_id<F, T>(operation: &str, f: F) -> crate::errors::StoreResult<T>
where
    F: std::future::Future<Output = crate::errors::StoreResult<T>>,
{
    let trace_id = Uuid::new_v4();
    debug!(trace_id = %trace_id, "Starting operation: {}", operation);

    let start = Instant::now();
    let result = f.await;
    let elapsed = start.elapsed();

    match &result {
        Ok(_) => {
            debug!(
                trace_id = %trace_id,
                elapsed_ms = elapsed.as_millis(),
                "Operation completed: {}", operation
            );
            OPERATION_COUNTER.fetch_add(1, Ordering::Relaxed);
            record_metric(MetricType::Timer {
                name: "operation.duration",
                duration: elapsed,
            });
        }
        Err(e) => {
            error!(
                trace_id = %trace_id,
                elapsed_ms = elapsed.as_millis(),
                error = %e,
                "Operation failed: {}", operation
            );
            OPERATION_COUNTER.fetch_add(1, Ordering::Relaxed);
            ERROR_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
    }

    result
}

/// Count one executed query for the process-wide snapshot.
pub fn record_query() {
    QUERY_COUNTER.fetch_add(1, Ordering::Relaxed);
}

/// Get current metrics snapshot
pub fn get_metrics() -> serde_json::Value {
    serde_json::json!({
        "operations": {
            "total": OPERATION_COUNTER.load(Ordering::Relaxed),
            "errors": ERROR_COUNTER.load(Ordering::Relaxed),
            "queries": QUERY_COUNTER.load(Ordering::Relaxed),
        },
        "timestamp": Utc::now().to_rfc3339(),
    })
}

/// Per-store request/error counters feeding `healthy()`.
///
/// A store is healthy while its error rate stays below
/// `HEALTHY_ERROR_RATE`, or while it has seen no traffic at all.
#[derive(Debug, Default)]
pub struct HealthTracker {
    requests: AtomicU64,
    errors: AtomicU64,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one request outcome and pass the result through unchanged.
    pub fn track<T>(
        &self,
        result: crate::errors::StoreResult<T>,
    ) -> crate::errors::StoreResult<T> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    pub fn record(&self, ok: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn error_rate(&self) -> f64 {
        let requests = self.requests();
        if requests == 0 {
            return 0.0;
        }
        self.errors() as f64 / requests as f64
    }

    pub fn healthy(&self) -> bool {
        self.requests() == 0 || self.error_rate() < HEALTHY_ERROR_RATE
    }
}
