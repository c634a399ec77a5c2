//! In-process request monitor.
//!
//! Keeps per-route latency windows, cache hit/miss counts, database query
//! counts and error counts for the life of the process. Every record is
//! mirrored to the `metrics` facade so an installed exporter sees the same
//! numbers the periodic summary logs.

use std::{
    collections::{BTreeMap, VecDeque},
    path::PathBuf,
    sync::Mutex,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use metrics::{counter, histogram};
use serde::Serialize;
use sysinfo::{Pid, System};
use tracing::{info, warn};

use crate::cache::lock_recovering;
use crate::config::MonitoringSettings;

const SOURCE: &str = "infra::monitoring";

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub enabled: bool,
    /// Rolling latency samples kept per route.
    pub sample_size: usize,
    pub log_interval: Duration,
    pub log_file: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_size: 500,
            log_interval: Duration::from_secs(60),
            log_file: None,
        }
    }
}

impl From<&MonitoringSettings> for MonitorConfig {
    fn from(settings: &MonitoringSettings) -> Self {
        Self {
            enabled: settings.enabled,
            sample_size: settings.sample_size.max(1),
            log_interval: settings.log_interval,
            log_file: settings.log_file.clone(),
        }
    }
}

#[derive(Debug)]
struct TimingEntry {
    count: u64,
    total_ms: f64,
    min_ms: f64,
    max_ms: f64,
    samples: VecDeque<f64>,
}

impl TimingEntry {
    fn new(capacity: usize) -> Self {
        Self {
            count: 0,
            total_ms: 0.0,
            min_ms: f64::INFINITY,
            max_ms: 0.0,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    fn push(&mut self, ms: f64, cap: usize) {
        self.count += 1;
        self.total_ms += ms;
        self.min_ms = self.min_ms.min(ms);
        self.max_ms = self.max_ms.max(ms);
        self.samples.push_back(ms);
        while self.samples.len() > cap {
            self.samples.pop_front();
        }
    }

    fn summary(&self) -> TimingSummary {
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        TimingSummary {
            count: self.count,
            avg: if self.count > 0 {
                self.total_ms / self.count as f64
            } else {
                0.0
            },
            min: if self.count > 0 { self.min_ms } else { 0.0 },
            max: self.max_ms,
            p50: percentile(&sorted, 50.0),
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct CacheCounts {
    hits: u64,
    misses: u64,
}

/// Latency summary for one route, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingSummary {
    pub count: u64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSummary {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, zero before the first lookup.
    pub hit_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub resident_bytes: u64,
    pub virtual_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSnapshot {
    pub timings: BTreeMap<String, TimingSummary>,
    pub cache: BTreeMap<String, CacheSummary>,
    pub db_queries: BTreeMap<String, u64>,
    pub errors: BTreeMap<String, u64>,
    pub memory: Option<MemoryUsage>,
}

/// Sort-and-index percentile: `sorted[floor(p/100 * (n-1))]`.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((p / 100.0) * (sorted.len() - 1) as f64).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

pub struct Monitor {
    config: MonitorConfig,
    timings: DashMap<String, TimingEntry>,
    cache: DashMap<String, CacheCounts>,
    db_queries: DashMap<String, u64>,
    errors: DashMap<String, u64>,
    last_log: Mutex<Option<Instant>>,
    system: Mutex<System>,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            timings: DashMap::new(),
            cache: DashMap::new(),
            db_queries: DashMap::new(),
            errors: DashMap::new(),
            last_log: Mutex::new(None),
            system: Mutex::new(System::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(MonitorConfig {
            enabled: false,
            ..Default::default()
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn record_timing(&self, route: &str, elapsed: Duration) {
        if !self.config.enabled {
            return;
        }
        let ms = elapsed.as_micros() as f64 / 1_000.0;
        let cap = self.config.sample_size;
        self.timings
            .entry(route.to_string())
            .or_insert_with(|| TimingEntry::new(cap))
            .push(ms, cap);
        histogram!("tenderscope_request_ms", "route" => route.to_string()).record(ms);
    }

    pub fn record_cache_hit(&self, route: &str) {
        if !self.config.enabled {
            return;
        }
        self.cache.entry(route.to_string()).or_default().hits += 1;
        counter!("tenderscope_cache_hit_total", "route" => route.to_string()).increment(1);
    }

    pub fn record_cache_miss(&self, route: &str) {
        if !self.config.enabled {
            return;
        }
        self.cache.entry(route.to_string()).or_default().misses += 1;
        counter!("tenderscope_cache_miss_total", "route" => route.to_string()).increment(1);
    }

    pub fn record_db_query(&self, route: &str, count: u64) {
        if !self.config.enabled || count == 0 {
            return;
        }
        *self.db_queries.entry(route.to_string()).or_default() += count;
        counter!("tenderscope_db_queries_total", "route" => route.to_string()).increment(count);
    }

    pub fn record_error(&self, route: &str) {
        if !self.config.enabled {
            return;
        }
        *self.errors.entry(route.to_string()).or_default() += 1;
        counter!("tenderscope_errors_total", "route" => route.to_string()).increment(1);
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let timings = self
            .timings
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().summary()))
            .collect();

        let cache = self
            .cache
            .iter()
            .map(|entry| {
                let CacheCounts { hits, misses } = *entry.value();
                let total = hits + misses;
                let hit_rate = if total > 0 {
                    hits as f64 / total as f64
                } else {
                    0.0
                };
                (
                    entry.key().clone(),
                    CacheSummary {
                        hits,
                        misses,
                        hit_rate,
                    },
                )
            })
            .collect();

        let counts = |map: &DashMap<String, u64>| {
            map.iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect::<BTreeMap<_, _>>()
        };

        MonitorSnapshot {
            timings,
            cache,
            db_queries: counts(&self.db_queries),
            errors: counts(&self.errors),
            memory: self.memory_usage(),
        }
    }

    fn memory_usage(&self) -> Option<MemoryUsage> {
        let pid = Pid::from_u32(std::process::id());
        let mut system = lock_recovering(&self.system, SOURCE);
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(|process| MemoryUsage {
            resident_bytes: process.memory(),
            virtual_bytes: process.virtual_memory(),
        })
    }

    /// Log a snapshot if the global interval has elapsed. Returns whether it logged.
    pub fn log_if_needed(&self, context: &str) -> bool {
        if !self.config.enabled {
            return false;
        }

        {
            let mut last = lock_recovering(&self.last_log, SOURCE);
            let now = Instant::now();
            if let Some(previous) = *last
                && now.duration_since(previous) < self.config.log_interval
            {
                return false;
            }
            *last = Some(now);
        }

        let snapshot = match serde_json::to_string(&self.snapshot()) {
            Ok(json) => json,
            Err(err) => {
                warn!(target = "tenderscope::monitor", error = %err, "failed to encode monitor snapshot");
                return false;
            }
        };
        info!(target = "tenderscope::monitor", context, snapshot = %snapshot, "monitor snapshot");

        if let Some(path) = self.config.log_file.clone() {
            append_line(path, format!("[monitor] {context} {snapshot}\n"));
        }
        true
    }
}

fn append_line(path: PathBuf, line: String) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                use tokio::io::AsyncWriteExt;

                let result = async {
                    let mut file = tokio::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&path)
                        .await?;
                    file.write_all(line.as_bytes()).await
                }
                .await;
                if let Err(err) = result {
                    warn!(target = "tenderscope::monitor", path = %path.display(), error = %err, "failed to append monitor log");
                }
            });
        }
        Err(_) => {
            use std::io::Write;

            let result = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .and_then(|mut file| file.write_all(line.as_bytes()));
            if let Err(err) = result {
                warn!(target = "tenderscope::monitor", path = %path.display(), error = %err, "failed to append monitor log");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(sample_size: usize) -> Monitor {
        Monitor::new(MonitorConfig {
            sample_size,
            ..Default::default()
        })
    }

    #[test]
    fn percentile_uses_floor_index() {
        let sorted: Vec<f64> = (1..=10).map(f64::from).collect();
        assert_eq!(percentile(&sorted, 50.0), 5.0);
        assert_eq!(percentile(&sorted, 95.0), 9.0);
        assert_eq!(percentile(&sorted, 99.0), 9.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
        assert_eq!(percentile(&[3.0], 99.0), 3.0);
    }

    #[test]
    fn five_samples_report_the_middle_as_p50() {
        let monitor = monitor(500);
        for ms in [40, 10, 50, 20, 30] {
            monitor.record_timing("api.stats", Duration::from_millis(ms));
        }
        let summary = &monitor.snapshot().timings["api.stats"];
        assert_eq!(summary.p50, 30.0);
        assert_eq!(summary.p95, 40.0);
        assert_eq!(summary.min, 10.0);
        assert_eq!(summary.max, 50.0);
        assert_eq!(summary.avg, 30.0);
        assert_eq!(summary.count, 5);
    }

    #[test]
    fn sample_window_drops_oldest_first() {
        let monitor = monitor(3);
        for ms in [100, 1, 2, 3] {
            monitor.record_timing("api.tenders", Duration::from_millis(ms));
        }
        let summary = &monitor.snapshot().timings["api.tenders"];
        assert_eq!(summary.count, 4);
        assert_eq!(summary.max, 100.0);
        assert_eq!(summary.min, 1.0);
        // The 100ms sample fell out of the window.
        assert_eq!(summary.p99, 2.0);
        assert_eq!(summary.avg, 26.5);
    }

    #[test]
    fn hit_rate_is_a_ratio() {
        let monitor = monitor(10);
        monitor.record_cache_hit("api.stats");
        monitor.record_cache_hit("api.stats");
        monitor.record_cache_hit("api.stats");
        monitor.record_cache_miss("api.stats");
        monitor.record_db_query("api.stats", 7);
        monitor.record_error("api.stats");

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.cache["api.stats"].hit_rate, 0.75);
        assert_eq!(snapshot.db_queries["api.stats"], 7);
        assert_eq!(snapshot.errors["api.stats"], 1);
    }

    #[test]
    fn disabled_monitor_records_nothing() {
        let monitor = Monitor::disabled();
        monitor.record_timing("api.tenders", Duration::from_millis(5));
        monitor.record_cache_hit("api.tenders");
        monitor.record_error("api.tenders");
        let snapshot = monitor.snapshot();
        assert!(snapshot.timings.is_empty());
        assert!(snapshot.cache.is_empty());
        assert!(snapshot.errors.is_empty());
        assert!(!monitor.log_if_needed("api.tenders"));
    }

    #[test]
    fn log_cooldown_is_global_across_routes() {
        let monitor = monitor(10);
        assert!(monitor.log_if_needed("api.tenders"));
        assert!(!monitor.log_if_needed("api.stats"));
        assert!(!monitor.log_if_needed("api.tenders"));
    }

    #[test]
    fn log_file_receives_snapshot_lines() {
        let path = std::env::temp_dir().join(format!("tenderscope-monitor-{}.log", uuid::Uuid::new_v4()));
        let monitor = Monitor::new(MonitorConfig {
            log_file: Some(path.clone()),
            ..Default::default()
        });
        assert!(monitor.log_if_needed("api.lpse"));
        let contents = std::fs::read_to_string(&path).expect("log file written");
        assert!(contents.starts_with("[monitor] api.lpse {"));
        let _ = std::fs::remove_file(path);
    }
}
