//! Periodic server statistics
//!
//! The hub bumps a set of shared atomic counters as it works; the
//! [`StatsCollector`] samples them on its own interval, derives rates and
//! publishes the result on a `watch` channel. Nothing here ever touches the
//! world or the session registry.

use log::{debug, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Counters written by the hub and read by the collector.
#[derive(Debug, Default)]
pub struct HubCounters {
    active_sessions: AtomicUsize,
    active_players: AtomicUsize,
    total_connections: AtomicU64,
    inbound_events: AtomicU64,
    dropped_events: AtomicU64,
    evictions: AtomicU64,
    ticks: AtomicU64,
}

impl HubCounters {
    pub fn set_population(&self, sessions: usize, players: usize) {
        self.active_sessions.store(sessions, Ordering::Relaxed);
        self.active_players.store(players, Ordering::Relaxed);
    }

    pub fn record_connection(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inbound(&self) {
        self.inbound_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    pub fn active_players(&self) -> usize {
        self.active_players.load(Ordering::Relaxed)
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    pub fn inbound_events(&self) -> u64 {
        self.inbound_events.load(Ordering::Relaxed)
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_sessions: usize,
    pub active_players: usize,
    /// Inbound gameplay events per second over the last sampling window
    pub messages_per_sec: f64,
    pub dropped_events: u64,
    pub evictions: u64,
    pub ticks: u64,
    pub uptime_secs: f64,
}

pub struct StatsCollector {
    counters: Arc<HubCounters>,
    period: Duration,
    started_at: Instant,
    last_sample_at: Instant,
    last_inbound: u64,
    tx: watch::Sender<ServerStats>,
}

impl StatsCollector {
    pub fn new(counters: Arc<HubCounters>, period: Duration) -> (Self, watch::Receiver<ServerStats>) {
        let (tx, rx) = watch::channel(ServerStats::default());
        let now = Instant::now();
        let collector = Self {
            last_inbound: counters.inbound_events(),
            counters,
            period,
            started_at: now,
            last_sample_at: now,
            tx,
        };
        (collector, rx)
    }

    /// Reads the counters once, publishes and returns the result.
    pub fn sample(&mut self) -> ServerStats {
        let now = Instant::now();
        let inbound = self.counters.inbound_events();
        let window = now.duration_since(self.last_sample_at).as_secs_f64();
        let messages_per_sec = if window > 0.0 {
            inbound.saturating_sub(self.last_inbound) as f64 / window
        } else {
            0.0
        };
        self.last_inbound = inbound;
        self.last_sample_at = now;

        let stats = ServerStats {
            total_connections: self.counters.total_connections(),
            active_sessions: self.counters.active_sessions(),
            active_players: self.counters.active_players(),
            messages_per_sec,
            dropped_events: self.counters.dropped_events(),
            evictions: self.counters.evictions(),
            ticks: self.counters.ticks(),
            uptime_secs: now.duration_since(self.started_at).as_secs_f64(),
        };

        // send_replace keeps the latest value even with no receivers left
        self.tx.send_replace(stats.clone());
        stats
    }

    pub async fn run(mut self) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let stats = self.sample();
            match serde_json::to_string(&stats) {
                Ok(json) => debug!("Server stats: {}", json),
                Err(e) => warn!("Failed to encode server stats: {}", e),
            }
        }
    }
}
