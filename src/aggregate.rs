//! Aggregation of stored units into a statistics report.
//!
//! A query covers the retention window `[last_id - limit + 1, last_id]`, one
//! record per hour. Stored records fill their slots, missing hours read as
//! zero and the live unit occupies the slot of its own id.

use crate::storage::{merge_all, CountPair, UnitRecord, UnitStore, MAX_CLIENTS, MAX_DOMAINS};
use crate::types::{ResultKind, TimeUnit, UnitId};
use log::{debug, error};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Aggregated statistics over the retention window.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsReport {
    pub dns_queries: Vec<u64>,
    pub blocked_filtering: Vec<u64>,
    pub replaced_safebrowsing: Vec<u64>,
    pub replaced_parental: Vec<u64>,

    #[serde(serialize_with = "serialize_top")]
    pub top_queried_domains: Vec<CountPair>,
    #[serde(serialize_with = "serialize_top")]
    pub top_blocked_domains: Vec<CountPair>,
    #[serde(serialize_with = "serialize_top")]
    pub top_clients: Vec<CountPair>,

    pub num_dns_queries: u64,
    pub num_blocked_filtering: u64,
    pub num_replaced_safebrowsing: u64,
    pub num_replaced_safesearch: u64,
    pub num_replaced_parental: u64,

    /// Seconds
    pub avg_processing_time: f64,
    pub time_units: TimeUnit,
}

/// Top lists go out as `[{"name": count}, ...]`.
fn serialize_top<S: Serializer>(pairs: &[CountPair], serializer: S) -> Result<S::Ok, S::Error> {
    struct Entry<'a>(&'a CountPair);

    impl Serialize for Entry<'_> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let mut map = serializer.serialize_map(Some(1))?;
            map.serialize_entry(&self.0.name, &self.0.count)?;
            map.end()
        }
    }

    serializer.collect_seq(pairs.iter().map(Entry))
}

/// One record per hour of the retention window, oldest first.
#[derive(Clone, Debug)]
pub struct UnitWindow {
    pub first_id: UnitId,
    pub records: Vec<UnitRecord>,
}

impl UnitWindow {
    /// Build the window ending at `last_id` from stored records for
    /// `[first_id, last_id)` and the live unit.
    pub fn assemble(
        first_id: UnitId,
        last_id: UnitId,
        stored: Vec<UnitRecord>,
        live: Option<(UnitId, UnitRecord)>,
    ) -> Self {
        let mut records = stored;
        if last_id >= first_id {
            records.push(UnitRecord::default());
        }

        if let Some((live_id, live_record)) = live {
            let slot = live_id - first_id;
            if live_id >= first_id && live_id <= last_id && (slot as usize) < records.len() {
                records[slot as usize] = live_record;
            } else {
                debug!(
                    "Stats: live unit {} is outside window [{}, {}]",
                    live_id, first_id, last_id
                );
            }
        }

        Self { first_id, records }
    }

    /// Number of hours in the window.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Ids paired with their records.
    pub fn iter(&self) -> impl Iterator<Item = (UnitId, &UnitRecord)> {
        self.records
            .iter()
            .enumerate()
            .map(move |(i, record)| (self.first_id + i as UnitId, record))
    }
}

/// Load stored records for `[first_id, last_id)`.
///
/// Missing units and read failures both yield zero records; failures are logged.
pub fn load_stored(store: &UnitStore, first_id: UnitId, last_id: UnitId) -> Vec<UnitRecord> {
    let ids = first_id..last_id;
    let Some(tx) = store.begin(false) else {
        return ids.map(|_| UnitRecord::default()).collect();
    };

    let records = ids
        .map(|id| match tx.get(id) {
            Ok(Some(record)) => record,
            Ok(None) => UnitRecord::default(),
            Err(e) => {
                error!("Stats: load unit {}: {}", id, e);
                UnitRecord::default()
            }
        })
        .collect();

    tx.rollback();
    records
}

/// Reduce a window to a report.
pub fn build_report(window: &UnitWindow, time_unit: TimeUnit) -> StatsReport {
    let series = |count: &dyn Fn(&UnitRecord) -> u64| -> Vec<u64> {
        match time_unit {
            TimeUnit::Hours => window.records.iter().map(count).collect(),
            TimeUnit::Days => daily(window, count),
        }
    };

    let dns_queries = series(&|r: &UnitRecord| r.n_total);
    let blocked_filtering = series(&|r: &UnitRecord| r.result_count(ResultKind::Filtered));
    let replaced_safebrowsing = series(&|r: &UnitRecord| r.result_count(ResultKind::SafeBrowsing));
    let replaced_parental = series(&|r: &UnitRecord| r.result_count(ResultKind::Parental));

    let top_queried_domains = merge_all(
        window.records.iter().map(|r| r.domains.as_slice()),
        MAX_DOMAINS,
    );
    let top_blocked_domains = merge_all(
        window.records.iter().map(|r| r.blocked_domains.as_slice()),
        MAX_DOMAINS,
    );
    let top_clients = merge_all(window.records.iter().map(|r| r.clients.as_slice()), MAX_CLIENTS);

    let total = |kind: ResultKind| window.records.iter().map(|r| r.result_count(kind)).sum::<u64>();

    // Hours without traffic do not count towards the average
    let (time_sum, time_n) = window
        .records
        .iter()
        .filter(|r| r.time_avg != 0)
        .fold((0u64, 0u64), |(sum, n), r| (sum + r.time_avg, n + 1));
    let avg_processing_time = if time_n == 0 {
        0.0
    } else {
        (time_sum / time_n) as f64 / 1_000_000.0
    };

    StatsReport {
        dns_queries,
        blocked_filtering,
        replaced_safebrowsing,
        replaced_parental,
        top_queried_domains,
        top_blocked_domains,
        top_clients,
        num_dns_queries: window.records.iter().map(|r| r.n_total).sum(),
        num_blocked_filtering: total(ResultKind::Filtered),
        num_replaced_safebrowsing: total(ResultKind::SafeBrowsing),
        num_replaced_safesearch: total(ResultKind::SafeSearch),
        num_replaced_parental: total(ResultKind::Parental),
        avg_processing_time,
        time_units: time_unit,
    }
}

/// Sum hours into days. A day closes on the hour whose id is a multiple of
/// 24; hours after the last closing hour are not emitted.
fn daily(window: &UnitWindow, count: &dyn Fn(&UnitRecord) -> u64) -> Vec<u64> {
    let mut points = Vec::with_capacity(window.len() / 24);
    let mut sum = 0;
    for (id, record) in window.iter() {
        sum += count(record);
        if id.rem_euclid(24) == 0 {
            points.push(sum);
            sum = 0;
        }
    }
    points
}
