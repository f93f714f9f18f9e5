//! Unit data structures and their persisted form.
//!
//! A [`Unit`] is the live accumulator for one hour. When an hour is retired it
//! is reduced to a [`UnitRecord`]: averages instead of sums and top-K lists
//! instead of full tallies. The reduction is lossy in both directions.

use crate::types::{ResultKind, UnitId, RESULT_KINDS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum number of domains kept per list in a record or report.
pub const MAX_DOMAINS: usize = 100;

/// Maximum number of clients kept in a record or report.
pub const MAX_CLIENTS: usize = 100;

/// Name/count pair of a top-K list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountPair {
    pub name: String,
    pub count: u64,
}

impl CountPair {
    pub fn new(name: impl Into<String>, count: u64) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

/// Live statistics for one hour.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Unit {
    pub id: UnitId,
    pub n_total: u64,
    pub n_result: [u64; RESULT_KINDS],
    /// Summed processing time (usec)
    pub time_sum: u64,
    pub domains: HashMap<String, u64>,
    pub blocked_domains: HashMap<String, u64>,
    pub clients: HashMap<String, u64>,
}

impl Unit {
    /// Create an empty unit for the given hour.
    pub fn new(id: UnitId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Fold one validated query into the unit.
    pub fn record(&mut self, result: ResultKind, domain: &str, client: String, time_us: u64) {
        self.n_result[result.index()] += 1;

        let tally = if result.is_blocked() {
            &mut self.blocked_domains
        } else {
            &mut self.domains
        };
        *tally.entry(domain.to_string()).or_insert(0) += 1;

        *self.clients.entry(client).or_insert(0) += 1;
        self.time_sum += time_us;
        self.n_total += 1;
    }

    /// Reduce the unit to its persisted form.
    pub fn to_record(&self) -> UnitRecord {
        let time_avg = if self.n_total != 0 {
            self.time_sum / self.n_total
        } else {
            0
        };

        UnitRecord {
            n_total: self.n_total,
            n_result: self.n_result.to_vec(),
            domains: top_k(&self.domains, MAX_DOMAINS),
            blocked_domains: top_k(&self.blocked_domains, MAX_DOMAINS),
            clients: top_k(&self.clients, MAX_CLIENTS),
            time_avg,
        }
    }

    /// Rebuild a live unit from a stored record.
    ///
    /// Tallies only contain what survived top-K truncation, and the time sum
    /// is reconstructed as `time_avg * n_total`.
    pub fn from_record(id: UnitId, record: &UnitRecord) -> Self {
        let mut n_result = [0u64; RESULT_KINDS];
        for (slot, count) in n_result.iter_mut().zip(record.n_result.iter()) {
            *slot = *count;
        }

        Self {
            id,
            n_total: record.n_total,
            n_result,
            time_sum: record.time_avg * record.n_total,
            domains: to_map(&record.domains),
            blocked_domains: to_map(&record.blocked_domains),
            clients: to_map(&record.clients),
        }
    }
}

/// Persisted form of one hour.
///
/// Field order is the on-disk order (bincode).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub n_total: u64,
    pub n_result: Vec<u64>,
    pub domains: Vec<CountPair>,
    pub blocked_domains: Vec<CountPair>,
    pub clients: Vec<CountPair>,
    /// Average processing time (usec)
    pub time_avg: u64,
}

impl Default for UnitRecord {
    fn default() -> Self {
        Self {
            n_total: 0,
            n_result: vec![0; RESULT_KINDS],
            domains: Vec::new(),
            blocked_domains: Vec::new(),
            clients: Vec::new(),
            time_avg: 0,
        }
    }
}

impl UnitRecord {
    /// Count for one result kind; zero if the stored vector is short.
    #[inline]
    pub fn result_count(&self, kind: ResultKind) -> u64 {
        self.n_result.get(kind.index()).copied().unwrap_or(0)
    }
}

/// Highest `limit` entries of a tally, by descending count.
///
/// Ties are ordered by name so the output does not depend on map iteration order.
pub fn top_k(tally: &HashMap<String, u64>, limit: usize) -> Vec<CountPair> {
    let mut pairs: Vec<CountPair> = tally
        .iter()
        .map(|(name, count)| CountPair::new(name.clone(), *count))
        .collect();
    sort_desc(&mut pairs);
    pairs.truncate(limit);
    pairs
}

/// Merge two top-K lists, summing counts of equal names.
pub fn merge_top_k(a: &[CountPair], b: &[CountPair], limit: usize) -> Vec<CountPair> {
    merge_all([a, b], limit)
}

/// Merge any number of top-K lists, summing counts of equal names.
pub fn merge_all<'a, I>(lists: I, limit: usize) -> Vec<CountPair>
where
    I: IntoIterator<Item = &'a [CountPair]>,
{
    let mut sums: HashMap<String, u64> = HashMap::new();
    for list in lists {
        for pair in list {
            *sums.entry(pair.name.clone()).or_insert(0) += pair.count;
        }
    }
    top_k(&sums, limit)
}

fn sort_desc(pairs: &mut [CountPair]) {
    pairs.sort_unstable_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
}

fn to_map(pairs: &[CountPair]) -> HashMap<String, u64> {
    pairs.iter().map(|p| (p.name.clone(), p.count)).collect()
}
