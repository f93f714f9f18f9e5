//! Core value types shared by the statistics engine.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::{SystemTime, UNIX_EPOCH};

/// Hour-granularity bucket identifier (hours since UNIX epoch).
pub type UnitId = i64;

/// Number of result kinds tracked per unit.
pub const RESULT_KINDS: usize = 5;

/// Current wall-clock time in milliseconds since UNIX epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// How a DNS query was resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResultKind {
    NotFiltered = 1,
    Filtered = 2,
    SafeBrowsing = 3,
    SafeSearch = 4,
    Parental = 5,
}

impl ResultKind {
    /// Slot of this kind in a unit's per-kind counter array.
    #[inline]
    pub fn index(self) -> usize {
        self as usize - 1
    }

    /// Whether the queried domain counts as blocked.
    #[inline]
    pub fn is_blocked(self) -> bool {
        self != ResultKind::NotFiltered
    }

    /// Every kind, in counter-slot order.
    pub fn all() -> [ResultKind; RESULT_KINDS] {
        [
            ResultKind::NotFiltered,
            ResultKind::Filtered,
            ResultKind::SafeBrowsing,
            ResultKind::SafeSearch,
            ResultKind::Parental,
        ]
    }
}

impl TryFrom<u8> for ResultKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ResultKind::NotFiltered),
            2 => Ok(ResultKind::Filtered),
            3 => Ok(ResultKind::SafeBrowsing),
            4 => Ok(ResultKind::SafeSearch),
            5 => Ok(ResultKind::Parental),
            other => Err(other),
        }
    }
}

/// One observed DNS query.
///
/// `result` is `None` when the resolver did not classify the query; such
/// events are dropped on ingest, as are events with an empty domain or a
/// client address that is neither 4 nor 16 bytes long.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub result: Option<ResultKind>,
    pub domain: String,
    /// Raw client address bytes (IPv4 or IPv6)
    pub client: Vec<u8>,
    /// Processing time in microseconds
    pub time_us: u64,
}

impl Event {
    /// Build a classified event from a parsed client address.
    pub fn new(
        result: ResultKind,
        domain: impl Into<String>,
        client: std::net::IpAddr,
        time_us: u64,
    ) -> Self {
        let client = match client {
            std::net::IpAddr::V4(v4) => v4.octets().to_vec(),
            std::net::IpAddr::V6(v6) => v6.octets().to_vec(),
        };
        Self {
            result: Some(result),
            domain: domain.into(),
            client,
            time_us,
        }
    }

    /// Textual client address, or `None` for a malformed address.
    pub fn client_addr(&self) -> Option<String> {
        match self.client.len() {
            4 => {
                let octets: [u8; 4] = self.client.as_slice().try_into().ok()?;
                Some(Ipv4Addr::from(octets).to_string())
            }
            16 => {
                let octets: [u8; 16] = self.client.as_slice().try_into().ok()?;
                Some(Ipv6Addr::from(octets).to_string())
            }
            _ => None,
        }
    }
}

/// Granularity of the series returned by a query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    #[default]
    Hours,
    Days,
}

impl TimeUnit {
    /// Lowercase name, as used in JSON reports.
    pub fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Hours => "hours",
            TimeUnit::Days => "days",
        }
    }
}

impl std::str::FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" | "hours" => Ok(TimeUnit::Hours),
            "day" | "days" => Ok(TimeUnit::Days),
            other => Err(format!("unknown time unit: {}", other)),
        }
    }
}

/// Source of the bucket identifier for "now".
pub trait UnitClock: Send + Sync {
    fn unit_id(&self) -> UnitId;
}

/// Wall-clock hours since UNIX epoch.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl UnitClock for SystemClock {
    fn unit_id(&self) -> UnitId {
        (now_ms() / 1000 / 3600) as UnitId
    }
}
