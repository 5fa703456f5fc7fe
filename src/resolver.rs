//! Local answer table.
//!
//! Decides, per question, whether a name is answered from the static table,
//! left unanswered as a zone miss, or handed to the upstream forwarder.
//! Lookups never block and have no side effects.

use hickory_proto::rr::Name;
use rustc_hash::FxHashMap;

use crate::config::{LocalConfig, normalize_name, normalize_zone};

/// Where a question goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    /// Answer locally with this address.
    Local(&'a str),
    /// Inside the served zone but not in the table. No answer, no forwarding.
    ZoneMiss,
    /// Ask the upstreams.
    Forward,
}

/// Which names the table is authoritative for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Every name is looked up; misses are forwarded.
    Table,
    /// Only names under the suffix (in `.suffix.` form) are looked up;
    /// misses inside it are not forwarded.
    Zone(String),
}

/// Static name to IPv4 table.
#[derive(Debug, Clone)]
pub struct LocalResolver {
    records: FxHashMap<String, String>,
    scope: Scope,
    ttl: u32,
}

impl LocalResolver {
    /// Build a resolver from `(name, address)` pairs.
    ///
    /// Names are normalized to lowercase, dot-terminated keys. Addresses are
    /// kept as given and only parsed when an answer is built.
    pub fn new<I, K, V>(records: I, scope: Scope, ttl: u32) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let records = records
            .into_iter()
            .map(|(name, address)| (normalize_name(name.as_ref()), address.into()))
            .collect();

        Self {
            records,
            scope,
            ttl,
        }
    }

    pub fn from_config(config: &LocalConfig) -> Self {
        let scope = match &config.zone {
            Some(zone) => Scope::Zone(normalize_zone(zone)),
            None => Scope::Table,
        };
        Self::new(
            config.records.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            scope,
            config.ttl,
        )
    }

    /// Exact, case-insensitive lookup of a dot-terminated name.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.records
            .get(&name.to_lowercase())
            .map(String::as_str)
    }

    /// Whether `name` falls under the served zone. Always true without one.
    pub fn in_zone(&self, name: &str) -> bool {
        match &self.scope {
            Scope::Table => true,
            Scope::Zone(suffix) => name.to_lowercase().ends_with(suffix.as_str()),
        }
    }

    /// Route one question name.
    pub fn route(&self, name: &Name) -> Route<'_> {
        let name = name.to_ascii();

        if !self.in_zone(&name) {
            return Route::Forward;
        }

        match (self.resolve(&name), &self.scope) {
            (Some(address), _) => Route::Local(address),
            (None, Scope::Zone(_)) => Route::ZoneMiss,
            (None, Scope::Table) => Route::Forward,
        }
    }

    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Configured records as `(name, address)`, for startup logging.
    pub fn records(&self) -> impl Iterator<Item = (&str, &str)> {
        self.records.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Table names outside the served zone. They can never be answered.
    pub fn unreachable_records(&self) -> impl Iterator<Item = &str> {
        self.records
            .keys()
            .map(String::as_str)
            .filter(|name| !self.in_zone(name))
    }

    /// Returns the number of names in the table.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
