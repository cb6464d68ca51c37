//! Per-source normalization into [`CanonicalHost`].
//!
//! Each source owns a declarative table of [`FieldRule`]s: a lookup path
//! into the raw payload, the canonical field it feeds, and how the value is
//! extracted. [`apply_rules`] evaluates a table with the safe lookup helpers
//! from [`crate::lookup`], so a missing or mistyped node simply leaves the
//! field unset.
//!
//! | Source | Table |
//! |--------|-------|
//! | `qualys` | [`qualys::RULES`] |
//! | `crowdstrike` | [`crowdstrike::RULES`] |

pub mod crowdstrike;
pub mod qualys;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::lookup::{as_text, dig, dig_array, dig_text, dig_timestamp, Seg};
use crate::models::{CanonicalHost, HostField, OpenPort, RawRecord, Software};

/// Maps one source's raw payloads into canonical hosts.
///
/// Implementations are pure and total: they never fail, whatever the
/// payload looks like.
pub trait Normalizer: Send + Sync {
    /// Source slug this normalizer understands (e.g. `"qualys"`).
    fn source(&self) -> &str;

    /// The resulting host has `sources == {record.source}`.
    fn normalize(&self, record: &RawRecord) -> CanonicalHost;
}

/// How a value is pulled out of the node a [`FieldRule`] path points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extract {
    /// Scalar rendered as text.
    Text,
    /// Text with `-` separators rewritten to `:`.
    MacAddress,
    /// Timestamp, see [`crate::lookup::parse_timestamp`].
    Timestamp,
    /// Length of a non-empty array.
    Count,
    /// The path points at a list of objects whose values are themselves
    /// wrapper objects. Yields the first wrapper member with this name.
    WrappedValue(&'static str),
    /// List of `{<wrapper>: {port, protocol, serviceName}}` entries.
    OpenPorts(&'static str),
    /// List of `{<wrapper>: {name, version}}` entries.
    Software(&'static str),
}

/// One row of a source mapping table.
#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub field: HostField,
    pub path: &'static [Seg<'static>],
    pub extract: Extract,
}

impl FieldRule {
    pub const fn new(field: HostField, path: &'static [Seg<'static>], extract: Extract) -> Self {
        Self {
            field,
            path,
            extract,
        }
    }

    /// Whether the extraction kind can feed the target field.
    pub fn is_well_formed(&self) -> bool {
        match self.extract {
            Extract::Text | Extract::MacAddress | Extract::WrappedValue(_) => {
                self.field.is_groupable()
            }
            Extract::Timestamp => {
                matches!(self.field, HostField::FirstSeenAt | HostField::LastSeenAt)
            }
            Extract::Count => {
                matches!(self.field, HostField::OpenPortsCount | HostField::VulnCount)
            }
            Extract::OpenPorts(_) => self.field == HostField::OpenPorts,
            Extract::Software(_) => self.field == HostField::Software,
        }
    }
}

enum Extracted {
    Text(String),
    Time(DateTime<Utc>),
    Count(u64),
    Ports(BTreeSet<OpenPort>),
    Software(Vec<Software>),
}

/// Evaluate a mapping table against one raw record.
pub fn apply_rules(rules: &[FieldRule], record: &RawRecord) -> CanonicalHost {
    let mut host = CanonicalHost::from_source(record.source.clone());
    for rule in rules {
        if let Some(value) = extract(&record.payload, rule) {
            assign(&mut host, rule.field, value);
        }
    }
    host
}

fn extract(payload: &Value, rule: &FieldRule) -> Option<Extracted> {
    match rule.extract {
        Extract::Text => dig_text(payload, rule.path).map(Extracted::Text),
        Extract::MacAddress => dig_text(payload, rule.path)
            .map(|mac| mac.replace('-', ":"))
            .map(Extracted::Text),
        Extract::Timestamp => dig_timestamp(payload, rule.path).map(Extracted::Time),
        Extract::Count => {
            let items = dig_array(payload, rule.path);
            (!items.is_empty()).then(|| Extracted::Count(items.len() as u64))
        }
        Extract::WrappedValue(key) => {
            wrapped_value(dig_array(payload, rule.path), key).map(Extracted::Text)
        }
        Extract::OpenPorts(wrapper) => {
            let ports: BTreeSet<OpenPort> = unwrap_entries(dig_array(payload, rule.path), wrapper)
                .filter_map(open_port)
                .collect();
            (!ports.is_empty()).then_some(Extracted::Ports(ports))
        }
        Extract::Software(wrapper) => {
            let software: Vec<Software> = unwrap_entries(dig_array(payload, rule.path), wrapper)
                .filter_map(software)
                .collect();
            (!software.is_empty()).then_some(Extracted::Software(software))
        }
    }
}

fn assign(host: &mut CanonicalHost, field: HostField, value: Extracted) {
    match (field, value) {
        (HostField::FirstSeenAt, Extracted::Time(t)) => host.first_seen_at = Some(t),
        (HostField::LastSeenAt, Extracted::Time(t)) => host.last_seen_at = Some(t),
        (HostField::OpenPortsCount, Extracted::Count(n)) => host.open_ports_count = Some(n),
        (HostField::VulnCount, Extracted::Count(n)) => host.vuln_count = Some(n),
        (HostField::OpenPorts, Extracted::Ports(p)) => host.open_ports = p,
        (HostField::Software, Extracted::Software(s)) => host.software = s,
        (field, Extracted::Text(s)) if field.is_groupable() => field.set_text(host, Some(s)),
        (field, _) => tracing::debug!(%field, "mapping rule kind does not match field"),
    }
}

fn wrapped_value(entries: &[Value], key: &str) -> Option<String> {
    entries
        .iter()
        .filter_map(Value::as_object)
        .flat_map(|entry| entry.values())
        .filter_map(Value::as_object)
        .find_map(|wrapper| wrapper.get(key))
        .and_then(as_text)
}

fn unwrap_entries<'v>(entries: &'v [Value], wrapper: &'v str) -> impl Iterator<Item = &'v Value> {
    entries
        .iter()
        .filter_map(move |entry| dig(entry, &[Seg::Key(wrapper)]))
        .filter(|inner| inner.is_object())
}

fn open_port(info: &Value) -> Option<OpenPort> {
    let port = dig(info, &[Seg::Key("port")])
        .and_then(|p| p.as_u64().or_else(|| p.as_str().and_then(|s| s.parse().ok())))
        .and_then(|p| u16::try_from(p).ok())?;
    Some(OpenPort {
        port,
        protocol: dig_text(info, &[Seg::Key("protocol")])?,
        service_name: dig_text(info, &[Seg::Key("serviceName")]),
    })
}

fn software(info: &Value) -> Option<Software> {
    Some(Software {
        name: dig_text(info, &[Seg::Key("name")])?,
        version: dig_text(info, &[Seg::Key("version")]),
    })
}

/// A [`Normalizer`] backed by a static mapping table.
pub struct TableNormalizer {
    source: &'static str,
    rules: &'static [FieldRule],
}

impl TableNormalizer {
    pub const fn new(source: &'static str, rules: &'static [FieldRule]) -> Self {
        Self { source, rules }
    }
}

impl Normalizer for TableNormalizer {
    fn source(&self) -> &str {
        self.source
    }

    fn normalize(&self, record: &RawRecord) -> CanonicalHost {
        apply_rules(self.rules, record)
    }
}

/// Source-slug lookup for the built-in normalizers.
pub fn normalizer_for(source: &str) -> Option<&'static dyn Normalizer> {
    match source {
        qualys::SOURCE => Some(&qualys::NORMALIZER),
        crowdstrike::SOURCE => Some(&crowdstrike::NORMALIZER),
        _ => None,
    }
}
