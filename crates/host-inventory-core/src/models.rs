//! Canonical data model shared by every pipeline stage.
//!
//! Raw provider payloads ([`RawRecord`]) are mapped into one fixed shape
//! ([`CanonicalHost`]). Records that describe the same physical asset are
//! gathered into a [`DuplicateGroup`] keyed by a configurable [`GroupKey`].

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single host payload as returned by an upstream provider.
///
/// The payload is kept opaque; only the matching normalizer knows its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub source: String,
    pub payload: Value,
}

impl RawRecord {
    pub fn new(source: impl Into<String>, payload: Value) -> Self {
        Self {
            source: source.into(),
            payload,
        }
    }
}

/// An open network port. Equality covers `(service_name, port, protocol)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OpenPort {
    pub port: u16,
    pub protocol: String,
    pub service_name: Option<String>,
}

/// An installed software package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Software {
    pub name: String,
    pub version: Option<String>,
}

/// The unified host record every source is mapped into.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalHost {
    /// Storage identity. `None` until the record has been persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub hostname: Option<String>,
    pub local_ip: Option<String>,
    pub external_ip: Option<String>,
    pub mac_address: Option<String>,
    pub provider: Option<String>,
    pub os_version: Option<String>,
    pub platform: Option<String>,
    pub first_seen_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub open_ports_count: Option<u64>,
    pub vuln_count: Option<u64>,
    #[serde(default)]
    pub open_ports: BTreeSet<OpenPort>,
    #[serde(default)]
    pub software: Vec<Software>,
    #[serde(default)]
    pub sources: BTreeSet<String>,
}

impl CanonicalHost {
    /// An empty record attributed to exactly one source.
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            sources: BTreeSet::from([source.into()]),
            ..Self::default()
        }
    }

    /// The source used for priority ordering during merge.
    pub fn primary_source(&self) -> Option<&str> {
        self.sources.iter().next().map(String::as_str)
    }
}

/// Names of the canonical fields, as used in configuration and grouping keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostField {
    Hostname,
    LocalIp,
    ExternalIp,
    MacAddress,
    Provider,
    OsVersion,
    Platform,
    FirstSeenAt,
    LastSeenAt,
    OpenPortsCount,
    VulnCount,
    OpenPorts,
    Software,
}

impl HostField {
    pub const ALL: [HostField; 13] = [
        HostField::Hostname,
        HostField::LocalIp,
        HostField::ExternalIp,
        HostField::MacAddress,
        HostField::Provider,
        HostField::OsVersion,
        HostField::Platform,
        HostField::FirstSeenAt,
        HostField::LastSeenAt,
        HostField::OpenPortsCount,
        HostField::VulnCount,
        HostField::OpenPorts,
        HostField::Software,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HostField::Hostname => "hostname",
            HostField::LocalIp => "local_ip",
            HostField::ExternalIp => "external_ip",
            HostField::MacAddress => "mac_address",
            HostField::Provider => "provider",
            HostField::OsVersion => "os_version",
            HostField::Platform => "platform",
            HostField::FirstSeenAt => "first_seen_at",
            HostField::LastSeenAt => "last_seen_at",
            HostField::OpenPortsCount => "open_ports_count",
            HostField::VulnCount => "vuln_count",
            HostField::OpenPorts => "open_ports",
            HostField::Software => "software",
        }
    }

    /// Whether the field is a scalar text field that can take part in a
    /// grouping key.
    pub fn is_groupable(&self) -> bool {
        matches!(
            self,
            HostField::Hostname
                | HostField::LocalIp
                | HostField::ExternalIp
                | HostField::MacAddress
                | HostField::Provider
                | HostField::OsVersion
                | HostField::Platform
        )
    }

    /// Text value of a groupable field. `None` for unset and non-text fields.
    pub fn text<'h>(&self, host: &'h CanonicalHost) -> Option<&'h str> {
        let value = match self {
            HostField::Hostname => &host.hostname,
            HostField::LocalIp => &host.local_ip,
            HostField::ExternalIp => &host.external_ip,
            HostField::MacAddress => &host.mac_address,
            HostField::Provider => &host.provider,
            HostField::OsVersion => &host.os_version,
            HostField::Platform => &host.platform,
            _ => return None,
        };
        value.as_deref()
    }

    /// Writes a text value into a groupable field. Ignored for other fields.
    pub fn set_text(&self, host: &mut CanonicalHost, value: Option<String>) {
        let slot = match self {
            HostField::Hostname => &mut host.hostname,
            HostField::LocalIp => &mut host.local_ip,
            HostField::ExternalIp => &mut host.external_ip,
            HostField::MacAddress => &mut host.mac_address,
            HostField::Provider => &mut host.provider,
            HostField::OsVersion => &mut host.os_version,
            HostField::Platform => &mut host.platform,
            _ => return,
        };
        *slot = value;
    }

    /// Whether `host` carries a meaningful value for this field.
    ///
    /// Empty strings, zero counts and empty collections count as unset.
    pub fn is_set_on(&self, host: &CanonicalHost) -> bool {
        match self {
            HostField::FirstSeenAt => host.first_seen_at.is_some(),
            HostField::LastSeenAt => host.last_seen_at.is_some(),
            HostField::OpenPortsCount => host.open_ports_count.is_some_and(|n| n > 0),
            HostField::VulnCount => host.vuln_count.is_some_and(|n| n > 0),
            HostField::OpenPorts => !host.open_ports.is_empty(),
            HostField::Software => !host.software.is_empty(),
            text => text.text(host).is_some_and(|s| !s.is_empty()),
        }
    }

    /// Copies this field's value from `from` into `to`.
    pub fn copy_value(&self, from: &CanonicalHost, to: &mut CanonicalHost) {
        match self {
            HostField::FirstSeenAt => to.first_seen_at = from.first_seen_at,
            HostField::LastSeenAt => to.last_seen_at = from.last_seen_at,
            HostField::OpenPortsCount => to.open_ports_count = from.open_ports_count,
            HostField::VulnCount => to.vuln_count = from.vuln_count,
            HostField::OpenPorts => to.open_ports = from.open_ports.clone(),
            HostField::Software => to.software = from.software.clone(),
            text => text.set_text(to, text.text(from).map(str::to_string)),
        }
    }
}

impl fmt::Display for HostField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostField {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match HostField::ALL.iter().find(|f| f.as_str() == s) {
            Some(field) => Ok(*field),
            None => bail!("unknown host field: '{}'", s),
        }
    }
}

/// The values of the grouping-key fields for one host, in key order.
///
/// Two hosts belong to the same group when every key field matches
/// exactly, including both being unset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    entries: Vec<(HostField, Option<String>)>,
}

impl GroupKey {
    pub fn new(entries: Vec<(HostField, Option<String>)>) -> Self {
        Self { entries }
    }

    pub fn of(host: &CanonicalHost, fields: &[HostField]) -> Self {
        Self {
            entries: fields
                .iter()
                .map(|f| (*f, f.text(host).map(str::to_string)))
                .collect(),
        }
    }

    pub fn entries(&self) -> &[(HostField, Option<String>)] {
        &self.entries
    }

    pub fn get(&self, field: HostField) -> Option<&str> {
        self.entries
            .iter()
            .find(|(f, _)| *f == field)
            .and_then(|(_, v)| v.as_deref())
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|(field, value)| format!("{}={}", field, value.as_deref().unwrap_or("<unset>")))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// Hosts sharing one grouping key. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    key: GroupKey,
    members: Vec<CanonicalHost>,
}

impl DuplicateGroup {
    /// Returns `None` when `members` is empty.
    pub fn new(key: GroupKey, members: Vec<CanonicalHost>) -> Option<Self> {
        if members.is_empty() {
            return None;
        }
        Some(Self { key, members })
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn members(&self) -> &[CanonicalHost] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// A single-member group is not a duplicate and must pass through unmerged.
    pub fn is_duplicate(&self) -> bool {
        self.members.len() > 1
    }

    /// Storage ids of the members that have been persisted.
    pub fn member_ids(&self) -> Vec<String> {
        self.members.iter().filter_map(|m| m.id.clone()).collect()
    }
}
