//! CrowdStrike Falcon device mapping.
//!
//! Fields are flat. MAC addresses are reported with `-` separators.

use super::{Extract, FieldRule, TableNormalizer};
use crate::lookup::Seg::Key;
use crate::models::HostField;

pub const SOURCE: &str = "crowdstrike";

pub static RULES: &[FieldRule] = &[
    FieldRule::new(HostField::Hostname, &[Key("hostname")], Extract::Text),
    FieldRule::new(HostField::LocalIp, &[Key("local_ip")], Extract::Text),
    FieldRule::new(HostField::ExternalIp, &[Key("external_ip")], Extract::Text),
    FieldRule::new(HostField::MacAddress, &[Key("mac_address")], Extract::MacAddress),
    FieldRule::new(HostField::Provider, &[Key("service_provider")], Extract::Text),
    FieldRule::new(HostField::OsVersion, &[Key("os_version")], Extract::Text),
    FieldRule::new(HostField::Platform, &[Key("platform_name")], Extract::Text),
    FieldRule::new(HostField::FirstSeenAt, &[Key("first_seen")], Extract::Timestamp),
    FieldRule::new(HostField::LastSeenAt, &[Key("last_seen")], Extract::Timestamp),
];

pub static NORMALIZER: TableNormalizer = TableNormalizer::new(SOURCE, RULES);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CanonicalHost, RawRecord};
    use crate::normalize::Normalizer;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn maps_a_device() {
        let payload = json!({
            "device_id": "abc",
            "hostname": "ip-10-0-0-12.ec2.internal",
            "local_ip": "10.0.0.12",
            "external_ip": "54.1.2.3",
            "mac_address": "0a-1b-2c-3d-4e-5f",
            "service_provider": "AWS_EC2_V2",
            "os_version": "Amazon Linux 2",
            "platform_name": "Linux",
            "first_seen": "2024-01-01T00:00:00Z",
            "last_seen": "2024-03-01T12:30:00Z"
        });
        let host = NORMALIZER.normalize(&RawRecord::new("crowdstrike", payload));

        assert_eq!(host.hostname.as_deref(), Some("ip-10-0-0-12.ec2.internal"));
        assert_eq!(host.mac_address.as_deref(), Some("0a:1b:2c:3d:4e:5f"));
        assert_eq!(host.provider.as_deref(), Some("AWS_EC2_V2"));
        assert_eq!(host.platform.as_deref(), Some("Linux"));
        assert_eq!(
            host.first_seen_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            host.last_seen_at,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap())
        );
        assert!(host.open_ports.is_empty());
        assert_eq!(host.sources.len(), 1);
    }

    #[test]
    fn missing_and_mistyped_fields_stay_unset() {
        let payload = json!({"mac_address": 12, "first_seen": "not a date", "hostname": null});
        let host = NORMALIZER.normalize(&RawRecord::new("crowdstrike", payload));
        // numbers are rendered as text before the separator rewrite
        assert_eq!(host.mac_address.as_deref(), Some("12"));
        assert_eq!(host.first_seen_at, None);
        assert_eq!(host.hostname, None);

        let empty = NORMALIZER.normalize(&RawRecord::new("crowdstrike", json!({})));
        assert_eq!(empty, CanonicalHost::from_source("crowdstrike"));
    }
}
