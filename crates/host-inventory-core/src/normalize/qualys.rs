//! Qualys host asset mapping.
//!
//! Identity fields live inside `sourceInfo.list`, where each entry wraps a
//! provider-specific object (`Ec2AssetSourceSimple`, `AssetSource`, ...).
//! Ports and software are wrapped per entry as well.

use super::{Extract, FieldRule, TableNormalizer};
use crate::lookup::Seg::Key;
use crate::models::HostField;

pub const SOURCE: &str = "qualys";

const SOURCE_INFO: &[crate::lookup::Seg<'static>] = &[Key("sourceInfo"), Key("list")];

pub static RULES: &[FieldRule] = &[
    FieldRule::new(HostField::Hostname, SOURCE_INFO, Extract::WrappedValue("localHostname")),
    FieldRule::new(HostField::LocalIp, SOURCE_INFO, Extract::WrappedValue("privateIpAddress")),
    FieldRule::new(HostField::ExternalIp, SOURCE_INFO, Extract::WrappedValue("publicIpAddress")),
    FieldRule::new(HostField::MacAddress, SOURCE_INFO, Extract::WrappedValue("macAddress")),
    FieldRule::new(HostField::Provider, &[Key("cloudProvider")], Extract::Text),
    FieldRule::new(HostField::OsVersion, &[Key("os")], Extract::Text),
    FieldRule::new(HostField::Platform, &[Key("agentInfo"), Key("platform")], Extract::Text),
    FieldRule::new(HostField::OpenPortsCount, &[Key("openPort"), Key("list")], Extract::Count),
    FieldRule::new(
        HostField::OpenPorts,
        &[Key("openPort"), Key("list")],
        Extract::OpenPorts("HostAssetOpenPort"),
    ),
    FieldRule::new(
        HostField::Software,
        &[Key("software"), Key("list")],
        Extract::Software("HostAssetSoftware"),
    ),
    FieldRule::new(HostField::VulnCount, &[Key("vuln"), Key("list")], Extract::Count),
];

pub static NORMALIZER: TableNormalizer = TableNormalizer::new(SOURCE, RULES);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OpenPort, RawRecord, Software};
    use crate::normalize::Normalizer;
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "id": 12345,
            "os": "Amazon Linux 2",
            "cloudProvider": "AWS",
            "agentInfo": {"platform": "Linux", "agentVersion": "5.1"},
            "sourceInfo": {"list": [
                {"AssetSource": {}},
                {"Ec2AssetSourceSimple": {
                    "localHostname": "ip-10-0-0-12.ec2.internal",
                    "privateIpAddress": "10.0.0.12",
                    "publicIpAddress": "54.1.2.3",
                    "macAddress": "0a:1b:2c:3d:4e:5f"
                }}
            ]},
            "openPort": {"list": [
                {"HostAssetOpenPort": {"port": 22, "protocol": "TCP", "serviceName": "ssh"}},
                {"HostAssetOpenPort": {"port": 111, "protocol": "UDP"}},
                {"somethingElse": {"port": 1}}
            ]},
            "software": {"list": [
                {"HostAssetSoftware": {"name": "openssl", "version": "1.0.2k"}},
                {"HostAssetSoftware": {"name": "bash"}}
            ]},
            "vuln": {"list": [{"HostAssetVuln": {"qid": 1}}, {"HostAssetVuln": {"qid": 2}}]}
        })
    }

    #[test]
    fn maps_a_full_asset() {
        let host = NORMALIZER.normalize(&RawRecord::new("qualys", sample()));

        assert_eq!(host.hostname.as_deref(), Some("ip-10-0-0-12.ec2.internal"));
        assert_eq!(host.local_ip.as_deref(), Some("10.0.0.12"));
        assert_eq!(host.external_ip.as_deref(), Some("54.1.2.3"));
        assert_eq!(host.mac_address.as_deref(), Some("0a:1b:2c:3d:4e:5f"));
        assert_eq!(host.provider.as_deref(), Some("AWS"));
        assert_eq!(host.os_version.as_deref(), Some("Amazon Linux 2"));
        assert_eq!(host.platform.as_deref(), Some("Linux"));
        // count reflects the raw list, malformed entries included
        assert_eq!(host.open_ports_count, Some(3));
        assert_eq!(host.vuln_count, Some(2));
        assert!(host.open_ports.contains(&OpenPort {
            port: 22,
            protocol: "TCP".into(),
            service_name: Some("ssh".into()),
        }));
        assert!(host.open_ports.contains(&OpenPort {
            port: 111,
            protocol: "UDP".into(),
            service_name: None,
        }));
        assert_eq!(host.open_ports.len(), 2);
        assert_eq!(
            host.software,
            vec![
                Software {
                    name: "openssl".into(),
                    version: Some("1.0.2k".into())
                },
                Software {
                    name: "bash".into(),
                    version: None
                },
            ]
        );
        assert_eq!(host.first_seen_at, None);
        assert_eq!(host.sources.iter().collect::<Vec<_>>(), vec!["qualys"]);
    }

    #[test]
    fn missing_optional_fields_stay_unset() {
        let host = NORMALIZER.normalize(&RawRecord::new("qualys", json!({})));
        assert_eq!(host, crate::models::CanonicalHost::from_source("qualys"));
    }

    #[test]
    fn empty_lists_count_as_unset() {
        let payload = json!({"openPort": {"list": []}, "vuln": {"list": []}});
        let host = NORMALIZER.normalize(&RawRecord::new("qualys", payload));
        assert_eq!(host.open_ports_count, None);
        assert_eq!(host.vuln_count, None);
    }
}
