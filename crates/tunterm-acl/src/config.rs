//! Start-up configuration for `tuntermd`.
//!
//! File format (YAML):
//! ```yaml
//! interfaces:
//!   - name: eth1
//!     sw_if_index: 1
//!   - name: eth2
//!     sw_if_index: 2
//! tables:
//!   - name: vxlan-v4
//!     family: v4
//!     rules:
//!       - dst: 10.0.0.5/32
//!         next_hop: 192.168.1.1
//!         interface: eth2
//! bindings:
//!   - interface: eth1
//!     table: vxlan-v4
//! probes:
//!   - interface: eth1
//!     dst: 10.0.0.5
//! ```
//!
//! Tables are created in file order, then bound. Probes are synthetic VXLAN
//! packets pushed through the dataplane once the configuration is applied.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;
use tunterm_types::{AddressFamily, IpAddress, SwIfIndex, TableIndex};

use crate::api::{ApiStatus, ControlRequest};
use crate::control::{ControlPlane, ControlPlaneError};
use crate::dataplane::{frame, PacketBuffer};
use crate::fib::RoutePathDescriptor;
use crate::host::InterfaceMap;
use crate::table::TunTermRule;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("unknown interface {0}")]
    UnknownInterface(String),

    #[error("unknown table {0}")]
    UnknownTable(String),

    #[error("{what} rejected: {status}")]
    Rejected { what: String, status: ApiStatus },

    #[error(transparent)]
    Control(#[from] ControlPlaneError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub interfaces: Vec<InterfaceConfig>,
    pub tables: Vec<TableConfig>,
    pub bindings: Vec<BindingConfig>,
    pub probes: Vec<ProbeConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,
    pub sw_if_index: SwIfIndex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    #[serde(with = "family_name")]
    pub family: AddressFamily,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(with = "address_text")]
    pub dst: IpAddress,
    #[serde(with = "address_text")]
    pub next_hop: IpAddress,
    /// Egress interface name; omitted for a recursive next hop.
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub table_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingConfig {
    pub interface: String,
    pub table: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub interface: String,
    #[serde(with = "address_text")]
    pub dst: IpAddress,
}

/// Table name to index, as assigned while applying.
pub type AppliedTables = BTreeMap<String, TableIndex>;

impl DaemonConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        serde_yaml::from_reader(BufReader::new(file)).map_err(|source| ConfigError::Yaml {
            path: display,
            source,
        })
    }

    /// Registers the configured interfaces with the host interface table.
    pub fn register_interfaces(&self, interfaces: &InterfaceMap) {
        for intf in &self.interfaces {
            interfaces.add(intf.sw_if_index, intf.name.clone());
        }
    }

    /// Creates every table and binding through the control plane.
    pub async fn apply(
        &self,
        control: &ControlPlane,
        interfaces: &InterfaceMap,
    ) -> Result<AppliedTables, ConfigError> {
        let mut applied = AppliedTables::new();
        let mut context = 0u32;

        for table in &self.tables {
            let rules = table
                .rules
                .iter()
                .map(|r| r.to_rule(interfaces))
                .collect::<Result<Vec<_>, _>>()?;
            context += 1;
            let reply = control
                .submit(ControlRequest::AddReplace {
                    context,
                    af: table.family,
                    table: applied.get(&table.name).copied(),
                    rules,
                })
                .await?;
            let index = match (reply.status, reply.table) {
                (ApiStatus::Success, Some(index)) => index,
                (status, _) => {
                    return Err(ConfigError::Rejected {
                        what: format!("table {}", table.name),
                        status,
                    })
                }
            };
            info!(table = %table.name, %index, rules = table.rules.len(), "configured table");
            applied.insert(table.name.clone(), index);
        }

        for binding in &self.bindings {
            let sw_if_index = lookup_interface(interfaces, &binding.interface)?;
            let table = applied
                .get(&binding.table)
                .copied()
                .ok_or_else(|| ConfigError::UnknownTable(binding.table.clone()))?;
            context += 1;
            let reply = control
                .submit(ControlRequest::InterfaceAddDel {
                    context,
                    sw_if_index: Some(sw_if_index),
                    table: Some(table),
                    is_add: true,
                })
                .await?;
            if !reply.status.is_success() {
                return Err(ConfigError::Rejected {
                    what: format!("binding {} -> {}", binding.interface, binding.table),
                    status: reply.status,
                });
            }
            info!(interface = %binding.interface, table = %binding.table, "bound table");
        }

        Ok(applied)
    }

    /// Traced probe packets for the configured probes.
    pub fn probe_packets(&self, interfaces: &InterfaceMap) -> Result<Vec<PacketBuffer>, ConfigError> {
        self.probes
            .iter()
            .map(|p| {
                let rx = lookup_interface(interfaces, &p.interface)?;
                Ok(PacketBuffer::new(frame::vxlan_frame(&p.dst), frame::VXLAN_OFFSET, rx).traced())
            })
            .collect()
    }
}

impl RuleConfig {
    fn to_rule(&self, interfaces: &InterfaceMap) -> Result<TunTermRule, ConfigError> {
        let sw_if_index = self
            .interface
            .as_deref()
            .map(|name| lookup_interface(interfaces, name))
            .transpose()?;
        Ok(TunTermRule {
            dst: self.dst,
            paths: vec![RoutePathDescriptor {
                sw_if_index,
                table_id: self.table_id,
                next_hop: self.next_hop,
            }],
        })
    }
}

fn lookup_interface(interfaces: &InterfaceMap, name: &str) -> Result<SwIfIndex, ConfigError> {
    interfaces
        .index_of(name)
        .ok_or_else(|| ConfigError::UnknownInterface(name.to_string()))
}

/// Addresses as text ("10.0.0.5", "10.0.0.5/32", "2001:db8::5").
mod address_text {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use tunterm_types::IpAddress;

    pub fn serialize<S: Serializer>(addr: &IpAddress, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(addr)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<IpAddress, D::Error> {
        let text = String::deserialize(d)?;
        text.parse().map_err(de::Error::custom)
    }
}

/// Families as text ("v4", "ipv6", ...).
mod family_name {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use tunterm_types::AddressFamily;

    pub fn serialize<S: Serializer>(af: &AddressFamily, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(af)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<AddressFamily, D::Error> {
        let text = String::deserialize(d)?;
        text.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const SAMPLE: &str = r#"
interfaces:
  - name: eth1
    sw_if_index: 1
  - name: eth2
    sw_if_index: 2
tables:
  - name: vxlan-v4
    family: v4
    rules:
      - dst: 10.0.0.5/32
        next_hop: 192.168.1.1
        interface: eth2
bindings:
  - interface: eth1
    table: vxlan-v4
"#;

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load() {
        let file = write_config(SAMPLE);
        let config = DaemonConfig::load(file.path()).unwrap();

        assert_eq!(config.interfaces.len(), 2);
        assert_eq!(config.tables[0].family, AddressFamily::V4);
        assert_eq!(config.tables[0].rules[0].dst, "10.0.0.5".parse().unwrap());
        assert_eq!(config.tables[0].rules[0].interface.as_deref(), Some("eth2"));
        assert!(config.probes.is_empty());
    }

    #[test]
    fn test_empty_file_is_default() {
        let file = write_config("{}\n");
        assert_eq!(DaemonConfig::load(file.path()).unwrap(), DaemonConfig::default());
    }

    #[test]
    fn test_bad_address_rejected() {
        let file = write_config(
            "tables:\n  - name: t\n    family: v4\n    rules:\n      - dst: 10.0.0.0/24\n        next_hop: 1.1.1.1\n",
        );
        assert!(matches!(
            DaemonConfig::load(file.path()),
            Err(ConfigError::Yaml { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            DaemonConfig::load("/nonexistent/tuntermd.yaml"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_unknown_probe_interface() {
        let config = DaemonConfig {
            probes: vec![ProbeConfig {
                interface: "eth9".to_string(),
                dst: "10.0.0.5".parse().unwrap(),
            }],
            ..DaemonConfig::default()
        };
        assert!(matches!(
            config.probe_packets(&InterfaceMap::new()),
            Err(ConfigError::UnknownInterface(name)) if name == "eth9"
        ));
    }
}
