//! Network partition planner
//!
//! Splits the network block into one block per partition role and each role
//! block into equal per-zone subnets, then places declarations into
//! partitions by role.

use crate::error::{PlanError, Result};
use crate::graph::{EdgeKind, ResourceGraph};
use crate::node::{NodeConfig, NodeId, ResourceKind, ResourceNode};
use serde::{Deserialize, Serialize};
use stackflow_core::{DeclaredKind, NetworkSpec, PartitionRole};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Largest zone count the address layout supports
pub const MAX_ZONES: u8 = 4;

/// Smallest network block the layout can be carved from
const MAX_NETWORK_PREFIX: u8 = 24;

/// Gateway endpoint services that can be attached to the network
const GATEWAY_SERVICES: [&str; 2] = ["dynamodb", "s3"];

/// IPv4 CIDR block
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ipv4Cidr {
    network: u32,
    prefix: u8,
}

impl Ipv4Cidr {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> std::result::Result<Self, String> {
        if prefix > 32 {
            return Err(format!("invalid prefix length /{}", prefix));
        }
        let bits = u32::from(addr);
        let network = bits & Self::mask(prefix);
        if network != bits {
            return Err(format!("{}/{} has host bits set", addr, prefix));
        }
        Ok(Self { network, prefix })
    }

    fn mask(prefix: u8) -> u32 {
        if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - prefix)
        }
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn first(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network)
    }

    pub fn last(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network | !Self::mask(self.prefix))
    }

    /// Split into `2^bits` equal blocks
    pub fn split(&self, bits: u8) -> std::result::Result<Vec<Ipv4Cidr>, String> {
        let prefix = self.prefix + bits;
        if prefix > 32 {
            return Err(format!("{} cannot be split into {} blocks", self, 1u64 << bits));
        }
        let size = 1u64 << (32 - prefix);
        Ok((0..(1u64 << bits))
            .map(|i| Ipv4Cidr {
                network: (self.network as u64 + i * size) as u32,
                prefix,
            })
            .collect())
    }

    pub fn overlaps(&self, other: &Ipv4Cidr) -> bool {
        u32::from(self.first()) <= u32::from(other.last())
            && u32::from(other.first()) <= u32::from(self.last())
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.first(), self.prefix)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| format!("'{}' is not a CIDR block", s))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| format!("'{}' is not an IPv4 address", addr))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| format!("'{}' is not a prefix length", prefix))?;
        Ipv4Cidr::new(addr, prefix)
    }
}

impl Serialize for Ipv4Cidr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Ipv4Cidr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Number of bits needed to address `n` equal blocks
fn bits_for(n: usize) -> u8 {
    n.next_power_of_two().trailing_zeros() as u8
}

/// One subnet of a partition in one availability zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub zone: String,
    pub cidr: Ipv4Cidr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionPlan {
    pub role: PartitionRole,
    pub cidr: Ipv4Cidr,
    pub subnets: Vec<Subnet>,
}

/// Where a declaration was placed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionAssignment {
    pub role: PartitionRole,
    pub node: NodeId,
    pub subnets: Vec<Subnet>,
}

/// Address layout of the whole network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPlan {
    pub name: String,
    pub cidr: Ipv4Cidr,
    pub zones: Vec<String>,
    pub partitions: BTreeMap<PartitionRole, PartitionPlan>,
    pub gateway_endpoints: Vec<String>,
}

impl NetworkPlan {
    pub fn plan(spec: &NetworkSpec, region: &str) -> Result<Self> {
        let invalid = |message: String| PlanError::validation(format!("network {}", spec.name), message);

        let cidr: Ipv4Cidr = spec.cidr.parse().map_err(invalid)?;
        if cidr.prefix() > MAX_NETWORK_PREFIX {
            return Err(invalid(format!(
                "network block {} is smaller than /{}",
                cidr, MAX_NETWORK_PREFIX
            )));
        }

        let max_zones = u8::try_from(spec.max_zones)
            .ok()
            .filter(|z| (1..=MAX_ZONES).contains(z))
            .ok_or_else(|| {
                invalid(format!("max-zones must be between 1 and {}, got {}", MAX_ZONES, spec.max_zones))
            })?;
        let zones: Vec<String> = (0..max_zones)
            .map(|i| format!("{}{}", region, (b'a' + i) as char))
            .collect();

        let roles = if spec.partitions.is_empty() {
            PartitionRole::ALL.to_vec()
        } else {
            let mut roles = spec
                .partitions
                .iter()
                .map(|r| r.parse::<PartitionRole>().map_err(invalid))
                .collect::<Result<Vec<_>>>()?;
            roles.sort();
            roles.dedup();
            roles
        };

        // Role blocks are allocated for every role so that addresses do not
        // shift when a partition is added later.
        let role_blocks = cidr.split(bits_for(PartitionRole::ALL.len())).map_err(invalid)?;
        let zone_bits = bits_for(max_zones as usize);

        let mut partitions = BTreeMap::new();
        for role in roles {
            let block = role_blocks[role.index()];
            let subnets = block
                .split(zone_bits)
                .map_err(invalid)?
                .into_iter()
                .zip(&zones)
                .map(|(cidr, zone)| Subnet {
                    zone: zone.clone(),
                    cidr,
                })
                .collect();
            partitions.insert(
                role,
                PartitionPlan {
                    role,
                    cidr: block,
                    subnets,
                },
            );
        }

        let mut gateway_endpoints = Vec::new();
        for service in &spec.gateway_endpoints {
            if !GATEWAY_SERVICES.contains(&service.as_str()) {
                return Err(invalid(format!("unsupported gateway endpoint '{}'", service)));
            }
            if !gateway_endpoints.contains(service) {
                gateway_endpoints.push(service.clone());
            }
        }
        gateway_endpoints.sort();

        tracing::debug!(
            network = %cidr,
            zones = zones.len(),
            partitions = partitions.len(),
            "Planned network layout"
        );

        Ok(Self {
            name: spec.name.clone(),
            cidr,
            zones,
            partitions,
            gateway_endpoints,
        })
    }

    pub fn network_node_id(&self) -> NodeId {
        NodeId::new(format!("network-{}", self.name))
    }

    pub fn partition_node_id(role: PartitionRole) -> NodeId {
        NodeId::new(format!("partition-{}", role))
    }

    /// Place a declaration. Returns `None` for kinds that live outside the network.
    pub fn assign(
        &self,
        entry: &str,
        kind: DeclaredKind,
        declared_role: Option<&str>,
    ) -> Result<Option<PartitionAssignment>> {
        let role = match (declared_role, kind.default_partition()) {
            (Some(_), None) => {
                return Err(PlanError::validation(
                    entry,
                    format!("{} resources are regional and cannot declare a partition role", kind),
                ));
            }
            (None, None) => return Ok(None),
            (Some(declared), Some(_)) => declared
                .parse::<PartitionRole>()
                .map_err(|e| PlanError::validation(entry, e))?,
            (None, Some(default)) => default,
        };

        let partition = self.partitions.get(&role).ok_or_else(|| {
            PlanError::validation(
                entry,
                format!("partition role '{}' is not declared on network '{}'", role, self.name),
            )
        })?;

        Ok(Some(PartitionAssignment {
            role,
            node: Self::partition_node_id(role),
            subnets: partition.subnets.clone(),
        }))
    }

    /// Add the network, partition and gateway endpoint nodes to the graph
    pub fn emit(&self, graph: &mut ResourceGraph) -> Result<()> {
        let entry = format!("network {}", self.name);
        let network = graph.add_node(ResourceNode::new(
            self.network_node_id(),
            ResourceKind::Network,
            NodeConfig::Network {
                name: self.name.clone(),
                cidr: self.cidr.to_string(),
                zones: self.zones.clone(),
            },
            entry.clone(),
        ))?;

        for partition in self.partitions.values() {
            let id = graph.add_node(
                ResourceNode::new(
                    Self::partition_node_id(partition.role),
                    ResourceKind::Partition,
                    NodeConfig::Partition {
                        role: partition.role,
                        cidr: partition.cidr.to_string(),
                        subnets: partition.subnets.clone(),
                    },
                    entry.clone(),
                )
                .in_partition(Some(partition.role)),
            )?;
            graph.add_edge(&network, &id, EdgeKind::Containment)?;
        }

        // Gateway endpoints route from the private partitions
        let route_partitions: Vec<PartitionRole> = self
            .partitions
            .keys()
            .copied()
            .filter(|r| *r != PartitionRole::Public)
            .collect();
        for service in &self.gateway_endpoints {
            let id = graph.add_node(ResourceNode::new(
                format!("endpoint-{}", service),
                ResourceKind::Endpoint,
                NodeConfig::Endpoint {
                    service: service.clone(),
                    route_partitions: route_partitions.clone(),
                },
                entry.clone(),
            ))?;
            graph.add_edge(&network, &id, EdgeKind::Containment)?;
            for role in &route_partitions {
                graph.add_edge(&Self::partition_node_id(*role), &id, EdgeKind::ExplicitOrder)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> NetworkSpec {
        NetworkSpec {
            name: "core".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_cidr_parse_and_split() {
        let cidr: Ipv4Cidr = "10.0.0.0/16".parse().unwrap();
        let blocks = cidr.split(2).unwrap();
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].to_string(), "10.0.0.0/18");
        assert_eq!(blocks[1].to_string(), "10.0.64.0/18");
        assert_eq!(blocks[3].to_string(), "10.0.192.0/18");
        assert_eq!(blocks[3].last(), Ipv4Addr::new(10, 0, 255, 255));
    }

    #[test]
    fn test_cidr_rejects_host_bits() {
        assert!("10.0.0.1/16".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.0".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.0/33".parse::<Ipv4Cidr>().is_err());
    }

    #[test]
    fn test_default_layout() {
        let plan = NetworkPlan::plan(&spec(), "ap-northeast-2").unwrap();
        assert_eq!(plan.zones, vec!["ap-northeast-2a", "ap-northeast-2b", "ap-northeast-2c"]);
        assert_eq!(plan.partitions.len(), 3);

        let public = &plan.partitions[&PartitionRole::Public];
        assert_eq!(public.cidr.to_string(), "10.0.0.0/18");
        assert_eq!(public.subnets.len(), 3);
        assert_eq!(public.subnets[0].cidr.to_string(), "10.0.0.0/20");
        assert_eq!(public.subnets[1].cidr.to_string(), "10.0.16.0/20");

        let isolated = &plan.partitions[&PartitionRole::PrivateIsolated];
        assert_eq!(isolated.cidr.to_string(), "10.0.128.0/18");
    }

    #[test]
    fn test_partitions_never_overlap_and_zones_are_equal() {
        let plan = NetworkPlan::plan(&spec(), "us-east-1").unwrap();
        let subnets: Vec<&Subnet> = plan.partitions.values().flat_map(|p| &p.subnets).collect();

        for (i, a) in subnets.iter().enumerate() {
            for b in &subnets[i + 1..] {
                assert!(!a.cidr.overlaps(&b.cidr), "{} overlaps {}", a.cidr, b.cidr);
            }
        }
        assert!(subnets.iter().all(|s| s.cidr.prefix() == subnets[0].cidr.prefix()));
    }

    #[test]
    fn test_max_zones_bounds() {
        let mut s = spec();
        s.max_zones = 0;
        assert!(NetworkPlan::plan(&s, "us-east-1").is_err());
        s.max_zones = 5;
        assert!(NetworkPlan::plan(&s, "us-east-1").is_err());
        s.max_zones = 4;
        assert_eq!(NetworkPlan::plan(&s, "us-east-1").unwrap().zones.len(), 4);
    }

    #[test]
    fn test_small_network_rejected() {
        let mut s = spec();
        s.cidr = "10.0.0.0/26".to_string();
        assert!(NetworkPlan::plan(&s, "us-east-1").is_err());
    }

    #[test]
    fn test_assign_roles() {
        let mut s = spec();
        s.partitions = vec!["public".into(), "private-egress".into()];
        let plan = NetworkPlan::plan(&s, "us-east-1").unwrap();

        let cluster = plan.assign("workloads", DeclaredKind::Cluster, None).unwrap().unwrap();
        assert_eq!(cluster.role, PartitionRole::PrivateEgress);
        assert_eq!(cluster.node, NodeId::new("partition-private-egress"));

        // Database defaults to private-isolated, which this network does not have
        let err = plan.assign("orders", DeclaredKind::Database, None).unwrap_err();
        assert!(matches!(err, PlanError::Validation { .. }));

        let explicit = plan
            .assign("orders", DeclaredKind::Database, Some("private-egress"))
            .unwrap()
            .unwrap();
        assert_eq!(explicit.role, PartitionRole::PrivateEgress);

        assert!(plan.assign("customer", DeclaredKind::Table, None).unwrap().is_none());
        assert!(plan.assign("customer", DeclaredKind::Table, Some("public")).is_err());
        assert!(plan.assign("orders", DeclaredKind::Database, Some("dmz")).is_err());
    }

    #[test]
    fn test_emit_nodes() {
        let mut s = spec();
        s.gateway_endpoints = vec!["s3".into(), "dynamodb".into()];
        let plan = NetworkPlan::plan(&s, "us-east-1").unwrap();
        let mut graph = ResourceGraph::new();
        plan.emit(&mut graph).unwrap();

        assert_eq!(graph.nodes_of_kind(ResourceKind::Partition).len(), 3);
        assert_eq!(graph.nodes_of_kind(ResourceKind::Endpoint).len(), 2);
        assert_eq!(
            graph.parent(&NodeId::new("partition-public")),
            Some(&NodeId::new("network-core"))
        );
        assert!(plan.assign("x", DeclaredKind::Cluster, None).is_ok());
    }

    #[test]
    fn test_unknown_gateway_service() {
        let mut s = spec();
        s.gateway_endpoints = vec!["sqs".into()];
        assert!(NetworkPlan::plan(&s, "us-east-1").is_err());
    }
}
