//! Primary-address resolution
//!
//! An instance may sit on several networks. The machine reports exactly one
//! of its addresses as primary, chosen in this order:
//!
//! 1. The only network, when there is just one
//! 2. The network owning the spec's primary subnet
//! 3. The single network tagged `<infra name>-primaryClusterNetwork`
//!
//! The order is significant: the tag lookup exists for clusters that predate
//! primary subnets and must not win over an explicit subnet.

use crate::error::{Error, Result};
use crate::traits::{Instance, NetworkService};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::debug;

/// Suffix of the tag marking the primary network on legacy clusters
pub const PRIMARY_NETWORK_TAG_SUFFIX: &str = "-primaryClusterNetwork";

/// IPv4 address per network name
pub type NetworkAddresses = BTreeMap<String, String>;

/// Extract one IPv4 address per network
///
/// A valid access IPv4 address short-circuits to `{"": access_ip}`. Networks
/// without an IPv4 entry are skipped; when a network reports several, the last
/// one is kept. An instance with no IPv4 address at all is an error.
pub fn instance_ipv4_addresses(instance: &Instance) -> Result<NetworkAddresses> {
    if let Some(access_ip) = instance.access_ipv4.as_deref()
        && access_ip.parse::<Ipv4Addr>().is_ok()
    {
        return Ok(BTreeMap::from([(String::new(), access_ip.to_string())]));
    }

    let addresses: NetworkAddresses = instance
        .addresses
        .iter()
        .filter_map(|(network, entries)| {
            entries
                .iter()
                .rev()
                .find(|entry| entry.version == 4)
                .map(|entry| (network.clone(), entry.address.clone()))
        })
        .collect();

    if addresses.is_empty() {
        return Err(Error::Other(format!(
            "extract IP from instance {} err: no IPv4 address found",
            instance.id
        )));
    }

    Ok(addresses)
}

/// Pick the primary address out of `addresses`
///
/// Network lookups only happen when there is more than one candidate.
pub async fn resolve_primary_ip(
    network: &dyn NetworkService,
    addresses: &NetworkAddresses,
    machine_name: &str,
    primary_subnet: &str,
    infra_name: &str,
) -> Result<String> {
    if addresses.len() == 1
        && let Some(address) = addresses.values().next()
    {
        return Ok(address.clone());
    }

    let primary_network = if !primary_subnet.is_empty() {
        let subnet = network.get_subnet(primary_subnet).await.map_err(|e| {
            Error::provider(
                "get subnet",
                format!("Could not get subnet {}, {}", primary_subnet, e),
            )
        })?;
        network.get_network(&subnet.network_id).await.map_err(|e| {
            Error::provider(
                "get network",
                format!("Could not get network {}, {}", subnet.network_id, e),
            )
        })?
    } else {
        let tag = format!("{}{}", infra_name, PRIMARY_NETWORK_TAG_SUFFIX);
        let mut tagged = network.list_networks_by_tag(&tag).await?;
        match tagged.len() {
            0 => {
                return Err(Error::Other(format!(
                    "There are no networks with primary network tag: {}",
                    tag
                )));
            }
            1 => tagged.remove(0),
            _ => {
                return Err(Error::Other(format!(
                    "Too many networks with the same primary network tag: {}",
                    tag
                )));
            }
        }
    };

    debug!(machine = %machine_name, network = %primary_network.name, "Selected primary network");

    addresses
        .get(&primary_network.name)
        .cloned()
        .ok_or_else(|| {
            Error::Other(format!(
                "No primary network was found for the machine {}",
                machine_name
            ))
        })
}
