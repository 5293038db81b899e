// # Network Service Trait
//
// Subnet, network and floating IP calls used while resolving a machine's
// primary address and attaching a floating IP to a new instance.

use async_trait::async_trait;

/// A subnet and the network that owns it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    pub id: String,
    pub network_id: String,
}

/// A network
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
}

/// A floating IP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloatingIp {
    pub id: String,
    pub address: String,
}

/// Trait for network service implementations
#[async_trait]
pub trait NetworkService: Send + Sync {
    /// Fetch a subnet by identifier
    async fn get_subnet(&self, subnet_id: &str) -> Result<Subnet, crate::Error>;

    /// Fetch a network by identifier
    async fn get_network(&self, network_id: &str) -> Result<Network, crate::Error>;

    /// All networks carrying `tag`
    async fn list_networks_by_tag(&self, tag: &str) -> Result<Vec<Network>, crate::Error>;

    /// Find the floating IP `address`, allocating it for `cluster_name` if it
    /// does not exist yet
    async fn get_or_create_floating_ip(
        &self,
        cluster_name: &str,
        address: &str,
    ) -> Result<FloatingIp, crate::Error>;

    /// Associate a floating IP with a port
    async fn associate_floating_ip(
        &self,
        floating_ip: &FloatingIp,
        port_id: &str,
    ) -> Result<(), crate::Error>;
}
