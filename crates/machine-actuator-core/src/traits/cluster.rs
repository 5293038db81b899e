// # Cloud Provider and Cluster Traits
//
// `CloudProvider` turns a machine into an authenticated cloud session; how
// credentials are found is up to the implementation. `ClusterInfo` exposes the
// cluster's stable infrastructure name.

use super::compute::ComputeService;
use super::network::NetworkService;
use crate::machine::Machine;
use async_trait::async_trait;
use std::sync::Arc;

/// Authenticated clients for one reconciliation call
///
/// Sessions are resolved fresh for every call and never cached.
#[derive(Clone)]
pub struct CloudSession {
    /// Region the clients talk to
    pub region: String,
    pub compute: Arc<dyn ComputeService>,
    pub network: Arc<dyn NetworkService>,
}

impl std::fmt::Debug for CloudSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudSession")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Resolves cloud sessions for machines
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Resolve an authenticated session for `machine`
    async fn resolve(&self, machine: &Machine) -> Result<CloudSession, crate::Error>;
}

/// Read access to cluster-wide infrastructure facts
#[async_trait]
pub trait ClusterInfo: Send + Sync {
    /// The cluster's stable infrastructure name
    async fn infrastructure_name(&self) -> Result<String, crate::Error>;
}
