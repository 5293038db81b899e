//! Update-diff evaluator
//!
//! Decides whether the instance recorded for a machine still matches the
//! machine's desired state. Only three fields matter: the node metadata
//! carried in the spec, the provider spec payload and the name. Status never
//! does, and neither do the record's own labels and annotations, which the
//! actuator itself writes.

use crate::annotations::ObservedMachine;
use crate::machine::Machine;
use std::fmt;

/// A reason the recorded instance no longer matches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Difference {
    /// One side is missing entirely
    Missing,
    NodeMetadata,
    ProviderSpec,
    Name,
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = match self {
            Difference::Missing => "record",
            Difference::NodeMetadata => "spec.metadata",
            Difference::ProviderSpec => "spec.providerSpec",
            Difference::Name => "name",
        };
        f.write_str(field)
    }
}

/// Every field that differs between the observed snapshot and the desired
/// machine
pub fn differences(observed: Option<&ObservedMachine>, desired: Option<&Machine>) -> Vec<Difference> {
    let (Some(observed), Some(desired)) = (observed, desired) else {
        return vec![Difference::Missing];
    };

    let mut found = Vec::new();
    if observed.spec.metadata != desired.spec.metadata {
        found.push(Difference::NodeMetadata);
    }
    if observed.spec.provider_spec != desired.spec.provider_spec {
        found.push(Difference::ProviderSpec);
    }
    if observed.name != desired.name {
        found.push(Difference::Name);
    }
    found
}

/// Whether the instance has to be replaced
pub fn requires_recreate(observed: Option<&ObservedMachine>, desired: Option<&Machine>) -> bool {
    !differences(observed, desired).is_empty()
}
