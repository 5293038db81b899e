// # machine-actuator-core
//
// Core library driving OpenStack instances for Machine records.
//
// ## Architecture Overview
//
// The control loop calls one of create / update / delete / exists for a single
// machine; the actuator asks the cloud what exists, acts, and writes the
// outcome back onto the machine record:
// - **CloudProvider**: resolves an authenticated compute/network session per machine
// - **ComputeService / NetworkService**: instance, port, floating IP and network calls
// - **MachineStore / SecretStore**: the machine record and the secrets beside it
// - **ScriptRenderer**: startup-script templating, owned by the embedder
// - **Actuator**: sequences the above for one machine per call
// - **PostprocessorRegistry**: named user-data transforms, `ct` built in
//
// ## Design Principles
//
// 1. **Idempotency**: every call may be repeated or interrupted and re-run
// 2. **No private state**: the machine's own annotations are the only memory
// 3. **Single failure path**: terminal errors are recorded on the machine once
// 4. **Library-First**: collaborators are traits; in-memory stores are provided

pub mod address;
pub mod annotations;
pub mod bootstrap;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod machine;
pub mod poll;
pub mod recorder;
pub mod registry;
pub mod store;
pub mod traits;
pub mod userdata;

// Re-export core types for convenience
pub use traits::{
    CloudProvider, CloudSession, ClusterInfo, ComputeService, MachineStore, NetworkService,
    ScriptRenderer, SecretStore,
};
pub use engine::{Actuator, EventAction, EventKind, MachineEvent};
pub use registry::{Postprocessor, PostprocessorRegistry};
pub use config::ActuatorConfig;
pub use error::{Error, Result};
pub use machine::{Machine, OpenstackProviderSpec};
pub use annotations::{InstanceAnnotations, ObservedMachine};
pub use store::{MemoryMachineStore, MemorySecretStore};
