// # Record Store Implementations
//
// In-memory implementations of the MachineStore and SecretStore traits, for
// embedders that keep records in process and for tests.

pub mod memory;

pub use memory::{MemoryMachineStore, MemorySecretStore};
