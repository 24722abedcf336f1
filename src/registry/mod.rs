//! C1 — Registry probe: resolves the current content digest for an
//! image reference, given caller-supplied pull credentials.

mod docker_config;
mod probe;

pub use docker_config::{find_credential, BasicCredential};
pub use probe::{RegistryError, RegistryProbe};
