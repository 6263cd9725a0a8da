//! Policy documents: schema, validation, fingerprinting and the sandboxed registry.
//!
//! Callers never open policy files themselves. The flow is always
//! `PolicyRegistry::load(selector)` → [`LoadedPolicy`], which carries the
//! validated document and its `sha256:` fingerprint.

pub mod registry;
pub mod schema;

pub use registry::{PolicyEntry, PolicyError, PolicyRegistry, PolicySelectorError, BUILTIN_ALIASES};
pub use schema::{
    GateOp, GateSpec, LoadedPolicy, PolicyDocument, PolicyFormat, PolicyModes,
    PolicyValidationError, SUPPORTED_SCHEMA_VERSION,
};
