// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Uses phantom types to prevent ID confusion at compile time.

mod id;
mod unit_name;

pub use id::{DeploymentId, HostId, Id, ProjectId, UserId};
pub use unit_name::{UnitName, UnitNameError};
