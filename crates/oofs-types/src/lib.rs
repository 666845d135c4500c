//! Plain data shared between the identity subsystem and the wire protocol:
//! reconciliation audit logs and the policies that steer them.

mod audit;
mod policy;

pub use audit::{Action, AuditLog};
pub use policy::{ConflictPolicy, PastePolicy};
