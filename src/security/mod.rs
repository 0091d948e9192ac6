//! Request authorization for the namespaced API surface.

pub mod gate;

pub use gate::{AuthenticatedUser, AuthorizationGate, GateDecision, NamespacedResource, IS_ADMIN};
