//! Namespace-scoped request authorization over role bindings.

use regex::Regex;
use tracing::debug;

use crate::error::NsPlaneError;
use crate::registry::{NamespaceRegistry, RoleBindingRegistry};
use crate::types::Verb;
use crate::Result;

/// Role granted to members of the configured admin group.
pub const IS_ADMIN: &str = "isAdmin()";

const NAMESPACED_RESOURCE_PATTERN: &str = concat!(
    r"^/api/namespaces/(?P<namespace>[a-zA-Z0-9_.-]+)",
    r"/(?P<resource_type>[a-z_-]+)(/([a-zA-Z0-9_.-]+)(/(?P<resource_subtype>[a-z-]+))?)?$"
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    /// No opinion; later authorization layers decide.
    Unknown,
}

/// Caller identity extracted from the authentication layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub name: String,
    pub groups: Vec<String>,
    pub roles: Vec<String>,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|role| role == IS_ADMIN)
    }
}

/// `(namespace, resource_type)` resolved from a request path. Sub-resources
/// are folded into the type as `type/subtype`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacedResource {
    pub namespace: String,
    pub resource_type: String,
}

pub struct AuthorizationGate {
    namespaces: NamespaceRegistry,
    role_bindings: RoleBindingRegistry,
    admin_group: String,
    path_pattern: Regex,
}

impl AuthorizationGate {
    pub fn new(
        namespaces: NamespaceRegistry,
        role_bindings: RoleBindingRegistry,
        admin_group: impl Into<String>,
    ) -> Result<Self> {
        let path_pattern = Regex::new(NAMESPACED_RESOURCE_PATTERN)
            .map_err(|e| NsPlaneError::Config(format!("invalid resource path pattern: {}", e)))?;
        Ok(Self {
            namespaces,
            role_bindings,
            admin_group: admin_group.into(),
            path_pattern,
        })
    }

    pub fn parse_path(&self, path: &str) -> Option<NamespacedResource> {
        let captures = self.path_pattern.captures(path)?;
        let namespace = captures.name("namespace")?.as_str().to_string();
        let resource_type = captures.name("resource_type")?.as_str();
        let resource_type = match captures.name("resource_subtype") {
            Some(subtype) if !subtype.as_str().is_empty() => {
                format!("{}/{}", resource_type, subtype.as_str())
            }
            _ => resource_type.to_string(),
        };
        Some(NamespacedResource {
            namespace,
            resource_type,
        })
    }

    /// Decides access to `method path` for `user`.
    ///
    /// Unauthenticated callers, paths outside the namespaced API and unknown
    /// namespaces all yield [`GateDecision::Unknown`].
    pub fn check(&self, path: &str, method: &str, user: Option<&AuthenticatedUser>) -> Result<GateDecision> {
        let Some(user) = user else {
            return Ok(GateDecision::Unknown);
        };

        let Some(resource) = self.parse_path(path) else {
            debug!("Invalid namespaced resource for path [{}]. Returning unknown.", path);
            return Ok(GateDecision::Unknown);
        };

        if self.namespaces.find_by_name(&resource.namespace)?.is_none() {
            debug!("Namespace not found for user \"{}\" on path \"{}\"", user.name, path);
            return Ok(GateDecision::Unknown);
        }

        if user.is_admin() {
            debug!("Authorized admin user [{}] on path [{}]. Returning ALLOWED.", user.name, path);
            return Ok(GateDecision::Allowed);
        }

        let Some(verb) = Verb::parse(method) else {
            return Ok(GateDecision::Unknown);
        };

        let authorized: Vec<_> = self
            .role_bindings
            .find_all_for_groups(&user.groups)?
            .into_iter()
            .filter(|rb| rb.metadata.namespace == resource.namespace)
            .filter(|rb| rb.spec.role.resource_types.contains(&resource.resource_type))
            .filter(|rb| rb.spec.role.verbs.contains(&verb))
            .collect();

        if authorized.is_empty() {
            debug!("No matching RoleBinding for user [{}] on path [{}]. Returning unknown.", user.name, path);
            return Ok(GateDecision::Unknown);
        }

        for rb in &authorized {
            debug!("Found matching RoleBinding: {}/{}", rb.metadata.namespace, rb.metadata.name);
        }
        debug!("Authorized user [{}] on path [{}]", user.name, path);
        Ok(GateDecision::Allowed)
    }

    pub fn compute_roles_from_groups(&self, groups: &[String]) -> Vec<String> {
        if groups.iter().any(|group| *group == self.admin_group) {
            vec![IS_ADMIN.to_string()]
        } else {
            Vec::new()
        }
    }
}
