//! Name constants and Kubernetes naming helpers
//!
//! Following the naming convention: {crate-name}::{type}::{name}

use cloudlab_models::Instance;

/// Action names, used as span names and in observer log lines
pub mod actions {
    /// Provision namespace, deployment and service for an instance
    ///
    /// **Transitional status:** BUILDING
    /// **Outcome:** ACTIVE, BUILDING (pod still provisioning) or ERROR
    pub const CREATE: &str = "cloudlab-orchestrations::action::create";

    /// Re-derive the instance status from the cluster
    ///
    /// **Outcome:** ACTIVE, BUILDING, STOPPED, ERROR or UNKNOWN
    pub const STATE: &str = "cloudlab-orchestrations::action::state";

    /// Scale the deployment back to one replica
    ///
    /// **Transitional status:** STARTING
    pub const START: &str = "cloudlab-orchestrations::action::start";

    /// Scale the deployment to zero replicas
    ///
    /// **Transitional status:** STOPPING
    /// **Outcome:** STOPPED or ERROR
    pub const SHUTDOWN: &str = "cloudlab-orchestrations::action::shutdown";

    /// Shutdown followed by start
    ///
    /// **Transitional status:** REBOOTING
    pub const REBOOT: &str = "cloudlab-orchestrations::action::reboot";

    /// Remove service and deployment, then mark the instance DELETED
    ///
    /// **Transitional status:** DELETING
    /// **Idempotent:** Yes (absent resources are skipped)
    pub const DELETE: &str = "cloudlab-orchestrations::action::delete";
}

/// Label binding a deployment's pods to the service exposing them
pub const APP_LABEL: &str = "app";
pub const OWNER_LABEL: &str = "owner";

const MAX_NAME_LENGTH: usize = 63;

/// Cluster name of an instance workload: a DNS-1123 label `<sanitized-name>-<id>`
pub fn compute_name(instance: &Instance) -> String {
    let suffix = format!("-{}", instance.id);
    let mut base = dns_label(&instance.name);
    if base.is_empty() {
        base = "instance".to_string();
    }
    base.truncate(MAX_NAME_LENGTH.saturating_sub(suffix.len()));
    let base = base.trim_end_matches('-');
    format!("{}{}", base, suffix)
}

/// Lower-case the input and collapse anything outside `[a-z0-9]` into single dashes
pub fn dns_label(input: &str) -> String {
    let mut label = String::with_capacity(input.len());
    for c in input.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            label.push(c);
        } else if !label.is_empty() && !label.ends_with('-') {
            label.push('-');
        }
    }
    label.trim_end_matches('-').to_string()
}

/// Selector matching the pods of a workload
pub fn app_selector(name: &str) -> String {
    format!("{}={}", APP_LABEL, name)
}
