//! Interface to the hypervisor's administrative subsystem.
//!
//! The menu never talks to the admin daemon directly from its registries;
//! everything goes through the [`AdminClient`] trait so tests can substitute
//! an in-memory implementation. Live updates do not arrive through this
//! trait at all, they come from the event stream decoded in [`events`].

pub mod client;
pub mod events;
#[cfg(test)]
pub mod mock;

use std::fmt;

use crate::error::MenuError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmKind {
    AppVM,
    TemplateVM,
    DispVM,
    StandaloneVM,
    AdminVM,
    Other,
}

impl VmKind {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "AppVM" => VmKind::AppVM,
            "TemplateVM" => VmKind::TemplateVM,
            "DispVM" => VmKind::DispVM,
            "StandaloneVM" => VmKind::StandaloneVM,
            "AdminVM" => VmKind::AdminVM,
            _ => VmKind::Other,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            VmKind::AppVM => "AppVM",
            VmKind::TemplateVM => "TemplateVM",
            VmKind::DispVM => "DispVM",
            VmKind::StandaloneVM => "StandaloneVM",
            VmKind::AdminVM => "AdminVM",
            VmKind::Other => "Unknown",
        }
    }
}

impl fmt::Display for VmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Halted,
    Transient,
    Running,
    Paused,
}

impl PowerState {
    /// Parse a power state as reported by the admin API. Unrecognized
    /// states (Suspended, Crashed and friends) are folded into the closest
    /// menu-visible state.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "Running" => PowerState::Running,
            "Paused" | "Suspended" => PowerState::Paused,
            "Transient" => PowerState::Transient,
            _ => PowerState::Halted,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PowerState::Halted => "Halted",
            PowerState::Transient => "Transient",
            PowerState::Running => "Running",
            PowerState::Paused => "Paused",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, PowerState::Running)
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Static description of one domain, as returned by a collection query.
#[derive(Debug, Clone)]
pub struct DomainInfo {
    pub name: String,
    pub klass: VmKind,
    pub icon: String,
    /// Name of the template this domain derives from, if any.
    pub template: Option<String>,
    pub template_for_dispvms: bool,
}

/// Queryable view of the administrative domain collection.
///
/// Implementations are expected to be cheap enough for cache-miss lookups;
/// the registries call them lazily and never poll.
pub trait AdminClient {
    /// Name of the local (administrative) domain, used as the scope for
    /// menu entries that belong to no VM.
    fn local_name(&self) -> String;

    fn domain_names(&self) -> Result<Vec<String>, MenuError>;

    /// Look up one domain. `Ok(None)` means the domain does not exist,
    /// which callers must treat as "not found" rather than an error.
    fn domain_info(&self, name: &str) -> Result<Option<DomainInfo>, MenuError>;

    fn power_state(&self, name: &str) -> Result<PowerState, MenuError>;

    /// Whether the domain is connected to a working netvm.
    fn is_networked(&self, name: &str) -> Result<bool, MenuError>;

    /// Read a feature value; `Ok(None)` when the feature is not set.
    fn feature(&self, name: &str, feature: &str) -> Result<Option<String>, MenuError>;
}

/// Interpret a delivered feature value as a flag. Features are written as
/// "1" or removed entirely; "", "0" and "False" all mean unset.
pub fn feature_flag(value: Option<&str>) -> bool {
    match value {
        None => false,
        Some(v) => !(v.is_empty() || v == "0" || v == "False"),
    }
}
