//! Well-known feature names and other protocol constants.

/// VM feature holding the space-separated list of favorite entry names.
pub const FAVORITES_FEATURE: &str = "menu-favorites";

/// VM feature marking a VM as a service VM.
pub const SERVICEVM_FEATURE: &str = "servicevm";

/// VM feature hiding a VM from the menu entirely.
pub const INTERNAL_FEATURE: &str = "internal";

/// VM feature marking that the VM's menu entries launch disposable VMs.
pub const DISPVM_MENU_FEATURE: &str = "appmenus-dispvm";

/// Prefix distinguishing the disposable-launch variant of an entry name.
pub const DISPOSABLE_PREFIX: &str = "@disp:";
