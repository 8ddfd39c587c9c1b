//! Event-driven state core of the qubemenu application launcher.
//!
//! The crate keeps three registries (VMs, application descriptors,
//! favorites) consistent with the hypervisor's admin event stream and the
//! desktop-entry directories, and notifies presentation-layer observers of
//! every change. See `AppContext` for the wiring.

pub mod admin;
pub mod app;
pub mod constants;
pub mod desktop_entry;
pub mod dispatcher;
pub mod error;
pub mod favorites;
pub mod observers;
pub mod popup;
pub mod search;
pub mod vm_manager;

pub use error::MenuError;
