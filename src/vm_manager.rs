//! VM registry: a cached, event-driven view of the hypervisor's domain set.
//!
//! Entries are created lazily on first reference and updated exclusively by
//! decoded admin events; power state is never polled after the initial
//! query. Every mutation goes through a manager method that also notifies
//! the entry's attached observers with per-aspect change flags.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::warn;

use crate::admin::events::{LifecycleEvent, VmFeature, VmProperty};
use crate::admin::{feature_flag, AdminClient, DomainInfo, PowerState, VmKind};
use crate::constants;
use crate::error::MenuError;
use crate::observers::{ObserverHub, ObserverId, VmUpdate};

/// Cached state of one VM. All attributes are projections of external
/// state, refreshed only on the matching admin event.
pub struct VMEntry {
    pub vm_name: String,
    pub vm_klass: VmKind,
    /// Sortable name; disposable instances sort under their template.
    pub sort_name: String,
    /// Owning template, by name, when the VM derives from one.
    pub parent_vm: Option<String>,
    pub vm_icon_name: String,
    pub power_state: PowerState,
    pub has_network: bool,
    pub is_dispvm_template: bool,
    pub service_vm: bool,
    /// Whether the VM's menu entries launch disposable VMs.
    pub has_dispvm_menu: bool,
    /// The VM's own `internal` feature, before template derivation.
    internal_own: bool,
    /// Effective hidden-from-UI flag: own feature or the template's.
    pub internal: bool,
    /// Opaque handles of attached presentation entries.
    pub entries: Vec<ObserverId>,
}

impl VMEntry {
    pub fn attach_observer(&mut self, id: ObserverId) {
        self.entries.push(id);
    }

    pub fn detach_observer(&mut self, id: ObserverId) {
        self.entries.retain(|&e| e != id);
    }

    #[cfg(test)]
    pub(crate) fn for_tests(name: &str) -> Self {
        VMEntry {
            vm_name: name.to_string(),
            vm_klass: VmKind::AppVM,
            sort_name: name.to_string(),
            parent_vm: None,
            vm_icon_name: "appvm-black".to_string(),
            power_state: PowerState::Halted,
            has_network: false,
            is_dispvm_template: false,
            service_vm: false,
            has_dispvm_menu: false,
            internal_own: false,
            internal: false,
            entries: Vec::new(),
        }
    }
}

type NewVmCallback = Box<dyn FnMut(&Rc<RefCell<VMEntry>>)>;

pub struct VmManager {
    admin: Rc<dyn AdminClient>,
    hub: Rc<RefCell<ObserverHub>>,
    vms: HashMap<String, Rc<RefCell<VMEntry>>>,
    new_vm_callbacks: Vec<NewVmCallback>,
}

impl VmManager {
    pub fn new(admin: Rc<dyn AdminClient>, hub: Rc<RefCell<ObserverHub>>) -> Self {
        VmManager {
            admin,
            hub,
            vms: HashMap::new(),
            new_vm_callbacks: Vec::new(),
        }
    }

    /// Load every domain currently known to the admin interface. Called
    /// once at startup, before event handling begins.
    pub fn load_existing(&mut self) -> Result<(), MenuError> {
        for name in self.admin.domain_names()? {
            self.load_vm_from_name(&name);
        }
        Ok(())
    }

    /// Register a callback fired for every future VM entry, replayed
    /// immediately for each entry that already exists.
    pub fn register_new_vm_callback(&mut self, mut callback: NewVmCallback) {
        for entry in self.vms.values() {
            callback(entry);
        }
        self.new_vm_callbacks.push(callback);
    }

    /// Cache-only lookup, no admin query.
    pub fn get(&self, name: &str) -> Option<Rc<RefCell<VMEntry>>> {
        self.vms.get(name).cloned()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Rc<RefCell<VMEntry>>> {
        self.vms.values()
    }

    /// Cached entry for a VM name, querying the admin interface on a miss.
    /// Administrative domains and VMs with a truthy `internal` feature are
    /// excluded: they report "not found" and are never cached. Admin
    /// failures during the lookup are logged and also report "not found",
    /// so a rogue query cannot take down the event dispatcher.
    pub fn load_vm_from_name(&mut self, name: &str) -> Option<Rc<RefCell<VMEntry>>> {
        if let Some(entry) = self.vms.get(name) {
            return Some(entry.clone());
        }
        let info = match self.admin.domain_info(name) {
            Ok(Some(info)) => info,
            Ok(None) => return None,
            Err(err) => {
                warn!("cannot query domain {name}: {err}");
                return None;
            }
        };
        if info.klass == VmKind::AdminVM {
            return None;
        }
        match self.admin.feature(name, constants::INTERNAL_FEATURE) {
            Ok(value) if feature_flag(value.as_deref()) => return None,
            Ok(_) => {}
            Err(err) => {
                warn!("cannot query features of {name}: {err}");
                return None;
            }
        }
        let entry = match self.build_entry(info) {
            Ok(entry) => Rc::new(RefCell::new(entry)),
            Err(err) => {
                warn!("cannot load domain {name}: {err}");
                return None;
            }
        };
        self.vms.insert(name.to_string(), entry.clone());
        for callback in &mut self.new_vm_callbacks {
            callback(&entry);
        }
        Some(entry)
    }

    fn build_entry(&self, info: DomainInfo) -> Result<VMEntry, MenuError> {
        let power_state = self.admin.power_state(&info.name)?;
        let has_network = self.admin.is_networked(&info.name)?;
        let service_vm = feature_flag(
            self.admin
                .feature(&info.name, constants::SERVICEVM_FEATURE)?
                .as_deref(),
        );
        let has_dispvm_menu = feature_flag(
            self.admin
                .feature(&info.name, constants::DISPVM_MENU_FEATURE)?
                .as_deref(),
        );
        let internal = self.parent_internal(info.template.as_deref());
        let sort_name = match (&info.template, info.klass) {
            (Some(template), VmKind::DispVM) => format!("{template}:{}", info.name),
            _ => info.name.clone(),
        };
        Ok(VMEntry {
            vm_name: info.name,
            vm_klass: info.klass,
            sort_name,
            parent_vm: info.template,
            vm_icon_name: info.icon,
            power_state,
            has_network,
            is_dispvm_template: info.template_for_dispvms,
            service_vm,
            has_dispvm_menu,
            internal_own: false,
            internal,
            entries: Vec::new(),
        })
    }

    fn parent_internal(&self, parent: Option<&str>) -> bool {
        parent
            .and_then(|p| self.vms.get(p))
            .map(|p| p.borrow().internal_own)
            .unwrap_or(false)
    }

    fn update_entries(&self, entry: &Rc<RefCell<VMEntry>>, update: VmUpdate) {
        let ids = entry.borrow().entries.clone();
        if ids.is_empty() {
            return;
        }
        let entry = entry.borrow();
        let mut hub = self.hub.borrow_mut();
        for id in ids {
            hub.notify_vm(id, &entry, update);
        }
    }

    /// Apply a lifecycle event. The resulting power state depends only on
    /// the event, never on the prior state; an event for an untracked VM
    /// lazily creates its entry first.
    pub fn handle_lifecycle(&mut self, vm: &str, event: LifecycleEvent) {
        let Some(entry) = self.load_vm_from_name(vm) else {
            return;
        };
        let state = event.target_state();
        entry.borrow_mut().power_state = state;
        self.update_entries(&entry, VmUpdate::power(state));
    }

    /// Apply a property-set event; each property refreshes exactly one
    /// projected attribute.
    pub fn handle_property_set(
        &mut self,
        vm: &str,
        property: VmProperty,
        newvalue: &str,
    ) -> Result<(), MenuError> {
        let Some(entry) = self.load_vm_from_name(vm) else {
            return Ok(());
        };
        match property {
            VmProperty::Label => {
                // the icon follows the label; re-query rather than derive
                if let Some(info) = self.admin.domain_info(vm)? {
                    entry.borrow_mut().vm_icon_name = info.icon;
                }
                self.update_entries(&entry, VmUpdate::label());
            }
            VmProperty::Netvm => {
                // the new netvm may itself be disconnected, so ask the
                // admin interface instead of interpreting the value
                let networked = self.admin.is_networked(vm)?;
                entry.borrow_mut().has_network = networked;
                self.update_entries(&entry, VmUpdate::network());
            }
            VmProperty::TemplateForDispvms => {
                entry.borrow_mut().is_dispvm_template = feature_flag(Some(newvalue));
                self.update_entries(&entry, VmUpdate::kind());
            }
        }
        Ok(())
    }

    /// Apply a feature-set (`value` is `Some`) or feature-delete (`None`)
    /// event. The favorites feature is not handled here; the dispatcher
    /// routes it to the favorites index.
    pub fn handle_feature(&mut self, vm: &str, feature: VmFeature, value: Option<&str>) {
        let flag = feature_flag(value);
        if feature == VmFeature::Internal {
            // The VM itself may be excluded from the cache (it just became
            // internal); derived VMs must be re-evaluated either way.
            if let Some(entry) = self.load_vm_from_name(vm) {
                {
                    let mut e = entry.borrow_mut();
                    e.internal_own = flag;
                    e.internal = flag || self.parent_internal(e.parent_vm.as_deref());
                }
                self.update_entries(&entry, VmUpdate::kind());
            }
            self.fan_out_internal(vm, flag);
            return;
        }
        let Some(entry) = self.load_vm_from_name(vm) else {
            return;
        };
        match feature {
            VmFeature::ServiceVm => {
                entry.borrow_mut().service_vm = flag;
                self.update_entries(&entry, VmUpdate::kind());
            }
            VmFeature::DispvmMenu => {
                entry.borrow_mut().has_dispvm_menu = flag;
                self.update_entries(&entry, VmUpdate::kind());
            }
            VmFeature::Internal | VmFeature::Favorites => {}
        }
    }

    /// Re-evaluate the derived `internal` flag on every VM templated on
    /// `template`. One level only; derived VMs are not templates for
    /// further derivation.
    fn fan_out_internal(&self, template: &str, template_internal: bool) {
        let derived: Vec<_> = self
            .vms
            .values()
            .filter(|e| e.borrow().parent_vm.as_deref() == Some(template))
            .cloned()
            .collect();
        for entry in derived {
            let changed = {
                let mut e = entry.borrow_mut();
                let internal = e.internal_own || template_internal;
                let changed = internal != e.internal;
                e.internal = internal;
                changed
            };
            if changed {
                self.update_entries(&entry, VmUpdate::kind());
            }
        }
    }

    pub fn handle_domain_add(&mut self, vm: &str) {
        self.load_vm_from_name(vm);
    }

    /// Drop a deleted domain. Every attached observer is detached from its
    /// presentation parent before the cache entry goes away; a dangling
    /// handle after deletion is a correctness bug.
    pub fn handle_domain_delete(&mut self, vm: &str) {
        if let Some(entry) = self.vms.remove(vm) {
            let ids = std::mem::take(&mut entry.borrow_mut().entries);
            let mut hub = self.hub.borrow_mut();
            for id in ids {
                hub.detach_vm(id);
            }
        }
    }
}
