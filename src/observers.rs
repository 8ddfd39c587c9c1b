//! Observer contract between the registries and the presentation layer.
//!
//! Registry entities never hold references to presentation objects. They
//! carry opaque [`ObserverId`] handles; the [`ObserverHub`] owns the mapping
//! from handle to the actual menu entry. Detaching through the hub is how an
//! entry gets removed from its parent container, so a deleted VM or
//! descriptor can never leave a dangling entry behind.

use std::collections::HashMap;

use crate::admin::PowerState;
use crate::desktop_entry::ApplicationInfo;
use crate::vm_manager::VMEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// Which aspects of a VM changed, so observers can do minimal updates
/// instead of full rebuilds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmUpdate {
    pub power_state: Option<PowerState>,
    pub label: bool,
    pub network: bool,
    pub kind: bool,
}

impl VmUpdate {
    pub fn power(state: PowerState) -> Self {
        VmUpdate {
            power_state: Some(state),
            ..Default::default()
        }
    }

    pub fn label() -> Self {
        VmUpdate {
            label: true,
            ..Default::default()
        }
    }

    pub fn network() -> Self {
        VmUpdate {
            network: true,
            ..Default::default()
        }
    }

    pub fn kind() -> Self {
        VmUpdate {
            kind: true,
            ..Default::default()
        }
    }
}

/// A presentation entry backed by an [`ApplicationInfo`].
pub trait AppObserver {
    /// Called when the backing descriptor was reloaded in place.
    fn update_contents(&mut self, info: &ApplicationInfo);

    /// Called when the backing descriptor disappears; the entry must leave
    /// its parent container.
    fn detach(&mut self);
}

/// A presentation entry backed by a [`VMEntry`].
pub trait VmObserver {
    fn update_contents(&mut self, entry: &VMEntry, update: VmUpdate);

    fn detach(&mut self);
}

/// Owning container for all currently attached observers.
#[derive(Default)]
pub struct ObserverHub {
    next_id: u64,
    apps: HashMap<ObserverId, Box<dyn AppObserver>>,
    vms: HashMap<ObserverId, Box<dyn VmObserver>>,
}

impl ObserverHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> ObserverId {
        self.next_id += 1;
        ObserverId(self.next_id)
    }

    pub fn register_app(&mut self, observer: Box<dyn AppObserver>) -> ObserverId {
        let id = self.next_id();
        self.apps.insert(id, observer);
        id
    }

    pub fn register_vm(&mut self, observer: Box<dyn VmObserver>) -> ObserverId {
        let id = self.next_id();
        self.vms.insert(id, observer);
        id
    }

    pub fn notify_app(&mut self, id: ObserverId, info: &ApplicationInfo) {
        if let Some(observer) = self.apps.get_mut(&id) {
            observer.update_contents(info);
        }
    }

    pub fn notify_vm(&mut self, id: ObserverId, entry: &VMEntry, update: VmUpdate) {
        if let Some(observer) = self.vms.get_mut(&id) {
            observer.update_contents(entry, update);
        }
    }

    /// Detach and discard an app observer. Safe to call twice; the second
    /// call finds nothing and does nothing.
    pub fn detach_app(&mut self, id: ObserverId) {
        if let Some(mut observer) = self.apps.remove(&id) {
            observer.detach();
        }
    }

    pub fn detach_vm(&mut self, id: ObserverId) {
        if let Some(mut observer) = self.vms.remove(&id) {
            observer.detach();
        }
    }

    pub fn contains_app(&self, id: ObserverId) -> bool {
        self.apps.contains_key(&id)
    }

    pub fn contains_vm(&self, id: ObserverId) -> bool {
        self.vms.contains_key(&id)
    }

    pub fn app_count(&self) -> usize {
        self.apps.len()
    }

    pub fn vm_count(&self) -> usize {
        self.vms.len()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Test observer recording every notification it receives.
    #[derive(Default)]
    pub struct Recorder {
        pub app_updates: Vec<String>,
        pub vm_updates: Vec<VmUpdate>,
        pub detached: bool,
    }

    pub struct RecordingObserver(pub Rc<RefCell<Recorder>>);

    impl AppObserver for RecordingObserver {
        fn update_contents(&mut self, info: &ApplicationInfo) {
            self.0.borrow_mut().app_updates.push(info.app_name.clone());
        }

        fn detach(&mut self) {
            self.0.borrow_mut().detached = true;
        }
    }

    impl VmObserver for RecordingObserver {
        fn update_contents(&mut self, _entry: &VMEntry, update: VmUpdate) {
            self.0.borrow_mut().vm_updates.push(update);
        }

        fn detach(&mut self) {
            self.0.borrow_mut().detached = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{Recorder, RecordingObserver};
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn detach_is_idempotent() {
        let mut hub = ObserverHub::new();
        let recorder = Rc::new(RefCell::new(Recorder::default()));
        let id = hub.register_app(Box::new(RecordingObserver(recorder.clone())));
        assert!(hub.contains_app(id));

        hub.detach_app(id);
        assert!(recorder.borrow().detached);
        assert!(!hub.contains_app(id));

        // second detach finds nothing and must not panic
        hub.detach_app(id);
        assert_eq!(hub.app_count(), 0);
    }

    #[test]
    fn notify_after_detach_is_a_no_op() {
        let mut hub = ObserverHub::new();
        let recorder = Rc::new(RefCell::new(Recorder::default()));
        let id = hub.register_vm(Box::new(RecordingObserver(recorder.clone())));
        hub.detach_vm(id);

        let entry = crate::vm_manager::VMEntry::for_tests("work");
        hub.notify_vm(id, &entry, VmUpdate::kind());
        assert!(recorder.borrow().vm_updates.is_empty());
    }

    #[test]
    fn ids_are_never_reused() {
        let mut hub = ObserverHub::new();
        let a = hub.register_app(Box::new(RecordingObserver(Default::default())));
        hub.detach_app(a);
        let b = hub.register_app(Box::new(RecordingObserver(Default::default())));
        assert_ne!(a, b);
    }
}
