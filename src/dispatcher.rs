//! Routes decoded admin events to the interested registries.
//!
//! The dispatcher is a shared, long-lived resource with no restart path,
//! so nothing a handler does may escape it: handler errors are logged and
//! the loop moves on to the next event.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, warn};

use crate::admin::events::{AdminEvent, VmFeature};
use crate::error::MenuError;
use crate::favorites::FavoritesIndex;
use crate::vm_manager::VmManager;

pub struct Dispatcher {
    vm_manager: Rc<RefCell<VmManager>>,
    favorites: Rc<RefCell<FavoritesIndex>>,
}

impl Dispatcher {
    pub fn new(
        vm_manager: Rc<RefCell<VmManager>>,
        favorites: Rc<RefCell<FavoritesIndex>>,
    ) -> Self {
        Dispatcher {
            vm_manager,
            favorites,
        }
    }

    /// Apply one event. A failing handler must not poison the dispatch
    /// loop for all future events, so errors stop here.
    pub fn dispatch(&self, event: AdminEvent) {
        if let Err(err) = self.route(event) {
            warn!("event handler failed: {err}");
        }
    }

    fn route(&self, event: AdminEvent) -> Result<(), MenuError> {
        match event {
            AdminEvent::Lifecycle { vm, event } => {
                self.vm_manager.borrow_mut().handle_lifecycle(&vm, event);
            }
            AdminEvent::DomainAdd { vm } => {
                self.vm_manager.borrow_mut().handle_domain_add(&vm);
                self.favorites.borrow_mut().handle_domain_add(&vm)?;
            }
            AdminEvent::DomainDelete { vm } => {
                self.favorites.borrow_mut().handle_domain_delete(&vm);
                self.vm_manager.borrow_mut().handle_domain_delete(&vm);
            }
            AdminEvent::PropertySet {
                vm,
                property,
                newvalue,
            } => {
                self.vm_manager
                    .borrow_mut()
                    .handle_property_set(&vm, property, &newvalue)?;
            }
            AdminEvent::FeatureSet {
                vm,
                feature: VmFeature::Favorites,
                value,
                oldvalue,
            } => {
                self.favorites
                    .borrow_mut()
                    .handle_feature_set(&vm, &value, oldvalue.as_deref());
            }
            AdminEvent::FeatureSet {
                vm, feature, value, ..
            } => {
                self.vm_manager
                    .borrow_mut()
                    .handle_feature(&vm, feature, Some(&value));
            }
            AdminEvent::FeatureDelete {
                vm,
                feature: VmFeature::Favorites,
            } => {
                self.favorites.borrow_mut().handle_feature_delete(&vm);
            }
            AdminEvent::FeatureDelete { vm, feature } => {
                self.vm_manager.borrow_mut().handle_feature(&vm, feature, None);
            }
            AdminEvent::Other { subject, event } => {
                debug!("ignoring event {event} for {subject:?}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::mock::MockAdmin;
    use crate::admin::{PowerState, VmKind};
    use crate::desktop_entry::DesktopFileManager;
    use crate::observers::ObserverHub;
    use tempfile::TempDir;

    fn setup() -> (Rc<MockAdmin>, Rc<RefCell<VmManager>>, Dispatcher, TempDir) {
        let dir = TempDir::new().unwrap();
        let admin = Rc::new(MockAdmin::new());
        let hub = Rc::new(RefCell::new(ObserverHub::new()));
        let desktop = Rc::new(RefCell::new(DesktopFileManager::new(
            admin.clone(),
            hub.clone(),
            vec![dir.path().to_path_buf()],
            vec!["X-QUBES".to_string()],
        )));
        let vm_manager = Rc::new(RefCell::new(VmManager::new(admin.clone(), hub.clone())));
        let favorites = FavoritesIndex::new(
            admin.clone(),
            hub.clone(),
            desktop,
            Box::new(|_, _| unreachable!("no favorites in these tests")),
        );
        let dispatcher = Dispatcher::new(vm_manager.clone(), favorites);
        (admin, vm_manager, dispatcher, dir)
    }

    #[test]
    fn lifecycle_events_reach_the_vm_registry() {
        let (admin, vm_manager, dispatcher, _dir) = setup();
        admin.add_domain("work", VmKind::AppVM, "appvm-blue");

        dispatcher.dispatch(AdminEvent::Lifecycle {
            vm: "work".into(),
            event: crate::admin::events::LifecycleEvent::Start,
        });

        let entry = vm_manager.borrow().get("work").unwrap();
        assert_eq!(entry.borrow().power_state, PowerState::Running);
    }

    #[test]
    fn handler_errors_do_not_poison_the_dispatcher() {
        let (admin, vm_manager, dispatcher, _dir) = setup();
        admin.add_domain("work", VmKind::AppVM, "appvm-blue");

        // favorites lookup fails during domain-add; the error must be
        // swallowed and later events still processed
        admin.fail_features(true);
        dispatcher.dispatch(AdminEvent::DomainAdd { vm: "work".into() });

        admin.fail_features(false);
        dispatcher.dispatch(AdminEvent::DomainAdd { vm: "work".into() });
        assert!(vm_manager.borrow().get("work").is_some());
    }

    #[test]
    fn unknown_events_are_ignored() {
        let (_admin, vm_manager, dispatcher, _dir) = setup();
        dispatcher.dispatch(AdminEvent::Other {
            subject: "work".into(),
            event: "domain-spawn".into(),
        });
        assert!(vm_manager.borrow().get("work").is_none());
    }
}
