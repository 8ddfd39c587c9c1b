//! Favorites index: projects each VM's externally stored favorites list
//! into live presentation entries.
//!
//! The favorites for a VM live in a feature as a space-separated list of
//! entry names. The index reacts to feature-set and feature-delete events
//! and to application loads arriving in either order, and maintains one
//! invariant: the displayed set for a scope is always exactly the
//! intersection of the current favorites tokens and the entry names loaded
//! for that scope. A token with no loaded application is not an error, it
//! is simply not displayed until a matching descriptor appears.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use log::warn;

use crate::admin::AdminClient;
use crate::constants;
use crate::desktop_entry::{ApplicationInfo, DesktopFileManager};
use crate::error::MenuError;
use crate::observers::{ObserverHub, ObserverId};

/// Split a favorites feature value into tokens. An empty value means "no
/// favorites", never a single empty token.
fn tokens(value: &str) -> Vec<String> {
    value
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

struct FavoriteSlot {
    token: String,
    observer: ObserverId,
    /// Descriptor path, kept so removal can clear the back-reference from
    /// a still-loaded ApplicationInfo.
    path: PathBuf,
}

/// Builds a presentation entry for a favorite, registers it in the hub it
/// is handed, and returns the handle.
pub type FavoriteFactory =
    Box<dyn FnMut(&mut ObserverHub, &Rc<RefCell<ApplicationInfo>>) -> ObserverId>;

pub struct FavoritesIndex {
    admin: Rc<dyn AdminClient>,
    hub: Rc<RefCell<ObserverHub>>,
    desktop: Rc<RefCell<DesktopFileManager>>,
    factory: FavoriteFactory,
    slots: HashMap<String, Vec<FavoriteSlot>>,
    /// Last known favorites value per scope, maintained from events and
    /// filled lazily from the admin interface.
    feature_cache: HashMap<String, String>,
}

impl FavoritesIndex {
    /// Build the index and subscribe it to the desktop registry; existing
    /// entries are replayed through the subscription immediately.
    pub fn new(
        admin: Rc<dyn AdminClient>,
        hub: Rc<RefCell<ObserverHub>>,
        desktop: Rc<RefCell<DesktopFileManager>>,
        factory: FavoriteFactory,
    ) -> Rc<RefCell<FavoritesIndex>> {
        let index = Rc::new(RefCell::new(FavoritesIndex {
            admin,
            hub,
            desktop: desktop.clone(),
            factory,
            slots: HashMap::new(),
            feature_cache: HashMap::new(),
        }));
        // weak, or the index and the registry keep each other alive
        let weak = Rc::downgrade(&index);
        desktop
            .borrow_mut()
            .register_callback(Box::new(move |info| {
                if let Some(index) = weak.upgrade() {
                    index.borrow_mut().on_app_info_loaded(info);
                }
            }));
        index
    }

    /// Tokens currently displayed for a scope, for consumers that render
    /// the favorites page.
    pub fn displayed(&self, scope: &str) -> Vec<String> {
        let hub = self.hub.borrow();
        self.slots
            .get(scope)
            .map(|slots| {
                slots
                    .iter()
                    .filter(|slot| hub.contains_app(slot.observer))
                    .map(|slot| slot.token.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Apply a favorites feature-set event carrying the old and new list
    /// values. Tokens leaving the list detach their entries; tokens
    /// entering it attach an entry when a matching application is loaded.
    pub fn handle_feature_set(&mut self, vm: &str, value: &str, oldvalue: Option<&str>) {
        self.prune_stale(vm);
        let new_tokens = tokens(value);
        self.feature_cache.insert(vm.to_string(), value.to_string());

        let mut leaving = tokens(oldvalue.unwrap_or_default());
        if let Some(slots) = self.slots.get(vm) {
            // also sweep anything attached that the event's old value
            // did not mention, so drift cannot survive an update
            leaving.extend(slots.iter().map(|slot| slot.token.clone()));
        }
        for token in leaving {
            if !new_tokens.contains(&token) {
                self.remove_token(vm, &token);
            }
        }
        for token in &new_tokens {
            if !self.tracked(vm, token) {
                self.add_token(vm, token);
            }
        }
    }

    /// A deleted favorites feature means "all removed".
    pub fn handle_feature_delete(&mut self, vm: &str) {
        self.feature_cache.remove(vm);
        self.clear_scope(vm);
    }

    /// A new domain may arrive with favorites already set, for instance
    /// after a restore from backup.
    pub fn handle_domain_add(&mut self, vm: &str) -> Result<(), MenuError> {
        let value = self
            .admin
            .feature(vm, constants::FAVORITES_FEATURE)?
            .unwrap_or_default();
        self.feature_cache.insert(vm.to_string(), value.clone());
        for token in tokens(&value) {
            if !self.tracked(vm, &token) {
                self.add_token(vm, &token);
            }
        }
        Ok(())
    }

    /// Domain deletion clears the scope exactly as if its feature had been
    /// cleared. Scopes are keyed by name with local entries mapped to the
    /// local domain's name, so the local pseudo-VM is not special here.
    pub fn handle_domain_delete(&mut self, vm: &str) {
        self.feature_cache.remove(vm);
        self.clear_scope(vm);
    }

    /// Called for every newly loaded application, before or after the
    /// favorites for its scope are known.
    fn on_app_info_loaded(&mut self, info: &Rc<RefCell<ApplicationInfo>>) {
        let local = self.admin.local_name();
        let (scope, entry_name) = {
            let info = info.borrow();
            (info.scope_key(&local), info.entry_name.clone())
        };
        self.prune_stale(&scope);
        if self.tracked(&scope, &entry_name) {
            return;
        }
        let value = match self.feature_cache.get(&scope) {
            Some(value) => value.clone(),
            None => {
                let value = match self.admin.feature(&scope, constants::FAVORITES_FEATURE) {
                    Ok(value) => value.unwrap_or_default(),
                    Err(err) => {
                        warn!("cannot read favorites of {scope}: {err}");
                        return;
                    }
                };
                self.feature_cache.insert(scope.clone(), value.clone());
                value
            }
        };
        if tokens(&value).contains(&entry_name) {
            self.attach(&scope, &entry_name, info);
        }
    }

    fn tracked(&self, scope: &str, token: &str) -> bool {
        self.slots
            .get(scope)
            .map(|slots| slots.iter().any(|slot| slot.token == token))
            .unwrap_or(false)
    }

    /// Drop slots whose observer is already gone (their descriptor
    /// unloaded), so a later reload can attach afresh.
    fn prune_stale(&mut self, scope: &str) {
        if let Some(slots) = self.slots.get_mut(scope) {
            let hub = self.hub.borrow();
            slots.retain(|slot| hub.contains_app(slot.observer));
        }
    }

    fn add_token(&mut self, scope: &str, token: &str) {
        let local = self.admin.local_name();
        let info = {
            let desktop = self.desktop.borrow();
            let found = desktop
                .get_app_infos()
                .find(|info| {
                    let info = info.borrow();
                    info.entry_name == token && info.scope_key(&local) == scope
                })
                .cloned();
            found
        };
        // no matching application loaded yet; it will attach on load
        let Some(info) = info else { return };
        self.attach(scope, token, &info);
    }

    fn attach(&mut self, scope: &str, token: &str, info: &Rc<RefCell<ApplicationInfo>>) {
        let id = {
            let mut hub = self.hub.borrow_mut();
            (self.factory)(&mut hub, info)
        };
        info.borrow_mut().attach_observer(id);
        let path = info.borrow().file_path.clone();
        self.slots
            .entry(scope.to_string())
            .or_default()
            .push(FavoriteSlot {
                token: token.to_string(),
                observer: id,
                path,
            });
    }

    fn remove_token(&mut self, scope: &str, token: &str) {
        let Some(slots) = self.slots.get_mut(scope) else {
            return;
        };
        let Some(pos) = slots.iter().position(|slot| slot.token == token) else {
            return;
        };
        let slot = slots.remove(pos);
        self.hub.borrow_mut().detach_app(slot.observer);
        if let Some(info) = self.desktop.borrow().get(&slot.path) {
            info.borrow_mut().detach_observer(slot.observer);
        }
    }

    fn clear_scope(&mut self, scope: &str) {
        let Some(slots) = self.slots.remove(scope) else {
            return;
        };
        for slot in slots {
            self.hub.borrow_mut().detach_app(slot.observer);
            if let Some(info) = self.desktop.borrow().get(&slot.path) {
                info.borrow_mut().detach_observer(slot.observer);
            }
        }
    }
}
