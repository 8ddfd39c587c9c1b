//! Top-level application context.
//!
//! Owns and wires every long-lived piece: the observer hub, the three
//! registries, the dispatcher and the popup tracker. Construction performs
//! the startup sequence (directory scan, initial domain load, callback
//! registration); after that, all mutation flows through
//! [`AppContext::dispatch`] and [`AppContext::handle_fs_event`] on the
//! event loop.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use tokio::sync::mpsc::UnboundedSender;

use crate::admin::events::{AdminEvent, RawEvent};
use crate::admin::AdminClient;
use crate::desktop_entry::{DesktopFileManager, FsEvent};
use crate::dispatcher::Dispatcher;
use crate::error::MenuError;
use crate::favorites::{FavoriteFactory, FavoritesIndex};
use crate::observers::ObserverHub;
use crate::popup::PopupTracker;
use crate::vm_manager::VmManager;

pub struct AppContext {
    pub admin: Rc<dyn AdminClient>,
    pub hub: Rc<RefCell<ObserverHub>>,
    pub desktop: Rc<RefCell<DesktopFileManager>>,
    pub vm_manager: Rc<RefCell<VmManager>>,
    pub favorites: Rc<RefCell<FavoritesIndex>>,
    pub popups: PopupTracker,
    dispatcher: Dispatcher,
}

impl AppContext {
    pub fn new(
        admin: Rc<dyn AdminClient>,
        desktop_dirs: Vec<PathBuf>,
        environments: Vec<String>,
        favorite_factory: FavoriteFactory,
    ) -> Result<Self, MenuError> {
        let hub = Rc::new(RefCell::new(ObserverHub::new()));
        let desktop = Rc::new(RefCell::new(DesktopFileManager::new(
            admin.clone(),
            hub.clone(),
            desktop_dirs,
            environments,
        )));
        let mut vm_manager = VmManager::new(admin.clone(), hub.clone());
        vm_manager.load_existing()?;
        let vm_manager = Rc::new(RefCell::new(vm_manager));
        let favorites = FavoritesIndex::new(
            admin.clone(),
            hub.clone(),
            desktop.clone(),
            favorite_factory,
        );
        let dispatcher = Dispatcher::new(vm_manager.clone(), favorites.clone());
        Ok(AppContext {
            admin,
            hub,
            desktop,
            vm_manager,
            favorites,
            popups: PopupTracker::new(),
            dispatcher,
        })
    }

    /// Start the descriptor directory watcher; simplified events appear on
    /// `tx` and must be fed back through [`AppContext::handle_fs_event`].
    pub fn watch_desktop_files(&self, tx: UnboundedSender<FsEvent>) -> Result<(), MenuError> {
        self.desktop.borrow_mut().watch(tx)
    }

    pub fn handle_fs_event(&self, event: FsEvent) {
        self.desktop.borrow_mut().handle_fs_event(event);
    }

    /// Decode and route one admin event frame.
    pub fn dispatch(&self, raw: RawEvent) {
        self.dispatcher.dispatch(AdminEvent::decode(raw));
    }
}
