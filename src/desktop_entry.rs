//! Desktop entry registry: discovery, parsing and watching of application
//! descriptor files.
//!
//! The registry owns a path to [`ApplicationInfo`] map covering one or more
//! watched directories. Directories are scanned synchronously at
//! construction, before the watcher starts, so there is no window between
//! "scan complete" and "watch active". All later changes arrive as
//! [`FsEvent`] values forwarded from the watcher thread over a channel and
//! applied on the event loop.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use freedesktop_desktop_entry::DesktopEntry;
use log::{debug, warn};
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedSender;

use crate::admin::AdminClient;
use crate::constants;
use crate::error::MenuError;
use crate::observers::{ObserverHub, ObserverId};

const LOCALES: &[&str] = &["en"];

/// One discovered application descriptor. Identity is the file path; a
/// reload mutates the existing instance in place so attached observers
/// survive descriptor rewrites.
pub struct ApplicationInfo {
    pub file_path: PathBuf,
    pub app_name: String,
    pub app_icon: Option<String>,
    /// Owning VM, by name; `None` for local (dom0) entries.
    pub vm_name: Option<String>,
    /// The owning VM's icon at load time.
    pub vm_icon: Option<String>,
    /// Stable identifier used in favorites lists; `@disp:`-prefixed for
    /// disposable-launch variants.
    pub entry_name: String,
    /// Whitespace-split command template.
    pub exec: Vec<String>,
    pub disposable: bool,
    pub categories: Vec<String>,
    /// Opaque handles of attached presentation entries.
    pub entries: Vec<ObserverId>,
}

impl ApplicationInfo {
    fn new(path: &Path) -> Self {
        ApplicationInfo {
            file_path: path.to_path_buf(),
            app_name: String::new(),
            app_icon: None,
            vm_name: None,
            vm_icon: None,
            entry_name: String::new(),
            exec: Vec::new(),
            disposable: false,
            categories: Vec::new(),
            entries: Vec::new(),
        }
    }

    fn load_data(&mut self, parsed: &ParsedEntry, admin: &dyn AdminClient) {
        let vm = parsed.vm_name.as_deref().and_then(|name| {
            match admin.domain_info(name) {
                Ok(info) => info,
                Err(err) => {
                    debug!("cannot resolve VM {name} for {}: {err}", self.file_path.display());
                    None
                }
            }
        });
        self.vm_name = vm.as_ref().map(|info| info.name.clone());
        self.vm_icon = vm.as_ref().map(|info| info.icon.clone());

        let mut app_name = parsed.name.clone().unwrap_or_default();
        if let Some(vm_name) = &self.vm_name {
            if let Some(stripped) = app_name.strip_prefix(&format!("{vm_name}: ")) {
                app_name = stripped.to_string();
            }
        }
        self.app_name = app_name;
        self.app_icon = parsed.icon.clone();
        self.disposable = parsed.non_dispvm_exec;

        let base_name = parsed.app_name_key.clone().unwrap_or_else(|| {
            self.file_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        self.entry_name = if self.disposable {
            format!("{}{base_name}", constants::DISPOSABLE_PREFIX)
        } else {
            base_name
        };
        self.exec = parsed
            .exec
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        self.categories = parsed.categories.clone();
    }

    pub fn attach_observer(&mut self, id: ObserverId) {
        self.entries.push(id);
    }

    pub fn detach_observer(&mut self, id: ObserverId) {
        self.entries.retain(|&e| e != id);
    }

    /// Scope under which this entry participates in favorites: the owning
    /// VM's name, or the local domain's name for VM-less entries.
    pub fn scope_key(&self, local_name: &str) -> String {
        self.vm_name
            .clone()
            .unwrap_or_else(|| local_name.to_string())
    }

    /// The launch command, rewritten for a different target VM. Used to
    /// open entries of a disposable template inside a child disposable.
    pub fn command_for_vm(&self, target: Option<&str>) -> Vec<String> {
        let mut command = self.exec.clone();
        if let (Some(target), Some(own)) = (target, self.vm_name.as_deref()) {
            if target != own {
                if command.get(5).map(String::as_str) != Some(own) {
                    warn!("unexpected command for a disposable VM: {command:?}");
                }
                command = command
                    .iter()
                    .map(|part| {
                        if part == own {
                            target.to_string()
                        } else {
                            part.clone()
                        }
                    })
                    .collect();
            }
        }
        command
    }

    pub fn is_qubes_specific(&self) -> bool {
        self.categories.iter().any(|c| c == "X-Qubes-VM")
    }
}

/// The descriptor fields the menu cares about, extracted in one place.
struct ParsedEntry {
    name: Option<String>,
    icon: Option<String>,
    exec: Option<String>,
    categories: Vec<String>,
    hidden: bool,
    only_show_in: Vec<String>,
    not_show_in: Vec<String>,
    vm_name: Option<String>,
    non_dispvm_exec: bool,
    app_name_key: Option<String>,
}

fn parse_descriptor(path: &Path) -> Result<ParsedEntry, String> {
    let entry =
        DesktopEntry::from_path(path.to_path_buf(), Some(LOCALES)).map_err(|e| e.to_string())?;
    let custom = |key: &str| {
        entry
            .desktop_entry(key)
            .map(str::to_string)
            .filter(|v| !v.is_empty())
    };
    let parsed = ParsedEntry {
        name: entry.name(LOCALES).map(|n| n.into_owned()),
        icon: entry.icon().map(str::to_string),
        exec: entry.exec().map(str::to_string),
        categories: entry
            .categories()
            .unwrap_or_default()
            .into_iter()
            .map(str::to_string)
            .collect(),
        hidden: entry.hidden(),
        only_show_in: entry
            .only_show_in()
            .unwrap_or_default()
            .into_iter()
            .map(str::to_string)
            .collect(),
        not_show_in: entry
            .not_show_in()
            .unwrap_or_default()
            .into_iter()
            .map(str::to_string)
            .collect(),
        vm_name: custom("X-Qubes-VmName"),
        non_dispvm_exec: custom("X-Qubes-NonDispvmExec").is_some(),
        app_name_key: custom("X-Qubes-AppName"),
    };
    if parsed.name.is_none() && parsed.exec.is_none() {
        return Err("no Name or Exec key".to_string());
    }
    Ok(parsed)
}

/// Simplified filesystem notification, as delivered to the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Updated(PathBuf),
    Removed(PathBuf),
}

/// Collapse a raw watcher event into load/remove operations. Renames are
/// a removal at the source and a load at the destination.
fn simplify_fs_event(event: notify::Event) -> Vec<FsEvent> {
    match event.kind {
        EventKind::Create(_) => event.paths.into_iter().map(FsEvent::Updated).collect(),
        EventKind::Remove(_) => event.paths.into_iter().map(FsEvent::Removed).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.into_iter().map(FsEvent::Removed).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.into_iter().map(FsEvent::Updated).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = event.paths.into_iter();
            let mut out = Vec::new();
            if let Some(from) = paths.next() {
                out.push(FsEvent::Removed(from));
            }
            if let Some(to) = paths.next() {
                out.push(FsEvent::Updated(to));
            }
            out
        }
        EventKind::Modify(_) => event.paths.into_iter().map(FsEvent::Updated).collect(),
        _ => Vec::new(),
    }
}

type AppInfoCallback = Box<dyn FnMut(&Rc<RefCell<ApplicationInfo>>)>;

pub struct DesktopFileManager {
    admin: Rc<dyn AdminClient>,
    hub: Rc<RefCell<ObserverHub>>,
    desktop_dirs: Vec<PathBuf>,
    /// Current desktop environment identifiers, for show/hide filtering.
    environments: Vec<String>,
    app_entries: HashMap<PathBuf, Rc<RefCell<ApplicationInfo>>>,
    callbacks: Vec<AppInfoCallback>,
    watcher: Option<RecommendedWatcher>,
}

impl DesktopFileManager {
    /// Create the registry and synchronously scan the watched directories.
    pub fn new(
        admin: Rc<dyn AdminClient>,
        hub: Rc<RefCell<ObserverHub>>,
        desktop_dirs: Vec<PathBuf>,
        environments: Vec<String>,
    ) -> Self {
        let mut manager = DesktopFileManager {
            admin,
            hub,
            desktop_dirs,
            environments,
            app_entries: HashMap::new(),
            callbacks: Vec::new(),
            watcher: None,
        };
        manager.scan();
        manager
    }

    fn scan(&mut self) {
        for dir in self.desktop_dirs.clone() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!("cannot read {}: {err}", dir.display());
                    continue;
                }
            };
            for entry in entries.flatten() {
                self.load_file(&entry.path());
            }
        }
    }

    /// Start watching the registry directories. Filesystem notifications
    /// are posted to `tx` from the watcher's own thread and must be fed
    /// back through [`DesktopFileManager::handle_fs_event`] on the loop.
    pub fn watch(&mut self, tx: UnboundedSender<FsEvent>) -> Result<(), MenuError> {
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    for fs_event in simplify_fs_event(event) {
                        let _ = tx.send(fs_event);
                    }
                }
                Err(err) => warn!("descriptor watch error: {err}"),
            },
            Config::default(),
        )?;
        for dir in &self.desktop_dirs {
            if let Err(err) = watcher.watch(dir, RecursiveMode::Recursive) {
                warn!("cannot watch {}: {err}", dir.display());
            }
        }
        self.watcher = Some(watcher);
        Ok(())
    }

    pub fn handle_fs_event(&mut self, event: FsEvent) {
        match event {
            FsEvent::Updated(path) => self.load_file(&path),
            FsEvent::Removed(path) => self.remove_file(&path),
        }
    }

    /// Register a callback for newly loaded entries. It is invoked once,
    /// immediately, for every entry already loaded, so late subscribers
    /// see the full current state.
    pub fn register_callback(&mut self, mut callback: AppInfoCallback) {
        for info in self.app_entries.values() {
            callback(info);
        }
        self.callbacks.push(callback);
    }

    pub fn get_app_infos(&self) -> impl Iterator<Item = &Rc<RefCell<ApplicationInfo>>> {
        self.app_entries.values()
    }

    pub fn get(&self, path: &Path) -> Option<Rc<RefCell<ApplicationInfo>>> {
        self.app_entries.get(path).cloned()
    }

    /// Load or reload one descriptor file. Malformed, ineligible or
    /// vanished files are treated as absent; a stale entry for the path is
    /// removed. Never fails outward: a broken file must not take down
    /// event handling for everyone else.
    pub fn load_file(&mut self, path: &Path) {
        if path.extension().and_then(|e| e.to_str()) != Some("desktop") {
            return;
        }
        let parsed = match parse_descriptor(path) {
            Ok(parsed) => parsed,
            Err(err) => {
                // also covers races against concurrent directory
                // mutation: the file may be gone by the time we read it
                warn!("cannot load desktop entry {}: {err}", path.display());
                self.remove_file(path);
                return;
            }
        };
        if !self.eligible(&parsed) {
            self.remove_file(path);
            return;
        }
        match self.app_entries.get(path).cloned() {
            Some(info) => {
                info.borrow_mut().load_data(&parsed, &*self.admin);
                let ids = info.borrow().entries.clone();
                if !ids.is_empty() {
                    let info = info.borrow();
                    let mut hub = self.hub.borrow_mut();
                    for id in ids {
                        hub.notify_app(id, &info);
                    }
                }
            }
            None => {
                let mut info = ApplicationInfo::new(path);
                info.load_data(&parsed, &*self.admin);
                let info = Rc::new(RefCell::new(info));
                self.app_entries.insert(path.to_path_buf(), info.clone());
                for callback in &mut self.callbacks {
                    callback(&info);
                }
            }
        }
    }

    /// Drop the entry for a path, detaching all of its observers first.
    /// Safe to call for paths that were never loaded.
    pub fn remove_file(&mut self, path: &Path) {
        if let Some(info) = self.app_entries.remove(path) {
            let ids = std::mem::take(&mut info.borrow_mut().entries);
            let mut hub = self.hub.borrow_mut();
            for id in ids {
                hub.detach_app(id);
            }
        }
    }

    fn eligible(&self, parsed: &ParsedEntry) -> bool {
        if parsed.hidden {
            return false;
        }
        if !parsed.only_show_in.is_empty() {
            return parsed
                .only_show_in
                .iter()
                .any(|env| self.environments.contains(env));
        }
        if !parsed.not_show_in.is_empty() {
            return !parsed
                .not_show_in
                .iter()
                .any(|env| self.environments.contains(env));
        }
        true
    }
}
