use std::path::PathBuf;
use std::rc::Rc;

use log::info;
use tokio::sync::mpsc;

use qubemenu::admin::client::{SocketAdmin, DEFAULT_SOCKET};
use qubemenu::admin::events::EventStream;
use qubemenu::app::AppContext;
use qubemenu::desktop_entry::ApplicationInfo;
use qubemenu::error::MenuError;
use qubemenu::observers::{AppObserver, VmObserver, VmUpdate};
use qubemenu::vm_manager::VMEntry;

/// Stand-in presentation entry: logs every notification it receives.
/// The real menu replaces these with widget rows; the registry contract
/// is the same either way.
struct LogEntry {
    label: String,
}

impl AppObserver for LogEntry {
    fn update_contents(&mut self, info: &ApplicationInfo) {
        info!("app entry updated: {} ({})", info.app_name, self.label);
        self.label = info.entry_name.clone();
    }

    fn detach(&mut self) {
        info!("app entry removed: {}", self.label);
    }
}

impl VmObserver for LogEntry {
    fn update_contents(&mut self, entry: &VMEntry, update: VmUpdate) {
        if let Some(state) = update.power_state {
            info!("{} is now {state}", entry.vm_name);
        }
        if update.network {
            info!(
                "{} network: {}",
                entry.vm_name,
                if entry.has_network { "up" } else { "down" }
            );
        }
        if update.label || update.kind {
            info!("{} changed appearance or type", entry.vm_name);
        }
    }

    fn detach(&mut self) {
        info!("VM entry removed: {}", self.label);
    }
}

fn desktop_dirs() -> Vec<PathBuf> {
    let data_home = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(".local/share")
        });
    vec![
        data_home.join("applications"),
        PathBuf::from("/usr/share/applications"),
    ]
}

fn current_environments() -> Vec<String> {
    std::env::var("XDG_CURRENT_DESKTOP")
        .unwrap_or_default()
        .split(':')
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .collect()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), MenuError> {
    env_logger::init();

    let socket =
        std::env::var("QUBESD_SOCKET").unwrap_or_else(|_| DEFAULT_SOCKET.to_string());
    let admin = Rc::new(SocketAdmin::new(socket.clone()));

    let ctx = AppContext::new(
        admin,
        desktop_dirs(),
        current_environments(),
        Box::new(|hub, info| {
            let label = info.borrow().entry_name.clone();
            info!("favorite added: {label}");
            hub.register_app(Box::new(LogEntry { label }))
        }),
    )?;

    // mirror every VM into a logging observer so state changes are visible
    {
        let hub = ctx.hub.clone();
        ctx.vm_manager
            .borrow_mut()
            .register_new_vm_callback(Box::new(move |entry| {
                let label = entry.borrow().vm_name.clone();
                let id = hub
                    .borrow_mut()
                    .register_vm(Box::new(LogEntry { label }));
                entry.borrow_mut().attach_observer(id);
            }));
    }

    let (fs_tx, mut fs_rx) = mpsc::unbounded_channel();
    ctx.watch_desktop_files(fs_tx)?;

    let mut events = EventStream::connect(&socket).await?;
    info!(
        "ready: {} applications, {} VMs",
        ctx.desktop.borrow().get_app_infos().count(),
        ctx.hub.borrow().vm_count(),
    );

    loop {
        tokio::select! {
            event = events.next_event() => match event? {
                Some(raw) => ctx.dispatch(raw),
                None => {
                    info!("admin event stream closed, exiting");
                    break;
                }
            },
            Some(fs_event) = fs_rx.recv() => ctx.handle_fs_event(fs_event),
        }
    }
    Ok(())
}
