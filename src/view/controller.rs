use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::clipboard::{ClipboardStats, ExportFormat};
use crate::config::Config;
use crate::export::download_export;
use crate::sync::{ChannelEvent, ClipboardGateway, ConnectionState};

use super::store::{DisplayMode, ProjectedPage, ViewQuery, ViewStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

/// A transient, user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// Everything a presentation layer may ask of a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewCommand {
    Refresh,
    TogglePin(i64),
    Delete(i64),
    DeleteAllUnpinned,
    Export(ExportFormat),
    LoadStats,
    SetDisplayMode(DisplayMode),
    ToggleDisplayMode,
    SetSearch(String),
    NextPage,
    PrevPage,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSnapshot {
    pub connection: ConnectionState,
    pub query: ViewQuery,
    pub page: ProjectedPage,
    pub total_entries: usize,
    pub pinned_count: usize,
    pub loading: bool,
    pub error_banner: Option<String>,
    pub stats: Option<ClipboardStats>,
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// How many entries a full refresh pulls from the backend.
    pub fetch_size: u32,
    pub page_size: usize,
    pub refetch_delay: Duration,
    pub export_dir: PathBuf,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fetch_size: config.page_size,
            page_size: 20,
            refetch_delay: config.refetch_delay,
            export_dir: config.export_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefetchTarget {
    Entry(i64),
    All,
}

impl RefetchTarget {
    /// Whether `event` is the echo the failed request would have produced.
    fn echoed_by(self, event: &ChannelEvent) -> bool {
        match (self, event) {
            (_, ChannelEvent::Clear { .. }) => true,
            (RefetchTarget::Entry(id), ChannelEvent::UpdateEntry(_) | ChannelEvent::DeleteEntry(_)) => {
                event.entry_id() == Some(id)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingRefetch {
    deadline: Instant,
    target: RefetchTarget,
}

/// Owns one screen's view state.
///
/// Mutations never touch the store directly: a successful call waits for the bus echo,
/// a failed call arms a single delayed refetch that an echo can still cancel.
pub struct ViewController<G: ClipboardGateway + ?Sized> {
    gateway: Arc<G>,
    settings: ControllerSettings,
    store: ViewStore,
    query: ViewQuery,
    connection: ConnectionState,
    loading: bool,
    error_banner: Option<String>,
    stats: Option<ClipboardStats>,
    pending_refetch: Option<PendingRefetch>,
    notices: mpsc::UnboundedSender<Notice>,
    snapshot_tx: watch::Sender<ViewSnapshot>,
}

impl<G: ClipboardGateway + ?Sized> ViewController<G> {
    pub fn new(
        gateway: Arc<G>,
        settings: ControllerSettings,
        notices: mpsc::UnboundedSender<Notice>,
    ) -> Self {
        let query = ViewQuery {
            page_size: settings.page_size.max(1),
            ..ViewQuery::default()
        };
        let store = ViewStore::new();
        let initial = ViewSnapshot {
            connection: ConnectionState::Disconnected,
            page: store.project(&query),
            query: query.clone(),
            total_entries: 0,
            pinned_count: 0,
            loading: false,
            error_banner: None,
            stats: None,
        };
        let (snapshot_tx, _) = watch::channel(initial);
        Self {
            gateway,
            settings,
            store,
            query,
            connection: ConnectionState::Disconnected,
            loading: false,
            error_banner: None,
            stats: None,
            pending_refetch: None,
            notices,
            snapshot_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn store(&self) -> &ViewStore {
        &self.store
    }

    pub fn query(&self) -> &ViewQuery {
        &self.query
    }

    pub fn error_banner(&self) -> Option<&str> {
        self.error_banner.as_deref()
    }

    pub fn refetch_deadline(&self) -> Option<Instant> {
        self.pending_refetch.map(|p| p.deadline)
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            connection: self.connection,
            query: self.query.clone(),
            page: self.store.project(&self.query),
            total_entries: self.store.len(),
            pinned_count: self.store.pinned().len(),
            loading: self.loading,
            error_banner: self.error_banner.clone(),
            stats: self.stats.clone(),
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        let notice = Notice::new(level, message);
        match notice.level {
            NoticeLevel::Error => log::warn!("{}", notice.message),
            _ => log::debug!("{}", notice.message),
        }
        let _ = self.notices.send(notice);
    }

    // ── Reads ───────────────────────────────────────────────────────────

    /// Replace the store with a fresh fetch. On failure the last good data stays.
    pub async fn refresh(&mut self) {
        self.loading = true;
        self.publish();

        match self.gateway.list_entries(0, self.settings.fetch_size).await {
            Ok(page) => {
                log::debug!("Fetched {} entries", page.content.len());
                self.store.reset(page.content);
                self.error_banner = None;
                self.clamp_page();
            }
            Err(e) => {
                self.notify(NoticeLevel::Error, "Failed to fetch entries");
                self.error_banner = Some(format!("Failed to fetch entries: {}", e));
            }
        }
        self.loading = false;
    }

    pub async fn load_stats(&mut self) {
        match self.gateway.stats().await {
            Ok(stats) => {
                self.stats = Some(stats);
                self.error_banner = None;
            }
            Err(e) => {
                self.notify(NoticeLevel::Error, "Failed to load statistics");
                self.error_banner = Some(format!("Failed to load statistics: {}", e));
            }
        }
    }

    // ── Mutations ───────────────────────────────────────────────────────

    pub async fn toggle_pin(&mut self, id: i64) {
        if let Err(e) = self.gateway.toggle_pin(id).await {
            log::warn!("toggle_pin {} failed: {}", id, e);
            self.notify(NoticeLevel::Error, "Failed to update pin");
            self.arm_refetch(RefetchTarget::Entry(id));
        }
    }

    pub async fn delete(&mut self, id: i64) {
        if let Err(e) = self.gateway.delete_entry(id).await {
            log::warn!("delete {} failed: {}", id, e);
            self.notify(NoticeLevel::Error, "Failed to delete");
            self.arm_refetch(RefetchTarget::Entry(id));
        }
    }

    pub async fn delete_all_unpinned(&mut self) {
        if let Err(e) = self.gateway.delete_all_unpinned().await {
            log::warn!("delete_all_unpinned failed: {}", e);
            self.notify(NoticeLevel::Error, "Failed to clear");
            self.arm_refetch(RefetchTarget::All);
        }
    }

    pub async fn export(&mut self, format: ExportFormat) {
        match download_export(
            &*self.gateway,
            &self.settings.export_dir,
            format,
            true,
        )
        .await
        {
            Ok(path) => self.notify(
                NoticeLevel::Success,
                format!("Exported successfully to {}", path.display()),
            ),
            Err(e) => self.notify(NoticeLevel::Error, format!("Export failed: {}", e)),
        }
    }

    fn arm_refetch(&mut self, target: RefetchTarget) {
        self.pending_refetch = Some(PendingRefetch {
            deadline: Instant::now() + self.settings.refetch_delay,
            target,
        });
    }

    /// Run the compensating refetch if its deadline has passed. Returns whether it ran.
    pub async fn run_due_refetch(&mut self, now: Instant) -> bool {
        match self.pending_refetch {
            Some(p) if p.deadline <= now => {
                self.pending_refetch = None;
                log::info!("No echo arrived; refetching");
                self.refresh().await;
                true
            }
            _ => false,
        }
    }

    // ── Bus events ──────────────────────────────────────────────────────

    /// Reconcile one server event. Returns whether the store changed.
    pub fn apply_event(&mut self, event: &ChannelEvent) -> bool {
        if let Some(pending) = self.pending_refetch {
            if pending.target.echoed_by(event) {
                log::debug!("Echo received; compensating refetch cancelled");
                self.pending_refetch = None;
            }
        }

        let changed = self.store.apply(event);
        match event {
            ChannelEvent::NewEntry(_) if changed => {
                self.notify(NoticeLevel::Success, "New clipboard entry received")
            }
            ChannelEvent::Clear { include_pinned } => self.notify(
                NoticeLevel::Info,
                if *include_pinned {
                    "All entries cleared"
                } else {
                    "Unpinned entries cleared"
                },
            ),
            _ => {}
        }
        if changed {
            self.clamp_page();
        }
        changed
    }

    pub fn set_connection(&mut self, state: ConnectionState) {
        self.connection = state;
    }

    // ── Commands ────────────────────────────────────────────────────────

    /// Returns `false` once the view should stop.
    pub async fn handle_command(&mut self, command: ViewCommand) -> bool {
        match command {
            ViewCommand::Refresh => self.refresh().await,
            ViewCommand::TogglePin(id) => self.toggle_pin(id).await,
            ViewCommand::Delete(id) => self.delete(id).await,
            ViewCommand::DeleteAllUnpinned => self.delete_all_unpinned().await,
            ViewCommand::Export(format) => self.export(format).await,
            ViewCommand::LoadStats => self.load_stats().await,
            ViewCommand::SetDisplayMode(mode) => {
                self.query.mode = mode;
                self.query.page = 0;
            }
            ViewCommand::ToggleDisplayMode => {
                self.query.mode = self.query.mode.toggled();
                self.query.page = 0;
            }
            ViewCommand::SetSearch(search) => {
                self.query.search = search;
                self.query.page = 0;
            }
            ViewCommand::NextPage => {
                let total = self.store.project(&self.query).total_pages;
                if self.query.page + 1 < total {
                    self.query.page += 1;
                }
            }
            ViewCommand::PrevPage => self.query.page = self.query.page.saturating_sub(1),
            ViewCommand::Shutdown => return false,
        }
        true
    }

    fn clamp_page(&mut self) {
        let total = self.store.project(&self.query).total_pages;
        if total == 0 {
            self.query.page = 0;
        } else if self.query.page >= total {
            self.query.page = total - 1;
        }
    }

    /// Drive the view until `Shutdown` or until every command sender is gone.
    ///
    /// Events are applied strictly in the order they were delivered.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<ViewCommand>,
        mut events: mpsc::UnboundedReceiver<ChannelEvent>,
        mut connection: watch::Receiver<ConnectionState>,
    ) {
        self.connection = *connection.borrow_and_update();
        self.refresh().await;
        self.publish();

        let mut connection_open = true;
        loop {
            let deadline = self.refetch_deadline();
            tokio::select! {
                command = commands.recv() => {
                    let keep_going = match command {
                        Some(command) => self.handle_command(command).await,
                        None => false,
                    };
                    if !keep_going {
                        break;
                    }
                }
                Some(event) = events.recv() => {
                    self.apply_event(&event);
                }
                changed = connection.changed(), if connection_open => {
                    match changed {
                        Ok(()) => self.set_connection(*connection.borrow_and_update()),
                        Err(_) => connection_open = false,
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.run_due_refetch(Instant::now()).await;
                }
            }
            self.publish();
        }
        log::debug!("View controller stopped");
    }
}
