//! pixvault - Auto Backup Scheduler
//!
//! Debounces bursts of change events into a single backup written to the
//! user-granted location.
//!
//! ```text
//!   schedule()          timer fires            backup done
//! Idle ──────▶ Pending ────────────▶ Running ──────────────▶ Idle
//!               │  ▲                   │
//!               └──┘ schedule():       └─ schedule(): rerun once done
//!                    re-arm timer
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::backup::{self, ExportSummary};
use crate::config::BackupSettings;
use crate::error::{VaultError, VaultResult};
use crate::handles::{BackupHandleRecord, HandleStore};
use crate::store::{EncryptedStore, Store};
use crate::target::{BackupTarget, DirectoryTarget, PartialFile, PermissionState};

/// Settings key holding the RFC 3339 time of the last successful backup
pub const LAST_BACKUP_SETTING: &str = "last_backup_at";

/// Progress of an automatic backup, as reported to the status sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupStatus {
    /// A timer is armed
    Scheduled { delay: Duration },
    Started,
    Completed { path: PathBuf, photos: usize },
    /// No backup location has been granted
    NotConfigured,
    PermissionDenied { location: String },
    Failed { error: String },
}

impl BackupStatus {
    fn from_result(result: &VaultResult<BackupReport>) -> Self {
        match result {
            Ok(report) => BackupStatus::Completed {
                path: report.path.clone(),
                photos: report.photos,
            },
            Err(VaultError::BackupNotConfigured) => BackupStatus::NotConfigured,
            Err(VaultError::PermissionDenied(location)) => BackupStatus::PermissionDenied {
                location: location.clone(),
            },
            Err(e) => BackupStatus::Failed {
                error: e.to_string(),
            },
        }
    }
}

/// Receives every status change
pub type StatusSink = Arc<dyn Fn(&BackupStatus) + Send + Sync>;

/// Opens the target a handle points to
pub type TargetFactory = Arc<dyn Fn(&BackupHandleRecord) -> Box<dyn BackupTarget> + Send + Sync>;

/// A finished backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    pub path: PathBuf,
    pub photos: usize,
}

/// Timing and naming of automatic backups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Quiet period after the last change before a backup runs
    pub debounce: Duration,
    /// Minimum spacing between two backups
    pub min_interval: Duration,
    pub file_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&BackupSettings::default())
    }
}

impl From<&BackupSettings> for SchedulerConfig {
    fn from(settings: &BackupSettings) -> Self {
        Self {
            debounce: Duration::from_secs(settings.debounce_secs),
            min_interval: Duration::from_secs(settings.min_interval_secs),
            file_prefix: settings.file_prefix.clone(),
        }
    }
}

/// Delay before the next backup: the debounce floor, stretched so two
/// backups are never closer than `min_interval`
pub fn compute_delay(
    debounce: Duration,
    min_interval: Duration,
    since_last: Option<Duration>,
) -> Duration {
    match since_last {
        Some(elapsed) => debounce.max(min_interval.saturating_sub(elapsed)),
        None => debounce,
    }
}

/// Backup file name for a given day; same-day backups overwrite each other
pub fn backup_file_name(prefix: &str, day: chrono::NaiveDate) -> String {
    format!("{}-{}.zip", prefix, day.format("%Y-%m-%d"))
}

// ═══════════════════════════════════════════════════════════════════════════
// BACKUP SOURCE
// ═══════════════════════════════════════════════════════════════════════════

/// What the scheduler backs up and where it keeps its bookkeeping
pub trait BackupSource: Send + Sync {
    /// Granted location, if any
    fn handle(&self) -> Option<BackupHandleRecord>;

    /// Write a full archive to `writer`
    fn export_to(&self, writer: &mut PartialFile) -> VaultResult<ExportSummary>;

    fn last_backup(&self) -> VaultResult<Option<DateTime<Utc>>>;

    fn record_backup(&self, at: DateTime<Utc>) -> VaultResult<()>;
}

/// Backup source over an encrypted store and its handle slot
pub struct StoreBackupSource<S: Store> {
    store: Arc<EncryptedStore<S>>,
    handles: Arc<HandleStore>,
}

impl<S: Store> StoreBackupSource<S> {
    pub fn new(store: Arc<EncryptedStore<S>>, handles: Arc<HandleStore>) -> Self {
        Self { store, handles }
    }
}

impl<S: Store> BackupSource for StoreBackupSource<S> {
    fn handle(&self) -> Option<BackupHandleRecord> {
        self.handles.get()
    }

    fn export_to(&self, writer: &mut PartialFile) -> VaultResult<ExportSummary> {
        backup::export(&*self.store, writer, crate::no_progress)
    }

    fn last_backup(&self) -> VaultResult<Option<DateTime<Utc>>> {
        read_last_backup(self.store.raw())
    }

    fn record_backup(&self, at: DateTime<Utc>) -> VaultResult<()> {
        self.store.raw().set_setting(LAST_BACKUP_SETTING, &at.to_rfc3339())
    }
}

/// Last successful backup recorded in `store`'s settings
pub fn read_last_backup<S: Store>(store: &S) -> VaultResult<Option<DateTime<Utc>>> {
    match store.setting(LAST_BACKUP_SETTING)? {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|at| Some(at.with_timezone(&Utc)))
            .map_err(|e| VaultError::VaultCorrupted(format!("{}: {}", LAST_BACKUP_SETTING, e))),
        None => Ok(None),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SCHEDULER
// ═══════════════════════════════════════════════════════════════════════════

/// Observable scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Pending,
    Running,
}

enum State {
    Idle,
    Pending { generation: u64, timer: JoinHandle<()> },
    Running { rerun: bool },
}

struct Inner {
    config: SchedulerConfig,
    source: Arc<dyn BackupSource>,
    targets: TargetFactory,
    sink: Option<StatusSink>,
    state: Mutex<State>,
    generation: Mutex<u64>,
}

/// Debounced automatic backups.
///
/// Cheap to clone; clones drive the same state machine. Arming a timer needs
/// a tokio runtime.
#[derive(Clone)]
pub struct AutoBackupScheduler {
    inner: Arc<Inner>,
}

impl AutoBackupScheduler {
    /// Scheduler writing to plain directories
    pub fn new(
        config: SchedulerConfig,
        source: Arc<dyn BackupSource>,
        sink: Option<StatusSink>,
    ) -> Self {
        let targets: TargetFactory = Arc::new(|handle: &BackupHandleRecord| {
            Box::new(DirectoryTarget::new(&handle.location)) as Box<dyn BackupTarget>
        });
        Self::with_targets(config, source, targets, sink)
    }

    /// Scheduler with a custom way of opening backup targets
    pub fn with_targets(
        config: SchedulerConfig,
        source: Arc<dyn BackupSource>,
        targets: TargetFactory,
        sink: Option<StatusSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                source,
                targets,
                sink,
                state: Mutex::new(State::Idle),
                generation: Mutex::new(0),
            }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        match *self.inner.state.lock() {
            State::Idle => SchedulerState::Idle,
            State::Pending { .. } => SchedulerState::Pending,
            State::Running { .. } => SchedulerState::Running,
        }
    }

    /// Note a data change; a backup follows once changes settle
    pub fn schedule(&self) {
        self.inner.schedule();
    }

    /// Drop the pending timer, if any
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock();
        match std::mem::replace(&mut *state, State::Idle) {
            State::Pending { timer, .. } => {
                timer.abort();
                log::debug!("Pending backup cancelled");
            }
            State::Running { .. } => *state = State::Running { rerun: false },
            State::Idle => {}
        }
    }

    /// Back up immediately, replacing any pending timer
    pub fn run_now(&self) -> VaultResult<BackupReport> {
        {
            let mut state = self.inner.state.lock();
            match &*state {
                State::Running { .. } => return Err(VaultError::BackupInProgress),
                State::Pending { timer, .. } => timer.abort(),
                State::Idle => {}
            }
            *state = State::Running { rerun: false };
        }

        let result = self.inner.perform();
        self.inner.emit(&BackupStatus::from_result(&result));
        if self.inner.finish_run() {
            self.inner.schedule();
        }
        result
    }
}

impl Inner {
    fn schedule(self: &Arc<Self>) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                log::warn!("No async runtime, automatic backup not scheduled");
                return;
            }
        };

        let delay = self.next_delay();

        {
            let mut state = self.state.lock();
            match &mut *state {
                State::Running { rerun } => {
                    *rerun = true;
                    log::debug!("Backup running, another one will follow");
                    return;
                }
                State::Pending { timer, .. } => timer.abort(),
                State::Idle => {}
            }

            let generation = {
                let mut counter = self.generation.lock();
                *counter += 1;
                *counter
            };

            let inner = Arc::clone(self);
            let timer = runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                // Export, sealing and fsync all block
                if let Err(e) = tokio::task::spawn_blocking(move || inner.fire(generation)).await {
                    log::warn!("Backup task failed: {}", e);
                }
            });

            *state = State::Pending { generation, timer };
        }

        log::debug!("Backup scheduled in {:?}", delay);
        self.emit(&BackupStatus::Scheduled { delay });
    }

    fn next_delay(&self) -> Duration {
        let since_last = match self.source.last_backup() {
            Ok(last) => last.map(|at| (Utc::now() - at).to_std().unwrap_or(Duration::ZERO)),
            Err(e) => {
                log::warn!("Cannot read last backup time: {}", e);
                None
            }
        };

        compute_delay(self.config.debounce, self.config.min_interval, since_last)
    }

    fn fire(self: &Arc<Self>, generation: u64) {
        {
            let mut state = self.state.lock();
            match &*state {
                State::Pending { generation: current, .. } if *current == generation => {}
                // Superseded or cancelled after waking
                _ => return,
            }
            *state = State::Running { rerun: false };
        }

        let result = self.perform();
        self.emit(&BackupStatus::from_result(&result));

        if self.finish_run() {
            self.schedule();
        }
    }

    /// Back to idle; true if changes arrived while running
    fn finish_run(&self) -> bool {
        let mut state = self.state.lock();
        let rerun = matches!(*state, State::Running { rerun: true });
        *state = State::Idle;
        rerun
    }

    fn perform(&self) -> VaultResult<BackupReport> {
        let handle = self.source.handle().ok_or(VaultError::BackupNotConfigured)?;
        let target = (self.targets)(&handle);

        let permission = match target.query_permission() {
            PermissionState::Granted => PermissionState::Granted,
            _ => target.request_permission(),
        };
        if permission != PermissionState::Granted {
            return Err(VaultError::PermissionDenied(target.describe()));
        }

        self.emit(&BackupStatus::Started);

        let file_name = backup_file_name(&self.config.file_prefix, Local::now().date_naive());
        let mut writer = target.create(&file_name)?;
        let summary = self.source.export_to(&mut writer)?;
        let path = writer.commit()?;

        self.source.record_backup(Utc::now())?;

        log::info!("Backup written to {} ({} photos)", path.display(), summary.photos_exported);
        Ok(BackupReport {
            path,
            photos: summary.photos_exported,
        })
    }

    fn emit(&self, status: &BackupStatus) {
        match status {
            BackupStatus::PermissionDenied { location } => {
                log::warn!("Backup location not writable: {}", location)
            }
            BackupStatus::Failed { error } => log::warn!("Backup failed: {}", error),
            _ => {}
        }

        if let Some(sink) = &self.sink {
            sink(status);
        }
    }
}
