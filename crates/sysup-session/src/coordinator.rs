use std::path::PathBuf;

use anyhow::anyhow;
use sysup_lock::{with_exclusive, ExclusionLock};
use sysup_store::{SessionRecord, StateStore};
use tracing::{debug, info, warn};

use crate::cleanup::{CleanScope, Cleaner, CleanupReport};
use crate::machine::{plan, Action, Plan, SessionState};
use crate::packagelist::{local_size, prune_datadir, read_package_list, write_package_list};
use crate::summary::summarize;
use crate::validate::validate_request;
use crate::{
    BootPreparer, CollaboratorError, CommandReplay, DownloadRequest, InterruptFlag, OsRelease,
    PackageManager, Reporter, SessionError, SetupOptions, UpgradeLayout,
};

/// Everything the coordinator delegates to.
pub struct Collaborators<'a> {
    pub locks: &'a dyn ExclusionLock,
    pub packages: &'a mut dyn PackageManager,
    pub boot: &'a mut dyn BootPreparer,
    pub reporter: &'a dyn Reporter,
    pub replay: &'a dyn CommandReplay,
    pub interrupt: InterruptFlag,
}

/// Runs operator actions against the session: take the lock, re-read the
/// state file, check the action against the state machine, do the work.
pub struct Coordinator<'a> {
    layout: UpgradeLayout,
    store: StateStore,
    deps: Collaborators<'a>,
    upgrading: bool,
}

impl<'a> Coordinator<'a> {
    pub fn new(layout: UpgradeLayout, deps: Collaborators<'a>) -> Self {
        let store = StateStore::open(layout.state_path());
        Self {
            layout,
            store,
            deps,
            upgrading: false,
        }
    }

    pub fn state(&mut self) -> Result<SessionState, SessionError> {
        if self.upgrading {
            return Ok(SessionState::Upgrading);
        }
        self.store.reload();
        Ok(SessionState::of(&self.store.record()?))
    }

    /// Status text for the last committed snapshot. Takes no lock.
    pub fn status(&mut self) -> Result<String, SessionError> {
        let state = self.state()?;
        let record = self.store.record()?;
        let local = record.datadir.as_deref().and_then(local_size);
        Ok(summarize(state, &record, local))
    }

    pub fn run(&mut self, action: Action) -> Result<(), SessionError> {
        if matches!(action, Action::Status) {
            return Ok(());
        }

        let locks = self.deps.locks;
        let lock_path = self.layout.lock_path();
        with_exclusive(locks, &lock_path, |held| {
            debug!(pid = held.holder_pid(), path = %held.path().display(), "holding session lock");
            self.store.reload();
            let record = self.store.record()?;
            let accepted = plan(&record, action)?;
            info!(state = %SessionState::of(&record), plan = ?accepted, "doing action");
            self.execute(accepted, &record)
        })
    }

    fn execute(&mut self, accepted: Plan, record: &SessionRecord) -> Result<(), SessionError> {
        match accepted {
            Plan::Status => Ok(()),
            Plan::NewDownload { request, argv } => {
                let system = OsRelease::read(&self.layout.os_release_path()).map_err(|err| {
                    SessionError::usage(format!("can't determine system version: {err:#}"))
                })?;
                validate_request(&request, &self.layout, &system)?;
                self.download(&request, Some((system, argv)))
            }
            Plan::ResumeDownload => {
                let argv = stored_cmdline(record)?;
                info!(?argv, "resuming with stored command line");
                let request = self.deps.replay.parse_download(&argv)?;
                self.download(&request, None)
            }
            Plan::Cancel { keep_data } => self.cancel(keep_data),
            Plan::Reboot => self.reboot(record),
            Plan::Clean(scope) => self.clean(scope).map(|_| ()),
            Plan::SystemUpgrade { testing, reboot } => self.system_upgrade(record, testing, reboot),
        }
    }

    fn download(
        &mut self,
        request: &DownloadRequest,
        new_session: Option<(OsRelease, Vec<String>)>,
    ) -> Result<(), SessionError> {
        let interrupt = self.deps.interrupt.clone();
        let datadir = request.effective_datadir(&self.layout);

        self.store.update(|record| {
            record.upgrade_ready = false;
            record.datadir = Some(datadir.clone());
            if let Some((system, argv)) = &new_session {
                record.current_system = Some(system.system());
                record.upgrade_target = Some(system.target(&request.releasever));
                record.releasever = Some(request.releasever.clone());
                record.cmdline = Some(argv.clone());
            }
            Ok::<_, SessionError>(())
        })?;

        interrupt.check()?;
        let options = SetupOptions {
            releasever: &request.releasever,
            datadir: &datadir,
            nogpgcheck: request.nogpgcheck,
            cache_only: false,
        };
        let cachedir = self
            .deps
            .packages
            .setup(&options)
            .map_err(|err| interrupted_or(&interrupt, err))?;
        self.store.update(|record| {
            record.cachedir = Some(cachedir);
            Ok::<_, SessionError>(())
        })?;

        interrupt.check()?;
        self.message("setting up package repos...");
        let repos = self
            .deps
            .packages
            .refresh_metadata()
            .map_err(|err| interrupted_or(&interrupt, err))?;
        self.store.update(|record| {
            record.enabled_repos = repos.into_iter().collect();
            Ok::<_, SessionError>(())
        })?;

        interrupt.check()?;
        self.message("looking for upgrades...");
        let packages = self
            .deps
            .packages
            .resolve(request.sync_mode(), &request.add_install)
            .map_err(|err| interrupted_or(&interrupt, err))?;
        let paths: Vec<PathBuf> = packages
            .iter()
            .map(|package| package.local_path.clone())
            .collect();
        self.store.update(|record| {
            record.pkgs_total = Some(packages.len() as u64);
            record.size_total = Some(packages.iter().map(|package| package.size_bytes).sum());
            write_package_list(&datadir, &paths)?;
            prune_datadir(&datadir)?;
            Ok::<_, SessionError>(())
        })?;

        interrupt.check()?;
        self.message("starting download...");
        self.deps
            .packages
            .download(&packages, self.deps.reporter)
            .map_err(|err| interrupted_or(&interrupt, err))?;

        interrupt.check()?;
        self.message("testing upgrade transaction...");
        self.deps
            .packages
            .test_transaction(self.deps.reporter)
            .map_err(|err| interrupted_or(&interrupt, err))?;

        self.store.update(|record| {
            record.upgrade_ready = true;
            Ok::<_, SessionError>(())
        })?;
        info!(packages = packages.len(), "download complete; ready for upgrade");
        Ok(())
    }

    fn cancel(&mut self, keep_data: bool) -> Result<(), SessionError> {
        info!(keep_data, "cancelling upgrade");
        let scope = if keep_data {
            CleanScope::Misc
        } else {
            CleanScope::All
        };
        self.clean(scope)?;
        self.store.transact(|store| {
            store.reset();
            Ok::<_, SessionError>(())
        })
    }

    fn clean(&mut self, scope: CleanScope) -> Result<CleanupReport, SessionError> {
        match scope {
            CleanScope::Packages | CleanScope::All => {
                self.message("Removing downloaded packages...")
            }
            CleanScope::Metadata => self.message("Removing metadata..."),
            CleanScope::Misc => {}
        }
        let report = Cleaner::new(&self.layout).clean(&mut self.store, scope)?;
        for warning in report.warnings() {
            self.deps.reporter.message(&warning);
        }
        Ok(report)
    }

    fn reboot(&mut self, record: &SessionRecord) -> Result<(), SessionError> {
        let datadir = record
            .datadir
            .clone()
            .unwrap_or_else(|| self.layout.default_datadir());
        let packages = read_package_list(&datadir)?;
        self.deps.boot.prepare(&packages, &datadir)?;
        self.deps.boot.reboot()?;
        Ok(())
    }

    fn system_upgrade(
        &mut self,
        record: &SessionRecord,
        testing: bool,
        reboot: bool,
    ) -> Result<(), SessionError> {
        self.upgrading = true;
        let result = self.apply_upgrade(record, testing);
        self.upgrading = false;

        match &result {
            Ok(()) if testing => self.message("Upgrade test finished."),
            Ok(()) => self.message("Upgrade finished!"),
            Err(err) => self.message(&format!("Upgrade failed: {err}")),
        }

        if reboot {
            if let Err(err) = self.deps.boot.reboot() {
                warn!(error = %format!("{err:#}"), "reboot after upgrade failed");
                if result.is_ok() {
                    return Err(SessionError::Fatal(err));
                }
            }
        }
        result
    }

    fn apply_upgrade(&mut self, record: &SessionRecord, testing: bool) -> Result<(), SessionError> {
        // The marker must go first or a failed upgrade would boot into itself
        // again.
        self.clean(CleanScope::Misc)?;

        let target = record.upgrade_target.as_deref().unwrap_or("<unknown>");
        self.message(&format!(
            "Starting upgrade to {target}; this could take a while."
        ));

        let argv = stored_cmdline(record)?;
        let request = self.deps.replay.parse_download(&argv)?;
        let datadir = record
            .datadir
            .clone()
            .unwrap_or_else(|| request.effective_datadir(&self.layout));
        let interrupt = self.deps.interrupt.clone();

        let options = SetupOptions {
            releasever: &request.releasever,
            datadir: &datadir,
            nogpgcheck: request.nogpgcheck,
            cache_only: true,
        };
        self.deps
            .packages
            .setup(&options)
            .map_err(|err| interrupted_or(&interrupt, err))?;
        self.deps
            .packages
            .refresh_metadata()
            .map_err(|err| interrupted_or(&interrupt, err))?;
        self.deps
            .packages
            .resolve(request.sync_mode(), &request.add_install)
            .map_err(|err| interrupted_or(&interrupt, err))?;

        let reporter = self.deps.reporter;
        let transaction = if testing {
            self.deps.packages.test_transaction(reporter)
        } else {
            self.deps.packages.run_transaction(reporter)
        };
        transaction.map_err(|err| interrupted_or(&interrupt, err))?;

        if !testing {
            self.clean(CleanScope::All)?;
            self.store.transact(|store| {
                store.reset();
                Ok::<_, SessionError>(())
            })?;
        }
        Ok(())
    }

    fn message(&self, text: &str) {
        info!("message: {text}");
        self.deps.reporter.message(text);
    }
}

fn stored_cmdline(record: &SessionRecord) -> Result<Vec<String>, SessionError> {
    record
        .cmdline
        .clone()
        .ok_or_else(|| SessionError::Fatal(anyhow!("session has no stored command line")))
}

/// Collaborator failures caused by an interrupt are reported as such.
fn interrupted_or(interrupt: &InterruptFlag, err: CollaboratorError) -> SessionError {
    if interrupt.is_raised() {
        SessionError::Interrupted
    } else {
        SessionError::Collaborator(err)
    }
}
