// Copyright (c) Contributors to the ofs project.
// SPDX-License-Identifier: Apache-2.0

//! The orchestrator: owns the mapping store, runs mount plans and
//! guarantees their reversal.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use lazy_static::lazy_static;

use crate::cleanup::{rollback, Journal};
use crate::exec::{HelperRunner, SystemRunner};
use crate::mappings::{Mappings, Profile};
use crate::monitor;
use crate::mount::{materialize_links, mount_entries};
use crate::plan::{MountPlan, MountPlanEntry};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./manager_test.rs"]
mod manager_test;

/// Default bound on a single helper invocation.
pub const DEFAULT_HELPER_TIMEOUT: Duration = Duration::from_secs(10);

lazy_static! {
    static ref GLOBAL: Arc<Manager> = Arc::new(Manager::new());
}

/// The process-wide manager, for consumers that want the one-instance
/// model. Embedders and tests should prefer constructing their own
/// [`Manager`] to keep state isolated.
pub fn global() -> Arc<Manager> {
    Arc::clone(&GLOBAL)
}

#[derive(Debug)]
struct MountState {
    mounted: bool,
    entries: Vec<MountPlanEntry>,
    timeout: Duration,
    debug: bool,
}

#[derive(Debug, Default)]
struct DataState {
    mappings: Mappings,
    journal: Journal,
}

/// Composes the registered sources into their destinations and tracks
/// every side effect so that [`Manager::umount`] can undo them all.
///
/// All methods are safe to call from multiple threads. Configuration is
/// only accepted while unmounted.
pub struct Manager {
    // lock order: `mount` strictly before `data`, at every site
    mount: Mutex<MountState>,
    data: Mutex<DataState>,
    children: Mutex<Vec<u32>>,
    runner: Box<dyn HelperRunner>,
}

// a poisoned lock only means a panic on another thread; the guarded
// data is still needed to reverse whatever that thread had created
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager {
    pub fn new() -> Self {
        Self::with_runner(Box::new(SystemRunner))
    }

    /// Create a manager that invokes external helpers through `runner`
    /// instead of spawning real processes.
    pub fn with_runner(runner: Box<dyn HelperRunner>) -> Self {
        Manager {
            mount: Mutex::new(MountState {
                mounted: false,
                entries: Vec::new(),
                timeout: DEFAULT_HELPER_TIMEOUT,
                // the helper's debug output goes to our log anyway, so
                // it is on unless a consumer turns it off
                debug: true,
            }),
            data: Mutex::new(DataState::default()),
            children: Mutex::new(Vec::new()),
            runner,
        }
    }

    /// Pass `--debug` to the overlay helper on future mounts.
    pub fn set_debug_mode(&self, enabled: bool) {
        lock(&self.mount).debug = enabled;
    }

    /// Bound each helper invocation to the given duration.
    pub fn set_helper_timeout(&self, timeout: Duration) {
        lock(&self.mount).timeout = timeout;
    }

    pub fn set_upper_dir<P: Into<PathBuf>>(&self, directory: P, create: bool) -> Result<()> {
        self.with_unmounted_store(|mappings| mappings.set_upper_dir(directory.into(), create))
    }

    pub fn set_work_dir<P: Into<PathBuf>>(&self, directory: P, create: bool) -> Result<()> {
        self.with_unmounted_store(|mappings| mappings.set_work_dir(directory.into(), create))
    }

    pub fn add_directory<P: Into<PathBuf>>(&self, source: P, destination: P) -> Result<()> {
        self.with_unmounted_store(|mappings| {
            mappings.add_directory(source.into(), destination.into())
        })
    }

    pub fn add_file<P: Into<PathBuf>>(&self, source: P, destination: P) -> Result<()> {
        self.with_unmounted_store(|mappings| mappings.add_file(source.into(), destination.into()))
    }

    pub fn add_skip_file_suffix<S: Into<String>>(&self, suffix: S) -> Result<()> {
        self.with_unmounted_store(|mappings| {
            mappings.add_skip_file_suffix(suffix.into());
            Ok(())
        })
    }

    pub fn add_skip_directory<S: Into<String>>(&self, name: S) -> Result<()> {
        self.with_unmounted_store(|mappings| {
            mappings.add_skip_directory(name.into());
            Ok(())
        })
    }

    pub fn force_load_library<S: Into<String>, P: Into<PathBuf>>(
        &self,
        process: S,
        library: P,
    ) -> Result<()> {
        self.with_unmounted_store(|mappings| {
            mappings.force_load_library(process.into(), library.into());
            Ok(())
        })
    }

    pub fn clear_skip_file_suffixes(&self) -> Result<()> {
        self.with_unmounted_store(|mappings| {
            mappings.clear_skip_file_suffixes();
            Ok(())
        })
    }

    pub fn clear_skip_directories(&self) -> Result<()> {
        self.with_unmounted_store(|mappings| {
            mappings.clear_skip_directories();
            Ok(())
        })
    }

    pub fn clear_library_force_loads(&self) -> Result<()> {
        self.with_unmounted_store(|mappings| {
            mappings.clear_library_force_loads();
            Ok(())
        })
    }

    /// Drop all directory and file mappings, keeping the blacklists and
    /// forced libraries.
    pub fn clear_mappings(&self) -> Result<()> {
        self.with_unmounted_store(|mappings| {
            mappings.clear_mappings();
            Ok(())
        })
    }

    /// Register everything from a stored profile, in its order.
    pub fn apply_profile(&self, profile: &Profile) -> Result<()> {
        if let Some(upper) = &profile.upper_dir {
            self.set_upper_dir(upper.clone(), true)?;
        }
        for suffix in profile.skip_file_suffixes.iter() {
            self.add_skip_file_suffix(suffix.clone())?;
        }
        for name in profile.skip_directories.iter() {
            self.add_skip_directory(name.clone())?;
        }
        for mapping in profile.directories.iter() {
            self.add_directory(mapping.source.clone(), mapping.destination.clone())?;
        }
        for mapping in profile.files.iter() {
            self.add_file(mapping.source.clone(), mapping.destination.clone())?;
        }
        Ok(())
    }

    /// True once a mount attempt has fully committed.
    pub fn is_mounted(&self) -> bool {
        lock(&self.mount).mounted
    }

    /// Plan and execute all mounts. Already mounted is a no-op success.
    ///
    /// On any failure every side effect of the attempt is reversed
    /// before this returns, so a failed mount never leaves the manager
    /// partially mounted.
    pub fn mount(&self) -> Result<()> {
        let mut mount = lock(&self.mount);
        let mut data = lock(&self.data);
        self.mount_locked(&mut mount, &mut data)
    }

    /// Reverse the current mount. Not being mounted is a no-op success.
    pub fn umount(&self) -> Result<()> {
        let mut mount = lock(&self.mount);
        let mut data = lock(&self.data);
        self.umount_locked(&mut mount, &mut data)
    }

    /// Plan the mounts and report them to the log without touching disk.
    pub fn dryrun(&self) -> Result<()> {
        let _mount = lock(&self.mount);
        let data = lock(&self.data);
        let plan = MountPlan::build(&data.mappings)?;
        tracing::info!("would mount:");
        if plan.entries.is_empty() && plan.links.is_empty() {
            tracing::info!("nothing");
            return Ok(());
        }
        for entry in plan.entries.iter() {
            for lower in entry.lower_dirs.iter() {
                tracing::info!(" . {} -> {}", lower.display(), entry.target.display());
            }
            if let Some(upper) = &entry.upper_dir {
                tracing::info!(" . upper dir {}", upper.display());
            }
            if !entry.whiteouts.is_empty() {
                tracing::info!("ignored files/directories:");
                for whiteout in entry.whiteouts.iter() {
                    tracing::info!("   . {}", whiteout.display());
                }
            }
        }
        for link in plan.links.iter() {
            tracing::info!(" . {} -> {}", link.source.display(), link.destination.display());
        }
        tracing::debug!("full plan: {}", serde_json::to_string_pretty(&plan)?);
        Ok(())
    }

    /// Enumerate every path visible through the composed view.
    ///
    /// Mounts transiently when not already mounted, and unwinds the
    /// transient mount before returning.
    pub fn create_dump(&self) -> Result<Vec<PathBuf>> {
        let mut mount = lock(&self.mount);
        let mut data = lock(&self.data);
        tracing::debug!("creating overlay dump");
        let was_mounted = mount.mounted;
        self.mount_locked(&mut mount, &mut data)?;

        let mut result = Vec::new();
        for entry in mount.entries.iter() {
            for found in walkdir::WalkDir::new(&entry.target) {
                match found {
                    Ok(found) => result.push(found.path().to_owned()),
                    Err(err) => {
                        tracing::warn!("dump could not read below {:?}: {err}", entry.target)
                    }
                }
            }
        }
        result.extend(data.journal.created_symlinks.iter().cloned());

        if !was_mounted {
            if let Err(err) = self.umount_locked(&mut mount, &mut data) {
                tracing::warn!("could not unwind transient mount: {err}");
            }
        }
        Ok(result)
    }

    /// Launch a program under the composed view, mounting first if
    /// needed. The view is unmounted again once the last supervised
    /// process exits.
    ///
    /// Takes the manager by `Arc` so the supervision thread can reach
    /// it after this call returns.
    pub fn create_process<I, S>(manager: &Arc<Manager>, program: &str, args: I) -> Result<u32>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut mount = lock(&manager.mount);
        let mut data = lock(&manager.data);
        tracing::debug!("creating process {program:?}");
        if !mount.mounted {
            if let Err(err) = manager.mount_locked(&mut mount, &mut data) {
                tracing::error!("not starting process because mount failed");
                return Err(err);
            }
        }

        let mut cmd = std::process::Command::new(program);
        cmd.args(args.into_iter().map(Into::into));
        if let Some(preload) = monitor::preload_for(&data.mappings.forced_libraries, program) {
            tracing::debug!("forcing libraries via LD_PRELOAD: {preload:?}");
            cmd.env("LD_PRELOAD", preload);
        }
        let child = cmd
            .spawn()
            .map_err(|err| Error::process_spawn_error(program, err))?;
        let pid = child.id();
        lock(&manager.children).push(pid);
        tracing::debug!("created process with pid {pid}");

        drop(data);
        drop(mount);
        monitor::watch_child(Arc::downgrade(manager), child);
        Ok(pid)
    }

    /// The pids of all currently supervised processes.
    pub fn process_list(&self) -> Vec<u32> {
        lock(&self.children).clone()
    }

    pub(crate) fn forget_process(&self, pid: u32) -> usize {
        let mut children = lock(&self.children);
        children.retain(|p| *p != pid);
        children.len()
    }

    fn with_unmounted_store<T>(&self, op: impl FnOnce(&mut Mappings) -> Result<T>) -> Result<T> {
        let mount = lock(&self.mount);
        if mount.mounted {
            tracing::error!("cannot change configuration while mounted");
            return Err(Error::InvalidConfiguration(
                "cannot change configuration while mounted".into(),
            ));
        }
        let mut data = lock(&self.data);
        op(&mut data.mappings)
    }

    fn mount_locked(&self, mount: &mut MountState, data: &mut DataState) -> Result<()> {
        tracing::debug!("mounting");
        if mount.mounted {
            tracing::debug!("already mounted");
            return Ok(());
        }
        let plan = MountPlan::build(&data.mappings)?;
        mount.entries = plan.entries;

        let result = (|| {
            materialize_links(&plan.links, &mut data.journal)?;
            mount_entries(
                &mut mount.entries,
                &mut data.journal,
                self.runner.as_ref(),
                mount.timeout,
                mount.debug,
            )
        })();
        match result {
            Ok(()) => {
                mount.mounted = true;
                tracing::debug!(
                    "mounted {} target(s), {} file link(s)",
                    mount.entries.len(),
                    plan.links.len()
                );
                Ok(())
            }
            Err(err) => {
                tracing::error!("mount failed, rolling back: {err}");
                self.cleanup_locked(mount, data);
                Err(err)
            }
        }
    }

    fn umount_locked(&self, mount: &mut MountState, data: &mut DataState) -> Result<()> {
        tracing::debug!("unmounting");
        if !mount.mounted {
            tracing::debug!("not mounted");
            return Ok(());
        }
        let failures = self.cleanup_locked(mount, data);
        if failures == 0 {
            Ok(())
        } else {
            Err(Error::String(format!(
                "cleanup completed with {failures} error(s), see the log"
            )))
        }
    }

    fn cleanup_locked(&self, mount: &mut MountState, data: &mut DataState) -> usize {
        let failures = rollback(
            &mut mount.entries,
            &mut data.journal,
            self.runner.as_ref(),
            mount.timeout,
        );
        mount.entries.clear();
        mount.mounted = false;
        failures
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        // no locking here so the destructor can never deadlock with a
        // caller; &mut self already guarantees exclusive access
        let mount = match self.mount.get_mut() {
            Ok(mount) => mount,
            Err(poisoned) => poisoned.into_inner(),
        };
        let data = match self.data.get_mut() {
            Ok(data) => data,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !mount.mounted && data.journal.is_empty() {
            return;
        }
        tracing::debug!("cleaning up on drop");
        let failures = rollback(
            &mut mount.entries,
            &mut data.journal,
            self.runner.as_ref(),
            mount.timeout,
        );
        mount.entries.clear();
        mount.mounted = false;
        if failures > 0 {
            tracing::error!("cleanup on drop reported {failures} error(s)");
        }
    }
}
