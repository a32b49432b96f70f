// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;

use crate::backend::{BackendClassifier, SysfsBackendClassifier};
use crate::command::{CommandRunner, SystemCommandRunner};
use crate::config::LuksConfig;
use crate::device::{DeviceLookup, SysfsDeviceLookup};
use crate::sysfs::{Sysfs, SysfsSource};

/// Host collaborators shared by every container
#[derive(Clone)]
pub struct SysContext {
    pub config: Arc<LuksConfig>,
    pub runner: Arc<dyn CommandRunner>,
    pub sysfs: Arc<dyn SysfsSource>,
    pub devices: Arc<dyn DeviceLookup>,
    pub backends: Arc<dyn BackendClassifier>,
}

impl SysContext {
    /// Context talking to the real host
    pub fn system(config: LuksConfig) -> Self {
        let sysfs: Arc<dyn SysfsSource> = Arc::new(Sysfs::new(config.sysfs_root.clone()));
        Self::with_runner(config, Arc::new(SystemCommandRunner), sysfs)
    }

    /// Host device lookup and classification over `sysfs`, commands through
    /// `runner`
    pub fn with_runner(
        config: LuksConfig,
        runner: Arc<dyn CommandRunner>,
        sysfs: Arc<dyn SysfsSource>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            runner,
            devices: Arc::new(SysfsDeviceLookup::new(sysfs.clone())),
            backends: Arc::new(SysfsBackendClassifier::new(sysfs.clone())),
            sysfs,
        }
    }
}

impl std::fmt::Debug for SysContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
