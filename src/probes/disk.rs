//! Disk usage probe

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sysinfo::Disks;

use super::{Probe, ProbeError, Reading};

/// Space figures for one mounted filesystem
#[derive(Debug, Clone, PartialEq)]
pub struct MountUsage {
    pub mount_point: PathBuf,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Reports usage of the filesystem holding `path`
#[derive(Debug, Clone)]
pub struct DiskUsageProbe {
    path: PathBuf,
}

impl DiskUsageProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Probe for DiskUsageProbe {
    fn describe(&self) -> String {
        format!("disk usage of {}", self.path.display())
    }

    async fn probe(&self) -> Result<Reading, ProbeError> {
        let path = self.path.clone();

        // sysinfo reads mount tables synchronously
        let mounts = tokio::task::spawn_blocking(list_mounts)
            .await
            .map_err(|e| ProbeError::Spawn {
                command: "disk enumeration".to_string(),
                message: e.to_string(),
            })?;

        let mount = select_mount(&mounts, &path)
            .ok_or_else(|| ProbeError::NoMount(path.display().to_string()))?;

        Ok(Reading::DiskUsage {
            mount: mount.mount_point.display().to_string(),
            used_bytes: mount.total_bytes.saturating_sub(mount.available_bytes),
            total_bytes: mount.total_bytes,
        })
    }
}

fn list_mounts() -> Vec<MountUsage> {
    let disks = Disks::new_with_refreshed_list();

    disks
        .list()
        .iter()
        .map(|disk| MountUsage {
            mount_point: disk.mount_point().to_path_buf(),
            total_bytes: disk.total_space(),
            available_bytes: disk.available_space(),
        })
        .collect()
}

/// Pick the most specific mount point that contains `path`
pub fn select_mount<'a>(mounts: &'a [MountUsage], path: &Path) -> Option<&'a MountUsage> {
    mounts
        .iter()
        .filter(|m| path.starts_with(&m.mount_point))
        .max_by_key(|m| m.mount_point.components().count())
}
