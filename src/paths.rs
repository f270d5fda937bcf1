use std::{
    env, fs,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::error::Result;

/// Where reports live: the primary store and the public downloads mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub primary: PathBuf,
    pub secondary: PathBuf,
}

impl ReportPaths {
    /// `root/data/excel` and `root/public/downloads`, created with their parents.
    pub fn resolve(root: &Path) -> Result<Self> {
        let primary = root.join("data").join("excel");
        let secondary = root.join("public").join("downloads");
        fs::create_dir_all(&primary)?;
        fs::create_dir_all(&secondary)?;
        debug!(primary = %primary.display(), secondary = %secondary.display(), "report directories ready");
        Ok(Self { primary, secondary })
    }
}

/// Two levels above the running executable (`<root>/<bin-dir>/<exe>`),
/// or the current directory when there is no such ancestor.
pub fn default_root() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent()?.parent().map(Path::to_path_buf))
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from("."))
}
