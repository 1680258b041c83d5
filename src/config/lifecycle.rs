//! Process lifecycle paths
//!
//! Every path the daemon touches outside its recording directory is derived
//! once at startup from a base directory and the daemon name, then
//! individually overridable. The result is immutable and passed down.

use std::path::{Path, PathBuf};

/// Default daemon name, used in derived file names and status lines
pub const DEFAULT_DAEMON_NAME: &str = "RpiCameraDaemon";

/// Default base directory for derived paths
pub const DEFAULT_BASE_DIR: &str = "/var";

/// Resolved lifecycle configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    pub name: String,
    pub verbose: bool,
    pub pid_file: PathBuf,
    pub working_directory: PathBuf,
    pub log_file: PathBuf,
    pub stdout_file: PathBuf,
    pub stderr_file: PathBuf,
    /// Stay attached to the launching terminal
    pub foreground: bool,
}

/// Optional per-path overrides, typically straight from the command line
#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub pid_file: Option<PathBuf>,
    pub working_directory: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub stdout_file: Option<PathBuf>,
    pub stderr_file: Option<PathBuf>,
}

impl LifecycleConfig {
    /// Derive all paths from `base_dir` and `name`, then apply overrides.
    ///
    /// Layout: `<base>/lib/<name>`, `<base>/run/<name>.pid`,
    /// `<base>/log/<name>.log`. Stdout and stderr share the log file unless
    /// overridden.
    pub fn resolve(name: &str, base_dir: &Path, overrides: PathOverrides) -> Self {
        let log_file = overrides
            .log_file
            .unwrap_or_else(|| base_dir.join("log").join(format!("{name}.log")));

        Self {
            name: name.to_string(),
            verbose: false,
            pid_file: overrides
                .pid_file
                .unwrap_or_else(|| base_dir.join("run").join(format!("{name}.pid"))),
            working_directory: overrides
                .working_directory
                .unwrap_or_else(|| base_dir.join("lib").join(name)),
            stdout_file: overrides.stdout_file.unwrap_or_else(|| log_file.clone()),
            stderr_file: overrides.stderr_file.unwrap_or_else(|| log_file.clone()),
            log_file,
            foreground: false,
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_foreground(mut self, foreground: bool) -> Self {
        self.foreground = foreground;
        self
    }

    /// Resolve every path against the current directory, which detaching
    /// changes.
    pub fn absolutize(mut self) -> std::io::Result<Self> {
        for path in [
            &mut self.pid_file,
            &mut self.working_directory,
            &mut self.log_file,
            &mut self.stdout_file,
            &mut self.stderr_file,
        ] {
            *path = std::path::absolute(&*path)?;
        }
        Ok(self)
    }

    /// Directories that must exist before the daemon detaches
    pub fn required_directories(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.working_directory.clone()];
        for file in [
            &self.pid_file,
            &self.stdout_file,
            &self.stderr_file,
            &self.log_file,
        ] {
            if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
                if !dirs.iter().any(|d| d == parent) {
                    dirs.push(parent.to_path_buf());
                }
            }
        }
        dirs
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self::resolve(
            DEFAULT_DAEMON_NAME,
            Path::new(DEFAULT_BASE_DIR),
            PathOverrides::default(),
        )
    }
}
