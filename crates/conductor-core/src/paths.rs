use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Name of the agent executable searched for on disk.
pub const AGENT_BINARY: &str = "claude";

/// Return the user's home directory path.
///
/// Uses HOME on Unix-like systems and USERPROFILE on Windows.
pub fn get_home_dir() -> Result<String, String> {
    if let Ok(home) = env::var("HOME") {
        if !home.is_empty() {
            return Ok(home);
        }
    }

    if let Ok(profile) = env::var("USERPROFILE") {
        if !profile.is_empty() {
            return Ok(profile);
        }
    }

    Err("Home directory not set".to_string())
}

/// Config directory: `$XDG_CONFIG_HOME/conductor` or `~/.config/conductor`.
pub fn config_dir() -> Result<PathBuf, String> {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return Ok(PathBuf::from(xdg).join("conductor"));
        }
    }
    Ok(PathBuf::from(get_home_dir()?).join(".config").join("conductor"))
}

/// Data directory: `$XDG_DATA_HOME/conductor` or `~/.local/share/conductor`.
pub fn data_dir() -> Result<PathBuf, String> {
    if let Ok(xdg) = env::var("XDG_DATA_HOME") {
        if !xdg.is_empty() {
            return Ok(PathBuf::from(xdg).join("conductor"));
        }
    }
    Ok(PathBuf::from(get_home_dir()?)
        .join(".local")
        .join("share")
        .join("conductor"))
}

/// Install locations checked after the explicit override, in order.
fn well_known_locations(home: Option<&Path>) -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Some(home) = home {
        locations.push(home.join(".claude/local").join(AGENT_BINARY));
        locations.push(home.join(".local/bin").join(AGENT_BINARY));
        locations.push(home.join(".npm-global/bin").join(AGENT_BINARY));
        locations.push(home.join(".bun/bin").join(AGENT_BINARY));
    }
    locations.push(PathBuf::from("/opt/homebrew/bin").join(AGENT_BINARY));
    locations.push(PathBuf::from("/usr/local/bin").join(AGENT_BINARY));
    locations
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Where to look for the agent binary when no explicit override is usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSearch {
    /// Candidate files, checked in order.
    pub locations: Vec<PathBuf>,
    /// A `PATH`-style list of directories, checked last.
    pub path_var: Option<OsString>,
}

impl AgentSearch {
    /// Well-known install locations under the user's home, then `$PATH`.
    pub fn from_env() -> Self {
        let home = get_home_dir().ok().map(PathBuf::from);
        Self {
            locations: well_known_locations(home.as_deref()),
            path_var: env::var_os("PATH"),
        }
    }

    /// Look nowhere but the override.
    pub fn override_only() -> Self {
        Self {
            locations: Vec::new(),
            path_var: None,
        }
    }

    /// Locate the agent binary.
    ///
    /// Precedence: `override_path`, then [`Self::locations`], then
    /// [`Self::path_var`]. On failure returns the places searched, for the
    /// error message.
    pub fn resolve(&self, override_path: Option<&Path>) -> Result<PathBuf, String> {
        let mut searched = Vec::new();

        if let Some(path) = override_path {
            if is_executable(path) {
                return Ok(path.to_path_buf());
            }
            searched.push(path.display().to_string());
        }

        for candidate in &self.locations {
            if is_executable(candidate) {
                return Ok(candidate.clone());
            }
            searched.push(candidate.display().to_string());
        }

        if let Some(path_var) = &self.path_var {
            if let Some(found) = env::split_paths(path_var)
                .map(|dir| dir.join(AGENT_BINARY))
                .find(|candidate| is_executable(candidate))
            {
                return Ok(found);
            }
            searched.push("$PATH".to_string());
        }

        Err(searched.join(", "))
    }
}

impl Default for AgentSearch {
    fn default() -> Self {
        Self::from_env()
    }
}
