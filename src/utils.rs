//! Utility functions for directory management
//!
//! Directories follow the XDG Base Directory specification:
//!
//! - Config: `~/.config/iptkeeper/` - `config.json`
//! - Data: `~/.local/share/iptkeeper/` - the SQLite database
//! - State: `~/.local/state/iptkeeper/` - the daemon log
//!
//! # Example
//!
//! ```
//! use iptkeeper::utils::{get_data_dir, ensure_dirs};
//!
//! ensure_dirs().expect("Failed to create directories");
//!
//! if let Some(data_path) = get_data_dir() {
//!     let _db = data_path.join("iptkeeper.db");
//! }
//! ```

use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "iptkeeper", "iptkeeper")
}

pub fn get_config_dir() -> Option<PathBuf> {
    project_dirs().map(|pd| pd.config_dir().to_path_buf())
}

pub fn get_data_dir() -> Option<PathBuf> {
    project_dirs().map(|pd| pd.data_dir().to_path_buf())
}

pub fn get_state_dir() -> Option<PathBuf> {
    project_dirs().and_then(|pd| pd.state_dir().map(std::path::Path::to_path_buf))
}

pub fn ensure_dirs() -> std::io::Result<()> {
    let dirs = [get_config_dir(), get_data_dir(), get_state_dir()];

    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;

        let mut builder = DirBuilder::new();
        builder.mode(0o700); // User read/write/execute only
        builder.recursive(true);

        for dir in dirs.into_iter().flatten() {
            builder.create(dir)?;
        }
    }

    #[cfg(not(unix))]
    {
        for dir in dirs.into_iter().flatten() {
            std::fs::create_dir_all(dir)?;
        }
    }

    Ok(())
}

/// Truncates a string to a maximum length and adds an ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        // Find the nearest character boundary to avoid splitting multi-byte characters
        let end = s
            .char_indices()
            .map(|(idx, _)| idx)
            .take_while(|&idx| idx <= max_len.saturating_sub(3))
            .last()
            .unwrap_or(0);
        format!("{}...", &s[..end])
    }
}
