//! Privilege elevation for iptables invocations
//!
//! Listing and modifying rules requires `CAP_NET_ADMIN`. When iptkeeper runs as
//! root the tool is executed directly; otherwise the invocation is wrapped in
//! an elevation helper.
//!
//! # Elevation Strategy
//!
//! - **Preferred**: `run0` when available (systemd v256+, no SUID)
//! - **Terminal fallback**: `sudo`
//! - **Non-interactive fallback**: `pkexec`
//!
//! # Environment Variables
//!
//! - `IPTKEEPER_ELEVATION_METHOD`: Force a specific method (`sudo`, `run0`, or `pkexec`).
//!   Useful with sudoers NOPASSWD rules for the daemon.
//! - `IPTKEEPER_TEST_NO_ELEVATION`: Bypass elevation entirely (for testing only).
//! - `IPTKEEPER_IPTABLES`: Override the iptables binary (absolute path or name).
//!
//! # Security
//!
//! - Only the iptables binary can be elevated
//! - Arguments are passed as an argv vector, never through a shell
//! - Callers validate every argument before reaching this module

use std::io;
use tokio::process::Command;

/// Error type for privilege elevation operations
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// pkexec binary not found in PATH
    #[error("pkexec not found - please install PolicyKit or run as root")]
    PkexecNotFound,

    /// Requested elevation method is not available (binary not found)
    #[error("Elevation method '{0}' is not available (binary not found)")]
    MethodNotAvailable(String),

    /// Invalid value for `IPTKEEPER_ELEVATION_METHOD`
    #[error("Invalid IPTKEEPER_ELEVATION_METHOD '{0}'. Valid options: sudo, run0, pkexec")]
    InvalidMethod(String),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Checks if a binary exists in PATH
fn binary_exists(name: &str) -> bool {
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if full_path.is_file() {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}

fn wrapped(helper: &str, program: &str, args: &[&str]) -> Command {
    let mut cmd = Command::new(helper);
    cmd.arg(program).args(args);
    cmd
}

fn direct(program: &str, args: &[&str]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd
}

fn build_elevated_command(program: &str, args: &[&str]) -> Result<Command, ElevationError> {
    use std::os::fd::AsFd;

    // 1. Strict test mode override
    if std::env::var("IPTKEEPER_TEST_NO_ELEVATION").is_ok() {
        return Ok(direct(program, args));
    }

    // 2. Already root
    if nix::unistd::getuid().is_root() {
        return Ok(direct(program, args));
    }

    // 3. Explicit method override
    if let Ok(method) = std::env::var("IPTKEEPER_ELEVATION_METHOD") {
        let method = method.to_lowercase();
        if !method.is_empty() {
            return match method.as_str() {
                "sudo" | "run0" | "pkexec" => {
                    if binary_exists(&method) {
                        Ok(wrapped(&method, program, args))
                    } else {
                        Err(ElevationError::MethodNotAvailable(method))
                    }
                }
                _ => Err(ElevationError::InvalidMethod(method)),
            };
        }
    }

    // 4. Automatic detection
    if binary_exists("run0") {
        return Ok(wrapped("run0", program, args));
    }

    let is_atty = nix::unistd::isatty(std::io::stdin().as_fd()).unwrap_or(false);
    if is_atty {
        Ok(wrapped("sudo", program, args))
    } else {
        if !binary_exists("pkexec") {
            return Err(ElevationError::PkexecNotFound);
        }
        Ok(wrapped("pkexec", program, args))
    }
}

/// Creates an elevated iptables command with the specified arguments
///
/// `binary` is the configured iptables program; `IPTKEEPER_IPTABLES` takes
/// precedence when set.
///
/// # Example
///
/// ```no_run
/// use iptkeeper::elevation::create_elevated_iptables_command;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut cmd = create_elevated_iptables_command("iptables", &["-t", "filter", "-L", "-n"])?;
/// let output = cmd.output().await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns `Err` if the forced or fallback elevation helper is unavailable.
pub fn create_elevated_iptables_command(
    binary: &str,
    args: &[&str],
) -> Result<Command, ElevationError> {
    let program = std::env::var("IPTKEEPER_IPTABLES").unwrap_or_else(|_| binary.to_string());
    build_elevated_command(&program, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::ENV_VAR_MUTEX;

    #[test]
    fn test_binary_exists() {
        assert!(binary_exists("sh"));
        assert!(!binary_exists("iptkeeper_nonexistent_binary_xyz"));
    }

    #[test]
    fn test_create_command_test_mode() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();
        unsafe {
            std::env::set_var("IPTKEEPER_TEST_NO_ELEVATION", "1");
        }

        let cmd = create_elevated_iptables_command("iptables", &["-L", "-n"]).unwrap();
        assert_eq!(cmd.as_std().get_program(), "iptables");

        unsafe {
            std::env::remove_var("IPTKEEPER_TEST_NO_ELEVATION");
        }
    }

    #[test]
    fn test_binary_override() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();
        unsafe {
            std::env::set_var("IPTKEEPER_TEST_NO_ELEVATION", "1");
            std::env::set_var("IPTKEEPER_IPTABLES", "/usr/sbin/iptables-legacy");
        }

        let cmd = create_elevated_iptables_command("iptables", &["-L"]).unwrap();
        let program = cmd.as_std().get_program().to_owned();

        unsafe {
            std::env::remove_var("IPTKEEPER_IPTABLES");
            std::env::remove_var("IPTKEEPER_TEST_NO_ELEVATION");
        }

        assert_eq!(program, "/usr/sbin/iptables-legacy");
    }

    #[test]
    fn test_invalid_elevation_method() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();
        if nix::unistd::getuid().is_root() {
            // Root never consults the override
            return;
        }

        unsafe {
            std::env::remove_var("IPTKEEPER_TEST_NO_ELEVATION");
            std::env::set_var("IPTKEEPER_ELEVATION_METHOD", "invalid_method");
        }

        let result = create_elevated_iptables_command("iptables", &["-L"]);

        unsafe {
            std::env::remove_var("IPTKEEPER_ELEVATION_METHOD");
        }

        assert!(matches!(result, Err(ElevationError::InvalidMethod(_))));
    }

    #[test]
    fn test_elevation_method_case_insensitive() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();

        unsafe {
            std::env::remove_var("IPTKEEPER_TEST_NO_ELEVATION");
            std::env::set_var("IPTKEEPER_ELEVATION_METHOD", "SUDO");
        }

        let result = create_elevated_iptables_command("iptables", &["-L"]);

        unsafe {
            std::env::remove_var("IPTKEEPER_ELEVATION_METHOD");
        }

        // Succeeds or reports sudo missing, but never InvalidMethod
        assert!(!matches!(result, Err(ElevationError::InvalidMethod(_))));
    }
}
