//! Control-endpoint path resolution: XDG-style precedence with a
//! `$HOME/.local/share` fallback.

use std::path::PathBuf;

use crate::error::{Result, SwitchboardError};

const SOCKET_FILE_NAME: &str = "switchboard.sock";

/// Resolve `$XDG_DATA_HOME/<product>/switchboard.sock`, falling back to
/// `$HOME/.local/share/<product>/switchboard.sock` when `XDG_DATA_HOME`
/// is unset.
pub fn control_socket_path(product_dir: &str) -> Result<PathBuf> {
    let data_home = data_home_dir()?;
    Ok(data_home.join(product_dir).join(SOCKET_FILE_NAME))
}

fn data_home_dir() -> Result<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        if !xdg.is_empty() {
            return Ok(PathBuf::from(xdg));
        }
    }
    let home = dirs::home_dir().ok_or_else(|| {
        SwitchboardError::Bind("cannot resolve a home directory for the data dir".to_string())
    })?;
    Ok(home.join(".local").join("share"))
}

/// Ensure the socket's parent directory exists with user-only permissions.
pub fn ensure_parent_dir(socket_path: &std::path::Path) -> Result<()> {
    let Some(parent) = socket_path.parent() else {
        return Ok(());
    };
    if parent.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(parent)?;
    set_user_only_permissions(parent)?;
    Ok(())
}

#[cfg(unix)]
fn set_user_only_permissions(dir: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o700);
    std::fs::set_permissions(dir, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_user_only_permissions(_dir: &std::path::Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xdg_data_home_takes_precedence() {
        let prior = std::env::var("XDG_DATA_HOME").ok();
        std::env::set_var("XDG_DATA_HOME", "/tmp/xdg-test-home");
        let path = control_socket_path("switchboard").unwrap();
        assert_eq!(
            path,
            std::path::PathBuf::from("/tmp/xdg-test-home/switchboard/switchboard.sock")
        );
        match prior {
            Some(v) => std::env::set_var("XDG_DATA_HOME", v),
            None => std::env::remove_var("XDG_DATA_HOME"),
        }
    }

    #[test]
    fn ensure_parent_dir_creates_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let sock = tmp.path().join("nested").join("switchboard.sock");
        ensure_parent_dir(&sock).unwrap();
        assert!(sock.parent().unwrap().is_dir());
    }
}
