// privilege.rs - Administrator check

use crate::error::{LaunchError, Result};

/// Effective user id of this process
#[cfg(unix)]
pub fn effective_uid() -> u32 {
    unsafe { libc::geteuid() }
}

/// No uid outside unix; never reported as the administrator
#[cfg(not(unix))]
pub fn effective_uid() -> u32 {
    u32::MAX
}

/// Fail unless `uid` is the administrator account
pub fn require_root(uid: u32) -> Result<()> {
    if uid == 0 {
        Ok(())
    } else {
        Err(LaunchError::Privilege)
    }
}
