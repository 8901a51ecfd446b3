//! OS-level process adjustments.

use std::io;

use log::info;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OsError {
    #[error("could not switch real and effective users: {0}")]
    PrivilegeDrop(#[source] io::Error),
}

/// Swaps the real and effective user ids, dropping to the unprivileged user
/// a setuid launcher started us from. A process whose ids already match has
/// nothing to drop, so this is a no-op there.
pub fn switch_real_and_effective_users() -> Result<(), OsError> {
    let real = unsafe { libc::getuid() };
    let effective = unsafe { libc::geteuid() };
    if real == effective {
        return Ok(());
    }

    if unsafe { libc::setreuid(effective, real) } != 0 {
        return Err(OsError::PrivilegeDrop(io::Error::last_os_error()));
    }
    info!("switched real and effective users ({real} <-> {effective})");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_op_when_ids_already_match() {
        // Test runners are not setuid, so the ids match and the call must
        // succeed without touching process credentials.
        assert!(switch_real_and_effective_users().is_ok());
    }
}
