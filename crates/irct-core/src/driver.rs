//! Command driver
//!
//! The only way the harness writes to a server. Every command is appended to
//! the handle's outbound log and the journal before it is transmitted.

use crate::error::{HarnessError, Result};
use crate::handle::ConnectionHandle;

/// Send one protocol command through `handle`
///
/// # Errors
/// `HarnessError::Transport` if the write fails. The command stays in the
/// outbound log either way, so diagnostics show what was attempted.
pub async fn send_command(handle: &mut ConnectionHandle, command: &str) -> Result<()> {
    handle.journal().outbound(handle.id(), command);
    tracing::debug!(handle = %handle.id(), %command, "send");

    handle
        .write_raw(command)
        .await
        .map_err(|e| HarnessError::transport(handle.id(), e))
}

/// Send a sequence of commands, stopping at the first failure
///
/// # Errors
/// The first `HarnessError::Transport` encountered.
pub async fn send_all<I, S>(handle: &mut ConnectionHandle, commands: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for command in commands {
        send_command(handle, command.as_ref()).await?;
    }
    Ok(())
}

/// Register a freshly opened session (`NICK` then `USER`)
///
/// # Errors
/// `HarnessError::Transport` if either line cannot be written.
pub async fn register(handle: &mut ConnectionHandle) -> Result<()> {
    let nick = handle.nick().to_string();
    send_all(
        handle,
        [format!("NICK {nick}"), format!("USER {nick} 0 * :{nick}")],
    )
    .await
}
