//! Blocking SSH command execution for the adapters that manage a DNS
//! server over a shell (OpenWrt uci, Windows PowerShell). Callers run
//! the whole session inside `tokio::task::spawn_blocking`.

use std::io::Read;
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;

const SSH_TIMEOUT: Duration = Duration::from_secs(10);

/// One authenticated SSH session.
pub(crate) struct SshClient {
    session: ssh2::Session,
}

impl SshClient {
    /// Connect and authenticate. `address` defaults to port 22 when no
    /// port is given; key auth is preferred over password auth.
    pub(crate) fn connect(
        address: &str,
        username: &str,
        password: Option<&str>,
        key_path: Option<&Path>,
    ) -> Result<Self, String> {
        let address = if address.contains(':') {
            address.to_string()
        } else {
            format!("{address}:22")
        };

        let tcp = TcpStream::connect(&address).map_err(|e| format!("failed to dial: {e}"))?;
        tcp.set_read_timeout(Some(SSH_TIMEOUT)).ok();
        tcp.set_write_timeout(Some(SSH_TIMEOUT)).ok();

        let mut session =
            ssh2::Session::new().map_err(|e| format!("failed to create session: {e}"))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| format!("SSH handshake failed: {e}"))?;

        if let Some(key_path) = key_path {
            session
                .userauth_pubkey_file(username, None, key_path, None)
                .map_err(|e| format!("key authentication failed: {e}"))?;
        } else if let Some(password) = password {
            session
                .userauth_password(username, password)
                .map_err(|e| format!("password authentication failed: {e}"))?;
        } else {
            return Err("no authentication method provided".to_string());
        }

        Ok(SshClient { session })
    }

    /// Run one command; non-zero exit status is an error carrying the
    /// command's stderr.
    pub(crate) fn exec(&self, command: &str) -> Result<String, String> {
        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| format!("failed to open channel: {e}"))?;
        channel
            .exec(command)
            .map_err(|e| format!("failed to exec {command}: {e}"))?;

        let mut stdout = String::new();
        channel
            .read_to_string(&mut stdout)
            .map_err(|e| format!("failed to read output of {command}: {e}"))?;
        let mut stderr = String::new();
        channel.stderr().read_to_string(&mut stderr).ok();

        channel.wait_close().ok();
        let status = channel
            .exit_status()
            .map_err(|e| format!("failed to read exit status of {command}: {e}"))?;
        if status != 0 {
            return Err(format!("command {command} failed ({status}): {stderr}"));
        }
        Ok(stdout)
    }
}
