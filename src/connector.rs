use crate::config::{HostConfig, SshConfig};
use ssh2::Session;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Timeout for the liveness probe, deliberately shorter than command timeouts.
const LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Ceiling for the exponential backoff between connection attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// libssh2 LIBSSH2_ERROR_TIMEOUT.
const LIBSSH2_TIMEOUT: i32 = -9;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("not connected to {host}")]
    NotConnected { host: String },
    #[error("authentication failed for {host}: {message}")]
    Authentication { host: String, message: String },
    #[error("connection error on {host}: {message}")]
    Connection { host: String, message: String },
    #[error("command timed out on {host}: {command}")]
    Timeout { host: String, command: String },
    #[error("failed to connect to {host} after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        host: String,
        attempts: u32,
        #[source]
        source: Box<ConnectorError>,
    },
}

/// Captured output of one remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// A channel that can run commands on a remote host. Implemented by
/// [`SshConnector`]; test code drives the runner and checkers through a
/// scripted mock instead.
pub trait CommandChannel {
    fn execute(&self, command: &str, timeout: Option<Duration>)
        -> Result<CommandOutput, ConnectorError>;

    /// Liveness probe: runs a trivial no-op command with a short timeout and
    /// reports success without raising.
    fn test_connection(&self) -> bool;
}

/// Owns at most one live SSH session to a single host. Commands are only
/// valid while a session exists; reconnecting always tears the previous
/// session down first.
pub struct SshConnector {
    host: String,
    port: u16,
    username: String,
    password: Option<String>,
    key_file: Option<PathBuf>,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
    session: Option<Session>,
}

impl SshConnector {
    pub fn new(host: &HostConfig, ssh: &SshConfig) -> Self {
        Self {
            host: host.host.clone(),
            port: host.port.unwrap_or(ssh.port),
            username: host.username.clone(),
            password: host.password.clone(),
            key_file: host.key_file.clone().or_else(|| ssh.key_file.clone()),
            timeout: Duration::from_secs(ssh.timeout_secs),
            max_retries: ssh.max_retries,
            retry_delay: Duration::from_secs(ssh.retry_delay_secs),
            session: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Establish the session, retrying transport failures with exponential
    /// backoff. Authentication failures are fatal and abort immediately.
    pub fn connect(&mut self) -> Result<(), ConnectorError> {
        if self.session.is_some() {
            return Ok(());
        }

        let mut last_failure: Option<ConnectorError> = None;
        for attempt in 0..=self.max_retries {
            info!(host = %self.host, port = self.port, attempt = attempt + 1, "connecting");
            match self.try_connect() {
                Ok(session) => {
                    self.session = Some(session);
                    info!(host = %self.host, "connected");
                    return Ok(());
                }
                Err(err @ ConnectorError::Authentication { .. }) => {
                    error!(host = %self.host, error = %err, "authentication failed");
                    return Err(err);
                }
                Err(err) => {
                    warn!(host = %self.host, error = %err, "connection attempt failed");
                    last_failure = Some(err);
                }
            }

            if attempt < self.max_retries {
                let delay = backoff_delay(self.retry_delay, attempt);
                info!(host = %self.host, delay_secs = delay.as_secs(), "retrying after backoff");
                thread::sleep(delay);
            }
        }

        Err(ConnectorError::RetriesExhausted {
            host: self.host.clone(),
            attempts: self.max_retries + 1,
            source: Box::new(last_failure.unwrap_or_else(|| ConnectorError::Connection {
                host: self.host.clone(),
                message: "no connection attempt was made".to_string(),
            })),
        })
    }

    fn try_connect(&self) -> Result<Session, ConnectorError> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|err| self.connection_error(format!("address lookup failed: {err}")))?
            .next()
            .ok_or_else(|| self.connection_error("address lookup returned no addresses".to_string()))?;

        let tcp = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|err| self.connection_error(format!("tcp connect failed: {err}")))?;

        let mut session = Session::new()
            .map_err(|err| self.connection_error(format!("session init failed: {err}")))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(self.timeout.as_millis() as u32);
        session
            .handshake()
            .map_err(|err| self.connection_error(format!("ssh handshake failed: {err}")))?;

        // Key auth takes precedence when both credentials are configured.
        if let Some(key_file) = &self.key_file {
            debug!(host = %self.host, key_file = %key_file.display(), "using key authentication");
            session
                .userauth_pubkey_file(&self.username, None, key_file, None)
                .map_err(|err| ConnectorError::Authentication {
                    host: self.host.clone(),
                    message: format!("key authentication failed: {err}"),
                })?;
        } else if let Some(password) = &self.password {
            debug!(host = %self.host, "using password authentication");
            session
                .userauth_password(&self.username, password)
                .map_err(|err| ConnectorError::Authentication {
                    host: self.host.clone(),
                    message: format!("password authentication failed: {err}"),
                })?;
        } else {
            return Err(ConnectorError::Authentication {
                host: self.host.clone(),
                message: "no authentication method configured (password or key file)".to_string(),
            });
        }

        if !session.authenticated() {
            return Err(ConnectorError::Authentication {
                host: self.host.clone(),
                message: "server rejected the supplied credentials".to_string(),
            });
        }

        Ok(session)
    }

    /// Idempotent; close-time errors are logged and swallowed, state is
    /// always cleared so a later `connect` starts fresh.
    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(err) = session.disconnect(None, "health check finished", None) {
                warn!(host = %self.host, error = %err, "error while closing ssh session");
            } else {
                info!(host = %self.host, "disconnected");
            }
        }
    }

    /// Reconnect if the liveness probe fails.
    pub fn ensure_connected(&mut self) -> Result<(), ConnectorError> {
        if !self.test_connection() {
            info!(host = %self.host, "connection lost, reconnecting");
            self.disconnect();
            self.connect()?;
        }
        Ok(())
    }

    /// Scoped acquisition: connect, run the block, and disconnect on every
    /// exit path including an erroring block.
    pub fn with_connection<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        E: From<ConnectorError>,
        F: FnOnce(&mut Self) -> Result<T, E>,
    {
        self.connect()?;
        let result = f(self);
        self.disconnect();
        result
    }

    fn connection_error(&self, message: String) -> ConnectorError {
        ConnectorError::Connection {
            host: self.host.clone(),
            message,
        }
    }

    fn classify_ssh(&self, err: ssh2::Error, command: &str) -> ConnectorError {
        if matches!(err.code(), ssh2::ErrorCode::Session(LIBSSH2_TIMEOUT)) {
            ConnectorError::Timeout {
                host: self.host.clone(),
                command: command.to_string(),
            }
        } else {
            self.connection_error(format!("ssh error: {err}"))
        }
    }

    fn classify_io(&self, err: std::io::Error, command: &str) -> ConnectorError {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                ConnectorError::Timeout {
                    host: self.host.clone(),
                    command: command.to_string(),
                }
            }
            _ => self.connection_error(format!("i/o error: {err}")),
        }
    }
}

impl CommandChannel for SshConnector {
    fn execute(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, ConnectorError> {
        let session = self.session.as_ref().ok_or_else(|| ConnectorError::NotConnected {
            host: self.host.clone(),
        })?;

        let timeout = timeout.unwrap_or(self.timeout);
        session.set_timeout(timeout.as_millis() as u32);
        debug!(host = %self.host, command, "executing command");

        let mut channel = session
            .channel_session()
            .map_err(|err| self.classify_ssh(err, command))?;
        channel
            .exec(command)
            .map_err(|err| self.classify_ssh(err, command))?;

        let mut stdout_buf = Vec::new();
        channel
            .read_to_end(&mut stdout_buf)
            .map_err(|err| self.classify_io(err, command))?;
        let mut stderr_buf = Vec::new();
        {
            let mut stderr_stream = channel.stderr();
            stderr_stream
                .read_to_end(&mut stderr_buf)
                .map_err(|err| self.classify_io(err, command))?;
        }
        channel
            .wait_close()
            .map_err(|err| self.classify_ssh(err, command))?;
        let exit_code = channel
            .exit_status()
            .map_err(|err| self.classify_ssh(err, command))?;

        let stdout = String::from_utf8_lossy(&stdout_buf).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_buf).into_owned();
        debug!(host = %self.host, exit_code, "command completed");
        if exit_code != 0 {
            warn!(host = %self.host, command, exit_code, "command exited non-zero");
            debug!(host = %self.host, stderr = %stderr.trim(), "command stderr");
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    fn test_connection(&self) -> bool {
        if self.session.is_none() {
            return false;
        }
        match self.execute("echo connection_test", Some(LIVENESS_TIMEOUT)) {
            Ok(output) => output.exit_code == 0,
            Err(err) => {
                debug!(host = %self.host, error = %err, "liveness probe failed");
                false
            }
        }
    }
}

impl Drop for SshConnector {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(MAX_BACKOFF)
}

#[cfg(test)]
pub mod testing {
    use super::{CommandChannel, CommandOutput, ConnectorError};
    use std::cell::{Cell, RefCell};
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;

    /// Scripted channel for runner/checker tests: canned replies per command,
    /// optional per-command failures, and a call log.
    pub struct MockChannel {
        responses: RefCell<HashMap<String, CommandOutput>>,
        failing: RefCell<HashSet<String>>,
        alive: Cell<bool>,
        calls: RefCell<Vec<String>>,
    }

    impl MockChannel {
        pub fn new() -> Self {
            Self {
                responses: RefCell::new(HashMap::new()),
                failing: RefCell::new(HashSet::new()),
                alive: Cell::new(true),
                calls: RefCell::new(Vec::new()),
            }
        }

        pub fn respond(&self, command: &str, stdout: &str, stderr: &str, exit_code: i32) {
            self.responses.borrow_mut().insert(
                command.to_string(),
                CommandOutput {
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                    exit_code,
                },
            );
        }

        pub fn fail(&self, command: &str) {
            self.failing.borrow_mut().insert(command.to_string());
        }

        pub fn set_alive(&self, alive: bool) {
            self.alive.set(alive);
        }

        pub fn call_count(&self) -> usize {
            self.calls.borrow().len()
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl CommandChannel for MockChannel {
        fn execute(
            &self,
            command: &str,
            _timeout: Option<Duration>,
        ) -> Result<CommandOutput, ConnectorError> {
            self.calls.borrow_mut().push(command.to_string());
            if self.failing.borrow().contains(command) {
                return Err(ConnectorError::Connection {
                    host: "mock".to_string(),
                    message: format!("scripted failure for '{command}'"),
                });
            }
            Ok(self
                .responses
                .borrow()
                .get(command)
                .cloned()
                .unwrap_or(CommandOutput {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: 0,
                }))
        }

        fn test_connection(&self) -> bool {
            self.alive.get()
        }
    }
}
