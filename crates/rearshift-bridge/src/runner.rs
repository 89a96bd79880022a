//! PrivilegedRunner trait and ShellBroker (sync subprocess wrapper).
//! The trait is sync so mocks stay trivial; async callers go through
//! the Bridge facade which crosses via spawn_blocking.

use crate::error::BridgeError;

/// Executes privileged shell commands. Enables mock injection for testing.
pub trait PrivilegedRunner: Send + Sync {
    /// Run `cmd`, reporting only whether it exited zero.
    fn run(&self, cmd: &str) -> Result<bool, BridgeError>;

    /// Run `cmd` and capture stdout. Nonzero exit is an error here,
    /// because the caller needs the output to mean something.
    fn run_for_output(&self, cmd: &str) -> Result<String, BridgeError>;
}

impl<T: PrivilegedRunner + ?Sized> PrivilegedRunner for &T {
    fn run(&self, cmd: &str) -> Result<bool, BridgeError> {
        (**self).run(cmd)
    }
    fn run_for_output(&self, cmd: &str) -> Result<String, BridgeError> {
        (**self).run_for_output(cmd)
    }
}

/// Real runner using `sh -c`, optionally through an elevation prefix
/// such as `su -c`.
pub struct ShellBroker {
    shell: String,
    elevation_prefix: Option<String>,
}

impl ShellBroker {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
            elevation_prefix: None,
        }
    }

    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    #[must_use]
    pub fn with_elevation_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.elevation_prefix = if prefix.is_empty() {
            None
        } else {
            Some(prefix)
        };
        self
    }

    fn command(&self, cmd: &str) -> std::process::Command {
        match &self.elevation_prefix {
            Some(prefix) => {
                // e.g. `su -c '<cmd>'` -- the prefix is split on
                // whitespace and the payload goes in as one argument.
                let mut parts = prefix.split_whitespace();
                // A prefix of only whitespace degrades to plain sh.
                match parts.next() {
                    Some(bin) => {
                        let mut c = std::process::Command::new(bin);
                        c.args(parts);
                        c.arg(cmd);
                        c
                    }
                    None => self.plain(cmd),
                }
            }
            None => self.plain(cmd),
        }
    }

    fn plain(&self, cmd: &str) -> std::process::Command {
        let mut c = std::process::Command::new(&self.shell);
        c.arg("-c").arg(cmd);
        c
    }
}

impl Default for ShellBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl PrivilegedRunner for ShellBroker {
    fn run(&self, cmd: &str) -> Result<bool, BridgeError> {
        let status = self.command(cmd).status().map_err(BridgeError::Io)?;
        Ok(status.success())
    }

    fn run_for_output(&self, cmd: &str) -> Result<String, BridgeError> {
        let output = self.command(cmd).output().map_err(BridgeError::Io)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BridgeError::CommandFailed(format!(
                "exit code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
