use crate::collectors::command::CommandRunner;
use log::debug;

/// Process-wide identity resolved once at startup and passed to every pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostContext {
    pub host: String,
    pub os_version: String,
}

impl HostContext {
    pub fn new(host: impl Into<String>, os_version: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            os_version: os_version.into(),
        }
    }

    /// Resolve the computer name and OS version
    ///
    /// Uses `scutil --get ComputerName`, falling back to `gethostname(3)`, and
    /// `sw_vers -productVersion`. Failures leave the field empty.
    pub fn detect(runner: &dyn CommandRunner) -> Self {
        let output = runner.run("scutil", &["--get", "ComputerName"]);
        let computer_name = if output.success() {
            output.stdout_text().trim().to_string()
        } else {
            String::new()
        };
        let host = if computer_name.is_empty() {
            system_hostname().unwrap_or_default()
        } else {
            computer_name
        };

        let output = runner.run("sw_vers", &["-productVersion"]);
        let os_version = if output.success() {
            output.stdout_text().trim().to_string()
        } else {
            String::new()
        };

        debug!("Host context: host={:?} os_version={:?}", host, os_version);
        Self::new(host, os_version)
    }
}

fn system_hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for buf.len() bytes and gethostname NUL-terminates on success
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return None;
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..end]).trim().to_string();
    (!name.is_empty()).then_some(name)
}
