//! CUPS spooler adapter.
//!
//! Uses the CUPS command line tools so the bridge needs no native client
//! library: `lpstat -e` enumerates destinations and `lp` submits jobs, with
//! the job data piped through stdin.

use std::io::Write;
use std::process::{Command, Stdio};

use tracing::{debug, info};

use crate::application::devices::{DeviceError, JobOptions, PrintSpooler};

/// [`PrintSpooler`] that drives CUPS through `lpstat` and `lp`.
#[derive(Debug, Clone)]
pub struct CupsSpooler {
    lpstat: String,
    lp: String,
}

impl Default for CupsSpooler {
    fn default() -> Self {
        Self::with_programs("lpstat", "lp")
    }
}

impl CupsSpooler {
    /// Uses alternative `lpstat`/`lp` executables.
    pub fn with_programs(lpstat: impl Into<String>, lp: impl Into<String>) -> Self {
        Self {
            lpstat: lpstat.into(),
            lp: lp.into(),
        }
    }

    fn submit(&self, printer: &str, job: &JobOptions, options: &[&str], data: &[u8]) -> Result<(), DeviceError> {
        let mut child = Command::new(&self.lp)
            .args(lp_args(printer, job, options))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DeviceError::Spooler(format!("could not run {}: {e}", self.lp)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(data)?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            return Err(DeviceError::Spooler(if stderr.is_empty() {
                format!("{} exited with {}", self.lp, output.status)
            } else {
                stderr
            }));
        }

        let reply = String::from_utf8_lossy(&output.stdout);
        info!(printer, job = %job.name, copies = job.copies, bytes = data.len(), reply = reply.trim(), "job submitted");
        Ok(())
    }
}

impl PrintSpooler for CupsSpooler {
    fn list_printers(&self) -> Result<Vec<String>, DeviceError> {
        let output = Command::new(&self.lpstat)
            .arg("-e")
            .output()
            .map_err(|e| DeviceError::Spooler(format!("could not run {}: {e}", self.lpstat)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            // lpstat exits non-zero when no destinations exist.
            if stderr.contains("No destinations") {
                return Ok(Vec::new());
            }
            return Err(DeviceError::Spooler(stderr));
        }

        let printers = parse_destinations(&String::from_utf8_lossy(&output.stdout));
        debug!(count = printers.len(), "enumerated printers");
        Ok(printers)
    }

    fn print_raw(&self, printer: &str, job: &JobOptions, data: &[u8]) -> Result<(), DeviceError> {
        self.submit(printer, job, &["raw"], data)
    }

    fn print_html(&self, printer: &str, job: &JobOptions, html: &str) -> Result<(), DeviceError> {
        self.submit(printer, job, &["document-format=text/html"], html.as_bytes())
    }
}

/// `lp -d printer -t title -n copies -o option...`
fn lp_args(printer: &str, job: &JobOptions, options: &[&str]) -> Vec<String> {
    let mut args = vec![
        "-d".to_string(),
        printer.to_string(),
        "-t".to_string(),
        job.name.clone(),
        "-n".to_string(),
        job.copies.to_string(),
    ];
    for option in options {
        args.push("-o".to_string());
        args.push((*option).to_string());
    }
    args
}

/// One destination name per non-empty line.
fn parse_destinations(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
