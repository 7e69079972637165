// This file contains the code for running external programs (CD-HIT and MAFFT) with an optional
// deadline.

// Copyright 2025 Ryan Wick (rrwick@gmail.com)

// This file is part of Virclust. Virclust is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. Virclust is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with Virclust. If not, see <http://www.gnu.org/licenses/>.

use std::ffi::OsString;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use which::which;

use crate::error::{Result, VirclustError};


static POLL_INTERVAL: Duration = Duration::from_millis(50);
static STDERR_TAIL_LINES: usize = 5;


/// Where to find each external program. Bare names are looked up in PATH when the program is run.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolPaths {
    pub cd_hit: PathBuf,
    pub cd_hit_est: PathBuf,
    pub mafft: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        ToolPaths { cd_hit: PathBuf::from("cd-hit"), cd_hit_est: PathBuf::from("cd-hit-est"),
                    mafft: PathBuf::from("mafft") }
    }
}

impl ToolPaths {
    /// CD-HIT binaries can come from a given directory, e.g. a local build.
    pub fn with_cdhit_dir(cdhit_dir: Option<&Path>) -> Self {
        let mut tools = ToolPaths::default();
        if let Some(dir) = cdhit_dir {
            tools.cd_hit = dir.join("cd-hit");
            tools.cd_hit_est = dir.join("cd-hit-est");
        }
        tools
    }
}


pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
    stdout: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: &Path) -> Self {
        ToolCommand { program: program.to_path_buf(), args: Vec::new(), stdout: None }
    }

    pub fn arg<S: Into<OsString>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Sends the program's stdout to the given file (for tools like MAFFT that write their
    /// results to stdout).
    pub fn stdout_to(mut self, path: &Path) -> Self {
        self.stdout = Some(path.to_path_buf());
        self
    }

    pub fn description(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().to_string()));
        let mut text = parts.join(" ");
        if let Some(out) = &self.stdout {
            text.push_str(&format!(" > {}", out.display()));
        }
        text
    }

    /// Runs the program to completion (or until the deadline passes, in which case it is
    /// killed). A non-zero exit status is an error that carries the command and the end of the
    /// program's stderr.
    pub fn run(&self, timeout: Option<Duration>) -> Result<()> {
        let command = self.description();
        let program = which(&self.program)
            .map_err(|_| VirclustError::ToolNotFound(self.program.display().to_string()))?;
        let mut stderr_file = tempfile::tempfile()?;
        let stdout = match &self.stdout {
            Some(path) => Stdio::from(File::create(path)?),
            None       => Stdio::null(),
        };
        let mut child = Command::new(program).args(&self.args)
                                             .stdin(Stdio::null())
                                             .stdout(stdout)
                                             .stderr(Stdio::from(stderr_file.try_clone()?))
                                             .spawn()?;
        let status = match timeout {
            None => child.wait()?,
            Some(limit) => {
                let start = Instant::now();
                loop {
                    if let Some(status) = child.try_wait()? {
                        break status;
                    }
                    if start.elapsed() >= limit {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(VirclustError::ExternalToolTimeout {
                            command, seconds: limit.as_secs() });
                    }
                    sleep(POLL_INTERVAL);
                }
            }
        };
        if status.success() {
            return Ok(());
        }
        Err(VirclustError::ExternalToolFailure {
            command, status: describe_failure(status, &mut stderr_file) })
    }
}


fn describe_failure(status: ExitStatus, stderr_file: &mut File) -> String {
    let mut stderr = String::new();
    if stderr_file.seek(SeekFrom::Start(0)).is_ok() {
        let _ = stderr_file.read_to_string(&mut stderr);
    }
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
    if tail.is_empty() { status.to_string() }
                  else { format!("{}\n{}", status, tail) }
}


#[cfg(all(test, unix))]
pub mod test_tools {
    // Helpers for writing small shell scripts that stand in for external programs in tests.
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    pub fn make_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut permissions = fs::metadata(&path).unwrap().permissions();
        permissions.set_mode(0o755);
        fs::set_permissions(&path, permissions).unwrap();
        path
    }
}


#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use super::test_tools::make_script;
    use tempfile::tempdir;

    #[test]
    fn test_description() {
        let cmd = ToolCommand::new(Path::new("mafft")).arg("--retree").arg("1")
                                                      .stdout_to(Path::new("out.fasta"));
        assert_eq!(cmd.description(), "mafft --retree 1 > out.fasta");
    }

    #[test]
    fn test_success_and_stdout() {
        let dir = tempdir().unwrap();
        let script = make_script(dir.path(), "echoer", "echo \"$1\"");
        let out = dir.path().join("out.txt");
        ToolCommand::new(&script).arg("hello").stdout_to(&out).run(None).unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "hello\n");
    }

    #[test]
    fn test_failure() {
        let dir = tempdir().unwrap();
        let script = make_script(dir.path(), "failer", "echo 'bad input' >&2\nexit 3");
        match ToolCommand::new(&script).arg("x").run(None) {
            Err(VirclustError::ExternalToolFailure { command, status }) => {
                assert!(command.ends_with("failer x"));
                assert!(status.contains('3'));
                assert!(status.contains("bad input"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_timeout() {
        let dir = tempdir().unwrap();
        let script = make_script(dir.path(), "sleeper", "sleep 10");
        let start = Instant::now();
        let result = ToolCommand::new(&script).run(Some(Duration::from_millis(200)));
        assert!(matches!(result, Err(VirclustError::ExternalToolTimeout { .. })));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_missing_tool() {
        let result = ToolCommand::new(Path::new("definitely-not-a-real-program-xyz")).run(None);
        assert!(matches!(result, Err(VirclustError::ToolNotFound(_))));
    }

    #[test]
    fn test_with_cdhit_dir() {
        let tools = ToolPaths::with_cdhit_dir(Some(Path::new("/opt/cdhit")));
        assert_eq!(tools.cd_hit_est, PathBuf::from("/opt/cdhit/cd-hit-est"));
        assert_eq!(tools.mafft, PathBuf::from("mafft"));
    }
}
