//! Orphaned encoder reconciliation
//!
//! An encoder can outlive the process that spawned it (after a crash or a
//! forced restart) and keep the capture device open, which makes every later
//! start fail. Before each start the reconciler scans the process table for
//! encoders whose command line carries this source's signature and kills every
//! one that is not the process we track.
//!
//! Everything here is best effort: scan or kill failures end up in the
//! [`OrphanReport`] and are logged by the caller.

use std::io;
use std::sync::Arc;

use crate::error::Error;
use crate::pipeline::command::split_args;

/// One entry of the OS process table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    /// Executable file name, without directory
    pub name: String,
    /// Full argument vector including the program
    pub cmdline: Vec<String>,
}

impl ProcessInfo {
    pub fn new(pid: u32, cmdline: Vec<String>) -> Self {
        let name = cmdline
            .first()
            .map(|program| {
                program
                    .rsplit(['/', '\\'])
                    .next()
                    .unwrap_or(program)
                    .to_string()
            })
            .unwrap_or_default();
        Self { pid, name, cmdline }
    }

    /// Whether this process runs `executable`
    ///
    /// A trailing `.exe` is ignored on both sides: Windows lists the program
    /// as it was spelled on the command line, with or without the extension.
    pub fn runs(&self, executable: &str) -> bool {
        program_stem(&self.name).eq_ignore_ascii_case(program_stem(executable))
    }

    /// Whether `signature` occurs as a contiguous run of arguments
    pub fn matches_signature(&self, signature: &[String]) -> bool {
        if signature.is_empty() || signature.len() > self.cmdline.len() {
            return false;
        }
        self.cmdline
            .windows(signature.len())
            .any(|window| window == signature)
    }
}

fn program_stem(name: &str) -> &str {
    let len = name.len();
    match name.get(len.saturating_sub(4)..) {
        Some(ext) if len > 4 && ext.eq_ignore_ascii_case(".exe") => &name[..len - 4],
        _ => name,
    }
}

/// Access to the OS process table
pub trait ProcessTable: Send + Sync {
    fn list(&self) -> io::Result<Vec<ProcessInfo>>;

    fn kill(&self, pid: u32) -> io::Result<()>;
}

/// Outcome of one reconciliation pass
#[derive(Debug, Default)]
pub struct OrphanReport {
    /// Processes whose command line matched the signature
    pub matched: usize,
    /// Orphans that were killed
    pub killed: Vec<u32>,
    /// Orphans that could not be killed
    pub failures: Vec<Error>,
    /// Set when the process table could not be read
    pub scan_error: Option<String>,
}

/// Finds and kills encoders left over from earlier runs
#[derive(Clone)]
pub struct OrphanReconciler {
    table: Arc<dyn ProcessTable>,
    executable: String,
}

impl OrphanReconciler {
    /// `executable` is the encoder's file name as shown in the process table
    pub fn new(table: Arc<dyn ProcessTable>, executable: impl Into<String>) -> Self {
        Self {
            table,
            executable: executable.into(),
        }
    }

    /// Kill encoders carrying `signature` that are not `tracked_pid`
    pub fn reconcile(
        &self,
        source_id: &str,
        signature: &[String],
        tracked_pid: Option<u32>,
    ) -> OrphanReport {
        let mut report = OrphanReport::default();

        let processes = match self.table.list() {
            Ok(processes) => processes,
            Err(e) => {
                tracing::warn!(source = %source_id, error = %e, "Process scan failed");
                report.scan_error = Some(e.to_string());
                return report;
            }
        };

        let own_pid = std::process::id();

        for process in processes {
            if !process.runs(&self.executable) || !process.matches_signature(signature)
            {
                continue;
            }
            report.matched += 1;

            if Some(process.pid) == tracked_pid || process.pid == own_pid {
                continue;
            }

            match self.table.kill(process.pid) {
                Ok(()) => {
                    tracing::info!(source = %source_id, pid = process.pid, "Killed orphaned encoder");
                    report.killed.push(process.pid);
                }
                Err(e) => {
                    let err = Error::OrphanKillFailed {
                        pid: process.pid,
                        reason: e.to_string(),
                    };
                    tracing::warn!(source = %source_id, error = %err, "Orphan kill failed");
                    report.failures.push(err);
                }
            }
        }

        tracing::debug!(
            source = %source_id,
            matched = report.matched,
            killed = report.killed.len(),
            "Orphan scan complete"
        );

        report
    }
}

/// Process table of the running host
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTable;

impl SystemProcessTable {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessTable for SystemProcessTable {
    #[cfg(target_os = "linux")]
    fn list(&self) -> io::Result<Vec<ProcessInfo>> {
        let mut processes = Vec::new();
        for entry in std::fs::read_dir("/proc")? {
            let entry = entry?;
            let pid = match entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) {
                Some(pid) => pid,
                None => continue,
            };
            // Processes can exit between readdir and read
            let raw = match std::fs::read(entry.path().join("cmdline")) {
                Ok(raw) => raw,
                Err(_) => continue,
            };
            let cmdline: Vec<String> = raw
                .split(|b| *b == 0)
                .filter(|arg| !arg.is_empty())
                .map(|arg| String::from_utf8_lossy(arg).into_owned())
                .collect();
            if !cmdline.is_empty() {
                processes.push(ProcessInfo::new(pid, cmdline));
            }
        }
        Ok(processes)
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    fn list(&self) -> io::Result<Vec<ProcessInfo>> {
        let output = std::process::Command::new("ps")
            .args(["-axww", "-o", "pid=,args="])
            .output()?;
        Ok(parse_pid_lines(&String::from_utf8_lossy(&output.stdout), ' '))
    }

    #[cfg(windows)]
    fn list(&self) -> io::Result<Vec<ProcessInfo>> {
        let output = std::process::Command::new("powershell")
            .args([
                "-NoProfile",
                "-Command",
                "Get-CimInstance Win32_Process | ForEach-Object { \"$($_.ProcessId)`t$($_.CommandLine)\" }",
            ])
            .output()?;
        Ok(parse_pid_lines(&String::from_utf8_lossy(&output.stdout), '\t'))
    }

    #[cfg(not(any(unix, windows)))]
    fn list(&self) -> io::Result<Vec<ProcessInfo>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process listing not supported on this platform",
        ))
    }

    #[cfg(unix)]
    fn kill(&self, pid: u32) -> io::Result<()> {
        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid, libc::SIGKILL) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(windows)]
    fn kill(&self, pid: u32) -> io::Result<()> {
        let output = std::process::Command::new("taskkill")
            .args(["/F", "/PID", &pid.to_string()])
            .output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::Other,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    #[cfg(not(any(unix, windows)))]
    fn kill(&self, _pid: u32) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process termination not supported on this platform",
        ))
    }
}

/// Parse `<pid><sep><command line>` lines
#[cfg_attr(target_os = "linux", allow(dead_code))]
fn parse_pid_lines(text: &str, separator: char) -> Vec<ProcessInfo> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            let (pid, rest) = line.split_once(separator)?;
            let pid = pid.trim().parse::<u32>().ok()?;
            let cmdline = split_args(rest.trim());
            if cmdline.is_empty() {
                None
            } else {
                Some(ProcessInfo::new(pid, cmdline))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    struct FakeTable {
        processes: Vec<ProcessInfo>,
        killed: Mutex<Vec<u32>>,
        refuse: Option<u32>,
        broken: bool,
    }

    impl FakeTable {
        fn new(processes: Vec<ProcessInfo>) -> Self {
            Self {
                processes,
                killed: Mutex::new(Vec::new()),
                refuse: None,
                broken: false,
            }
        }
    }

    impl ProcessTable for FakeTable {
        fn list(&self) -> io::Result<Vec<ProcessInfo>> {
            if self.broken {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
            }
            Ok(self.processes.clone())
        }

        fn kill(&self, pid: u32) -> io::Result<()> {
            if self.refuse == Some(pid) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
            }
            self.killed.lock().push(pid);
            Ok(())
        }
    }

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    fn encoder(pid: u32, device: &str) -> ProcessInfo {
        ProcessInfo::new(
            pid,
            args(&format!(
                "/usr/bin/ffmpeg -hide_banner -f v4l2 -i {} -c:v libx264 -f flv pipe:1",
                device
            )),
        )
    }

    #[test]
    fn test_signature_match_is_token_exact() {
        let process = encoder(10, "/dev/video10");
        assert!(process.matches_signature(&args("-i /dev/video10")));
        assert!(!process.matches_signature(&args("-i /dev/video1")));
        assert!(!process.matches_signature(&[]));
        assert_eq!(process.name, "ffmpeg");
    }

    #[test]
    fn test_kills_untracked_matches_only() {
        let table = Arc::new(FakeTable::new(vec![
            encoder(100, "/dev/video0"),
            encoder(101, "/dev/video0"),
            encoder(102, "/dev/video1"),
            ProcessInfo::new(103, args("vlc -i /dev/video0")),
        ]));
        let reconciler = OrphanReconciler::new(table.clone(), "ffmpeg");

        let report = reconciler.reconcile("cam0", &args("-f v4l2 -i /dev/video0"), Some(101));

        assert_eq!(report.matched, 2);
        assert_eq!(report.killed, vec![100]);
        assert!(report.failures.is_empty());
        assert_eq!(*table.killed.lock(), vec![100]);
    }

    #[test]
    fn test_executable_match_ignores_exe_suffix() {
        let bare = ProcessInfo::new(7, args("ffmpeg -i video=USB -f flv pipe:1"));
        let full = ProcessInfo::new(8, args(r"C:\tools\FFMPEG.EXE -i video=USB -f flv pipe:1"));
        assert!(bare.runs("ffmpeg.exe"));
        assert!(bare.runs("ffmpeg"));
        assert!(full.runs("ffmpeg.exe"));
        assert!(full.runs("ffmpeg"));
        assert!(!bare.runs("ffprobe.exe"));
        assert!(!ProcessInfo::new(9, args(".exe")).runs("ffmpeg"));

        let table = Arc::new(FakeTable::new(vec![bare, full]));
        let reconciler = OrphanReconciler::new(table.clone(), "ffmpeg.exe");
        let report = reconciler.reconcile("cam", &args("-i video=USB"), None);
        assert_eq!(report.killed, vec![7, 8]);
    }

    #[test]
    fn test_kill_failure_is_reported_not_fatal() {
        let mut fake = FakeTable::new(vec![encoder(100, "/dev/video0"), encoder(101, "/dev/video0")]);
        fake.refuse = Some(100);
        let reconciler = OrphanReconciler::new(Arc::new(fake), "ffmpeg");

        let report = reconciler.reconcile("cam0", &args("-i /dev/video0"), None);
        assert_eq!(report.killed, vec![101]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].code(), "ORPHAN_KILL_FAILED");
    }

    #[test]
    fn test_scan_failure() {
        let mut fake = FakeTable::new(Vec::new());
        fake.broken = true;
        let reconciler = OrphanReconciler::new(Arc::new(fake), "ffmpeg");

        let report = reconciler.reconcile("cam0", &args("-i /dev/video0"), None);
        assert!(report.scan_error.is_some());
        assert_eq!(report.matched, 0);
    }

    #[test]
    fn test_parse_pid_lines() {
        let text = "  42 /usr/local/bin/ffmpeg -i \"my cam\" -f flv pipe:1\n\nabc nope\n 7 \n";
        let parsed = parse_pid_lines(text, ' ');
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].pid, 42);
        assert_eq!(parsed[0].name, "ffmpeg");
        assert_eq!(parsed[0].cmdline[2], "my cam");
    }
}
