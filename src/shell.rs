// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Command execution and the run transcript.
//!
//! Every action of a post run (directory creation, copy, concatenation,
//! external tool invocation) is written to the transcript as the shell
//! command it corresponds to, whether or not it is actually executed. In
//! dry-run mode nothing touches the filesystem, but the transcript is
//! identical, so it can be reviewed or replayed by hand.

use anyhow::{bail, Context, Result};
use log::{error, info};
use std::ffi::OsString;
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;

use crate::utils;

/// What a failing external command means for the calling step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log the failure and carry on; a human reviews the transcript.
    Continue,
    /// Raise the failure out of the current step.
    Abort,
}

/// Input fed to an external command's stdin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandInput {
    /// Decompressed contents of a gzipped file (`zcat file |`)
    Gunzip(PathBuf),
    /// Literal text (`echo "text" |`)
    Text(String),
}

/// An external program invocation with a typed argument list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub current_dir: Option<PathBuf>,
    pub stdin: Option<CommandInput>,
    /// Redirect both stdout and stderr to this file (`> file 2>&1`)
    pub output: Option<PathBuf>,
}

impl ExternalCommand {
    pub fn new(program: impl Into<PathBuf>) -> ExternalCommand {
        ExternalCommand {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            stdin: None,
            output: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn stdin(mut self, input: CommandInput) -> Self {
        self.stdin = Some(input);
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }
}

/// Quote a word for the transcript if the shell would split or expand it.
fn quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:,@%".contains(c))
    {
        word.to_string()
    } else {
        format!("\"{}\"", word.replace('"', "\\\""))
    }
}

impl fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(dir) = &self.current_dir {
            write!(f, "cd {}; ", quote(&dir.to_string_lossy()))?;
        }
        match &self.stdin {
            Some(CommandInput::Gunzip(p)) => write!(f, "zcat {} | ", quote(&p.to_string_lossy()))?,
            Some(CommandInput::Text(t)) => write!(f, "echo {} | ", quote(t))?,
            None => (),
        }
        write!(f, "{}", self.program.to_string_lossy())?;
        for a in &self.args {
            write!(f, " {}", quote(&a.to_string_lossy()))?;
        }
        if let Some(out) = &self.output {
            write!(f, " > {} 2>&1", quote(&out.to_string_lossy()))?;
        }
        Ok(())
    }
}

/// Captured result of an external command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Append-only record of a run, mirrored to the console. Lines are
/// serialized through a mutex so concurrent callers never interleave.
#[derive(Default)]
pub struct Transcript {
    inner: Mutex<TranscriptInner>,
}

#[derive(Default)]
struct TranscriptInner {
    file: Option<BufWriter<File>>,
    lines: Vec<String>,
}

impl Transcript {
    pub fn new() -> Transcript {
        Transcript::default()
    }

    /// Start persisting lines to `path`, truncating it.
    pub fn open(&self, path: &Path) -> Result<()> {
        let f = File::create(path)
            .with_context(|| format!("error creating transcript {:?}", path))?;
        self.lock().file = Some(BufWriter::new(f));
        Ok(())
    }

    /// Flush and stop persisting. Later lines only reach the console.
    pub fn close(&self) -> Result<()> {
        if let Some(mut f) = self.lock().file.take() {
            f.flush()?;
        }
        Ok(())
    }

    pub fn log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!("{}", message);

        let mut inner = self.lock();
        if let Some(f) = inner.file.as_mut() {
            if let Err(e) = writeln!(f, "{}", message) {
                error!("error writing transcript: {}", e);
            }
        }
        inner.lines.push(message.to_string());
    }

    /// Every line logged so far.
    pub fn lines(&self) -> Vec<String> {
        self.lock().lines.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TranscriptInner> {
        // a panicking writer can't leave the line buffer half-written
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Executes commands and filesystem actions, logging each one first.
pub struct Shell {
    dry_run: bool,
    transcript: Transcript,
}

impl Shell {
    pub fn new(dry_run: bool) -> Shell {
        Shell {
            dry_run,
            transcript: Transcript::new(),
        }
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn log(&self, message: impl AsRef<str>) {
        self.transcript.log(message)
    }

    /// Log `description`, then run `action` unless in dry-run mode.
    pub fn perform<F>(&self, description: impl AsRef<str>, action: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        self.log(description);
        if self.dry_run {
            Ok(())
        } else {
            action()
        }
    }

    /// True if every path exists. Missing paths are logged; in dry-run mode
    /// they don't count as missing so the would-be commands still get logged.
    pub fn check_exists<P: AsRef<Path>>(&self, paths: &[P]) -> bool {
        let mut present = true;
        for p in paths {
            if !p.as_ref().exists() {
                self.log(format!("# Error: file not found:{}.", p.as_ref().display()));
                if !self.dry_run {
                    present = false;
                }
            }
        }
        present
    }

    /// `mkdir -p`
    pub fn mkdir_p(&self, dir: &Path) -> Result<()> {
        self.perform(format!("mkdir -p {}", quote(&dir.to_string_lossy())), || {
            std::fs::create_dir_all(dir).with_context(|| format!("error creating {:?}", dir))
        })
    }

    /// `cp` for files, `cp -r` for directories, into `dest_dir`.
    pub fn copy_into(&self, src: &Path, dest_dir: &Path) -> Result<()> {
        self.perform(copy_command(src, dest_dir), || utils::copy_into(src, dest_dir))
    }

    /// `mv`
    pub fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.perform(
            format!(
                "mv {} {}",
                quote(&from.to_string_lossy()),
                quote(&to.to_string_lossy())
            ),
            || {
                std::fs::rename(from, to)
                    .with_context(|| format!("error moving {:?} to {:?}", from, to))
            },
        )
    }

    /// Log a failed action and carry on.
    pub fn log_failure(&self, err: &anyhow::Error) {
        self.log(format!("# ERROR: {:#}", err));
    }

    /// Run an external command. In dry-run mode the command is only logged
    /// and `None` is returned.
    pub fn execute(
        &self,
        cmd: &ExternalCommand,
        policy: FailurePolicy,
    ) -> Result<Option<CommandOutput>> {
        self.log(cmd.to_string());
        if self.dry_run {
            return Ok(None);
        }

        let output = match run_command(cmd) {
            Ok(o) => o,
            Err(e) if policy == FailurePolicy::Continue => {
                self.log_failure(&e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if !output.success() {
            let msg = format!(
                "# ERROR: {} exited with status {:?}",
                cmd.program.display(),
                output.status
            );
            self.log(&msg);
            if policy == FailurePolicy::Abort {
                bail!("{}: {}", msg, output.stderr.trim());
            }
        }
        Ok(Some(output))
    }
}

/// The transcript line for copying `src` into `dest_dir`.
pub(crate) fn copy_command(src: &Path, dest_dir: &Path) -> String {
    let flag = if src.is_dir() { "cp -r" } else { "cp" };
    format!(
        "{} {} {}",
        flag,
        quote(&src.to_string_lossy()),
        quote(&dest_dir.to_string_lossy())
    )
}

pub(crate) fn run_command(cmd: &ExternalCommand) -> Result<CommandOutput> {
    let mut command = Command::new(&cmd.program);
    command.args(&cmd.args);
    if let Some(dir) = &cmd.current_dir {
        command.current_dir(dir);
    }

    let redirect = match &cmd.output {
        Some(path) => {
            let f = File::create(path).with_context(|| format!("error creating {:?}", path))?;
            Some(f)
        }
        None => None,
    };
    match &redirect {
        Some(f) => {
            command.stdout(Stdio::from(f.try_clone()?));
            command.stderr(Stdio::from(f.try_clone()?));
        }
        None => {
            command.stdout(Stdio::piped());
            command.stderr(Stdio::piped());
        }
    }
    command.stdin(if cmd.stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    let mut child = command
        .spawn()
        .with_context(|| format!("error starting {:?}", cmd.program))?;

    let feeder = match (cmd.stdin.clone(), child.stdin.take()) {
        (Some(input), Some(mut pipe)) => Some(thread::spawn(move || -> Result<()> {
            match input {
                CommandInput::Gunzip(path) => {
                    let mut rdr = utils::open_with_gz(&path)?;
                    match io::copy(&mut rdr, &mut pipe) {
                        // the consumer may stop reading early
                        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => (),
                        r => {
                            r.with_context(|| format!("error streaming {:?}", path))?;
                        }
                    }
                }
                CommandInput::Text(text) => {
                    pipe.write_all(text.as_bytes())?;
                }
            }
            Ok(())
        })),
        _ => None,
    };

    let output = child.wait_with_output()?;
    if let Some(handle) = feeder {
        match handle.join() {
            Ok(r) => r?,
            Err(_) => bail!("stdin writer for {:?} panicked", cmd.program),
        }
    }

    Ok(CommandOutput {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
