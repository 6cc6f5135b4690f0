//! The closed set of shell built-ins (`SHELL_OPEN`/`SHELL_EXEC`/`SHELL_CLOSE`).
//!
//! No child process is ever spawned — every command is a small in-process
//! handler operating against the session's working directory
//! ([`crate::session::ShellState`]).

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::DaemonError;
use crate::session::{ShellState, DEFAULT_SHELL_DIR};

/// One line of output a built-in wants sent as a `DATA` frame.
pub type DataLine = Vec<u8>;

/// The result of running one `SHELL_EXEC` command: zero or more `DATA`
/// lines, followed by the terminal frame's message (sent as `RESP_OK`, or
/// `RESP_ERROR` if `Err`).
pub struct CommandOutput {
    /// Lines to send as `DATA` frames, in order, before the terminal frame.
    pub data: Vec<DataLine>,
    /// The terminal `RESP_OK` message.
    pub message: String,
}

impl CommandOutput {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            data: Vec::new(),
            message: message.into(),
        }
    }

    fn with_data(data: Vec<DataLine>, message: impl Into<String>) -> Self {
        Self {
            data,
            message: message.into(),
        }
    }
}

/// Resolves `raw` against `working_dir`: empty or `~` becomes
/// [`DEFAULT_SHELL_DIR`]; an absolute path is used as-is; anything else is
/// joined onto `working_dir`.
fn resolve(working_dir: &Path, raw: &str) -> PathBuf {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "~" {
        return PathBuf::from(DEFAULT_SHELL_DIR);
    }
    let candidate = Path::new(trimmed);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        working_dir.join(candidate)
    }
}

/// Dispatches one `SHELL_EXEC` command line: the first whitespace-delimited
/// token is the command, the remainder (verbatim) is its argument.
pub async fn exec(state: &mut ShellState, line: &str) -> Result<CommandOutput, DaemonError> {
    let line = line.trim_end_matches(['\n', '\r']);
    let (command, argument) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let argument = argument.trim_start();

    match command {
        "ls" => ls(state, argument).await,
        "pwd" => Ok(CommandOutput::with_data(
            vec![format!("{}\n", state.working_dir.display()).into_bytes()],
            "OK",
        )),
        "cd" => cd(state, argument).await,
        "cat" => cat(state, argument).await,
        "mkdir" => {
            crate::fsutil::mkdir_recursive(resolve(&state.working_dir, argument)).await?;
            Ok(CommandOutput::ok("OK"))
        }
        "rmdir" => {
            tokio::fs::remove_dir(resolve(&state.working_dir, argument))
                .await
                .map_err(DaemonError::Filesystem)?;
            Ok(CommandOutput::ok("OK"))
        }
        "rm" => {
            tokio::fs::remove_file(resolve(&state.working_dir, argument))
                .await
                .map_err(DaemonError::Filesystem)?;
            Ok(CommandOutput::ok("OK"))
        }
        "touch" => {
            touch(&resolve(&state.working_dir, argument)).await?;
            Ok(CommandOutput::ok("OK"))
        }
        "cp" => {
            let (src, dst) = split_two(argument)?;
            tokio::fs::copy(resolve(&state.working_dir, src), resolve(&state.working_dir, dst))
                .await
                .map_err(DaemonError::Filesystem)?;
            Ok(CommandOutput::ok("OK"))
        }
        "mv" => {
            let (src, dst) = split_two(argument)?;
            tokio::fs::rename(resolve(&state.working_dir, src), resolve(&state.working_dir, dst))
                .await
                .map_err(DaemonError::Filesystem)?;
            Ok(CommandOutput::ok("OK"))
        }
        "stat" => stat(state, argument).await,
        "chmod" => chmod(state, argument).await,
        "echo" => Ok(CommandOutput::with_data(
            vec![format!("{argument}\n").into_bytes()],
            "OK",
        )),
        "help" => Ok(CommandOutput::with_data(vec![HELP_TEXT.as_bytes().to_vec()], "OK")),
        other => Err(DaemonError::protocol(format!("unknown command: {other}"))),
    }
}

const HELP_TEXT: &str = "ls pwd cd cat mkdir rmdir rm touch cp mv stat chmod echo help\n";

async fn ls(state: &ShellState, argument: &str) -> Result<CommandOutput, DaemonError> {
    let target = if argument.is_empty() {
        state.working_dir.clone()
    } else {
        resolve(&state.working_dir, argument)
    };

    let mut entries = tokio::fs::read_dir(&target).await.map_err(DaemonError::Filesystem)?;
    let mut lines = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(DaemonError::Filesystem)? {
        let mut line = entry.file_name().to_string_lossy().into_owned();
        line.push('\n');
        lines.push(line.into_bytes());
    }
    Ok(CommandOutput::with_data(lines, "OK"))
}

async fn cd(state: &mut ShellState, argument: &str) -> Result<CommandOutput, DaemonError> {
    let target = resolve(&state.working_dir, argument);
    tokio::fs::metadata(&target).await.map_err(DaemonError::Filesystem)?;
    state.working_dir = target;
    Ok(CommandOutput::ok("OK"))
}

/// `cat` streams at most this many bytes.
const CAT_MAX_BYTES: usize = 1024 * 1024;
/// ... in lines of at most this many bytes each.
const CAT_LINE_BYTES: usize = 4096;

async fn cat(state: &ShellState, argument: &str) -> Result<CommandOutput, DaemonError> {
    let target = resolve(&state.working_dir, argument);
    let bytes = tokio::fs::read(&target).await.map_err(DaemonError::Filesystem)?;
    let truncated = &bytes[..bytes.len().min(CAT_MAX_BYTES)];
    let lines = truncated
        .chunks(CAT_LINE_BYTES)
        .map(<[u8]>::to_vec)
        .collect();
    Ok(CommandOutput::with_data(lines, "OK"))
}

async fn touch(path: &Path) -> Result<(), DaemonError> {
    tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .await
        .map_err(DaemonError::Filesystem)?;
    Ok(())
}

async fn stat(state: &ShellState, argument: &str) -> Result<CommandOutput, DaemonError> {
    let target = resolve(&state.working_dir, argument);
    let metadata = tokio::fs::metadata(&target).await.map_err(DaemonError::Filesystem)?;
    let kind = if metadata.is_dir() { "dir" } else { "file" };
    let mode = metadata.permissions().mode() & 0o777;
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let line = format!("{name} {} {kind} {mode:o}\n", metadata.len());
    Ok(CommandOutput::with_data(vec![line.into_bytes()], "OK"))
}

async fn chmod(state: &ShellState, argument: &str) -> Result<CommandOutput, DaemonError> {
    let (mode_text, path_text) = split_two(argument)?;
    let mode = u32::from_str_radix(mode_text, 8)
        .map_err(|_| DaemonError::protocol(format!("invalid octal mode: {mode_text}")))?;
    let target = resolve(&state.working_dir, path_text);
    tokio::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(DaemonError::Filesystem)?;
    Ok(CommandOutput::ok("OK"))
}

fn split_two(argument: &str) -> Result<(&str, &str), DaemonError> {
    let mut parts = argument.split_whitespace();
    let first = parts
        .next()
        .ok_or_else(|| DaemonError::protocol("expected two whitespace-separated arguments"))?;
    let second = parts
        .next()
        .ok_or_else(|| DaemonError::protocol("expected two whitespace-separated arguments"))?;
    Ok((first, second))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn state_at(dir: &Path) -> ShellState {
        ShellState {
            active: true,
            working_dir: dir.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn pwd_reports_the_working_directory() {
        let dir = tempdir().unwrap();
        let mut state = state_at(dir.path());
        let output = exec(&mut state, "pwd").await.unwrap();
        assert_eq!(output.data.len(), 1);
    }

    #[tokio::test]
    async fn mkdir_then_ls_shows_the_new_entry() {
        let dir = tempdir().unwrap();
        let mut state = state_at(dir.path());
        exec(&mut state, "mkdir sub").await.unwrap();
        let output = exec(&mut state, "ls").await.unwrap();
        assert!(output.data.iter().any(|line| line == b"sub\n"));
    }

    #[tokio::test]
    async fn cd_updates_working_dir_and_rejects_missing_target() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let mut state = state_at(dir.path());

        exec(&mut state, "cd sub").await.unwrap();
        assert_eq!(state.working_dir, dir.path().join("sub"));

        let err = exec(&mut state, "cd does-not-exist").await.unwrap_err();
        assert!(matches!(err, DaemonError::Filesystem(_)));
    }

    #[tokio::test]
    async fn cd_with_no_argument_goes_to_default_dir() {
        let dir = tempdir().unwrap();
        let mut state = state_at(dir.path());
        // DEFAULT_SHELL_DIR (/data) may not exist in the sandbox, so this
        // only checks path resolution, not a successful cd.
        let resolved = resolve(&state.working_dir, "");
        assert_eq!(resolved, PathBuf::from(DEFAULT_SHELL_DIR));
        let _ = &mut state;
    }

    #[tokio::test]
    async fn echo_returns_its_argument() {
        let dir = tempdir().unwrap();
        let mut state = state_at(dir.path());
        let output = exec(&mut state, "echo hello world").await.unwrap();
        assert_eq!(output.data, vec![b"hello world\n".to_vec()]);
    }

    #[tokio::test]
    async fn touch_then_stat_reports_a_file() {
        let dir = tempdir().unwrap();
        let mut state = state_at(dir.path());
        exec(&mut state, "touch a.txt").await.unwrap();
        let output = exec(&mut state, "stat a.txt").await.unwrap();
        let line = String::from_utf8(output.data[0].clone()).unwrap();
        assert!(line.contains("file"));
    }

    #[tokio::test]
    async fn chmod_parses_octal_mode() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        let mut state = state_at(dir.path());
        exec(&mut state, "chmod 0644 a.txt").await.unwrap();
        let mode = std::fs::metadata(dir.path().join("a.txt"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[tokio::test]
    async fn unknown_command_is_a_protocol_error() {
        let dir = tempdir().unwrap();
        let mut state = state_at(dir.path());
        let err = exec(&mut state, "frobnicate").await.unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(_)));
    }
}
