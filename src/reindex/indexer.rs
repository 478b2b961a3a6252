//! Launching the external indexer

use super::ReindexError;
use std::ffi::OsString;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Something that rebuilds an index and returns once the rebuild has run
pub trait IndexerLauncher: Send + Sync {
    fn launch(&self, index: &str) -> Result<(), ReindexError>;
}

impl<F> IndexerLauncher for F
where
    F: Fn(&str) -> Result<(), ReindexError> + Send + Sync,
{
    fn launch(&self, index: &str) -> Result<(), ReindexError> {
        self(index)
    }
}

/// `indexer --config <config> --rotate --quiet <index>`
#[derive(Debug, Clone)]
pub struct IndexerCommand {
    bin: PathBuf,
    config: PathBuf,
    extra_args: Vec<String>,
    output_log: Option<PathBuf>,
}

impl IndexerCommand {
    pub fn new(bin: impl Into<PathBuf>, config: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            config: config.into(),
            extra_args: vec!["--rotate".to_string(), "--quiet".to_string()],
            output_log: None,
        }
    }

    /// Replace the flags passed between `--config` and the index name
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Append the indexer's stdout and stderr to `path`
    pub fn with_output_log(mut self, path: Option<PathBuf>) -> Self {
        self.output_log = path;
        self
    }

    /// Arguments for rebuilding `index`
    pub fn args(&self, index: &str) -> Vec<OsString> {
        let mut args = Vec::with_capacity(self.extra_args.len() + 3);
        args.push(OsString::from("--config"));
        args.push(self.config.clone().into_os_string());
        args.extend(self.extra_args.iter().map(OsString::from));
        args.push(OsString::from(index));
        args
    }

    /// Open the output log for appending, falling back to /dev/null
    fn output(&self) -> (Stdio, Stdio) {
        let Some(path) = &self.output_log else {
            return (Stdio::null(), Stdio::null());
        };

        let opened = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|file| Ok((file.try_clone()?, file)));

        match opened {
            Ok((out, err)) => (Stdio::from(out), Stdio::from(err)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not open indexer log");
                (Stdio::null(), Stdio::null())
            }
        }
    }
}

impl IndexerLauncher for IndexerCommand {
    fn launch(&self, index: &str) -> Result<(), ReindexError> {
        let (stdout, stderr) = self.output();
        let args = self.args(index);
        debug!(bin = %self.bin.display(), ?args, "launching indexer");

        let status = Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .status()
            .map_err(|source| ReindexError::Launch {
                program: self.bin.clone(),
                source,
            })?;

        if !status.success() {
            return Err(ReindexError::Exit {
                program: self.bin.clone(),
                status,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_layout() {
        let cmd = IndexerCommand::new("/usr/bin/indexer", "/etc/sphinxsearch/sphinx.conf");
        let args: Vec<String> = cmd
            .args("products")
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();

        assert_eq!(
            args,
            vec![
                "--config",
                "/etc/sphinxsearch/sphinx.conf",
                "--rotate",
                "--quiet",
                "products"
            ]
        );
    }

    #[test]
    fn test_custom_extra_args() {
        let cmd = IndexerCommand::new("indexer", "sphinx.conf").with_extra_args(vec![]);
        assert_eq!(cmd.args("main").len(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn test_successful_exit() {
        let cmd = IndexerCommand::new("true", "sphinx.conf");
        assert!(cmd.launch("main").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_is_error() {
        let cmd = IndexerCommand::new("false", "sphinx.conf");
        let err = cmd.launch("main").unwrap_err();
        assert!(matches!(err, ReindexError::Exit { .. }));
    }

    #[test]
    fn test_missing_binary_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = IndexerCommand::new(dir.path().join("no-such-indexer"), "sphinx.conf");
        let err = cmd.launch("main").unwrap_err();
        assert!(matches!(err, ReindexError::Launch { .. }));
        assert!(err.to_string().contains("no-such-indexer"));
    }

    #[cfg(unix)]
    #[test]
    fn test_output_is_appended_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("indexer.log");
        std::fs::write(&log, "previous run\n").unwrap();

        // `echo` prints its arguments, which stands in for indexer output
        let cmd = IndexerCommand::new("echo", "sphinx.conf").with_output_log(Some(log.clone()));
        cmd.launch("main").unwrap();

        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.starts_with("previous run\n"));
        assert!(content.contains("--config sphinx.conf --rotate --quiet main"));
    }
}
