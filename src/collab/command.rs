use super::{types::*, Notifier, ScanClient};
use crate::config::{self, Config};
use anyhow::{anyhow, Context, Result};
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Runs a configured program with a JSON request on stdin and parses a JSON
/// response from stdout, killing it once the timeout elapses.
pub struct CommandRunner {
    settings: config::Command,
    keep_stderr: bool,
}

impl CommandRunner {
    pub fn new(settings: &config::Command, keep_stderr: bool) -> Result<Self> {
        if settings.program.trim().is_empty() {
            return Err(anyhow!("collaborator program is empty"));
        }
        let as_path = Path::new(&settings.program);
        if settings.program.contains(std::path::MAIN_SEPARATOR) && !as_path.exists() {
            return Err(anyhow!("missing collaborator program: {}", as_path.display()));
        }
        Ok(Self {
            settings: settings.clone(),
            keep_stderr,
        })
    }

    pub fn run_json<I: serde::Serialize, O: for<'de> serde::Deserialize<'de>>(
        &self,
        input: &I,
    ) -> Result<O> {
        let program = &self.settings.program;
        let timeout = Duration::from_secs(self.settings.timeout_seconds.max(1));
        debug!("collaborator run {} timeout={:?}", program, timeout);

        let mut cmd = Command::new(program);
        cmd.args(&self.settings.args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        for (k, v) in &self.settings.env {
            cmd.env(k, v);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning collaborator: {program}"))?;

        {
            let mut stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
            let bytes = serde_json::to_vec(input)?;
            stdin.write_all(&bytes)?;
            stdin.flush().ok();
        }

        let output = wait_with_timeout(&mut child, timeout)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "collaborator failed: {program} ({})\n{}",
                output.status,
                stderr.trim()
            ));
        }

        if self.keep_stderr && !output.stderr.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("collaborator stderr {}: {}", program, stderr.trim());
        }

        let out: O = serde_json::from_slice(&output.stdout)
            .with_context(|| format!("parsing collaborator JSON output: {program}"))?;
        Ok(out)
    }
}

pub struct CommandScanner {
    runner: CommandRunner,
}

impl CommandScanner {
    pub fn new(cfg: &Config) -> Result<Self> {
        Ok(Self {
            runner: CommandRunner::new(
                &cfg.collaborators.scanner,
                cfg.debug.keep_collaborator_stderr,
            )?,
        })
    }
}

impl ScanClient for CommandScanner {
    fn submit(&self, req: &SubmitRequest) -> Result<String> {
        let out: ScanResponse = self.runner.run_json(req)?;
        match (out.ok, out.job_id) {
            (true, Some(job_id)) => Ok(job_id),
            (true, None) => Err(anyhow!("scanning service accepted the file but returned no job id")),
            (false, _) => Err(anyhow!(
                "scanning service rejected submission: {}",
                out.error.unwrap_or_else(|| "no error given".to_string())
            )),
        }
    }
}

pub struct CommandNotifier {
    runner: CommandRunner,
}

impl CommandNotifier {
    pub fn new(cfg: &Config) -> Result<Self> {
        Ok(Self {
            runner: CommandRunner::new(
                &cfg.collaborators.notifier,
                cfg.debug.keep_collaborator_stderr,
            )?,
        })
    }

    fn send(&self, req: &NotifyRequest) -> Result<()> {
        let out: NotifyResponse = self.runner.run_json(req)?;
        if !out.ok {
            return Err(anyhow!(
                "notification rejected: {}",
                out.error.unwrap_or_else(|| "no error given".to_string())
            ));
        }
        Ok(())
    }
}

impl Notifier for CommandNotifier {
    fn notify_text(&self, user_ref: &str, text: &str) -> Result<()> {
        self.send(&NotifyRequest::Text {
            to: user_ref.to_string(),
            text: text.to_string(),
        })
    }

    fn notify_document(&self, user_ref: &str, doc_ref: &str, filename: &str) -> Result<()> {
        self.send(&NotifyRequest::Document {
            to: user_ref.to_string(),
            doc_ref: doc_ref.to_string(),
            filename: filename.to_string(),
        })
    }
}

type Drain = std::thread::JoinHandle<Result<Vec<u8>>>;

// A scanner upload can print a lot of progress on stderr; both pipes are read
// on their own threads so the child never stalls on a full pipe.
fn drain<R: Read + Send + 'static>(pipe: Option<R>, name: &'static str) -> Drain {
    std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)
                .with_context(|| format!("reading collaborator {name}"))?;
        }
        Ok(buf)
    })
}

fn collect(handle: Drain, name: &str) -> Result<Vec<u8>> {
    handle
        .join()
        .map_err(|_| anyhow!("collaborator {name} reader panicked"))?
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Output> {
    let stdout = drain(child.stdout.take(), "stdout");
    let stderr = drain(child.stderr.take(), "stderr");

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait().with_context(|| "polling collaborator")? {
            break status;
        }
        if Instant::now() >= deadline {
            // The job may still be accepted upstream; the caller treats this as a failure.
            warn!("collaborator pid={} killed after {:?}", child.id(), timeout);
            let _ = child.kill();
            child.wait().with_context(|| "reaping killed collaborator")?;
            let stderr = collect(stderr, "stderr").unwrap_or_default();
            let _ = collect(stdout, "stdout");
            return Err(anyhow!(
                "collaborator exceeded timeout ({:?}); stderr: {}",
                timeout,
                String::from_utf8_lossy(&stderr).trim()
            ));
        }
        std::thread::sleep(Duration::from_millis(25));
    };

    Ok(Output {
        status,
        stdout: collect(stdout, "stdout")?,
        stderr: collect(stderr, "stderr")?,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str, timeout_seconds: u64) -> config::Command {
        config::Command {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            env: Default::default(),
            timeout_seconds,
        }
    }

    #[test]
    fn parses_scanner_response() {
        let runner = CommandRunner::new(
            &sh(r#"cat >/dev/null; echo '{"ok":true,"report_id":4821}'"#, 5),
            false,
        )
        .unwrap();
        let scanner = CommandScanner { runner };
        let req = SubmitRequest {
            input_ref: "media:1".into(),
            filename: "essay.pdf".into(),
            options: Default::default(),
        };
        assert_eq!(scanner.submit(&req).unwrap(), "4821");
    }

    #[test]
    fn rejected_submission_is_an_error() {
        let runner = CommandRunner::new(
            &sh(r#"cat >/dev/null; echo '{"ok":false,"error":"quota"}'"#, 5),
            false,
        )
        .unwrap();
        let scanner = CommandScanner { runner };
        let req = SubmitRequest {
            input_ref: "media:1".into(),
            filename: "essay.pdf".into(),
            options: Default::default(),
        };
        let err = scanner.submit(&req).unwrap_err();
        assert!(format!("{err:#}").contains("quota"));
    }

    #[test]
    fn slow_collaborator_times_out() {
        let runner = CommandRunner::new(&sh("exec sleep 5", 1), false).unwrap();
        let notifier = CommandNotifier { runner };
        let err = notifier.notify_text("u1", "hi").unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn missing_program_path_is_rejected() {
        let mut settings = sh("true", 1);
        settings.program = format!("no-such-dir{}notify", std::path::MAIN_SEPARATOR);
        assert!(CommandRunner::new(&settings, false).is_err());
    }
}
