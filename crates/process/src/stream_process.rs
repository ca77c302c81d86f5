//! Subprocess wrapper for `Protocol::Stream` agents (§4.C5): accumulates
//! stdout/stderr into a UTF-8 buffer, splits on newlines keeping the
//! trailing partial line across reads, and hands each complete line to
//! the executor's parser.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ie_domain::{EntryType, Error, Metadata, NormalizedEntry, Result};
use ie_executors::{CommandSpec, ExecutorStrategy};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

/// Accumulates raw bytes and yields complete UTF-8 lines, carrying a
/// trailing partial line across calls. Lossy-decodes on invalid UTF-8
/// rather than dropping the stream.
#[derive(Default)]
struct LineAccumulator {
    carry: String,
}

impl LineAccumulator {
    fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.carry.push_str(&String::from_utf8_lossy(bytes));
        let mut lines = Vec::new();
        while let Some(pos) = self.carry.find('\n') {
            let line = self.carry[..pos].to_string();
            self.carry.drain(..=pos);
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    fn flush(&mut self) -> Option<String> {
        if self.carry.trim().is_empty() {
            self.carry.clear();
            None
        } else {
            Some(std::mem::take(&mut self.carry))
        }
    }
}

async fn pump<R: tokio::io::AsyncRead + Unpin>(
    mut reader: R,
    strategy: Arc<dyn ExecutorStrategy>,
    entry_tx: mpsc::Sender<NormalizedEntry>,
) {
    let mut acc = LineAccumulator::default();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for line in acc.feed(&buf[..n]) {
                    for entry in strategy.parse_line(&line) {
                        let _ = entry_tx.send(entry).await;
                    }
                }
            }
            Err(e) => {
                let mut metadata = Metadata::new();
                metadata.insert("isError".into(), serde_json::Value::Bool(true));
                let _ = entry_tx
                    .send(NormalizedEntry {
                        entry_type: EntryType::ErrorMessage,
                        content: format!("stream read error: {e}"),
                        metadata,
                        tool_call: None,
                    })
                    .await;
                break;
            }
        }
    }
    if let Some(line) = acc.flush() {
        for entry in strategy.parse_line(&line) {
            let _ = entry_tx.send(entry).await;
        }
    }
}

/// One spawned `Protocol::Stream` agent process. Lives for exactly one
/// turn: created by a fresh spawn or a follow-up spawn, runs to exit.
pub struct StreamProcess {
    child: tokio::sync::Mutex<tokio::process::Child>,
    killed: AtomicBool,
}

impl StreamProcess {
    pub fn spawn(
        spec: &CommandSpec,
        strategy: Arc<dyn ExecutorStrategy>,
        entry_tx: mpsc::Sender<NormalizedEntry>,
    ) -> Result<Arc<Self>> {
        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .stdin(std::process::Stdio::null())
            .env_clear();
        for (k, v) in &spec.envs {
            cmd.env(k, v);
        }
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| Error::Spawn {
            engine: spec.program.clone(),
            message: e.to_string(),
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        if let Some(stdout) = stdout {
            tokio::spawn(pump(stdout, strategy.clone(), entry_tx.clone()));
        }
        if let Some(stderr) = stderr {
            tokio::spawn(pump(stderr, strategy, entry_tx));
        }

        Ok(Arc::new(Self {
            child: tokio::sync::Mutex::new(child),
            killed: AtomicBool::new(false),
        }))
    }

    pub async fn kill(&self) -> Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        let mut child = self.child.lock().await;
        child.kill().await.map_err(Error::from)
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) -> Result<std::process::ExitStatus> {
        let mut child = self.child.lock().await;
        child.wait().await.map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_carries_partial_line_across_feeds() {
        let mut acc = LineAccumulator::default();
        assert!(acc.feed(b"hello wor").is_empty());
        let lines = acc.feed(b"ld\nsecond\npart");
        assert_eq!(lines, vec!["hello world".to_string(), "second".to_string()]);
        assert_eq!(acc.flush(), Some("part".to_string()));
    }

    #[test]
    fn accumulator_skips_blank_lines() {
        let mut acc = LineAccumulator::default();
        let lines = acc.feed(b"a\n\nb\n");
        assert_eq!(lines, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn spawn_runs_echo_style_script_and_forwards_entries() {
        let spec = CommandSpec {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "printf '{\"type\":\"assistant\",\"text\":\"hi\"}\\n'".to_string()],
            envs: Vec::new(),
            cwd: None,
        };
        let strategy: Arc<dyn ExecutorStrategy> = Arc::new(ie_executors::EchoExecutor);
        let (tx, mut rx) = mpsc::channel(16);
        let process = StreamProcess::spawn(&spec, strategy, tx).unwrap();
        let status = process.wait().await.unwrap();
        assert!(status.success());
        let entry = rx.recv().await.expect("entry forwarded");
        assert_eq!(entry.content, "hi");
    }
}
