//! Client for Edge Impulse Linux model runners (`.eim` files).
//!
//! An `.eim` file is an executable that serves the model over a Unix socket.
//! Requests are JSON objects carrying an incrementing `id`; every response is
//! a JSON object terminated by a NUL byte.

use super::{ClassificationResult, Classifier, ClassifierError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// How long to wait for a freshly spawned runner to open its socket.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Model description returned by the runner's `hello` handshake.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub model_parameters: ModelParameters,
    #[serde(default)]
    pub project: Option<ProjectInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelParameters {
    /// Length of the raw feature vector
    pub input_features_count: usize,
    /// Sampling frequency the model was trained on (Hz)
    #[serde(default)]
    pub frequency: Option<f64>,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub deploy_version: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    result: ClassificationResult,
}

/// A running `.eim` model.
pub struct EimRunner {
    stream: UnixStream,
    child: Option<Child>,
    socket_path: Option<PathBuf>,
    next_id: u64,
    timeout: Option<Duration>,
    /// Received bytes not yet split into frames
    pending: Vec<u8>,
    info: ModelInfo,
}

impl EimRunner {
    /// Launch a model file and complete the handshake.
    ///
    /// `timeout` bounds every later request; `None` waits indefinitely.
    pub fn spawn(
        model_path: impl AsRef<Path>,
        timeout: Option<Duration>,
    ) -> Result<Self, ClassifierError> {
        let model_path = model_path.as_ref();
        let socket_path =
            std::env::temp_dir().join(format!("heartmonitor-{}.sock", uuid::Uuid::new_v4()));

        let mut child = Command::new(model_path)
            .arg(&socket_path)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| {
                ClassifierError::Init(format!("failed to start model {model_path:?}: {e}"))
            })?;

        let stream = match wait_for_socket(&socket_path, &mut child) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                let _ = std::fs::remove_file(&socket_path);
                return Err(e);
            }
        };

        tracing::info!(model = ?model_path, socket = ?socket_path, "model runner started");

        let mut runner = match Self::handshake(stream, timeout) {
            Ok(runner) => runner,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                let _ = std::fs::remove_file(&socket_path);
                return Err(e);
            }
        };
        runner.child = Some(child);
        runner.socket_path = Some(socket_path);
        Ok(runner)
    }

    /// Attach to a runner that is already listening on `socket_path`.
    pub fn connect(
        socket_path: impl AsRef<Path>,
        timeout: Option<Duration>,
    ) -> Result<Self, ClassifierError> {
        let socket_path = socket_path.as_ref();
        let stream = UnixStream::connect(socket_path).map_err(|e| {
            ClassifierError::Init(format!("failed to connect to {socket_path:?}: {e}"))
        })?;
        Self::handshake(stream, timeout)
    }

    fn handshake(stream: UnixStream, timeout: Option<Duration>) -> Result<Self, ClassifierError> {
        stream
            .set_read_timeout(timeout)
            .and_then(|_| stream.set_write_timeout(timeout))
            .map_err(|e| ClassifierError::Init(format!("failed to configure socket: {e}")))?;

        let mut runner = Self {
            stream,
            child: None,
            socket_path: None,
            next_id: 1,
            timeout,
            pending: Vec::new(),
            info: ModelInfo {
                model_parameters: ModelParameters {
                    input_features_count: 0,
                    frequency: None,
                    labels: Vec::new(),
                },
                project: None,
            },
        };

        let response = runner
            .request(json!({ "hello": 1 }))
            .map_err(|e| ClassifierError::Init(e.to_string()))?;
        runner.info = serde_json::from_value(response)
            .map_err(|e| ClassifierError::Init(format!("invalid hello response: {e}")))?;

        if runner.info.model_parameters.input_features_count == 0 {
            return Err(ClassifierError::Init(
                "model reports an empty input vector".to_string(),
            ));
        }

        Ok(runner)
    }

    /// Model description from the handshake.
    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn request(&mut self, mut message: Value) -> Result<Value, ClassifierError> {
        let id = self.next_id;
        self.next_id += 1;
        message["id"] = json!(id);

        let payload = serde_json::to_vec(&message)
            .map_err(|e| ClassifierError::Call(format!("failed to encode request: {e}")))?;
        self.stream
            .write_all(&payload)
            .map_err(|e| self.io_error(e))?;

        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        loop {
            while let Some(frame) = self.next_frame() {
                let response: Value = serde_json::from_slice(&frame)
                    .map_err(|e| ClassifierError::Call(format!("invalid response: {e}")))?;

                // A late answer to an abandoned request
                if let Some(got) = response.get("id").and_then(Value::as_u64) {
                    if got != id {
                        tracing::debug!(expected = id, got, "discarding stale runner response");
                        continue;
                    }
                }

                return check_success(response);
            }

            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(ClassifierError::Timeout(self.timeout.unwrap_or_default()));
                }
                self.stream
                    .set_read_timeout(Some(remaining))
                    .map_err(|e| self.io_error(e))?;
            }

            let mut chunk = [0u8; 1024];
            let n = self.stream.read(&mut chunk).map_err(|e| self.io_error(e))?;
            if n == 0 {
                return Err(ClassifierError::Call(
                    "model runner closed the connection".to_string(),
                ));
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }

    /// Take the next NUL-terminated frame from the receive buffer.
    fn next_frame(&mut self) -> Option<Vec<u8>> {
        let end = self.pending.iter().position(|&b| b == 0)?;
        let mut frame: Vec<u8> = self.pending.drain(..=end).collect();
        frame.pop();
        Some(frame)
    }

    fn io_error(&self, e: std::io::Error) -> ClassifierError {
        match (e.kind(), self.timeout) {
            (ErrorKind::WouldBlock | ErrorKind::TimedOut, Some(timeout)) => {
                ClassifierError::Timeout(timeout)
            }
            _ => ClassifierError::Call(format!("socket error: {e}")),
        }
    }
}

fn check_success(response: Value) -> Result<Value, ClassifierError> {
    if response.get("success").and_then(Value::as_bool) != Some(true) {
        let message = response
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(ClassifierError::Call(message.to_string()));
    }
    Ok(response)
}

impl Classifier for EimRunner {
    fn input_len(&self) -> usize {
        self.info.model_parameters.input_features_count
    }

    fn classify(&mut self, features: &[f32]) -> Result<ClassificationResult, ClassifierError> {
        if features.len() != self.input_len() {
            return Err(ClassifierError::Call(format!(
                "feature vector has {} values, model expects {}",
                features.len(),
                self.input_len()
            )));
        }

        let response = self.request(json!({ "classify": features }))?;
        let parsed: ClassifyResponse = serde_json::from_value(response)
            .map_err(|e| ClassifierError::Call(format!("invalid classify response: {e}")))?;
        Ok(parsed.result)
    }

    fn stop(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);

        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                tracing::debug!("model runner already exited: {e}");
            }
            let _ = child.wait();
            tracing::info!("model runner stopped");
        }

        if let Some(path) = self.socket_path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl Drop for EimRunner {
    fn drop(&mut self) {
        self.stop();
    }
}

fn wait_for_socket(socket_path: &Path, child: &mut Child) -> Result<UnixStream, ClassifierError> {
    let deadline = Instant::now() + STARTUP_TIMEOUT;
    loop {
        if let Ok(stream) = UnixStream::connect(socket_path) {
            return Ok(stream);
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                return Err(ClassifierError::Init(format!(
                    "model runner exited during startup ({status})"
                )))
            }
            Ok(None) => {}
            Err(e) => return Err(ClassifierError::Init(format!("model runner lost: {e}"))),
        }

        if Instant::now() >= deadline {
            return Err(ClassifierError::Init(format!(
                "model runner did not open {socket_path:?} within {STARTUP_TIMEOUT:?}"
            )));
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}
