//! Instrumented in-memory transport for tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::ServerProfile;
use crate::ssh::{Connector, ExecOutput, InteractiveChannel, RemoteConnection, SshError};

#[derive(Default)]
struct FakeState {
    attempts: AtomicUsize,
    live: AtomicUsize,
    peak: AtomicUsize,
    closes: AtomicUsize,
    connect_delay: Mutex<Duration>,
    exec_delay: Mutex<Duration>,
    failing_hosts: Mutex<HashSet<String>>,
    failing_closes: Mutex<HashSet<String>>,
    panicking_closes: Mutex<HashSet<String>>,
    exec_outputs: Mutex<HashMap<String, ExecOutput>>,
    interactive_chunks: Mutex<Vec<Vec<u8>>>,
    interactive_hangs: AtomicBool,
    drop_on_exec: AtomicBool,
    interactive_closes: AtomicUsize,
    exec_log: Mutex<Vec<String>>,
    interactive_log: Mutex<Vec<String>>,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
}

/// Connector that counts handshakes and concurrently open connections
#[derive(Clone, Default)]
pub(crate) struct FakeConnector {
    state: Arc<FakeState>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_delay(self, delay: Duration) -> Self {
        *self.state.connect_delay.lock() = delay;
        self
    }

    pub fn with_exec_delay(self, delay: Duration) -> Self {
        *self.state.exec_delay.lock() = delay;
        self
    }

    pub fn fail_host(&self, host: &str) {
        self.state.failing_hosts.lock().insert(host.to_string());
    }

    /// Closing connections to `host` drops the transport but reports an error
    pub fn fail_close(&self, host: &str) {
        self.state.failing_closes.lock().insert(host.to_string());
    }

    /// Closing connections to `host` panics after dropping the transport
    pub fn panic_close(&self, host: &str) {
        self.state.panicking_closes.lock().insert(host.to_string());
    }

    pub fn script_exec(&self, command: &str, stdout: &str, stderr: &str) {
        self.state.exec_outputs.lock().insert(
            command.to_string(),
            ExecOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                exit_status: Some(if stderr.is_empty() { 0 } else { 1 }),
            },
        );
    }

    pub fn script_interactive(&self, chunks: &[&str]) {
        *self.state.interactive_chunks.lock() =
            chunks.iter().map(|c| c.as_bytes().to_vec()).collect();
    }

    /// Raw terminal chunks, free to split escapes and characters anywhere
    pub fn script_interactive_bytes(&self, chunks: &[&[u8]]) {
        *self.state.interactive_chunks.lock() = chunks.iter().map(|c| c.to_vec()).collect();
    }

    /// Interactive channels never report completion after their chunks
    pub fn hang_interactive(&self) {
        self.state.interactive_hangs.store(true, Ordering::SeqCst);
    }

    /// The next exec finds the transport gone even though it looked alive
    pub fn drop_on_exec(&self) {
        self.state.drop_on_exec.store(true, Ordering::SeqCst);
    }

    /// Handshakes attempted, successful or not
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn interactive_closes(&self) -> usize {
        self.state.interactive_closes.load(Ordering::SeqCst)
    }

    pub fn exec_log(&self) -> Vec<String> {
        self.state.exec_log.lock().clone()
    }

    pub fn interactive_log(&self) -> Vec<String> {
        self.state.interactive_log.lock().clone()
    }

    pub fn last_connection(&self) -> Option<Arc<FakeConnection>> {
        self.state.connections.lock().last().cloned()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, profile: &ServerProfile) -> Result<Arc<dyn RemoteConnection>, SshError> {
        let n = self.state.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.state.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.state.failing_hosts.lock().contains(&profile.host) {
            return Err(SshError::ConnectionFailed(format!(
                "{} refused the connection",
                profile.host
            )));
        }

        let live = self.state.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(live, Ordering::SeqCst);

        let conn = Arc::new(FakeConnection {
            id: format!("fake-{}", n),
            host: profile.host.clone(),
            open: AtomicBool::new(true),
            state: self.state.clone(),
        });
        self.state.connections.lock().push(conn.clone());
        Ok(conn)
    }
}

pub(crate) struct FakeConnection {
    id: String,
    host: String,
    open: AtomicBool,
    state: Arc<FakeState>,
}

impl FakeConnection {
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Simulate the server dropping the transport
    pub fn kill(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.state.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl RemoteConnection for FakeConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_active(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn exec(&self, command: &str) -> Result<ExecOutput, SshError> {
        if !self.is_active() {
            return Err(SshError::Disconnected);
        }
        if self.state.drop_on_exec.swap(false, Ordering::SeqCst) {
            self.kill();
            return Err(SshError::Disconnected);
        }
        self.state.exec_log.lock().push(command.to_string());

        let delay = *self.state.exec_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.state.exec_outputs.lock().get(command).cloned();
        Ok(scripted.unwrap_or_default())
    }

    async fn open_interactive(
        &self,
        command: &str,
    ) -> Result<Box<dyn InteractiveChannel>, SshError> {
        if !self.is_active() {
            return Err(SshError::Disconnected);
        }
        self.state.interactive_log.lock().push(command.to_string());

        let chunks = self.state.interactive_chunks.lock().clone();
        Ok(Box::new(FakeInteractive {
            chunks: chunks.into(),
            hangs: self.state.interactive_hangs.load(Ordering::SeqCst),
            state: self.state.clone(),
        }))
    }

    async fn close(&self) -> Result<(), SshError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.kill();

        if self.state.panicking_closes.lock().contains(&self.host) {
            panic!("close of {} blew up", self.host);
        }
        if self.state.failing_closes.lock().contains(&self.host) {
            return Err(SshError::ChannelError(format!(
                "{} did not acknowledge disconnect",
                self.host
            )));
        }
        Ok(())
    }
}

struct FakeInteractive {
    chunks: VecDeque<Vec<u8>>,
    hangs: bool,
    state: Arc<FakeState>,
}

#[async_trait]
impl InteractiveChannel for FakeInteractive {
    async fn next_output(&mut self) -> Option<Vec<u8>> {
        if let Some(chunk) = self.chunks.pop_front() {
            tokio::task::yield_now().await;
            return Some(chunk);
        }
        if self.hangs {
            std::future::pending::<()>().await;
        }
        None
    }

    async fn close(&mut self) {
        self.state.interactive_closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) fn profile(host: &str) -> ServerProfile {
    ServerProfile::new("web1", host, "root", "longpw")
}
