use crate::error::{PlayerError, Result};
use crate::hardware::sink::{OutputSink, PortInfo, PortType};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Name of the virtual port that discards output
pub const NULL_PORT: &str = "null";

/// Everything a [`MockSink`] has been asked to do
#[derive(Debug, Default)]
pub struct MockLog {
    /// Messages in delivery order with the time they arrived
    pub sent: Vec<(Instant, Vec<u8>)>,
    /// Number of reset requests
    pub resets: usize,
}

impl MockLog {
    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.sent.iter().map(|(_, m)| m.clone()).collect()
    }
}

/// Mock output for testing without an instrument
///
/// Records every message instead of transmitting it. The log is shared so
/// tests can inspect it while the sink is owned by a playback worker.
pub struct MockSink {
    name: String,
    log: Arc<Mutex<MockLog>>,
    send_delay: Option<Duration>,
    fail_sends: bool,
}

impl MockSink {
    /// Create a new mock output
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            log: Arc::new(Mutex::new(MockLog::default())),
            send_delay: None,
            fail_sends: false,
        }
    }

    /// Shared handle to the delivery log
    pub fn log(&self) -> Arc<Mutex<MockLog>> {
        self.log.clone()
    }

    /// Make every send take `delay`, simulating a stuck output
    pub fn set_send_delay(&mut self, delay: Duration) {
        self.send_delay = Some(delay);
    }

    /// Make every send fail
    pub fn set_fail_sends(&mut self, fail: bool) {
        self.fail_sends = fail;
    }
}

#[async_trait]
impl OutputSink for MockSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&mut self, message: &[u8]) -> Result<()> {
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_sends {
            return Err(PlayerError::Sink("Mock output failure".into()));
        }
        if let Ok(mut log) = self.log.lock() {
            log.sent.push((Instant::now(), message.to_vec()));
        }
        Ok(())
    }

    async fn reset(&mut self) -> Result<()> {
        if let Ok(mut log) = self.log.lock() {
            log.resets += 1;
        }
        Ok(())
    }
}

/// Virtual output that only logs what it would have sent
pub struct NullSink {
    name: String,
}

impl NullSink {
    pub fn new() -> Self {
        Self {
            name: NULL_PORT.to_string(),
        }
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutputSink for NullSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&mut self, message: &[u8]) -> Result<()> {
        debug!("[{}] {:02X?}", self.name, message);
        Ok(())
    }
}

/// List available virtual ports
pub fn list_virtual_ports() -> Vec<PortInfo> {
    vec![PortInfo {
        name: NULL_PORT.to_string(),
        port_type: PortType::Virtual,
        description: Some("Virtual output that discards everything".to_string()),
    }]
}
