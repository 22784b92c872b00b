// Shared transport configuration for building reqwest::Client instances.
//
// REST calls and the event stream need different client settings: a
// whole-request timeout would kill a healthy long-lived stream
// mid-flight, so the stream client carries a connect timeout only.

use std::time::Duration;

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Whole-request timeout for one-shot reads and writes.
    pub timeout: Duration,
    /// Connect timeout, applied to both client flavors.
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    /// Build the client used for one-shot REST operations.
    pub fn build_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent("lumen/0.1.0")
            .build()?;
        Ok(client)
    }

    /// Build the client used for the streaming subscription.
    ///
    /// No whole-request timeout: the response body is expected to stay
    /// open for the lifetime of the subscription.
    pub fn build_stream_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent("lumen/0.1.0")
            .build()?;
        Ok(client)
    }
}
