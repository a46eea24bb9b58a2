use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions & stream transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Close a session after this long without client activity.
    #[serde(default = "d_1800")]
    pub idle_timeout_secs: u64,
    /// Frames buffered per session before the session is dropped.
    #[serde(default = "d_64")]
    pub outbound_queue: usize,
    /// Interval between keep-alive frames on the stream.
    #[serde(default = "d_30")]
    pub keepalive_secs: u64,
    /// How long shutdown waits for in-flight tool calls.
    #[serde(default = "d_10")]
    pub shutdown_grace_secs: u64,
    /// How often the reaper looks for idle sessions and expired grants.
    #[serde(default = "d_30")]
    pub reap_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: d_1800(),
            outbound_queue: d_64(),
            keepalive_secs: d_30(),
            shutdown_grace_secs: d_10(),
            reap_interval_secs: d_30(),
        }
    }
}

fn d_1800() -> u64 {
    1800
}
fn d_64() -> usize {
    64
}
fn d_30() -> u64 {
    30
}
fn d_10() -> u64 {
    10
}
