use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Budget for one tool invocation, retries included.
    #[serde(default = "d_30")]
    pub default_timeout_secs: u64,
    /// Handlers running at once across all sessions.
    #[serde(default = "d_32")]
    pub worker_pool_size: usize,
    /// Per-tool timeout overrides (tool name → seconds). These win over the
    /// tool's built-in override.
    #[serde(default)]
    pub timeouts: HashMap<String, u64>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: d_30(),
            worker_pool_size: d_32(),
            timeouts: HashMap::new(),
        }
    }
}

fn d_30() -> u64 {
    30
}
fn d_32() -> usize {
    32
}
