//! Agent CLI invocation building.
//!
//! Translates resolved session launch arguments into the command line and
//! initial stdin envelope the wrapped agent runtime expects.

use crate::spawn::SpawnConfig;

/// Resolved launch arguments for one agent invocation.
#[derive(Debug, Clone, Default)]
pub struct AgentInvocation {
    pub binary_path: String,
    pub working_dir: String,
    pub prompt: String,
    /// Runtime session id to resume, if this session already has history.
    pub resume_session_id: Option<String>,
    pub model: Option<String>,
    pub permission_mode: Option<String>,
}

impl AgentInvocation {
    /// Build the SpawnConfig for this invocation.
    pub fn build(self) -> SpawnConfig {
        let mode = self
            .permission_mode
            .unwrap_or_else(|| "default".to_string());
        let mut args = vec![
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--input-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--permission-mode".to_string(),
            mode,
        ];

        if let Some(ref model) = self.model {
            if !model.is_empty() {
                args.push("--model".to_string());
                args.push(model.clone());
            }
        }

        if let Some(ref id) = self.resume_session_id {
            args.push("--resume".to_string());
            args.push(id.clone());
        }

        SpawnConfig::new(&self.binary_path, args)
            .working_dir(&self.working_dir)
            .initial_stdin(user_envelope(&self.prompt))
    }
}

/// Wrap message content in the `user` envelope written to agent stdin.
pub fn user_envelope(content: &str) -> String {
    serde_json::json!({
        "type": "user",
        "message": {
            "role": "user",
            "content": content
        }
    })
    .to_string()
}
