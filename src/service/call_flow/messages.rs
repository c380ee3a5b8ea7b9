use std::path::PathBuf;
use std::sync::OnceLock;

use serde::Deserialize;

/// 同意フロー等で読み上げる定型文。YAML で差し替え可能。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlowMessages {
    pub consent_prompt: String,
    pub consent_reprompt: String,
    pub goodbye: String,
    pub decline_goodbye: String,
}

impl Default for FlowMessages {
    fn default() -> Self {
        Self {
            consent_prompt:
                "Press 1 to hear an important message, or press 2 to decline.".to_string(),
            consent_reprompt:
                "Sorry, we did not receive a valid response. Press 1 to continue or 2 to decline."
                    .to_string(),
            goodbye: "We were unable to reach you. Goodbye.".to_string(),
            decline_goodbye: "Understood. You will not be contacted again. Goodbye.".to_string(),
        }
    }
}

static FLOW_MESSAGES: OnceLock<FlowMessages> = OnceLock::new();

pub fn flow_messages() -> &'static FlowMessages {
    FLOW_MESSAGES.get_or_init(load_flow_messages)
}

fn load_flow_messages() -> FlowMessages {
    let path = messages_path();
    match std::fs::read_to_string(&path) {
        Ok(text) => match serde_yaml::from_str::<FlowMessages>(&text) {
            Ok(messages) => messages,
            Err(err) => {
                log::warn!(
                    "[callflow] failed to parse messages {:?}: {:?}. Using default.",
                    path,
                    err
                );
                FlowMessages::default()
            }
        },
        Err(_) => FlowMessages::default(),
    }
}

fn messages_path() -> PathBuf {
    let default_path = PathBuf::from("flow_messages.yaml");
    std::env::var("CALL_FLOW_MESSAGES")
        .ok()
        .map(PathBuf::from)
        .unwrap_or(default_path)
}
