// Per-provider adapter: endpoint, credential header, model table and
// tool-choice policy for one upstream.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::proxy::tools::StructuredChoicePolicy;

const DEEPSEEK_ENDPOINT: &str = "https://api.deepseek.com";
const DEEPSEEK_BETA_ENDPOINT: &str = "https://api.deepseek.com/beta";
const OPENROUTER_ENDPOINT: &str = "https://openrouter.ai/api/v1";
const OLLAMA_ENDPOINT: &str = "http://localhost:11434/v1";

/// Alias clients like Cursor ask for.
pub const DEFAULT_ALIAS: &str = "gpt-4o";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ProviderProfile {
    pub name: String,

    pub base_url: String,

    #[serde(default = "default_chat_path")]
    pub chat_path: String,

    /// Env var holding the upstream credential. Unset means no credential.
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default = "default_credential_header")]
    pub credential_header: String,

    #[serde(default)]
    pub extra_headers: BTreeMap<String, String>,

    /// alias -> upstream model. Doubles as the allow-list.
    #[serde(default)]
    pub models: BTreeMap<String, String>,

    #[serde(default)]
    pub owned_by: Option<String>,

    #[serde(default = "default_true")]
    pub forward_tools: bool,

    #[serde(default)]
    pub structured_tool_choice: StructuredChoicePolicy,
}

fn default_chat_path() -> String {
    "/chat/completions".to_string()
}

fn default_credential_header() -> String {
    "Authorization".to_string()
}

fn default_true() -> bool {
    true
}

impl ProviderProfile {
    pub fn chat_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.chat_path.trim_start_matches('/')
        )
    }

    /// Header value for the credential. Bearer form for `Authorization`,
    /// raw key for anything else (e.g. `x-api-key`).
    pub fn credential_value(&self, key: &str) -> String {
        if self.credential_header.eq_ignore_ascii_case("authorization") {
            format!("Bearer {}", key)
        } else {
            key.to_string()
        }
    }

    /// `owned_by` for the models listing; falls back to the vendor prefix of
    /// the upstream model (`deepseek/deepseek-chat` -> `deepseek`), then the
    /// profile name.
    pub fn owner_for(&self, upstream_model: &str) -> String {
        if let Some(owner) = &self.owned_by {
            return owner.clone();
        }
        match upstream_model.split_once('/') {
            Some((vendor, _)) if !vendor.is_empty() => vendor.to_string(),
            _ => self.name.clone(),
        }
    }
}

fn single_alias(upstream_model: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(DEFAULT_ALIAS.to_string(), upstream_model.to_string())])
}

/// The profiles shipped with the relay. `env` supplies overrides such as
/// `OLLAMA_API_ENDPOINT`.
///
/// `OLLAMA_API_ENDPOINT` is the base of Ollama's OpenAI-compatible API
/// (`http://host:11434/v1`); `/chat/completions` is appended to it. A native
/// `/api` base such as `http://host:11434/api` would post to
/// `/api/chat/completions`, which Ollama does not serve.
pub fn builtin_profiles<F>(env: F) -> Vec<ProviderProfile>
where
    F: Fn(&str) -> Option<String>,
{
    let ollama_endpoint = env("OLLAMA_API_ENDPOINT")
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| OLLAMA_ENDPOINT.to_string());

    vec![
        ProviderProfile {
            name: "deepseek-chat".to_string(),
            base_url: DEEPSEEK_ENDPOINT.to_string(),
            chat_path: default_chat_path(),
            api_key_env: Some("DEEPSEEK_API_KEY".to_string()),
            credential_header: default_credential_header(),
            extra_headers: BTreeMap::new(),
            models: single_alias("deepseek-chat"),
            owned_by: Some("deepseek".to_string()),
            forward_tools: true,
            structured_tool_choice: StructuredChoicePolicy::Auto,
        },
        ProviderProfile {
            name: "deepseek-coder".to_string(),
            base_url: DEEPSEEK_BETA_ENDPOINT.to_string(),
            chat_path: default_chat_path(),
            api_key_env: Some("DEEPSEEK_API_KEY".to_string()),
            credential_header: default_credential_header(),
            extra_headers: BTreeMap::new(),
            models: single_alias("deepseek-coder"),
            owned_by: Some("deepseek".to_string()),
            forward_tools: true,
            structured_tool_choice: StructuredChoicePolicy::Auto,
        },
        ProviderProfile {
            name: "openrouter".to_string(),
            base_url: OPENROUTER_ENDPOINT.to_string(),
            chat_path: default_chat_path(),
            api_key_env: Some("OPENROUTER_API_KEY".to_string()),
            credential_header: default_credential_header(),
            extra_headers: BTreeMap::from([
                (
                    "HTTP-Referer".to_string(),
                    "https://github.com/danilofalcao/cursor-deepseek".to_string(),
                ),
                ("X-Title".to_string(), "Cursor DeepSeek".to_string()),
            ]),
            models: single_alias("deepseek/deepseek-chat"),
            owned_by: None,
            forward_tools: true,
            structured_tool_choice: StructuredChoicePolicy::Auto,
        },
        ProviderProfile {
            name: "ollama".to_string(),
            base_url: ollama_endpoint,
            chat_path: default_chat_path(),
            api_key_env: None,
            credential_header: default_credential_header(),
            extra_headers: BTreeMap::new(),
            models: single_alias("llama2"),
            owned_by: Some("ollama".to_string()),
            forward_tools: false,
            structured_tool_choice: StructuredChoicePolicy::Omit,
        },
    ]
}

/// Short names accepted on the command line, matching the old `-model` flag.
pub fn canonical_profile_name(name: &str) -> &str {
    match name {
        "chat" => "deepseek-chat",
        "coder" => "deepseek-coder",
        other => other,
    }
}
