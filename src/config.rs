//! Agent configuration and credential resolution.
//!
//! Model names use the `provider:model` form (e.g. `anthropic:claude-sonnet-4-20250514`).
//! API keys resolve in order: explicit override, provider environment
//! variable, then the OS keyring entry for the provider.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, SaberError};

/// Default model when none is configured.
pub const DEFAULT_MODEL: &str = "anthropic:claude-sonnet-4-20250514";

/// Default schema cache lifetime in seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 900;

/// Keyring service name for stored provider credentials.
const KEYRING_SERVICE: &str = "sqlsaber";

/// Supported LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelProvider {
    Anthropic,
    OpenAi,
    Google,
    Groq,
}

impl ModelProvider {
    /// Returns the provider as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Google => "google",
            Self::Groq => "groq",
        }
    }

    /// Environment variable consulted for this provider's API key.
    pub fn env_var(&self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Google => "GOOGLE_API_KEY",
            Self::Groq => "GROQ_API_KEY",
        }
    }
}

impl FromStr for ModelProvider {
    type Err = SaberError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            "google" => Ok(Self::Google),
            "groq" => Ok(Self::Groq),
            other => Err(SaberError::configuration(format!(
                "Unknown LLM provider: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A parsed `provider:model` specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub provider: ModelProvider,
    /// Model identifier without the provider prefix.
    pub model: String,
}

impl ModelSpec {
    /// Parses a `provider:model` string. A bare model name defaults to Anthropic.
    pub fn parse(name: &str) -> Result<Self> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(SaberError::configuration("Model name cannot be empty"));
        }

        match trimmed.split_once(':') {
            Some((provider, model)) => {
                let model = model.trim();
                if model.is_empty() {
                    return Err(SaberError::configuration(format!(
                        "Model name missing after provider in '{trimmed}'"
                    )));
                }
                Ok(Self {
                    provider: provider.parse()?,
                    model: model.to_string(),
                })
            }
            None => Ok(Self {
                provider: ModelProvider::Anthropic,
                model: trimmed.to_string(),
            }),
        }
    }

    /// Returns the full `provider:model` form.
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.provider, self.model)
    }

    /// Whether the model belongs to the GPT family (drives prompt selection).
    pub fn is_gpt_family(&self) -> bool {
        self.model.to_lowercase().contains("gpt")
    }
}

/// Extended-reasoning effort levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThinkingLevel {
    Minimal,
    Low,
    #[default]
    Medium,
    High,
    Maximum,
}

impl ThinkingLevel {
    /// Anthropic budget-token mapping for this level.
    pub fn budget_tokens(&self) -> u32 {
        match self {
            Self::Minimal => 1024,
            Self::Low => 2048,
            Self::Medium => 4096,
            Self::High => 16384,
            Self::Maximum => 32768,
        }
    }
}

impl FromStr for ThinkingLevel {
    type Err = SaberError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "minimal" => Ok(Self::Minimal),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "maximum" => Ok(Self::Maximum),
            other => Err(SaberError::configuration(format!(
                "Unknown thinking level: {other}"
            ))),
        }
    }
}

/// Model and credential override for a single tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelOverride {
    pub model_name: Option<String>,
    pub api_key: Option<String>,
}

impl ModelOverride {
    /// Normalizes blank strings to `None` and rejects a key without a model.
    pub fn normalized(self) -> Result<Option<Self>> {
        let model_name = normalize_optional_text(self.model_name);
        let api_key = normalize_optional_text(self.api_key);

        if api_key.is_some() && model_name.is_none() {
            return Err(SaberError::configuration(
                "api_key override requires model_name so provider can be determined.",
            ));
        }

        if model_name.is_none() && api_key.is_none() {
            return Ok(None);
        }

        Ok(Some(Self {
            model_name,
            api_key,
        }))
    }
}

fn normalize_optional_text(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Normalizes a tool-override map, dropping empty overrides and rejecting
/// blank tool names.
pub fn normalize_tool_overrides(
    overrides: HashMap<String, ModelOverride>,
) -> Result<HashMap<String, ModelOverride>> {
    let mut normalized = HashMap::new();
    for (name, value) in overrides {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(SaberError::configuration(
                "Tool override key cannot be empty.",
            ));
        }
        if let Some(value) = value.normalized()? {
            normalized.insert(name, value);
        }
    }
    Ok(normalized)
}

/// A resolved model plus the credential to call it with.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub spec: ModelSpec,
    pub api_key: String,
}

/// Configuration options for an agent.
///
/// All fields are optional; `AgentConfig::default()` uses the default
/// Anthropic model with credentials from the environment or keyring.
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    /// `provider:model` override.
    pub model_name: Option<String>,
    /// Explicit API key; requires `model_name`.
    pub api_key: Option<String>,
    /// Memory override. `Some("")` disables memory injection entirely.
    pub memory: Option<String>,
    /// Replaces the built-in base system prompt. Whitespace-only is ignored.
    pub system_prompt: Option<String>,
    /// Enables extended reasoning.
    pub thinking_enabled: bool,
    /// Extended-reasoning level; setting it implies `thinking_enabled`.
    pub thinking_level: Option<ThinkingLevel>,
    /// Per-tool model/credential overrides (notably for `viz`).
    pub tool_overrides: HashMap<String, ModelOverride>,
    /// Permits non-SELECT statements in `execute_sql`. Still rolled back.
    pub allow_dangerous: bool,
    /// Schema cache lifetime in seconds.
    pub cache_ttl: Option<u64>,
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = Some(memory.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_thinking_level(mut self, level: ThinkingLevel) -> Self {
        self.thinking_level = Some(level);
        self.thinking_enabled = true;
        self
    }

    pub fn with_tool_override(mut self, tool: impl Into<String>, value: ModelOverride) -> Self {
        self.tool_overrides.insert(tool.into(), value);
        self
    }

    pub fn with_allow_dangerous(mut self, allow: bool) -> Self {
        self.allow_dangerous = allow;
        self
    }

    pub fn with_cache_ttl(mut self, secs: u64) -> Self {
        self.cache_ttl = Some(secs);
        self
    }

    /// Effective thinking state: a level implies enabled.
    pub fn thinking(&self) -> Option<ThinkingLevel> {
        if self.thinking_enabled || self.thinking_level.is_some() {
            Some(self.thinking_level.unwrap_or_default())
        } else {
            None
        }
    }

    /// Schema cache TTL as a duration.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl.unwrap_or(DEFAULT_CACHE_TTL_SECS))
    }

    /// Validates the configuration and resolves the main model + credential.
    ///
    /// Fatal at construction time: unknown models, an API key without a model
    /// name, invalid tool overrides, or an unresolvable credential.
    pub fn resolve(&self) -> Result<ResolvedModel> {
        if self.api_key.is_some() && self.model_name.is_none() {
            return Err(SaberError::configuration(
                "api_key requires model_name so provider can be determined.",
            ));
        }

        // Surface override mistakes now rather than on first viz call.
        normalize_tool_overrides(self.tool_overrides.clone())?;

        let spec = ModelSpec::parse(self.model_name.as_deref().unwrap_or(DEFAULT_MODEL))?;
        let api_key = resolve_api_key(spec.provider, self.api_key.as_deref())?;

        Ok(ResolvedModel { spec, api_key })
    }

    /// Resolves the model + credential for a tool, honoring `tool_overrides`.
    pub fn resolve_for_tool(&self, tool_name: &str) -> Result<ResolvedModel> {
        match self
            .tool_overrides
            .get(tool_name)
            .cloned()
            .map(ModelOverride::normalized)
            .transpose()?
            .flatten()
        {
            Some(ModelOverride {
                model_name: Some(name),
                api_key,
            }) => {
                let spec = ModelSpec::parse(&name)?;
                let api_key = resolve_api_key(spec.provider, api_key.as_deref())?;
                Ok(ResolvedModel { spec, api_key })
            }
            // A normalized override always names a model; anything else
            // falls back to the main configuration.
            _ => self.resolve(),
        }
    }
}

/// Resolves an API key for a provider: explicit value, environment variable,
/// then the OS keyring entry.
pub fn resolve_api_key(provider: ModelProvider, explicit: Option<&str>) -> Result<String> {
    if let Some(key) = explicit {
        let key = key.trim();
        if !key.is_empty() {
            return Ok(key.to_string());
        }
    }

    if let Ok(key) = std::env::var(provider.env_var()) {
        let key = key.trim().to_string();
        if !key.is_empty() {
            return Ok(key);
        }
    }

    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, provider.as_str()) {
        if let Ok(key) = entry.get_password() {
            if !key.trim().is_empty() {
                return Ok(key);
            }
        }
    }

    Err(SaberError::configuration(format!(
        "No API key configured for {provider}. Set {} or store a credential.",
        provider.env_var()
    )))
}
