//! Endpoint configuration helpers
//!
//! Resolution order for every setting is: environment variable, then the
//! explicit provider or fallback, then the LM Studio default.

use crate::types::{ChatOptions, ChatOptionsBuilder};
use std::env;
use std::str::FromStr;

/// Environment variable overriding the endpoint base URL
pub const BASE_URL_ENV: &str = "STREAMCHAT_BASE_URL";
/// Environment variable naming the model
pub const MODEL_ENV: &str = "STREAMCHAT_MODEL";
/// Environment variable carrying the bearer token
pub const API_KEY_ENV: &str = "STREAMCHAT_API_KEY";

/// Known OpenAI-compatible endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    LMStudio,
    Ollama,
    LlamaCpp,
    VLLM,
    OpenRouter,
}

impl Provider {
    pub fn default_url(&self) -> &'static str {
        match self {
            Provider::LMStudio => "http://localhost:1234/v1",
            Provider::Ollama => "http://localhost:11434/v1",
            Provider::LlamaCpp => "http://localhost:8080/v1",
            Provider::VLLM => "http://localhost:8000/v1",
            Provider::OpenRouter => "https://openrouter.ai/api/v1",
        }
    }

    /// Hosted providers reject requests without a real key
    pub fn requires_api_key(&self) -> bool {
        matches!(self, Provider::OpenRouter)
    }
}

impl FromStr for Provider {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_lowercase().as_str() {
            "lmstudio" | "lm-studio" | "lm_studio" => Ok(Provider::LMStudio),
            "ollama" => Ok(Provider::Ollama),
            "llamacpp" | "llama-cpp" | "llama_cpp" | "llama.cpp" => Ok(Provider::LlamaCpp),
            "vllm" => Ok(Provider::VLLM),
            "openrouter" | "open-router" => Ok(Provider::OpenRouter),
            other => Err(crate::Error::config(format!("unknown provider: {}", other))),
        }
    }
}

fn env_lookup(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Base URL from `STREAMCHAT_BASE_URL`, the provider default, or `fallback`.
///
/// ```rust,no_run
/// use streamchat::{get_base_url, Provider};
///
/// let url = get_base_url(Some(Provider::Ollama), None);
/// let url = get_base_url(None, Some("http://localhost:1234/v1"));
/// ```
pub fn get_base_url(provider: Option<Provider>, fallback: Option<&str>) -> String {
    resolve_base_url(env_lookup, provider, fallback)
}

/// Model from `STREAMCHAT_MODEL` (when `prefer_env`) or `fallback`
pub fn get_model(fallback: Option<&str>, prefer_env: bool) -> Option<String> {
    resolve_model(env_lookup, fallback, prefer_env)
}

/// API key from `STREAMCHAT_API_KEY`
pub fn get_api_key() -> Option<String> {
    env_lookup(API_KEY_ENV)
}

/// A builder pre-filled from the environment and an optional provider.
///
/// Fails when no model can be found, or when the provider needs a key and
/// none is set.
pub fn builder_from_env(provider: Option<Provider>) -> crate::Result<ChatOptionsBuilder> {
    builder_from_lookup(env_lookup, provider)
}

fn builder_from_lookup<L>(lookup: L, provider: Option<Provider>) -> crate::Result<ChatOptionsBuilder>
where
    L: Fn(&str) -> Option<String>,
{
    let model = resolve_model(&lookup, None, true)
        .ok_or_else(|| crate::Error::config(format!("{} is not set", MODEL_ENV)))?;
    let mut builder = ChatOptions::builder()
        .base_url(resolve_base_url(&lookup, provider, None))
        .model(model);

    match lookup(API_KEY_ENV) {
        Some(key) => builder = builder.api_key(key),
        None if provider.is_some_and(|p| p.requires_api_key()) => {
            return Err(crate::Error::config(format!(
                "{} is required for this provider",
                API_KEY_ENV
            )));
        }
        None => {}
    }
    Ok(builder)
}

fn resolve_base_url<L>(lookup: L, provider: Option<Provider>, fallback: Option<&str>) -> String
where
    L: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(BASE_URL_ENV) {
        return url;
    }
    if let Some(p) = provider {
        return p.default_url().to_string();
    }
    fallback
        .unwrap_or(Provider::LMStudio.default_url())
        .to_string()
}

fn resolve_model<L>(lookup: L, fallback: Option<&str>, prefer_env: bool) -> Option<String>
where
    L: Fn(&str) -> Option<String>,
{
    if prefer_env {
        if let Some(model) = lookup(MODEL_ENV) {
            return Some(model);
        }
    }
    fallback.map(str::to_string)
}
