use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use procura_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in effective_values(&config) {
        let source =
            field_source(key, Some(env_key), config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String, &'static str)> {
    let llm_api_key = redact_secret(config.llm.api_key.as_ref().map(|key| key.expose_secret()));
    let email_password =
        redact_secret(config.email.app_password.as_ref().map(|password| password.expose_secret()));

    vec![
        ("database.url", config.database.url.clone(), "PROCURA_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "PROCURA_DATABASE_MAX_CONNECTIONS",
        ),
        ("database.timeout_secs", config.database.timeout_secs.to_string(), "PROCURA_DATABASE_TIMEOUT_SECS"),
        ("llm.provider", config.llm.provider.as_str().to_string(), "PROCURA_LLM_PROVIDER"),
        ("llm.model", config.llm.model.clone(), "PROCURA_LLM_MODEL"),
        ("llm.base_url", config.llm.resolved_base_url(), "PROCURA_LLM_BASE_URL"),
        ("llm.region", config.llm.region.clone(), "PROCURA_LLM_REGION"),
        ("llm.api_key", llm_api_key, "PROCURA_LLM_API_KEY"),
        ("llm.max_retries", config.llm.max_retries.to_string(), "PROCURA_LLM_MAX_RETRIES"),
        ("email.enabled", config.email.enabled.to_string(), "PROCURA_EMAIL_ENABLED"),
        (
            "email.address",
            config.email.address.clone().unwrap_or_else(|| "<unset>".to_string()),
            "PROCURA_EMAIL_ADDRESS",
        ),
        ("email.app_password", email_password, "PROCURA_EMAIL_APP_PASSWORD"),
        ("email.imap_host", config.email.imap_host.clone(), "PROCURA_EMAIL_IMAP_HOST"),
        ("email.smtp_host", config.email.smtp_host.clone(), "PROCURA_EMAIL_SMTP_HOST"),
        (
            "negotiation.max_rounds",
            config.negotiation.max_rounds.to_string(),
            "PROCURA_NEGOTIATION_MAX_ROUNDS",
        ),
        (
            "negotiation.reply_timeout_secs",
            config.negotiation.reply_timeout_secs.to_string(),
            "PROCURA_NEGOTIATION_REPLY_TIMEOUT_SECS",
        ),
        (
            "negotiation.revise_instructions",
            config.negotiation.revise_instructions.to_string(),
            "PROCURA_NEGOTIATION_REVISE_INSTRUCTIONS",
        ),
        ("server.bind_address", config.server.bind_address.clone(), "PROCURA_SERVER_BIND_ADDRESS"),
        ("server.port", config.server.port.to_string(), "PROCURA_SERVER_PORT"),
        ("logging.level", config.logging.level.clone(), "PROCURA_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "PROCURA_LOGGING_FORMAT"),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("procura.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/procura.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: Option<&str>) -> String {
    match secret.map(str::trim) {
        None => "<unset>".to_string(),
        Some("") => "<empty>".to_string(),
        Some(_) => "<redacted>".to_string(),
    }
}
