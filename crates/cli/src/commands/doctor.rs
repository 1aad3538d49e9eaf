use procura_agent::ChatCompletionsGateway;
use procura_core::config::{AppConfig, LlmProvider, LoadOptions};
use procura_db::{connect_with_settings, migrations};
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_generation_gateway(&config));
            checks.push(check_email_readiness(&config));
            checks.push(check_database_connectivity(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["generation_gateway", "email_readiness", "database_connectivity"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status != CheckStatus::Fail)
        && checks.iter().any(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_generation_gateway(config: &AppConfig) -> DoctorCheck {
    match ChatCompletionsGateway::from_config(&config.llm) {
        Ok(_) => {
            let credentials = match config.llm.provider {
                LlmProvider::Ollama => "no credentials required",
                LlmProvider::OpenAi | LlmProvider::Bedrock => "api key present",
            };
            DoctorCheck {
                name: "generation_gateway",
                status: CheckStatus::Pass,
                details: format!(
                    "{} model `{}` at {} ({credentials})",
                    config.llm.provider.as_str(),
                    config.llm.model,
                    config.llm.resolved_base_url()
                ),
            }
        }
        Err(error) => DoctorCheck {
            name: "generation_gateway",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn check_email_readiness(config: &AppConfig) -> DoctorCheck {
    if !config.email.enabled {
        return DoctorCheck {
            name: "email_readiness",
            status: CheckStatus::Skipped,
            details: "email disabled; replies arrive through the synthetic channel".to_string(),
        };
    }

    if config.email.has_credentials() {
        DoctorCheck {
            name: "email_readiness",
            status: CheckStatus::Pass,
            details: format!(
                "mailbox {} via {}:{}",
                config.email.address.as_deref().unwrap_or_default(),
                config.email.imap_host,
                config.email.imap_port
            ),
        }
    } else {
        DoctorCheck {
            name: "email_readiness",
            status: CheckStatus::Fail,
            details: "email enabled but address or app password is missing".to_string(),
        }
    }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

        let applied = migrations::applied_versions(&pool)
            .await
            .map_err(|error| format!("failed to read migration history: {error}"))?;
        pool.close().await;
        Ok::<usize, String>(applied.len())
    });

    let known = migrations::known_versions().len();
    match result {
        Ok(applied) if applied < known => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Fail,
            details: format!(
                "connected using `{}` but {} of {known} migrations are applied; run `procura migrate`",
                config.database.url, applied
            ),
        },
        Ok(_) => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`; schema up to date", config.database.url),
        },
        Err(error) => {
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
