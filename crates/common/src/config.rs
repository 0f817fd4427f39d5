use std::collections::HashSet;
use std::time::Duration;

use crate::error::ExternalErrorKind;

/// Retry behaviour applied to every external call.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
    /// Error kinds that are retried; everything else fails immediately.
    pub retryable: HashSet<ExternalErrorKind>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(5000),
            retryable: HashSet::from([
                ExternalErrorKind::Connection,
                ExternalErrorKind::Timeout,
                ExternalErrorKind::Server,
            ]),
        }
    }
}

/// Identifier/extension systems used when reading and writing FHIR resources.
#[derive(Debug, Clone)]
pub struct FhirSystems {
    /// Extension on `List` referencing the owning `ResearchStudy`.
    pub screening_list_reference: String,
    /// Extension on `ResearchStudy` carrying the acronym.
    pub study_acronym: String,
    /// Identifier system of practitioners provisioned for subscribers.
    pub subscriber: String,
    /// Identifier system tagging messages created by this service.
    pub communication: String,
    /// Coding system of the message category.
    pub communication_category: String,
}

impl Default for FhirSystems {
    fn default() -> Self {
        Self {
            screening_list_reference:
                "https://fhir.miracum.org/uc1/StructureDefinition/belongsToStudy".to_string(),
            study_acronym: "https://fhir.miracum.org/uc1/StructureDefinition/studyAcronym"
                .to_string(),
            subscriber: "https://fhir.miracum.org/uc1/NamingSystem/notify/subscriber".to_string(),
            communication: "https://fhir.miracum.org/uc1/NamingSystem/notify/communication"
                .to_string(),
            communication_category:
                "https://fhir.miracum.org/uc1/CodeSystem/notify/communicationCategory".to_string(),
        }
    }
}

/// Transport security of the SMTP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SmtpSecurity {
    /// Plain connection, as used by local relays and test servers.
    #[default]
    None,
    /// Plain connection upgraded with `STARTTLS`.
    StartTls,
    /// Implicit TLS from the first byte.
    Tls,
}

impl std::str::FromStr for SmtpSecurity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(SmtpSecurity::None),
            "starttls" => Ok(SmtpSecurity::StartTls),
            "tls" => Ok(SmtpSecurity::Tls),
            other => Err(format!("unknown SMTP security mode '{}'", other)),
        }
    }
}

/// SMTP relay used for mail delivery.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub security: SmtpSecurity,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 25,
            username: None,
            password: None,
            security: SmtpSecurity::None,
        }
    }
}

/// Mail composition settings.
#[derive(Debug, Clone)]
pub struct MailSettings {
    pub smtp: SmtpSettings,
    /// Default sender address.
    pub from: String,
    /// Subject template; `[study_acronym]` is replaced.
    pub subject: String,
    /// Link template; `[list_id]` is replaced.
    pub link_template: String,
    /// Directory overriding the built-in `notification-mail.{txt,html}` templates.
    pub template_dir: Option<String>,
}

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Base URL of the FHIR resource store
    pub fhir_url: String,

    /// Socket address the HTTP server binds to
    pub listen_addr: String,

    /// Externally reachable webhook URL registered with the store at startup
    pub webhook_endpoint: Option<String>,

    /// Search criteria of the registered subscription
    pub subscription_criteria: String,

    /// Path of the JSON notification rules file
    pub rules_path: String,

    pub retry: RetrySettings,

    pub systems: FhirSystems,

    pub mail: MailSettings,

    /// Page size for the active-message query used by deduplication (default: 100)
    pub active_message_page_size: usize,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = FhirSystems::default();

        Ok(Self {
            fhir_url: std::env::var("FHIR_URL")
                .map_err(|_| anyhow::anyhow!("FHIR_URL environment variable is required"))?,
            listen_addr: std::env::var("LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            webhook_endpoint: std::env::var("WEBHOOK_ENDPOINT").ok(),
            subscription_criteria: std::env::var("FHIR_SUBSCRIPTION_CRITERIA").unwrap_or_else(
                |_| {
                    "List?code=https://fhir.miracum.org/uc1/CodeSystem/screening-list|screening-list"
                        .to_string()
                },
            ),
            rules_path: std::env::var("NOTIFY_RULES_PATH").map_err(|_| {
                anyhow::anyhow!("NOTIFY_RULES_PATH environment variable is required")
            })?,
            retry: RetrySettings {
                max_attempts: std::env::var("NOTIFY_RETRY_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .map_err(|_| anyhow::anyhow!("NOTIFY_RETRY_MAX_ATTEMPTS must be a valid u32"))?,
                backoff: Duration::from_millis(
                    std::env::var("NOTIFY_RETRY_BACKOFF_MS")
                        .unwrap_or_else(|_| "5000".to_string())
                        .parse()
                        .map_err(|_| {
                            anyhow::anyhow!("NOTIFY_RETRY_BACKOFF_MS must be a valid u64")
                        })?,
                ),
                retryable: parse_retryable(
                    &std::env::var("NOTIFY_RETRY_ON")
                        .unwrap_or_else(|_| "connection,timeout,server".to_string()),
                )?,
            },
            systems: FhirSystems {
                screening_list_reference: std::env::var("FHIR_SYSTEM_SCREENING_LIST_REFERENCE")
                    .unwrap_or(defaults.screening_list_reference),
                study_acronym: std::env::var("FHIR_SYSTEM_STUDY_ACRONYM")
                    .unwrap_or(defaults.study_acronym),
                subscriber: std::env::var("FHIR_SYSTEM_SUBSCRIBER").unwrap_or(defaults.subscriber),
                communication: std::env::var("FHIR_SYSTEM_COMMUNICATION")
                    .unwrap_or(defaults.communication),
                communication_category: std::env::var("FHIR_SYSTEM_COMMUNICATION_CATEGORY")
                    .unwrap_or(defaults.communication_category),
            },
            mail: MailSettings {
                smtp: SmtpSettings {
                    host: std::env::var("MAIL_HOST").unwrap_or_else(|_| "localhost".to_string()),
                    port: std::env::var("MAIL_PORT")
                        .unwrap_or_else(|_| "25".to_string())
                        .parse()
                        .map_err(|_| anyhow::anyhow!("MAIL_PORT must be a valid u16"))?,
                    username: std::env::var("MAIL_USERNAME").ok().filter(|u| !u.is_empty()),
                    password: std::env::var("MAIL_PASSWORD").ok(),
                    security: std::env::var("MAIL_SMTP_SECURITY")
                        .unwrap_or_default()
                        .parse()
                        .map_err(|e| anyhow::anyhow!("MAIL_SMTP_SECURITY: {}", e))?,
                },
                from: std::env::var("MAIL_FROM")
                    .unwrap_or_else(|_| "uc1-notify@example.com".to_string()),
                subject: std::env::var("MAIL_SUBJECT").unwrap_or_else(|_| {
                    "Neue Rekrutierungsvorschläge für die Studie [study_acronym]".to_string()
                }),
                link_template: std::env::var("SCREENING_LIST_LINK_TEMPLATE").unwrap_or_else(
                    |_| "http://localhost:8080/recommendations/[list_id]".to_string(),
                ),
                template_dir: std::env::var("MAIL_TEMPLATE_DIR").ok(),
            },
            active_message_page_size: std::env::var("ACTIVE_MESSAGE_PAGE_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("ACTIVE_MESSAGE_PAGE_SIZE must be a valid usize"))?,
        })
    }
}

/// Parse a comma-separated list of retryable error kinds.
pub fn parse_retryable(raw: &str) -> anyhow::Result<HashSet<ExternalErrorKind>> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.parse::<ExternalErrorKind>()
                .map_err(|e| anyhow::anyhow!("NOTIFY_RETRY_ON: {}", e))
        })
        .collect()
}
