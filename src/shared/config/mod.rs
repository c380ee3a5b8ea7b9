use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;

use crate::shared::entities::HangupCause;

#[derive(Clone, Debug)]
pub struct Config {
    pub http_bind_addr: String,
    pub database_url: Option<String>,
}

impl Config {
    /// Create a Config populated from environment variables, falling back to
    /// sensible defaults when keys are absent.
    ///
    /// - HTTP_BIND_ADDR (default "0.0.0.0:3000")
    /// - DATABASE_URL (optional; in-memory store when unset)
    pub fn from_env() -> Result<Self> {
        let http_bind_addr =
            std::env::var("HTTP_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let database_url = env_non_empty("DATABASE_URL");
        Ok(Self {
            http_bind_addr,
            database_url,
        })
    }
}

/// 音声プロバイダ（call control / messaging）への接続設定
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub connection_id: Option<String>,
    pub from_number: String,
    pub messaging_from_number: String,
    pub http_timeout: Duration,
}

impl ProviderConfig {
    fn from_env() -> Self {
        let from_number = env_non_empty("PROVIDER_FROM_NUMBER").unwrap_or_default();
        let messaging_from_number =
            env_non_empty("PROVIDER_SMS_FROM_NUMBER").unwrap_or_else(|| from_number.clone());
        Self {
            api_key: env_non_empty("PROVIDER_API_KEY"),
            base_url: std::env::var("PROVIDER_BASE_URL")
                .unwrap_or_else(|_| "https://api.telnyx.com/v2".to_string()),
            connection_id: env_non_empty("PROVIDER_CONNECTION_ID"),
            from_number,
            messaging_from_number,
            http_timeout: env_duration_ms("PROVIDER_HTTP_TIMEOUT_MS", 10_000),
        }
    }
}

static PROVIDER_CONFIG: OnceLock<ProviderConfig> = OnceLock::new();

pub fn provider_config() -> &'static ProviderConfig {
    PROVIDER_CONFIG.get_or_init(ProviderConfig::from_env)
}

/// Webhook 駆動の通話フロー（state machine 側）の方針設定
#[derive(Clone, Debug)]
pub struct CallFlowConfig {
    /// Inbound calls are handed off to this number; no broadcast record is
    /// kept for them.
    pub operator_number: Option<String>,
    /// Floor on answered-call duration before a scheduled hangup may fire.
    pub min_answered_duration: Duration,
    /// Wait after machine-greeting-ended before speaking, to avoid clipping.
    pub greeting_end_delay: Duration,
    /// Hangup delay used when no answered timestamp is available.
    pub fallback_hangup_delay: Duration,
    pub consent_enabled: bool,
    pub max_gather_attempts: u32,
    pub gather_timeout: Duration,
    pub consent_accept_digit: char,
    pub consent_decline_digit: char,
    /// Hangup causes that trigger the SMS fallback.
    pub sms_trigger_causes: Vec<HangupCause>,
}

impl CallFlowConfig {
    pub fn from_env() -> Self {
        Self {
            operator_number: env_non_empty("OPERATOR_NUMBER"),
            min_answered_duration: env_duration_sec("MIN_ANSWERED_DURATION_SEC", 6),
            greeting_end_delay: env_duration_ms("GREETING_END_DELAY_MS", 1_000),
            fallback_hangup_delay: env_duration_sec("FALLBACK_HANGUP_DELAY_SEC", 2),
            consent_enabled: env_bool("CONSENT_FLOW_ENABLED", false),
            max_gather_attempts: env_u32("MAX_GATHER_ATTEMPTS", 3),
            gather_timeout: env_duration_sec("GATHER_TIMEOUT_SEC", 10),
            consent_accept_digit: '1',
            consent_decline_digit: '2',
            sms_trigger_causes: sms_trigger_causes_from_env(),
        }
    }
}

static CALL_FLOW_CONFIG: OnceLock<CallFlowConfig> = OnceLock::new();

pub fn call_flow_config() -> &'static CallFlowConfig {
    CALL_FLOW_CONFIG.get_or_init(CallFlowConfig::from_env)
}

const DEFAULT_SMS_TRIGGER_CAUSES: [HangupCause; 5] = [
    HangupCause::NotFound,
    HangupCause::Busy,
    HangupCause::Cancel,
    HangupCause::NormalClearing,
    HangupCause::Timeout,
];

fn sms_trigger_causes_from_env() -> Vec<HangupCause> {
    let raw = match env_non_empty("SMS_TRIGGER_CAUSES") {
        Some(raw) => raw,
        None => return DEFAULT_SMS_TRIGGER_CAUSES.to_vec(),
    };
    let causes: Vec<HangupCause> = raw
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(HangupCause::parse)
        .collect();
    if causes.is_empty() {
        log::warn!("[config] SMS_TRIGGER_CAUSES is empty, using defaults");
        return DEFAULT_SMS_TRIGGER_CAUSES.to_vec();
    }
    causes
}

/// 一括発信ディスパッチャの並列度とリトライ方針
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    pub concurrency: usize,
    pub retry_base_delay: Duration,
    pub retry_increment: Duration,
    pub retry_max_delay: Duration,
}

impl DispatchConfig {
    pub fn from_env() -> Self {
        const DEFAULT_CONCURRENCY: usize = 8;
        const MAX_CONCURRENCY: usize = 64;
        let mut concurrency = env_u32("DISPATCH_CONCURRENCY", DEFAULT_CONCURRENCY as u32) as usize;
        if concurrency == 0 {
            log::warn!(
                "[config] DISPATCH_CONCURRENCY=0 is invalid, fallback to {}",
                DEFAULT_CONCURRENCY
            );
            concurrency = DEFAULT_CONCURRENCY;
        }
        if concurrency > MAX_CONCURRENCY {
            log::warn!(
                "[config] DISPATCH_CONCURRENCY={} exceeds max {}, clamped",
                concurrency,
                MAX_CONCURRENCY
            );
            concurrency = MAX_CONCURRENCY;
        }
        Self {
            concurrency,
            retry_base_delay: env_duration_ms("DISPATCH_RETRY_BASE_MS", 2_000),
            retry_increment: env_duration_ms("DISPATCH_RETRY_INCREMENT_MS", 1_000),
            retry_max_delay: env_duration_ms("DISPATCH_RETRY_MAX_MS", 10_000),
        }
    }
}

static DISPATCH_CONFIG: OnceLock<DispatchConfig> = OnceLock::new();

pub fn dispatch_config() -> &'static DispatchConfig {
    DISPATCH_CONFIG.get_or_init(DispatchConfig::from_env)
}

#[derive(Clone, Debug)]
pub enum LogMode {
    Stdout,
    File,
}

#[derive(Clone, Debug)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub mode: LogMode,
    pub format: LogFormat,
    pub dir: Option<String>,
    pub file_name: String,
}

impl LoggingConfig {
    fn from_env() -> Self {
        let dir_env = std::env::var("LOG_DIR").ok();
        let mode_env = std::env::var("LOG_MODE").ok();
        let format_env = std::env::var("LOG_FORMAT").ok();

        let format = match format_env.as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let mode = match mode_env.as_deref() {
            Some("file") => LogMode::File,
            Some("stdout") => LogMode::Stdout,
            _ => {
                if dir_env.is_some() {
                    LogMode::File
                } else {
                    LogMode::Stdout
                }
            }
        };

        let dir = match mode {
            LogMode::File => Some(dir_env.unwrap_or_else(|| "logs".to_string())),
            LogMode::Stdout => None,
        };

        let file_name = std::env::var("LOG_FILE_NAME").unwrap_or_else(|_| "app.log".to_string());

        Self {
            mode,
            format,
            dir,
            file_name,
        }
    }
}

static LOGGING: OnceLock<LoggingConfig> = OnceLock::new();

pub fn logging_config() -> &'static LoggingConfig {
    LOGGING.get_or_init(LoggingConfig::from_env)
}

fn env_duration_ms(key: &str, default_ms: u64) -> Duration {
    let ms = std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default_ms);
    Duration::from_millis(ms)
}

fn env_duration_sec(key: &str, default_sec: u64) -> Duration {
    let sec = std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default_sec);
    Duration::from_secs(sec)
}

fn env_bool(key: &str, default_value: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default_value)
}

fn env_u32(key: &str, default_value: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default_value)
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sms_trigger_causes_cover_the_fallback_set() {
        let causes = DEFAULT_SMS_TRIGGER_CAUSES.to_vec();
        assert!(causes.contains(&HangupCause::Busy));
        assert!(causes.contains(&HangupCause::NormalClearing));
        assert!(!causes.contains(&HangupCause::CallRejected));
    }
}
