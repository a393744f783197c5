use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::identity::SigningSubject;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// AES-256-GCM key sealing signing passwords at rest (base64-encoded, 32 bytes)
    pub credential_key: String,

    /// Maximum number of builds executing at once
    #[serde(default = "default_max_concurrent_builds")]
    pub max_concurrent_builds: usize,

    /// Wall-clock limit for one build job
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,

    /// Resilient fetch: total attempts per request
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,

    /// Resilient fetch: fixed delay between attempts
    #[serde(default = "default_fetch_delay_ms")]
    pub fetch_delay_ms: u64,

    /// Resilient fetch: per-attempt timeout
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Directory holding signed artifacts served for download
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    /// Directory holding per-job native projects
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,

    /// Directory holding per-domain keystores
    #[serde(default = "default_keystore_root")]
    pub keystore_root: PathBuf,

    /// Maximum request body size in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Submissions accepted per rate window
    #[serde(default = "default_submit_rate_limit")]
    pub submit_rate_limit: u64,

    #[serde(default = "default_submit_rate_window_secs")]
    pub submit_rate_window_secs: u64,

    /// Project generator command line; the workspace directory is appended
    #[serde(default = "default_generator_command")]
    pub generator_command: String,

    /// Bundler command line, run inside the workspace
    #[serde(default = "default_build_command")]
    pub build_command: String,

    #[serde(default = "default_unsigned_apk_path")]
    pub unsigned_apk_path: PathBuf,

    #[serde(default = "default_unsigned_aab_path")]
    pub unsigned_aab_path: PathBuf,

    #[serde(default = "default_keytool_path")]
    pub keytool_path: String,

    #[serde(default = "default_apksigner_path")]
    pub apksigner_path: String,

    #[serde(default = "default_jarsigner_path")]
    pub jarsigner_path: String,

    #[serde(default = "default_signing_full_name")]
    pub signing_full_name: String,

    #[serde(default = "default_signing_organization")]
    pub signing_organization: String,

    #[serde(default = "default_signing_organizational_unit")]
    pub signing_organizational_unit: String,

    #[serde(default = "default_signing_country_code")]
    pub signing_country_code: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_max_concurrent_builds() -> usize {
    2
}

fn default_build_timeout_secs() -> u64 {
    30 * 60
}

fn default_fetch_attempts() -> u32 {
    3
}

fn default_fetch_delay_ms() -> u64 {
    1000
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_output_root() -> PathBuf {
    PathBuf::from("./data/output")
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("./data/workspaces")
}

fn default_keystore_root() -> PathBuf {
    PathBuf::from("./data/keystores")
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_submit_rate_limit() -> u64 {
    30
}

fn default_submit_rate_window_secs() -> u64 {
    60
}

fn default_generator_command() -> String {
    "bubblewrap-generate".to_string()
}

fn default_build_command() -> String {
    "./gradlew assembleRelease bundleRelease".to_string()
}

fn default_unsigned_apk_path() -> PathBuf {
    PathBuf::from("app/build/outputs/apk/release/app-release-unsigned.apk")
}

fn default_unsigned_aab_path() -> PathBuf {
    PathBuf::from("app/build/outputs/bundle/release/app-release.aab")
}

fn default_keytool_path() -> String {
    "keytool".to_string()
}

fn default_apksigner_path() -> String {
    "apksigner".to_string()
}

fn default_jarsigner_path() -> String {
    "jarsigner".to_string()
}

fn default_signing_full_name() -> String {
    "PWA Builder".to_string()
}

fn default_signing_organization() -> String {
    "PWA Builder".to_string()
}

fn default_signing_organizational_unit() -> String {
    "Engineering".to_string()
}

fn default_signing_country_code() -> String {
    "US".to_string()
}

/// Limits applied by the HTTP layer.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub max_body_bytes: usize,
    pub submit_rate_limit: u64,
    pub submit_rate_window: Duration,
}

/// Resilient fetch tuning.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub attempts: u32,
    pub delay: Duration,
    pub timeout: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            attempts: default_fetch_attempts(),
            delay: Duration::from_millis(default_fetch_delay_ms()),
            timeout: Duration::from_secs(default_fetch_timeout_secs()),
        }
    }
}

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub max_concurrent_builds: usize,
    pub build_timeout: Duration,
}

/// Command lines for the external build collaborators.
#[derive(Debug, Clone)]
pub struct ToolchainSettings {
    pub generator_command: Vec<String>,
    pub build_command: Vec<String>,
    pub unsigned_apk_path: PathBuf,
    pub unsigned_aab_path: PathBuf,
    pub keytool_path: String,
    pub apksigner_path: String,
    pub jarsigner_path: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            max_body_bytes: self.max_body_bytes,
            submit_rate_limit: self.submit_rate_limit.max(1),
            submit_rate_window: Duration::from_secs(self.submit_rate_window_secs.max(1)),
        }
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            attempts: self.fetch_attempts.max(1),
            delay: Duration::from_millis(self.fetch_delay_ms),
            timeout: Duration::from_secs(self.fetch_timeout_secs),
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            max_concurrent_builds: self.max_concurrent_builds.max(1),
            build_timeout: Duration::from_secs(self.build_timeout_secs),
        }
    }

    pub fn toolchain_settings(&self) -> ToolchainSettings {
        ToolchainSettings {
            generator_command: split_command(&self.generator_command),
            build_command: split_command(&self.build_command),
            unsigned_apk_path: self.unsigned_apk_path.clone(),
            unsigned_aab_path: self.unsigned_aab_path.clone(),
            keytool_path: self.keytool_path.clone(),
            apksigner_path: self.apksigner_path.clone(),
            jarsigner_path: self.jarsigner_path.clone(),
        }
    }

    pub fn signing_subject(&self) -> SigningSubject {
        SigningSubject {
            full_name: self.signing_full_name.clone(),
            organization: self.signing_organization.clone(),
            organizational_unit: self.signing_organizational_unit.clone(),
            country_code: self.signing_country_code.clone(),
        }
    }
}

/// Whitespace-separated command line; no shell quoting is interpreted.
fn split_command(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}
