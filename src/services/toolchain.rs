//! Boundary to the external build collaborators.
//!
//! The project generator, the bundler, the signers and the key generator are
//! opaque command-line tools. [`CommandToolchain`] and [`KeytoolGenerator`]
//! drive them as child processes; the traits let the pipeline run against
//! anything with the same contracts.

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

use crate::config::ToolchainSettings;
use crate::models::identity::SigningIdentity;

/// File the generator reads its project description from.
pub const PROJECT_FILE: &str = "twa-manifest.json";

const STORE_PASS_VAR: &str = "PWA_BUILDER_STORE_PASS";
const KEY_PASS_VAR: &str = "PWA_BUILDER_KEY_PASS";
const STDERR_TAIL: usize = 2000;

/// Description of the native project to generate for one web app.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    pub host: String,
    pub start_url: String,
    pub web_manifest_url: String,
    pub package_id: String,
    pub manifest: serde_json::Value,
}

/// Locations of the two artifacts a build produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub apk: PathBuf,
    pub aab: PathBuf,
}

#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Materialize a native project skeleton inside `workspace`.
    async fn generate_project(&self, workspace: &Path, spec: &ProjectSpec)
        -> Result<(), ToolchainError>;

    /// Compile the project, returning where the unsigned artifacts should be.
    async fn build(&self, workspace: &Path) -> Result<ArtifactPaths, ToolchainError>;

    /// Sign both artifacts into `out_dir`, returning where the signed copies should be.
    async fn sign(
        &self,
        unsigned: &ArtifactPaths,
        identity: &SigningIdentity,
        out_dir: &Path,
    ) -> Result<ArtifactPaths, ToolchainError>;
}

/// Creates key material for a new signing identity at `identity.keystore_path`.
#[async_trait]
pub trait KeyGenerator: Send + Sync {
    async fn create_keystore(&self, identity: &SigningIdentity) -> Result<(), ToolchainError>;
}

/// Runs the configured generator, bundler and signers as child processes.
pub struct CommandToolchain {
    settings: ToolchainSettings,
}

impl CommandToolchain {
    pub fn new(settings: ToolchainSettings) -> Self {
        Self { settings }
    }
}

fn command_from(tool: &'static str, line: &[String]) -> Result<Command, ToolchainError> {
    let (program, args) = line
        .split_first()
        .ok_or(ToolchainError::NotConfigured(tool))?;
    let mut command = Command::new(program);
    command.args(args);
    Ok(command)
}

fn with_identity_env(command: &mut Command, identity: &SigningIdentity) {
    command
        .env(STORE_PASS_VAR, &identity.store_password)
        .env(KEY_PASS_VAR, &identity.key_password);
}

/// Run a tool to completion; non-zero exit is an error carrying stderr's tail.
pub async fn run_tool(tool: &'static str, command: &mut Command) -> Result<(), ToolchainError> {
    let start = Instant::now();
    let output = command
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ToolchainError::Spawn { tool, source })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let start_at = stderr
            .char_indices()
            .rev()
            .nth(STDERR_TAIL)
            .map(|(i, _)| i)
            .unwrap_or(0);
        return Err(ToolchainError::Failed {
            tool,
            code: output.status.code(),
            stderr: stderr[start_at..].trim().to_string(),
        });
    }

    tracing::info!(
        tool,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "External tool finished"
    );
    Ok(())
}

#[async_trait]
impl Toolchain for CommandToolchain {
    async fn generate_project(
        &self,
        workspace: &Path,
        spec: &ProjectSpec,
    ) -> Result<(), ToolchainError> {
        let project = serde_json::to_vec_pretty(spec).map_err(ToolchainError::Project)?;
        tokio::fs::write(workspace.join(PROJECT_FILE), project)
            .await
            .map_err(ToolchainError::Io)?;

        let mut command = command_from("generator", &self.settings.generator_command)?;
        command.arg(workspace).current_dir(workspace);
        run_tool("generator", &mut command).await
    }

    async fn build(&self, workspace: &Path) -> Result<ArtifactPaths, ToolchainError> {
        let mut command = command_from("bundler", &self.settings.build_command)?;
        command.current_dir(workspace);
        run_tool("bundler", &mut command).await?;

        Ok(ArtifactPaths {
            apk: workspace.join(&self.settings.unsigned_apk_path),
            aab: workspace.join(&self.settings.unsigned_aab_path),
        })
    }

    async fn sign(
        &self,
        unsigned: &ArtifactPaths,
        identity: &SigningIdentity,
        out_dir: &Path,
    ) -> Result<ArtifactPaths, ToolchainError> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(ToolchainError::Io)?;
        let signed = ArtifactPaths {
            apk: out_dir.join("app-release-signed.apk"),
            aab: out_dir.join("app-release-signed.aab"),
        };

        let mut apksigner = Command::new(&self.settings.apksigner_path);
        apksigner
            .arg("sign")
            .arg("--ks")
            .arg(&identity.keystore_path)
            .args(["--ks-key-alias", identity.alias.as_str()])
            .args(["--ks-pass", format!("env:{}", STORE_PASS_VAR).as_str()])
            .args(["--key-pass", format!("env:{}", KEY_PASS_VAR).as_str()])
            .arg("--out")
            .arg(&signed.apk)
            .arg(&unsigned.apk);
        with_identity_env(&mut apksigner, identity);
        run_tool("apksigner", &mut apksigner).await?;

        let mut jarsigner = Command::new(&self.settings.jarsigner_path);
        jarsigner
            .args(["-sigalg", "SHA256withRSA", "-digestalg", "SHA-256"])
            .arg("-keystore")
            .arg(&identity.keystore_path)
            .args(["-storepass:env", STORE_PASS_VAR])
            .args(["-keypass:env", KEY_PASS_VAR])
            .arg("-signedjar")
            .arg(&signed.aab)
            .arg(&unsigned.aab)
            .arg(&identity.alias);
        with_identity_env(&mut jarsigner, identity);
        run_tool("jarsigner", &mut jarsigner).await?;

        Ok(signed)
    }
}

/// Creates RSA keystores with the JDK `keytool`.
pub struct KeytoolGenerator {
    keytool_path: String,
}

impl KeytoolGenerator {
    pub fn new(keytool_path: impl Into<String>) -> Self {
        Self {
            keytool_path: keytool_path.into(),
        }
    }
}

#[async_trait]
impl KeyGenerator for KeytoolGenerator {
    async fn create_keystore(&self, identity: &SigningIdentity) -> Result<(), ToolchainError> {
        if let Some(parent) = identity.keystore_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(ToolchainError::Io)?;
        }

        let mut keytool = Command::new(&self.keytool_path);
        keytool
            .args(["-genkeypair", "-noprompt"])
            .arg("-keystore")
            .arg(&identity.keystore_path)
            .args(["-alias", identity.alias.as_str()])
            .args(["-keyalg", "RSA", "-keysize", "2048", "-validity", "10000"])
            .args(["-storepass:env", STORE_PASS_VAR])
            .args(["-keypass:env", KEY_PASS_VAR])
            .args(["-dname", identity.subject.distinguished_name(&identity.domain).as_str()]);
        with_identity_env(&mut keytool, identity);
        run_tool("keytool", &mut keytool).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    #[error("No command configured for {0}")]
    NotConfigured(&'static str),

    #[error("Failed to start {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with status {code:?}: {stderr}")]
    Failed {
        tool: &'static str,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to write project description: {0}")]
    Project(serde_json::Error),

    #[error("Filesystem error: {0}")]
    Io(std::io::Error),
}
