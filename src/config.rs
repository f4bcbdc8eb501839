use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Prefix under which generated drafts live (`audio/`).
    pub draft_prefix: String,
    /// Prefix under which approved copies live (`deploy/`).
    pub deploy_prefix: String,
    /// Repository target; `None` when credentials are absent, in which case
    /// the deploy endpoint reports a configuration error instead of failing
    /// mid-commit.
    pub repo: Option<RepoConfig>,
}

/// Typed repository target, resolved once at startup with a fixed
/// precedence order over the legacy environment variable aliases.
#[derive(Debug, Clone)]
pub struct RepoConfig {
    pub token: String,
    /// `owner/name` slug.
    pub repo: String,
    pub branch: String,
    pub api_base: String,
    /// Repository subtree deployments are allowed to write under.
    pub allowed_root: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Draft-asset approval and deployment pipeline")]
pub struct Args {
    /// Host to bind to (overrides ASSET_PIPELINE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides ASSET_PIPELINE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides ASSET_PIPELINE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides ASSET_PIPELINE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Aliases for the repository token, most specific first.
const TOKEN_ALIASES: [&str; 3] = ["ASSET_PIPELINE_GITHUB_TOKEN", "GITHUB_TOKEN", "GH_TOKEN"];

/// Aliases for the target repository slug.
const REPO_ALIASES: [&str; 3] = ["ASSET_PIPELINE_REPO", "DEPLOY_REPO", "GITHUB_REPO"];

/// Aliases for the target branch.
const BRANCH_ALIASES: [&str; 2] = ["ASSET_PIPELINE_BRANCH", "DEPLOY_BRANCH"];

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("ASSET_PIPELINE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("ASSET_PIPELINE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing ASSET_PIPELINE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading ASSET_PIPELINE_PORT"),
        };
        let env_storage =
            env::var("ASSET_PIPELINE_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("ASSET_PIPELINE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/asset_pipeline.db".into());

        let draft_prefix =
            env::var("ASSET_PIPELINE_DRAFT_PREFIX").unwrap_or_else(|_| "audio/".into());
        let deploy_prefix =
            env::var("ASSET_PIPELINE_DEPLOY_PREFIX").unwrap_or_else(|_| "deploy/".into());

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            draft_prefix,
            deploy_prefix,
            repo: RepoConfig::from_env(),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl RepoConfig {
    /// Resolve the repository target from the environment. Token and repo
    /// slug are both required; without them the deploy surface is disabled.
    pub fn from_env() -> Option<Self> {
        let token = first_env(&TOKEN_ALIASES)?;
        let repo = first_env(&REPO_ALIASES)?;
        let branch = first_env(&BRANCH_ALIASES).unwrap_or_else(|| "main".into());
        let api_base = env::var("ASSET_PIPELINE_GITHUB_API")
            .unwrap_or_else(|_| "https://api.github.com".into());
        let allowed_root =
            env::var("ASSET_PIPELINE_REPO_ROOT").unwrap_or_else(|_| "audio/".into());

        Some(Self {
            token,
            repo,
            branch,
            api_base,
            allowed_root,
        })
    }
}

/// First non-empty value among the given environment variable names.
fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}
