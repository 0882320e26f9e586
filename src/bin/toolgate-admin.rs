//! toolgate administration CLI
//!
//! A command-line client for the toolgate HTTP APIs: dynamic client registration (RFC 7591 and
//! RFC 7592), the client credentials grant and the backend process administration endpoints.
//!
//! ## Usage Examples
//!
//! ```bash
//! # Register a confidential client allowed to use client_credentials
//! toolgate-admin --base-url http://localhost:8080 client register \
//!   --name "Nightly job" \
//!   --grant-type client_credentials \
//!   --auth-method client_secret_basic
//!
//! # Inspect the client with its registration access token
//! toolgate-admin client get --client-id "$CLIENT_ID" --registration-token "$RAT"
//!
//! # Obtain an access token for the client
//! toolgate-admin token client-credentials --client-id "$CLIENT_ID" --client-secret "$SECRET"
//!
//! # Backend administration requires an access token of a user listed in ADMIN_USERS
//! toolgate-admin --access-token "$TOKEN" process status
//! toolgate-admin --access-token "$TOKEN" process config --port 9100 --auto-start true
//! toolgate-admin --access-token "$TOKEN" process restart
//! toolgate-admin --access-token "$TOKEN" process logs --lines 50
//! ```
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error (network, parsing, etc.)
//! - 2: Request rejected by the server
//! - 3: Authentication error

use clap::{Args, Parser, Subcommand, ValueEnum};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::process;
use thiserror::Error;

/// Grant types accepted at registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
enum GrantType {
    AuthorizationCode,
    ClientCredentials,
    RefreshToken,
}

/// Token endpoint authentication methods
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
enum ClientAuthMethod {
    ClientSecretBasic,
    ClientSecretPost,
    None,
}

/// Registration and update request body
#[derive(Debug, Serialize)]
struct ClientMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    client_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    redirect_uris: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    grant_types: Vec<GrantType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_endpoint_auth_method: Option<ClientAuthMethod>,
}

/// Partial backend configuration sent to `PUT /admin/process/config`
#[derive(Debug, Default, Serialize)]
struct BackendConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auto_start: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    log_level: Option<String>,
}

#[derive(Parser)]
#[command(
    name = "toolgate-admin",
    about = "toolgate administration CLI",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Base URL of the toolgate server
    #[arg(long, env = "TOOLGATE_BASE_URL", default_value = "http://localhost:8080")]
    base_url: String,

    /// Bearer access token for the administration endpoints
    #[arg(long, env = "TOOLGATE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage OAuth clients
    #[command(subcommand)]
    Client(ClientCommands),
    /// Obtain access tokens
    #[command(subcommand)]
    Token(TokenCommands),
    /// Control the backend process
    #[command(subcommand)]
    Process(ProcessCommands),
}

#[derive(Subcommand)]
enum ClientCommands {
    /// Register a new OAuth client
    Register(ClientMetadataArgs),
    /// Get information about an existing client
    Get(ClientRef),
    /// Update an existing client
    Update {
        #[command(flatten)]
        client: ClientRef,
        #[command(flatten)]
        metadata: ClientMetadataArgs,
    },
    /// Delete an existing client
    Delete(ClientRef),
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Run the client credentials grant
    ClientCredentials {
        #[arg(long, env = "TOOLGATE_CLIENT_ID")]
        client_id: String,
        #[arg(long, env = "TOOLGATE_CLIENT_SECRET", hide_env_values = true)]
        client_secret: String,
        #[arg(long)]
        scope: Option<String>,
    },
}

#[derive(Subcommand)]
enum ProcessCommands {
    /// Show the backend state
    Status,
    /// Start the backend
    Start,
    /// Stop the backend
    Stop,
    /// Restart the backend
    Restart,
    /// Show the end of the backend log
    Logs {
        #[arg(long, default_value_t = 100)]
        lines: usize,
    },
    /// Show or change the persisted backend configuration
    Config {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        auto_start: Option<bool>,
        #[arg(long)]
        log_level: Option<String>,
    },
}

#[derive(Args)]
struct ClientRef {
    /// Client ID
    #[arg(long, env = "TOOLGATE_CLIENT_ID")]
    client_id: String,

    /// Registration access token returned at registration
    #[arg(long, env = "TOOLGATE_REGISTRATION_TOKEN", hide_env_values = true)]
    registration_token: String,
}

#[derive(Args)]
struct ClientMetadataArgs {
    /// Human-readable name for the client
    #[arg(long)]
    name: Option<String>,

    /// Redirect URI (repeatable)
    #[arg(long = "redirect-uri")]
    redirect_uris: Vec<String>,

    /// Grant type (repeatable)
    #[arg(long = "grant-type", value_enum)]
    grant_types: Vec<GrantType>,

    /// Space-separated scopes
    #[arg(long)]
    scope: Option<String>,

    /// Token endpoint authentication method
    #[arg(long = "auth-method", value_enum)]
    auth_method: Option<ClientAuthMethod>,
}

impl From<&ClientMetadataArgs> for ClientMetadata {
    fn from(args: &ClientMetadataArgs) -> Self {
        Self {
            client_name: args.name.clone(),
            redirect_uris: args.redirect_uris.clone(),
            grant_types: args.grant_types.clone(),
            scope: args.scope.clone(),
            token_endpoint_auth_method: args.auth_method.clone(),
        }
    }
}

#[derive(Debug, Error)]
enum AppError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Request rejected ({0}): {1}")]
    Rejected(StatusCode, String),

    #[error("Authentication error: {0}")]
    Authentication(String),
}

impl AppError {
    fn exit_code(&self) -> i32 {
        match self {
            AppError::Network(_) | AppError::Json(_) => 1,
            AppError::Rejected(_, _) => 2,
            AppError::Authentication(_) => 3,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let client = Client::new();

    let result = match &cli.command {
        Commands::Client(command) => run_client(&cli, &client, command).await,
        Commands::Token(command) => run_token(&cli, &client, command).await,
        Commands::Process(command) => run_process(&cli, &client, command).await,
    };

    match result {
        Ok(body) => {
            if let Some(body) = body {
                match serde_json::to_string_pretty(&body) {
                    Ok(text) => println!("{}", text),
                    Err(_) => println!("{}", body),
                }
            }
        }
        Err(err) => {
            eprintln!("Error: {}", err);
            process::exit(err.exit_code());
        }
    }
}

async fn run_client(
    cli: &Cli,
    client: &Client,
    command: &ClientCommands,
) -> Result<Option<Value>, AppError> {
    let base = cli.base_url.trim_end_matches('/');
    let request = match command {
        ClientCommands::Register(args) => client
            .post(format!("{}/oauth2/register", base))
            .json(&ClientMetadata::from(args)),
        ClientCommands::Get(reference) => client
            .get(format!("{}/oauth2/register/{}", base, reference.client_id))
            .bearer_auth(&reference.registration_token),
        ClientCommands::Update { client: reference, metadata } => client
            .put(format!("{}/oauth2/register/{}", base, reference.client_id))
            .bearer_auth(&reference.registration_token)
            .json(&ClientMetadata::from(metadata)),
        ClientCommands::Delete(reference) => client
            .delete(format!("{}/oauth2/register/{}", base, reference.client_id))
            .bearer_auth(&reference.registration_token),
    };
    send(cli, request).await
}

async fn run_token(
    cli: &Cli,
    client: &Client,
    command: &TokenCommands,
) -> Result<Option<Value>, AppError> {
    let base = cli.base_url.trim_end_matches('/');
    match command {
        TokenCommands::ClientCredentials {
            client_id,
            client_secret,
            scope,
        } => {
            let mut form = vec![("grant_type", "client_credentials")];
            if let Some(scope) = scope {
                form.push(("scope", scope.as_str()));
            }
            let request = client
                .post(format!("{}/oauth2/token", base))
                .basic_auth(client_id, Some(client_secret))
                .form(&form);
            send(cli, request).await
        }
    }
}

async fn run_process(
    cli: &Cli,
    client: &Client,
    command: &ProcessCommands,
) -> Result<Option<Value>, AppError> {
    let base = format!("{}/admin/process", cli.base_url.trim_end_matches('/'));
    let token = cli.access_token.as_deref().ok_or_else(|| {
        AppError::Authentication(
            "an access token is required (--access-token or TOOLGATE_ACCESS_TOKEN)".to_string(),
        )
    })?;

    let request = match command {
        ProcessCommands::Status => client.get(&base),
        ProcessCommands::Start => client.post(format!("{}/start", base)),
        ProcessCommands::Stop => client.post(format!("{}/stop", base)),
        ProcessCommands::Restart => client.post(format!("{}/restart", base)),
        ProcessCommands::Logs { lines } => client
            .get(format!("{}/logs", base))
            .query(&[("lines", lines)]),
        ProcessCommands::Config {
            host,
            port,
            auto_start,
            log_level,
        } => {
            let patch = BackendConfigPatch {
                host: host.clone(),
                port: *port,
                auto_start: *auto_start,
                log_level: log_level.clone(),
            };
            if host.is_none() && port.is_none() && auto_start.is_none() && log_level.is_none() {
                client.get(format!("{}/config", base))
            } else {
                client.put(format!("{}/config", base)).json(&patch)
            }
        }
    };

    let result = send(cli, request.bearer_auth(token)).await?;
    if let (ProcessCommands::Logs { .. }, Some(body)) = (command, &result) {
        if let Some(logs) = body.get("logs").and_then(Value::as_str) {
            println!("{}", logs);
            return Ok(None);
        }
    }
    Ok(result)
}

async fn send(cli: &Cli, request: RequestBuilder) -> Result<Option<Value>, AppError> {
    let response = request.send().await?;
    let status = response.status();
    if cli.verbose {
        eprintln!("{} {}", status, response.url());
    }

    let text = response.text().await?;
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(AppError::Authentication(text));
    }
    if !status.is_success() {
        return Err(AppError::Rejected(status, text));
    }
    if text.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&text)?))
}
