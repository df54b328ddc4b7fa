//! ERP Bridge CLI
//!
//! Administers the encrypted credential store and launches the MCP bridge
//! server. Secret values are prompted hidden or imported from environment
//! variables - never taken as plaintext arguments.

use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use bridge_core::{
    default_store_dir, master_passphrase_from_env, AuditLog, CompanyUpdate, CredentialRepository,
    CredentialVault, JsonFileRepository, NewCompany, Provider, SecretFields,
};
use bridge_mcp::{adapter_for, create_shared_state, run_server, ErpAdapter};

#[derive(Parser)]
#[command(name = "erpbridge")]
#[command(version)]
#[command(about = "Multi-tenant credential bridge for Omie and Nibo ERP APIs")]
#[command(after_help = "EXAMPLES:
  erpbridge init                          Create the credential store
  erpbridge company add \"Acme Ltda\"       Register a company (prompts secrets)
  erpbridge company set-default acme      Pick the default tenant
  erpbridge serve --erp omie              Run the MCP server on stdio

The master passphrase comes from ERPBRIDGE_MASTER_PASSWORD; the store
directory from ERPBRIDGE_DIR (default ~/.erpbridge).")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the credential store
    Init,

    /// Manage company credentials
    Company {
        #[command(subcommand)]
        action: CompanyCommands,
    },

    /// View the audit trail
    Audit {
        /// Number of entries to show
        #[arg(long, default_value = "20")]
        last: usize,
    },

    /// Run the MCP bridge server on stdio
    Serve {
        /// ERP adapter to expose (omie or nibo)
        #[arg(long, default_value = "omie")]
        erp: String,
    },
}

#[derive(Subcommand)]
enum CompanyCommands {
    /// Register a company (prompts for secret fields)
    #[command(after_help = "EXAMPLES:
  erpbridge company add \"Acme Ltda\"                    Omie, prompts app_key/app_secret
  erpbridge company add \"Beta\" --erp nibo              Prompts api_token/company_id
  erpbridge company add \"Acme\" --from-env app_key=OMIE_APP_KEY")]
    Add {
        /// Company display name
        name: String,
        /// Explicit company key (generated from the name when omitted)
        #[arg(long)]
        key: Option<String>,
        /// ERP the credentials belong to (omie, nibo, generic)
        #[arg(long, default_value = "omie")]
        erp: String,
        /// Override the provider's default base URL
        #[arg(long)]
        base_url: Option<String>,
        /// Security level label
        #[arg(long)]
        security_level: Option<String>,
        /// Token window in minutes
        #[arg(long)]
        token_timeout: Option<i64>,
        /// Additional secret field to prompt for (repeatable)
        #[arg(long, action = clap::ArgAction::Append)]
        field: Vec<String>,
        /// Import a field from an environment variable, as field=ENV_VAR (repeatable)
        #[arg(long, action = clap::ArgAction::Append)]
        from_env: Vec<String>,
    },

    /// List companies (metadata only, never secrets)
    List,

    /// Show one company's metadata
    Show { key: String },

    /// Update a company's metadata or rotate its secrets
    Update {
        key: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        security_level: Option<String>,
        #[arg(long)]
        token_timeout: Option<i64>,
        /// Reactivate a deactivated company
        #[arg(long)]
        activate: bool,
        /// Re-prompt and replace the secret fields
        #[arg(long)]
        rotate: bool,
    },

    /// Deactivate a company (kept on file for audit continuity)
    Deactivate { key: String },

    /// Set the default company
    SetDefault { key: String },
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .compact(),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        None => {
            println!("ERP Bridge - encrypted credentials for Omie and Nibo MCP tools");
            println!();
            println!("Run 'erpbridge --help' for usage information.");
            println!("Run 'erpbridge init' to create the credential store.");
        }
        Some(cmd) => {
            if let Err(e) = handle_command(cmd).await {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
    }
}

async fn handle_command(cmd: Commands) -> Result<(), Box<dyn std::error::Error>> {
    let store_dir = default_store_dir();

    match cmd {
        Commands::Init => handle_init(&store_dir).await?,
        Commands::Company { action } => match action {
            CompanyCommands::Add {
                name,
                key,
                erp,
                base_url,
                security_level,
                token_timeout,
                field,
                from_env,
            } => {
                handle_company_add(
                    &store_dir,
                    name,
                    key,
                    &erp,
                    base_url,
                    security_level,
                    token_timeout,
                    &field,
                    &from_env,
                )
                .await?
            }
            CompanyCommands::List => handle_company_list(&store_dir).await?,
            CompanyCommands::Show { key } => handle_company_show(&store_dir, &key).await?,
            CompanyCommands::Update {
                key,
                name,
                base_url,
                security_level,
                token_timeout,
                activate,
                rotate,
            } => {
                handle_company_update(
                    &store_dir,
                    &key,
                    name,
                    base_url,
                    security_level,
                    token_timeout,
                    activate,
                    rotate,
                )
                .await?
            }
            CompanyCommands::Deactivate { key } => {
                handle_company_deactivate(&store_dir, &key).await?
            }
            CompanyCommands::SetDefault { key } => {
                handle_company_set_default(&store_dir, &key).await?
            }
        },
        Commands::Audit { last } => handle_audit(&store_dir, last).await?,
        Commands::Serve { erp } => handle_serve(store_dir, &erp).await?,
    }

    Ok(())
}

/// Open the vault at the store directory, creating the store if needed
async fn open_vault(store_dir: &PathBuf) -> Result<CredentialVault, Box<dyn std::error::Error>> {
    let repo = Box::new(JsonFileRepository::new(store_dir));
    let audit = AuditLog::new(store_dir);
    let passphrase = master_passphrase_from_env();
    Ok(CredentialVault::open(repo, audit, &passphrase).await?)
}

// === Command handlers ===

async fn handle_init(store_dir: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let repo = JsonFileRepository::new(store_dir);
    if repo.exists().await {
        println!("Credential store already exists at {}", repo.describe());
        return Ok(());
    }

    let vault = open_vault(store_dir).await?;
    println!("Credential store created at {}", vault.store_location());
    println!();
    println!("Next steps:");
    println!("  erpbridge company add <name>     Register a company");
    println!("  erpbridge serve --erp omie       Run the MCP server");

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_company_add(
    store_dir: &PathBuf,
    name: String,
    key: Option<String>,
    erp: &str,
    base_url: Option<String>,
    security_level: Option<String>,
    token_timeout: Option<i64>,
    extra_fields: &[String],
    from_env: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let provider = match erp {
        "omie" => Provider::Omie,
        "nibo" => Provider::Nibo,
        "generic" => Provider::Generic,
        other => return Err(format!("unknown ERP '{other}' (use omie, nibo or generic)").into()),
    };

    let mut secrets = SecretFields::new();

    // Environment imports first, then prompts for whatever is still missing
    for mapping in from_env {
        let (field, var) = mapping
            .split_once('=')
            .ok_or("--from-env expects field=ENV_VAR")?;
        let value =
            std::env::var(var).map_err(|_| format!("environment variable '{var}' not set"))?;
        secrets.insert(field, value);
    }

    let mut wanted: Vec<&str> = provider.required_fields().to_vec();
    for extra in extra_fields {
        if !wanted.contains(&extra.as_str()) {
            wanted.push(extra.as_str());
        }
    }

    for field in wanted {
        if secrets.get(field).is_none() {
            let value = prompt_secret(&format!("Enter value for '{field}': "))?;
            secrets.insert(field, value);
        }
    }

    let mut vault = open_vault(store_dir).await?;
    let company_key = vault
        .add_company(NewCompany {
            key,
            name,
            secrets,
            base_url,
            security_level,
            token_timeout_minutes: token_timeout,
        })
        .await?;

    println!("Company registered with key '{company_key}'");
    if vault.default_company().is_none() {
        println!("Tip: 'erpbridge company set-default {company_key}' to make it the default.");
    }

    Ok(())
}

async fn handle_company_list(store_dir: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let vault = open_vault(store_dir).await?;
    let companies = vault.list_companies();

    if companies.is_empty() {
        println!("No companies registered.");
        return Ok(());
    }

    let default = vault.default_company().map(String::from);
    println!("{:<20} {:<25} {:<8} {:<8} STATUS", "KEY", "NAME", "ERP", "TOKEN");
    for c in companies {
        let marker = if Some(&c.key) == default.as_ref() { " (default)" } else { "" };
        let status = if c.active { "active" } else { "inactive" };
        let token = if c.token_expired { "expired" } else { "ok" };
        println!(
            "{:<20} {:<25} {:<8} {:<8} {status}{marker}",
            c.key, c.name, c.provider, token
        );
    }

    Ok(())
}

async fn handle_company_show(
    store_dir: &PathBuf,
    key: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let vault = open_vault(store_dir).await?;
    let record = vault.company(key)?;

    println!("Key:             {key}");
    println!("Name:            {}", record.name);
    println!("Provider:        {}", record.provider);
    println!("Base URL:        {}", record.base_url);
    println!("Active:          {}", record.active);
    println!("Security level:  {}", record.security_level);
    println!(
        "Token expires:   {}",
        record
            .token_expires_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    println!("Token window:    {} minutes", record.token_timeout_minutes);
    println!("Created:         {}", record.created_at.to_rfc3339());
    println!("Updated:         {}", record.updated_at.to_rfc3339());

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_company_update(
    store_dir: &PathBuf,
    key: &str,
    name: Option<String>,
    base_url: Option<String>,
    security_level: Option<String>,
    token_timeout: Option<i64>,
    activate: bool,
    rotate: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut vault = open_vault(store_dir).await?;

    let secrets = if rotate {
        let provider = vault.company(key)?.provider;
        let mut fields = SecretFields::new();
        for field in provider.required_fields() {
            let value = prompt_secret(&format!("Enter new value for '{field}': "))?;
            fields.insert(*field, value);
        }
        Some(fields)
    } else {
        None
    };

    vault
        .update_company(
            key,
            CompanyUpdate {
                name,
                secrets,
                base_url,
                active: activate.then_some(true),
                security_level,
                token_timeout_minutes: token_timeout,
            },
        )
        .await?;

    println!("Company '{key}' updated.");
    Ok(())
}

async fn handle_company_deactivate(
    store_dir: &PathBuf,
    key: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut vault = open_vault(store_dir).await?;
    vault.deactivate_company(key).await?;

    println!("Company '{key}' deactivated. The record stays on file for auditing.");
    Ok(())
}

async fn handle_company_set_default(
    store_dir: &PathBuf,
    key: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut vault = open_vault(store_dir).await?;
    vault.set_default_company(key).await?;

    println!("Default company set to '{key}'.");
    Ok(())
}

async fn handle_audit(store_dir: &PathBuf, last: usize) -> Result<(), Box<dyn std::error::Error>> {
    let vault = open_vault(store_dir).await?;
    let entries = vault.audit_log().read_entries(Some(last), None).await?;

    if entries.is_empty() {
        println!("Audit log is empty.");
        return Ok(());
    }

    for entry in entries {
        println!(
            "{}  {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            serde_json::to_string(&entry.event)?
        );
    }

    Ok(())
}

async fn handle_serve(store_dir: PathBuf, erp: &str) -> Result<(), Box<dyn std::error::Error>> {
    let adapter: Arc<dyn ErpAdapter> = Arc::from(adapter_for(erp)?);
    let passphrase = master_passphrase_from_env();

    let state = create_shared_state(store_dir, adapter, &passphrase).await?;
    run_server(state).await
}

fn prompt_secret(prompt: &str) -> Result<String, Box<dyn std::error::Error>> {
    print!("{prompt}");
    io::stdout().flush()?;
    let value = rpassword::read_password()?;
    Ok(value)
}
