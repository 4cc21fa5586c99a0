use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ipaform::{
    Provider,
    config::{ProviderConfig, ProviderSettings},
    error::ProviderError,
    reconcile::{self, PlannedAction, Reconciler, ResourceModel},
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, rename_all = "kebab-case")]
struct Cli {
    /// FreeIPA server host or URL (falls back to FREEIPA_HOST)
    #[arg(long, value_name = "HOST", global = true)]
    host: Option<String>,
    /// Login user (falls back to FREEIPA_USERNAME)
    #[arg(long, value_name = "USER", global = true)]
    username: Option<String>,
    /// Login password (falls back to FREEIPA_PASSWORD)
    #[arg(long, value_name = "PASSWORD", global = true)]
    password: Option<String>,
    /// Skip TLS certificate verification; `--insecure=false` overrides
    /// FREEIPA_INSECURE
    #[arg(
        long,
        value_name = "BOOL",
        global = true,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    insecure: Option<bool>,
    /// PEM file with the FreeIPA CA certificate (falls back to FREEIPA_CA_CERT)
    #[arg(long, value_name = "PATH", global = true)]
    ca_cert: Option<PathBuf>,
    /// Write the resulting document here instead of stdout
    #[arg(long, value_name = "PATH", global = true)]
    out: Option<PathBuf>,

    #[arg(value_enum)]
    resource: ResourceKind,
    #[command(subcommand)]
    action: Action,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ResourceKind {
    User,
    Group,
    GroupMembership,
    DnsZone,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Preview the RPCs an apply would issue; contacts no server
    Plan {
        #[arg(long, value_name = "PATH")]
        config: PathBuf,
        #[arg(long, value_name = "PATH")]
        state: Option<PathBuf>,
    },
    /// Create, update or replace the object and print the new state
    Apply {
        #[arg(long, value_name = "PATH")]
        config: PathBuf,
        #[arg(long, value_name = "PATH")]
        state: Option<PathBuf>,
    },
    /// Re-read the object; prints null when it no longer exists
    Refresh {
        #[arg(long, value_name = "PATH")]
        state: PathBuf,
    },
    /// Delete the object recorded in the state document
    Destroy {
        #[arg(long, value_name = "PATH")]
        state: PathBuf,
    },
    /// Adopt an existing object by identifier
    Import {
        #[arg(long)]
        id: String,
    },
    /// Look up an object by identifier; fails when absent
    Show {
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match run(&cli).await {
        Ok(Some(doc)) => write_output(cli.out.as_deref(), &doc),
        Ok(None) => Ok(()),
        Err(err) => {
            if let Some(provider_err) = err.downcast_ref::<ProviderError>() {
                let diagnostic = serde_json::to_string(&provider_err.diagnostic())?;
                eprintln!("{diagnostic}");
            }
            Err(err)
        }
    }
}

async fn run(cli: &Cli) -> Result<Option<Value>> {
    let connect = || -> Result<Provider> {
        let settings = ProviderSettings {
            host: cli.host.clone(),
            username: cli.username.clone(),
            password: cli.password.clone(),
            insecure: cli.insecure,
            ca_certificate: cli.ca_cert.clone(),
        };
        let (config, _warnings) =
            ProviderConfig::resolve(settings).context("invalid provider configuration")?;
        Provider::connect(&config).context("failed to set up the FreeIPA client")
    };

    match cli.resource {
        ResourceKind::User => dispatch(&cli.action, || Ok(connect()?.users())).await,
        ResourceKind::Group => dispatch(&cli.action, || Ok(connect()?.groups())).await,
        ResourceKind::GroupMembership => {
            dispatch(&cli.action, || Ok(connect()?.memberships())).await
        }
        ResourceKind::DnsZone => dispatch(&cli.action, || Ok(connect()?.dns_zones())).await,
    }
}

/// Run one action against one resource kind. The server is only contacted
/// for actions that need it.
async fn dispatch<R: Reconciler>(
    action: &Action,
    connect: impl FnOnce() -> Result<R>,
) -> Result<Option<Value>> {
    let doc = match action {
        Action::Plan { config, state } => {
            let config: R::Model = read_json(config)?;
            let prior: Option<R::Model> = state.as_deref().map(read_json).transpose()?;
            to_json(&reconcile::plan(&config, prior.as_ref())?)?
        }
        Action::Apply { config, state } => {
            let plan: R::Model = read_json(config)?;
            let prior: Option<R::Model> = state.as_deref().map(read_json).transpose()?;
            let reconciler = connect()?;
            let applied = apply(&reconciler, plan, prior).await?;
            to_json(&applied)?
        }
        Action::Refresh { state } => {
            let state: R::Model = read_json(state)?;
            let reconciler = connect()?;
            match reconciler.read(state).await? {
                Some(fresh) => to_json(&fresh)?,
                None => {
                    warn!(kind = kind::<R>(), "object is gone, state should be dropped");
                    Value::Null
                }
            }
        }
        Action::Destroy { state } => {
            let state: R::Model = read_json(state)?;
            connect()?.delete(&state).await?;
            info!(kind = kind::<R>(), id = ?state.id(), "destroyed");
            return Ok(None);
        }
        Action::Import { id } => match connect()?.import(id).await? {
            Some(model) => to_json(&model)?,
            None => {
                let kind = kind::<R>();
                return Err(ProviderError::NotFound { kind, id: id.clone() }.into());
            }
        },
        Action::Show { id } => to_json(&connect()?.lookup(id).await?)?,
    };
    Ok(Some(doc))
}

async fn apply<R: Reconciler>(
    reconciler: &R,
    plan: R::Model,
    prior: Option<R::Model>,
) -> Result<R::Model> {
    let Some(prior) = prior else {
        return Ok(reconciler.create(plan).await?);
    };
    if let PlannedAction::Replace { fields } = reconcile::plan(&plan, Some(&prior))? {
        info!(kind = kind::<R>(), ?fields, "replacing object");
        reconciler.delete(&prior).await?;
        return Ok(reconciler.create(plan).await?);
    }
    Ok(reconciler.update(plan, prior).await?)
}

fn kind<R: Reconciler>() -> &'static str {
    <R::Model as ResourceModel>::KIND
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid JSON document {}", path.display()))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).context("failed to encode output")
}

fn write_output(out: Option<&Path>, doc: &Value) -> Result<()> {
    let text = serde_json::to_string_pretty(doc)?;
    match out {
        Some(path) => std::fs::write(path, text + "\n")
            .with_context(|| format!("failed to write {}", path.display())),
        None => {
            println!("{text}");
            Ok(())
        }
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
