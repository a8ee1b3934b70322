use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use smsgate::config::{AppConfig, ProviderSettings, StoreSettings};
use smsgate::provider::{AliyunProvider, MockProvider, Provider};
use smsgate::store::{CounterStore, MemoryStore};
use smsgate::{Client, Context, SendRequest, VerifyRequest};

#[derive(Parser)]
#[command(name = "smsgate", version, about = "Rate-limited SMS sending and verification")]
struct Cli {
    /// YAML configuration file; SMSGATE__* variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a templated message
    Send {
        #[arg(long)]
        phone: String,
        #[arg(long)]
        template: String,
        #[arg(long, default_value = "")]
        biz: String,
        /// Template parameter as name=value, repeatable
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
        #[arg(long)]
        country_code: Option<String>,
        #[arg(long)]
        device: Option<String>,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long)]
        sign_name: Option<String>,
        #[arg(long)]
        out_id: Option<String>,
    },
    /// Check a verification code
    Verify {
        #[arg(long)]
        phone: String,
        #[arg(long)]
        code: String,
        #[arg(long, default_value = "")]
        biz: String,
    },
    /// Look up delivery status by message id or phone
    Status {
        #[arg(long, conflicts_with = "phone", required_unless_present = "phone")]
        msg_id: Option<String>,
        #[arg(long)]
        phone: Option<String>,
    },
    /// Show, set or reset a business quota
    Quota {
        #[arg(long)]
        biz: String,
        #[arg(long, conflicts_with = "reset")]
        set: Option<u32>,
        #[arg(long)]
        reset: bool,
    },
    /// Show a phone's send count in the current window
    Count {
        #[arg(long)]
        phone: String,
        #[arg(long, default_value = "day")]
        window: String,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    let store = build_store(&config.store).await?;
    let provider = build_provider(&config, store.clone())?;
    let client = Client::from_config(&config, store, provider)?;
    info!(provider = client.provider_name(), "smsgate ready");

    let (ctx, cancel) = Context::with_cancel();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, cancelling");
            cancel.cancel();
        }
    });

    match cli.command {
        Command::Send {
            phone,
            template,
            biz,
            params,
            country_code,
            device,
            ip,
            sign_name,
            out_id,
        } => {
            let params: HashMap<String, String> = params.into_iter().collect();
            let mut req = SendRequest::new(phone, template, params).with_biz_id(biz);
            req.country_code = country_code;
            req.device_id = device;
            req.ip = ip;
            req.sign_name = sign_name;
            req.out_id = out_id;

            print_json(&client.send(&ctx, &req).await?)?;
        }
        Command::Verify { phone, code, biz } => {
            let req = VerifyRequest::new(phone, code, biz);
            print_json(&client.verify(&ctx, &req).await?)?;
        }
        Command::Status { msg_id, phone } => match (msg_id, phone) {
            (Some(msg_id), _) => print_json(&client.query_status(&ctx, &msg_id).await?)?,
            (None, Some(phone)) => {
                print_json(&client.query_status_by_phone(&ctx, &phone).await?)?
            }
            (None, None) => anyhow::bail!("either --msg-id or --phone is required"),
        },
        Command::Quota { biz, set, reset } => {
            if let Some(max) = set {
                client.set_quota(&biz, max);
            }
            if reset {
                client.reset_quota(&biz).await?;
            }
            let (used, max) = client.get_quota(&biz).await?;
            print_json(&QuotaReport { biz_id: biz, used, max })?;
        }
        Command::Count { phone, window } => {
            let count = client.get_phone_count(&phone, &window).await?;
            print_json(&CountReport { phone, window, count })?;
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct QuotaReport {
    biz_id: String,
    used: u64,
    max: u32,
}

#[derive(Serialize)]
struct CountReport {
    phone: String,
    window: String,
    count: u64,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn build_store(settings: &StoreSettings) -> anyhow::Result<Arc<dyn CounterStore>> {
    match settings {
        StoreSettings::Memory => {
            info!("Using in-memory counter store");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "redis")]
        StoreSettings::Redis { url } => {
            let store = smsgate::store::RedisStore::connect(url).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        StoreSettings::Redis { .. } => {
            anyhow::bail!("redis store requested but smsgate was built without the `redis` feature")
        }
    }
}

fn build_provider(
    config: &AppConfig,
    store: Arc<dyn CounterStore>,
) -> anyhow::Result<Arc<dyn Provider>> {
    match &config.provider {
        ProviderSettings::Mock(mock) => Ok(Arc::new(
            MockProvider::new(store)
                .with_success_rate(mock.success_rate)
                .with_code_expiry(mock.code_expiry),
        )),
        ProviderSettings::Aliyun(aliyun) => {
            let mut aliyun = aliyun.clone();
            aliyun.default_country_code = config.client.default_country_code.clone();
            Ok(Arc::new(AliyunProvider::new(store, aliyun)?))
        }
    }
}
