use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StoreArg {
    Memory,
    Sqlite,
    Document,
}

#[derive(Debug, Parser)]
#[command(name = "newsroom", version, about = "Personal newsletter aggregator for Gmail")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output structured JSON
    #[arg(long, global = true)]
    json: bool,

    /// Credential store backend
    #[arg(
        long,
        global = true,
        value_enum,
        default_value = "sqlite",
        env = "NEWSROOM_STORE"
    )]
    store: StoreArg,

    /// Credential store location (file for sqlite, directory for document)
    #[arg(long, global = true, env = "NEWSROOM_STORE_PATH")]
    store_path: Option<std::path::PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the Google consent URL for a user
    Login { user_id: String },
    /// Exchange an authorization code returned by the consent flow
    Exchange { user_id: String, code: String },
    /// Fetch and list the user's newsletters
    Fetch { user_id: String },
    /// Show one fetched newsletter by message id
    Show { user_id: String, message_id: String },
    /// Mark a newsletter as read
    Read { user_id: String, message_id: String },
    /// Mark a newsletter as unread
    Unread { user_id: String, message_id: String },
    /// Move a newsletter to trash
    Trash { user_id: String, message_id: String },
    /// Restore a newsletter from trash
    Untrash { user_id: String, message_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::dispatch(cli).await
}

mod commands {
    use anyhow::{anyhow, Context, Result};
    use serde::Serialize;

    use newsroom::config::{OAuthConfig, StoreBackend};
    use newsroom::gmail::GmailClient;
    use newsroom::oauth::Authenticator;
    use newsroom::output::{self, OutputFormat};
    use newsroom::service::NewsletterService;
    use newsroom::store::open_store;

    use super::{Cli, Commands, StoreArg};

    pub async fn dispatch(cli: Cli) -> Result<()> {
        let service = build_service(cli.store, cli.store_path.as_deref())?;
        let format = OutputFormat::from_json_flag(cli.json);

        match cli.command {
            Commands::Login { user_id } => handle_login(&service, &user_id, format),
            Commands::Exchange { user_id, code } => {
                handle_exchange(&service, &user_id, &code, format).await
            }
            Commands::Fetch { user_id } => handle_fetch(&service, &user_id, format).await,
            Commands::Show {
                user_id,
                message_id,
            } => handle_show(&service, &user_id, &message_id, format).await,
            Commands::Read {
                user_id,
                message_id,
            } => {
                let outcome = service.mark_read(&user_id, &message_id).await?;
                print_outcome(format, &outcome)
            }
            Commands::Unread {
                user_id,
                message_id,
            } => {
                let outcome = service.mark_unread(&user_id, &message_id).await?;
                print_outcome(format, &outcome)
            }
            Commands::Trash {
                user_id,
                message_id,
            } => {
                let outcome = service.move_to_trash(&user_id, &message_id).await?;
                print_outcome(format, &outcome)
            }
            Commands::Untrash {
                user_id,
                message_id,
            } => {
                let outcome = service.restore_from_trash(&user_id, &message_id).await?;
                print_outcome(format, &outcome)
            }
        }
    }

    fn build_service(store: StoreArg, store_path: Option<&std::path::Path>) -> Result<NewsletterService> {
        let config = OAuthConfig::from_env()?;
        let store = open_store(map_store(store), store_path).context("open credential store")?;
        Ok(NewsletterService::new(
            store,
            Authenticator::new(config),
            GmailClient::new(),
        ))
    }

    fn map_store(store: StoreArg) -> StoreBackend {
        match store {
            StoreArg::Memory => StoreBackend::Memory,
            StoreArg::Sqlite => StoreBackend::Sqlite,
            StoreArg::Document => StoreBackend::Document,
        }
    }

    #[derive(Debug, Serialize)]
    struct LoginResponse {
        authorization_url: String,
    }

    #[derive(Debug, Serialize)]
    struct ExchangeSummary {
        user_id: String,
        has_refresh_token: bool,
        expiry_date: Option<i64>,
    }

    fn handle_login(service: &NewsletterService, user_id: &str, format: OutputFormat) -> Result<()> {
        let url = service.begin_authorization(user_id)?;
        match format {
            OutputFormat::Table => {
                println!("Open this URL to grant access:\n{url}");
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&LoginResponse {
                        authorization_url: url,
                    })?
                );
            }
        }
        Ok(())
    }

    async fn handle_exchange(
        service: &NewsletterService,
        user_id: &str,
        code: &str,
        format: OutputFormat,
    ) -> Result<()> {
        let record = service.complete_authorization(code, user_id).await?;

        // Token values stay out of terminal output.
        let summary = ExchangeSummary {
            user_id: record.user_id.clone(),
            has_refresh_token: record.refresh_token.is_some(),
            expiry_date: record.expiry_date,
        };
        match format {
            OutputFormat::Table => {
                println!("Credentials stored for {}", summary.user_id);
                if !summary.has_refresh_token {
                    println!("Warning: no refresh token on file; access will lapse at expiry");
                }
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        }
        Ok(())
    }

    async fn handle_fetch(
        service: &NewsletterService,
        user_id: &str,
        format: OutputFormat,
    ) -> Result<()> {
        let batch = service.list_newsletters(user_id).await?;
        println!("{}", output::format_batch(format, &batch)?);
        Ok(())
    }

    async fn handle_show(
        service: &NewsletterService,
        user_id: &str,
        message_id: &str,
        format: OutputFormat,
    ) -> Result<()> {
        let batch = service.list_newsletters(user_id).await?;
        let newsletter = batch
            .newsletters
            .iter()
            .find(|newsletter| newsletter.message_id == message_id)
            .ok_or_else(|| anyhow!("no fetched newsletter with id '{message_id}'"))?;

        println!("{}", output::format_newsletter(format, newsletter)?);
        Ok(())
    }

    fn print_outcome(
        format: OutputFormat,
        outcome: &newsroom::service::ActionOutcome,
    ) -> Result<()> {
        println!("{}", output::format_outcome(format, outcome)?);
        Ok(())
    }
}
