//! screener: command-line client for the market-screening service.
//!
//! Single-binary Tokio application that:
//! 1. Restores the persisted session and verifies it with the server
//! 2. Logs in, registers or logs out
//! 3. Renders the dashboard summaries
//! 4. Lists markets and runs screens on demand
//! 5. Lists and saves screen definitions

mod config;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use common::{ClientConfig, MarketType, NewSavedScreen, ScreeningRequest, ScreeningType};
use query_cache::QueryStatus;
use screener_client::{FileStore, HttpGateway, ScreenerApi, SessionStore};
use views::{authorize, Access, DashboardView, Queries, Route, ScreenerView};

/// Market screener client
#[derive(Parser)]
#[command(name = "screener", about = "Market screening service client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and persist the session.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Create an account, then log in with it.
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Full name shown in greetings.
        #[arg(long)]
        name: String,
    },
    /// Forget the persisted session.
    Logout,
    /// Verify the persisted session and print the identity.
    Whoami,
    /// Show market and screening summaries.
    Dashboard,
    /// List markets of one type.
    Markets {
        #[arg(long, default_value = "stock")]
        market_type: MarketType,
    },
    /// Run a screen.
    Screen {
        #[arg(long, default_value = "stock")]
        market_type: MarketType,
        #[arg(long, default_value = "minervini")]
        screening_type: ScreeningType,
        /// Print raw results as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List saved screens.
    Screens,
    /// Save a screen definition.
    SaveScreen {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, default_value = "stock")]
        market_type: MarketType,
        #[arg(long, default_value = "minervini")]
        screening_type: ScreeningType,
        #[arg(long)]
        public: bool,
    },
    /// Check whether the current session may open a page.
    Open {
        /// Page path, e.g. `/admin`.
        path: Route,
    },
}

impl Command {
    /// Page whose access rules the command follows.
    fn route(&self) -> Route {
        match self {
            Command::Login { .. } | Command::Logout | Command::Whoami => Route::Login,
            Command::Register { .. } => Route::Register,
            Command::Dashboard => Route::Dashboard,
            Command::Markets { .. } | Command::Screen { .. } => Route::Screener,
            Command::Screens | Command::SaveScreen { .. } => Route::SavedScreens,
            Command::Open { path } => *path,
        }
    }
}

struct App {
    api: ScreenerApi,
    session: Arc<SessionStore>,
    queries: Queries,
}

fn build_app(cfg: &ClientConfig) -> Result<App, common::Error> {
    let gateway = HttpGateway::new(cfg)?;
    let store = Arc::new(FileStore::new(&cfg.state_dir, &cfg.storage_namespace));
    info!("Session file: {}", store.path().display());

    let session = Arc::new(SessionStore::new(gateway.clone(), store));
    let queries = Queries::attached_to(&session);
    let api = ScreenerApi::new(gateway, session.clone());
    Ok(App {
        api,
        session,
        queries,
    })
}

#[tokio::main]
async fn main() {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "screener=info,screener_client=info,query_cache=info,views=info".into()
            }),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    // Load configuration.
    let cfg = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    info!("API root: {}", cfg.api_root);

    let app = match build_app(&cfg) {
        Ok(app) => app,
        Err(e) => {
            error!("Client initialization failed: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli.command, &app).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(command: Command, app: &App) -> Result<(), common::Error> {
    // Verify any persisted session before the first page is shown.
    if !matches!(command, Command::Login { .. } | Command::Register { .. } | Command::Logout) {
        app.session.check_auth().await;
    }

    let route = command.route();
    if let Access::Redirect(to) = authorize(route, &app.session.snapshot()) {
        if let Command::Open { .. } = command {
            println!("{route} -> redirect to {to}");
            return Ok(());
        }
        return Err(match to {
            Route::Login => common::Error::InvalidState(
                "not logged in; run `screener login` first".into(),
            ),
            _ => common::Error::InvalidState(format!("{route} is not available to this account")),
        });
    }

    match command {
        Command::Login { email, password } => {
            let user = app.session.login(&email, &password).await?;
            println!("Logged in as {}", user.label());
        }
        Command::Register {
            email,
            password,
            name,
        } => {
            let user = app.session.register(&email, &password, &name).await?;
            println!("Account created; logged in as {}", user.label());
        }
        Command::Logout => {
            app.session.logout();
            println!("Logged out");
        }
        Command::Whoami => match app.session.user() {
            Some(user) => {
                println!("{} <{}>", user.label(), user.email);
                println!("  tier:   {:?} ({})", user.tier, user.tier_status);
                if user.is_privileged {
                    println!("  admin:  yes");
                }
            }
            None => println!("Not logged in"),
        },
        Command::Dashboard => {
            let view = DashboardView::new(app.api.clone(), app.queries.clone());
            let snap = view.load().await;
            if let Some(greeting) = &snap.greeting {
                println!("{greeting}");
            }
            if let Some(status) = snap.subscription {
                println!("Your subscription status: {status}");
            }
            println!();
            println!("Total markets:   {}", snap.total_markets);
            println!("  stocks  {:>6}", snap.by_type.stock);
            println!("  etfs    {:>6}", snap.by_type.etf);
            println!("  indices {:>6}", snap.by_type.index);
            println!("Screening activity: {}", snap.total_screens);
            println!("  recent results {:>6}", snap.recent_results);
            println!("  active screens {:>6}", snap.active_screens);
            if snap.market_status == QueryStatus::Failed
                || snap.screening_status == QueryStatus::Failed
            {
                warn!("Some dashboard data could not be loaded");
            }
        }
        Command::Markets { market_type } => {
            let mut view = ScreenerView::new(app.api.clone(), app.queries.clone());
            view.set_market_type(market_type);
            let state = view.refresh().await;
            if let Some(err) = &state.error {
                return Err(err.clone());
            }
            for market in state.data().map(Vec::as_slice).unwrap_or_default() {
                println!(
                    "{:<10} {:<40} {}",
                    market.symbol,
                    market.name,
                    market.exchange.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Screen {
            market_type,
            screening_type,
            json,
        } => {
            let mut view = ScreenerView::new(app.api.clone(), app.queries.clone());
            view.set_market_type(market_type);
            view.set_screening_type(screening_type);
            view.refresh().await;

            let state = view.run_screening().await;
            if let Some(err) = &state.error {
                return Err(err.clone());
            }
            if json {
                let results = state.data().map(Vec::as_slice).unwrap_or_default();
                println!("{}", serde_json::to_string_pretty(results)?);
                return Ok(());
            }

            let rows = view.rows();
            println!("{} results for {screening_type} on {market_type}", rows.len());
            for row in rows {
                let mark = if row.passes { "+" } else { " " };
                println!(
                    "{mark} {:<10} {:<30} {:<30} {}",
                    row.symbol, row.name, row.criteria_met, row.details
                );
            }
        }
        Command::Screens => {
            for screen in app.api.saved_screens().await? {
                let created = screen
                    .created_at
                    .map(|t| t.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "{:>4}  {:<30} {} {}  {}",
                    screen.id,
                    screen.name,
                    screen.screening_criteria.screening_type,
                    if screen.is_public { "public " } else { "private" },
                    created
                );
            }
        }
        Command::SaveScreen {
            name,
            description,
            market_type,
            screening_type,
            public,
        } => {
            let saved = app
                .api
                .create_saved_screen(&NewSavedScreen {
                    name,
                    description,
                    screening_criteria: ScreeningRequest::for_market_type(
                        screening_type,
                        market_type,
                    ),
                    is_public: public,
                })
                .await?;
            println!("Saved screen #{} ({})", saved.id, saved.name);
        }
        Command::Open { path } => println!("{path} -> allowed"),
    }

    Ok(())
}
