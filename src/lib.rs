pub mod api;
pub mod config;
pub mod db;
pub mod entities;
pub mod resource;
pub mod validation;

use std::io::Write as _;
use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

pub use config::Config;
use db::Store;
use entities::users;
use resource::Record as _;
use validation::{Submitted, Validator};

pub async fn run() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config);

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        None | Some("serve") => serve(config).await,

        Some("createadmin") => create_admin(config).await,

        Some("help" | "-h" | "--help") => {
            print_help();
            Ok(())
        }

        Some(other) => {
            println!("Unknown command: {other}");
            println!();
            print_help();
            Ok(())
        }
    }
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn print_help() {
    println!("Accountd - User Account API");
    println!();
    println!("USAGE:");
    println!("  accountd <COMMAND>");
    println!();
    println!("COMMANDS:");
    println!("  serve         Run the HTTP API server (default)");
    println!("  createadmin   Create an admin account interactively");
    println!("  help          Show this help message");
    println!();
    println!("CONFIG:");
    println!("  Edit config.toml (or set ACCOUNTD_CONFIG) to configure the");
    println!("  server address, database and password hashing costs.");
}

async fn serve(config: Config) -> Result<()> {
    let store = Store::with_pool_options(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(api::AppState { store, config });
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("accountd v{} listening on http://{addr}", env!("CARGO_PKG_VERSION"));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Error listening for shutdown: {e}"),
    }
}

/// Create an admin account from interactive prompts. This is the only path
/// that sets the admin flag outside the admin HTTP endpoints.
async fn create_admin(config: Config) -> Result<()> {
    let store = Store::new(&config.database.url).await?;

    let username = loop {
        let name = prompt("Username")?;
        if name.is_empty() {
            continue;
        }
        if store.users().find_by_username(&name).await?.is_none() {
            break name;
        }
        println!("Username already exists. Try again.");
    };

    let email = prompt("E-mail")?;

    let password = loop {
        let first = prompt("Password")?;
        let second = prompt("Password (confirm)")?;
        if first == second {
            break first;
        }
        println!("Passwords did not match. Try again.");
    };

    let mut data = Submitted::new();
    data.insert("username".to_string(), username.into());
    data.insert("email".to_string(), email.into());
    data.insert("password".to_string(), password.into());
    data.insert("is_admin".to_string(), true.into());

    let draft = users::Model::draft();
    let outcome = match Validator::new(&draft, api::admin::admin_user_rules())
        .validate(&store.conn, &data)
        .await
    {
        Ok(valid) => valid.save(&store.conn, &config.security).await,
        Err(err) => Err(err),
    };

    match outcome {
        Ok(admin) => {
            println!("User created successfully.");
            println!("API key: {}", admin.api_key);
            Ok(())
        }
        Err(validation::Error::Invalid(errors)) => {
            for (field, message) in &errors {
                println!("  {field}: {message}");
            }
            anyhow::bail!("Admin account was not created")
        }
        Err(err) => Err(err.into()),
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}: ");
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}
