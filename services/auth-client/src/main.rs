use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use auth_client::context::Navigator;
use auth_client::{
    ApiRequest, AuthClient, ClientConfig, LoginCredentials, NoopQueryCache, RestoreOutcome, Role,
};
use common::storage::FileStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: auth-client <login EMAIL [admin|employee] | status | get PATH | logout | watch>";

/// Navigator for a terminal session: there is no page to leave
struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn current_path(&self) -> String {
        "/".to_string()
    }

    fn redirect_to_login(&self) {
        eprintln!("Session ended. Run `auth-client login EMAIL` to sign in again.");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!(USAGE);
    };

    let config = ClientConfig::from_env().context("loading configuration")?;
    let store = FileStore::open(&config.storage_path)
        .with_context(|| format!("opening session store {}", config.storage_path))?;
    info!("Using API at {}", config.api_url);

    let client = AuthClient::new(
        &config,
        Arc::new(store),
        Arc::new(TerminalNavigator),
        Arc::new(NoopQueryCache),
    );

    match command.as_str() {
        "login" => login(&client, &args[1..]).await,
        "status" => status(&client),
        "get" => get(&client, &args[1..]).await,
        "logout" => logout(&client).await,
        "watch" => watch(&client).await,
        other => bail!("unknown command `{}`\n{}", other, USAGE),
    }
}

async fn login(client: &AuthClient, args: &[String]) -> Result<()> {
    let Some(email) = args.first() else {
        bail!(USAGE);
    };
    let expected_role = match args.get(1).map(String::as_str) {
        None => None,
        Some("admin") => Some(Role::Admin),
        Some("employee") => Some(Role::Employee),
        Some(other) => bail!("unknown role `{}`", other),
    };

    let password = match std::env::var("ATTENDANCE_PASSWORD") {
        Ok(password) => password,
        Err(_) => prompt("Password: ")?,
    };

    let credentials = LoginCredentials {
        email: email.clone(),
        password,
    };

    let home = client.login.login(&credentials, expected_role).await?;
    let user = client.context.user().context("session missing after login")?;
    println!("Signed in as {} ({}), home: {}", user.full_name, user.role, home);

    // The monitor started by the login has nothing to watch in a one-shot command
    client.lifecycle.stop_monitor();
    Ok(())
}

fn status(client: &AuthClient) -> Result<()> {
    match client.context.restore() {
        RestoreOutcome::Restored => {
            let user = client.context.user().context("session missing after restore")?;
            let inspector = client.lifecycle.inspector();
            let access = client.context.access_token();
            println!("Signed in as {} <{}> ({})", user.full_name, user.email, user.role);
            println!(
                "Access token: {:?}, {}s left",
                inspector.classify(access.as_deref()),
                inspector.remaining(access.as_deref()).as_secs()
            );
            println!(
                "Session ends in {}s",
                client.lifecycle.session_remaining().as_secs()
            );
        }
        outcome => println!("Not signed in ({:?})", outcome),
    }
    Ok(())
}

async fn get(client: &AuthClient, args: &[String]) -> Result<()> {
    let Some(path) = args.first() else {
        bail!(USAGE);
    };
    if client.context.restore() != RestoreOutcome::Restored {
        bail!("not signed in");
    }

    let response = client.interceptor.send(ApiRequest::get(path.as_str())).await?;
    println!("{}", response.body);
    Ok(())
}

async fn logout(client: &AuthClient) -> Result<()> {
    client.context.restore();
    let reason = client.login.logout().await;
    println!("Signed out ({:?})", reason);
    Ok(())
}

async fn watch(client: &AuthClient) -> Result<()> {
    let outcome = client.context.restore();
    if outcome != RestoreOutcome::Restored {
        bail!("not signed in ({:?})", outcome);
    }

    let mut events = client.bus.listen();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    println!("Watching session, press Ctrl-C to stop");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", event);
                    if !client.context.is_authenticated() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    eprintln!("missed {} events", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = &mut ctrl_c => break,
        }
    }

    client.lifecycle.stop_monitor();
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
