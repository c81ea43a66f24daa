//! `riitag`: shows what you last played on your RiiTag as Discord Rich
//! Presence.

mod logging;

use std::process::ExitCode;
use std::sync::atomic::AtomicBool;

use clap::{Parser, Subcommand};

use riitag_api::{AuthFlow, DiscordClient, OAuth2Client, RiitagClient};
use riitag_core::{AppContext, PreferencesHandle};
use riitag_runtime::{
    DiscordIpcPresence, EngineEvent, RpcConnector, RpcError, RuntimeError, SyncEngine,
};

#[derive(Parser, Debug)]
#[command(name = "riitag", version, about = "Discord Rich Presence for RiiTag")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Mirror your RiiTag to Discord until interrupted (the default).
    Run,
    /// Authorize with Discord again, replacing the cached token.
    Login,
    /// Forget the cached Discord token.
    Logout,
    /// Show or change preferences.
    Prefs {
        /// Seconds between two RiiTag checks.
        #[arg(long)]
        check_interval: Option<u64>,
        /// Minutes after the last play before the presence is cleared.
        #[arg(long)]
        presence_timeout: Option<u64>,
        /// Restore the defaults.
        #[arg(long, conflicts_with_all = ["check_interval", "presence_timeout"])]
        reset: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let ctx = match AppContext::load() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    let _guard = logging::init(&ctx.paths.log_dir());

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&ctx).await,
        Command::Login => login(&ctx).await,
        Command::Logout => logout(&ctx),
        Command::Prefs {
            check_interval,
            presence_timeout,
            reset,
        } => prefs(&ctx, check_interval, presence_timeout, reset),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "riitag exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(ctx: &AppContext) -> Result<(), RuntimeError> {
    ctx.config.validate()?;
    let prefs = PreferencesHandle::load(ctx.paths.prefs_file())?;

    let mut connector = RpcConnector::new(Box::new(DiscordIpcPresence::new(
        &ctx.config.rpc.client_id,
    )));
    let stop = AtomicBool::new(false);
    tokio::select! {
        _ = connector.connect_with_retry(&stop, |status| tracing::info!("{status}")) => {}
        _ = tokio::signal::ctrl_c() => return Ok(()),
    }

    let (flow, discord) = auth_flow(ctx)?;
    let (_tokens, user) = tokio::select! {
        logged_in = flow.login(&discord) => logged_in?,
        _ = tokio::signal::ctrl_c() => {
            connector.close();
            return Ok(());
        }
    };
    tracing::info!(user = %user.display_name(), "Logged in to Discord");

    let source = RiitagClient::from_config(riitag_core::http::build_client()?, &ctx.config.riitag);
    let (engine, mut events) = SyncEngine::start(
        &ctx.config,
        riitag_core::http::build_client()?,
        source,
        user.id.clone(),
        prefs.subscribe(),
        connector,
    )?;

    let mut outcome = Ok(());
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    report(&event);
                    if let EngineEvent::FatalRpcError(message) = event {
                        outcome = Err(RpcError::Ipc(message).into());
                        break;
                    }
                }
                None => {
                    outcome = Err(RuntimeError::Thread("sync engine stopped unexpectedly".into()));
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    engine.stop().await;
    outcome
}

fn report(event: &EngineEvent) {
    match event {
        EngineEvent::StateChanged(state) => match &state.last_played {
            Some(lp) if state.should_display() => {
                tracing::info!(console = %lp.console, game_id = %lp.game_id, "Presence updated");
            }
            _ => tracing::info!("Nothing played recently, presence cleared"),
        },
        EngineEvent::NotFound(message) => {
            tracing::warn!(%message, "No RiiTag for this Discord account, create one at https://tag.rc24.xyz");
        }
        EngineEvent::RpcStatus(status) => tracing::info!("{status}"),
        EngineEvent::RpcConnected => tracing::info!("Connected to Discord"),
        EngineEvent::FatalRpcError(message) => tracing::error!(%message, "Discord RPC failed repeatedly"),
    }
}

async fn login(ctx: &AppContext) -> Result<(), RuntimeError> {
    ctx.config.validate()?;
    let (flow, discord) = auth_flow(ctx)?;
    let mut tokens = flow.acquire().await?;
    let user = discord.current_user(&mut tokens).await?;
    tracing::info!(user = %user.display_name(), "Logged in to Discord");
    Ok(())
}

fn logout(ctx: &AppContext) -> Result<(), RuntimeError> {
    let (flow, _) = auth_flow(ctx)?;
    flow.logout()?;
    Ok(())
}

fn prefs(
    ctx: &AppContext,
    check_interval: Option<u64>,
    presence_timeout: Option<u64>,
    reset: bool,
) -> Result<(), RuntimeError> {
    let handle = PreferencesHandle::load(ctx.paths.prefs_file())?;
    if reset {
        handle.reset()?;
    }
    if let Some(seconds) = check_interval {
        handle.set_check_interval(seconds)?;
    }
    if let Some(minutes) = presence_timeout {
        handle.set_presence_timeout(minutes)?;
    }

    let current = handle.current();
    println!("check_interval   = {} s", current.check_interval);
    println!("presence_timeout = {} min", current.presence_timeout);
    Ok(())
}

/// The login flow and the Discord client, sharing one HTTP client.
fn auth_flow(ctx: &AppContext) -> Result<(AuthFlow, DiscordClient), RuntimeError> {
    let http = riitag_core::http::build_client()?;
    let flow = AuthFlow::new(
        OAuth2Client::new(http.clone(), ctx.config.oauth2.clone()),
        ctx.paths.token_file(),
    );
    let discord = DiscordClient::from_config(http, &ctx.config.oauth2);
    Ok((flow, discord))
}
