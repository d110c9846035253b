mod config;
mod db;
mod error;
mod http;
mod message;
mod notify;
mod police;
mod portal;
mod roster;
mod session;
mod types;
mod watcher;

use config::Config;
use db::Ledger;
use env_logger::Env;
use error::Result;
use http::ResilientClient;
use log::{error, info, warn};
use notify::{Alerter, Notifier, Telegram};
use police::RegistrySite;
use portal::Portal;
use roster::SqliteRoster;
use session::SessionManager;
use std::sync::Arc;
use std::time::Duration;
use watcher::Watcher;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("Starting blacklist-watch");

    if let Err(e) = run().await {
        error!("Cannot start: {}", e);
        std::process::exit(1);
    }
    info!("Exiting main");
}

async fn run() -> Result<()> {
    let config = Config::from_env()?;
    info!(
        "Watching {} fleets on {} servers, polling every {:?}",
        config.fleets.len(),
        config.servers.ids().len(),
        config.poll_interval
    );

    let client = Arc::new(ResilientClient::new(config.requests.clone()));
    let alerter = Arc::new(match &config.alert_bot {
        Some((token, chat_id)) => {
            let bot: Arc<dyn Notifier> =
                Arc::new(Telegram::new(&config.telegram_url, token, Duration::ZERO)?);
            Alerter::new(Some((bot, chat_id.clone())), config.alert_threshold)
        }
        None => {
            warn!("TELEGRAM_ERROR_BOT_TOKEN or TELEGRAM_ERROR_CHAT_ID not set, operator alerts are off");
            Alerter::disabled()
        }
    });
    let notifier = Arc::new(Telegram::new(
        &config.telegram_url,
        &config.telegram_token,
        config.notify_delay,
    )?);
    let ledger = Arc::new(Ledger::open(&config.ledger_path)?);

    let mut sessions = SessionManager::new(
        Arc::clone(&client),
        &config.portal_url,
        Arc::clone(&alerter),
        config.session_max_cycles,
    );
    let watcher = Watcher {
        fleets: config.fleets.clone(),
        roster: Arc::new(SqliteRoster),
        police: Arc::new(RegistrySite::new(Arc::clone(&client), &config.police_url)?),
        notifier,
        ledger,
        alerter,
        portal: Portal::new(Arc::clone(&client), &config.portal_url),
        servers: config.servers.clone(),
        work_history: config.work_history,
        parallel: config.parallel_fleets,
        interval: config.poll_interval,
        quiet_hours: config.quiet_hours,
    };

    watcher
        .run(&mut sessions, &config.credentials, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Cannot listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}
