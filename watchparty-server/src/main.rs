use std::sync::Arc;

use colored::Colorize;
use log::{error, info};
use watchparty_collab::{run_reaper, Collab, PgDatabase};
use watchparty_server::{config::Config, context::ServerContext, logging, run_server};

#[tokio::main]
async fn main() {
    logging::init_logger();

    let config = Config::from_env();

    info!("Connecting to database...");
    let database = match PgDatabase::connect(&config.database_url).await {
        Ok(database) => database,
        Err(error) => {
            error!(
                "{} {error}",
                "Failed to connect to the database!".bold().bright_red()
            );
            error!("Make sure Postgres is reachable through the DB_* environment variables, then try again.");
            std::process::exit(1);
        }
    };

    let collab = Arc::new(Collab::new(database));
    let context = ServerContext {
        collab: collab.clone(),
    };

    tokio::spawn(run_reaper(collab));

    info!("Initialized successfully.");
    run_server(context, config.port).await;
}
