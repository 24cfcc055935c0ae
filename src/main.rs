use anyhow::Context;
use clap::Parser;

use jcomp::config::{CliArgs, Config};
use jcomp::sandbox::Sandbox;
use jcomp::web_server::build_server;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let Config {
        server: server_config,
        sandbox: sandbox_config,
    } = cli.to_config().context("Failed to load configuration")?;

    let sandbox = Sandbox::with_process_runner(sandbox_config);
    let server = build_server(server_config, sandbox).context("Failed to build server")?;

    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
    }

    // In-flight requests finish, so their workspaces are still cleaned up
    server_handle.stop(true).await;

    log::info!("Shutdown complete");
    Ok(())
}
