use clap::Parser;
use nodewatch_agent::{Result, agent, config::Cli, http};
use tokio::task::JoinError;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_subscriber();
    let cancel = tokio_util::sync::CancellationToken::new();
    let ready = tokio_util::sync::CancellationToken::new();
    match cli.command {
        nodewatch_agent::config::Commands::Agent(agent_args) => {
            let mut readiness_handle = tokio::spawn(http::serve_readiness(
                agent_args.readiness_address,
                ready.child_token(),
                cancel.child_token(),
            ));
            let mut agent_handle =
                tokio::spawn(agent::start(agent_args, ready, cancel.child_token()));
            let mut shutdown_handle = tokio::spawn(async move { shutdown_signal().await });
            // watch for shutdown and errors
            tokio::select! {
                h = &mut readiness_handle => {
                    exit("readiness", h);
                    cancel.cancel();
                    exit("agent", agent_handle.await);
                },
                h = &mut agent_handle => {
                    exit("agent", h);
                    cancel.cancel();
                },
                _ = &mut shutdown_handle => {
                        cancel.cancel();
                        let (readiness, agent) = tokio::join!(readiness_handle, agent_handle);
                        exit("readiness", readiness);
                        exit("agent", agent);
                    },
            };
            info!("Exiting...");
        }
    }
    Ok(())
}

fn setup_subscriber() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "nodewatch_agent=info,nodewatch_filter=info,nodewatch_watchers=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };
    tokio::select! {
        _ = ctrl_c => {
          info!("captured ctrl_c signal");
        },
        _ = terminate => {},
    }
}

fn exit(task: &str, out: Result<Result<()>, JoinError>) {
    match out {
        Ok(Ok(_)) => {
            info!("{task} exited")
        }
        Ok(Err(e)) => {
            error!("{task} failed with error: {e}")
        }
        Err(e) => {
            error!("{task} task failed to complete: {e}")
        }
    }
}
