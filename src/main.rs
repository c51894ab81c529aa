use anyhow::Context;
use tinyserve::signals::{self, SIGALRM, SIGINT, SIGTERM};
use tinyserve::{Command, Server, ServerConfig, VERSION};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn print_help() {
    println!(
        "tinyserve {VERSION}

Usage: tinyserve [OPTIONS] [PORT]

Options:
  -h, --host <HOST>      Address to bind (default 0.0.0.0)
  -p, --port <PORT>      Port to listen on (default 8080)
  -r, --root <DIR>       Directory with the pages to serve (default root)
  -w, --workers <N>      Worker threads (default 16)
  -q, --queue <N>        Pending parse jobs before connections are dropped (default 23333)
      --events <N>       Readiness events per wait (default 1024)
  -v, --version          Print version
      --help             Print this help"
    );
}

fn main() -> anyhow::Result<()> {
    let config = match ServerConfig::from_args(std::env::args().skip(1))? {
        Command::Run(config) => config,
        Command::Help => {
            print_help();
            return Ok(());
        }
        Command::Version => {
            println!("tinyserve {VERSION}");
            return Ok(());
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let site = config.load_site()?;
    info!(
        root = %site.root().display(),
        resources = site.catalog().len(),
        "site loaded"
    );

    let listener = config
        .bind()
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!("Listening on {}", config.bind_address());

    let signals = signals::install(&[SIGTERM, SIGINT, SIGALRM])
        .context("failed to install signal handlers")?;

    let server = Server::new(listener, signals, site, config.server_options())?;
    server.run()?;

    info!("Server shutdown complete");
    Ok(())
}
