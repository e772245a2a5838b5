use anyhow::Result;
use clap::Parser;

use ctxpack::{
    cancel::CancellationToken,
    cli::Cli,
    commands::App,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.setup_logging();

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    ctrlc::set_handler(move || {
        if token.is_cancelled() {
            std::process::exit(130);
        }
        tracing::warn!("Cancelling; press Ctrl+C again to abort");
        token.cancel();
    })?;

    let app = match App::new(&cli, cancel) {
        Ok(app) => app,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = app.run(cli.command).await {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }

    Ok(())
}
