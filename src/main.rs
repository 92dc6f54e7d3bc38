mod config;
mod handlers;
mod models;
mod services;

use anyhow::Result;
use dotenv::dotenv;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use config::Config;
use handlers::{CommandHandler, CommandReply, ScanSession};
use services::{ConnectivityMonitor, GeminiService, OverridableConnectivity, StaticConnectivity, TcpProbe};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::init();

    // Load environment variables
    dotenv().ok();

    log::info!("🚀 Starting PourCount...");

    let config = Config::from_env()?;

    let analyzer = Arc::new(GeminiService::new(&config)?);
    log::info!("✅ Gemini service initialized with model: {}", analyzer.model());

    let probe: Arc<dyn ConnectivityMonitor> = match config.probe_address() {
        Some(address) => {
            log::info!("📡 Connectivity probe target: {}", address);
            Arc::new(TcpProbe::new(address, config.connectivity_timeout))
        }
        None => {
            log::warn!("⚠️ Could not derive a probe address from {}, assuming online", config.base_url);
            Arc::new(StaticConnectivity::new(true))
        }
    };
    let connectivity = Arc::new(OverridableConnectivity::new(probe));

    let session = Arc::new(ScanSession::new(analyzer, connectivity.clone()));
    let handler = CommandHandler::new(session, connectivity);

    // Images passed on the command line are captured before the prompt opens
    for path in std::env::args().skip(1) {
        if let CommandReply::Message(reply) = handler.handle_command(&format!("snap {}", path)).await? {
            println!("{}", reply);
        }
    }

    println!("\n🍾 PourCount is ready. Type 'help' for commands.\n");

    run_session(&handler, BufReader::new(tokio::io::stdin()), tokio::signal::ctrl_c()).await?;

    log::info!("🛑 Shutting down...");
    Ok(())
}

/// Reads commands until quit, end of input, or `shutdown` resolves. The same
/// shutdown future is polled while a command runs, so a long analysis can be
/// interrupted.
async fn run_session<R, S>(handler: &CommandHandler, input: R, shutdown: S) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    S: Future,
{
    let mut lines = input.lines();
    tokio::pin!(shutdown);

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut shutdown => None,
        };

        let Some(line) = line else {
            break;
        };

        let reply = tokio::select! {
            reply = handler.handle_command(&line) => reply?,
            _ = &mut shutdown => {
                log::warn!("⚠️ Interrupted while handling '{}'", line.trim());
                break;
            }
        };

        match reply {
            CommandReply::Message(reply) if reply.is_empty() => {}
            CommandReply::Message(reply) => println!("{}\n", reply),
            CommandReply::Quit => break,
        }
    }

    Ok(())
}
