use std::error::Error;
use std::sync::Arc;

use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

mod config;
mod handlers;
mod llm;
mod state;
mod tryon;
mod utils;

use config::Config;
use handlers::commands::{self, ConsoleContext, Flow};
use llm::GeminiImageClient;
use state::AppState;
use utils::logging::init_logging;

type MainResult = Result<(), Box<dyn Error + Send + Sync>>;

#[tokio::main]
async fn main() -> MainResult {
    dotenv().ok();
    let config = Config::load()?;
    let _guards = init_logging(&config);

    let generator = Arc::new(GeminiImageClient::from_config(&config));
    info!(
        "Starting virtual try-on studio (model={})",
        config.gemini_image_model
    );
    let state = AppState::new(generator);
    let context = ConsoleContext {
        output_dir: config.output_dir.clone(),
        log_dir: config.log_dir.clone(),
    };

    println!("Virtual try-on studio. Type 'help' for commands.");
    let mut events = state.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let command = match commands::parse_command(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(err) => {
                        println!("{err}");
                        continue;
                    }
                };
                match commands::execute(&state, &context, command).await {
                    Ok((reply, Flow::Continue)) => println!("{reply}"),
                    Ok((reply, Flow::Quit)) => {
                        println!("{reply}");
                        break;
                    }
                    Err(err) => {
                        warn!("Command failed: {err:#}");
                        println!("Error: {err}");
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => println!("{}", commands::render_event(&event)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} outfit event(s)", skipped);
                    }
                    Err(RecvError::Closed) => {
                        error!("Outfit event channel closed");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; shutting down");
                break;
            }
        }
    }

    if state.is_busy() {
        info!(
            "Exiting with {} generation(s) still running; their results are discarded",
            state.in_flight_count()
        );
    }
    Ok(())
}
