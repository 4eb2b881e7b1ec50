//! chatrelay HTTP server
//!
//! Starts an Axum web server that relays chat conversations to Azure OpenAI.

use chatrelay::cli::{Cli, Command, generate_config_template};
use chatrelay::client::{ChatClient, ChatRequestOptions, CompletionOutcome};
use chatrelay::protocol::ChatMessage;
use chatrelay::{config::Config, handlers, telemetry};
use clap::Parser;
use futures::StreamExt;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Config { output }) => write_template(output),
        Some(Command::Ask {
            message,
            api_url,
            no_stream,
            chunk_interval_ms,
        }) => {
            let options = ChatRequestOptions {
                messages: vec![ChatMessage::user(message)],
                chunk_interval: Duration::from_millis(chunk_interval_ms),
                stream: !no_stream,
            };
            ask(&api_url, options).await
        }
        None => serve(&cli.config).await,
    }
}

fn write_template(output: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let template = generate_config_template();
    match output {
        Some(path) => {
            std::fs::write(&path, template)?;
            eprintln!("Wrote configuration template to {}", path);
        }
        None => print!("{}", template),
    }
    Ok(())
}

async fn ask(api_url: &str, options: ChatRequestOptions) -> Result<(), Box<dyn std::error::Error>> {
    let client = ChatClient::new(api_url);

    match client.get_completion(&options).await? {
        CompletionOutcome::Complete(completion) => println!("{}", completion.message.content),
        CompletionOutcome::Stream(mut deltas) => {
            let mut stdout = std::io::stdout();
            while let Some(delta) = deltas.next().await {
                write!(stdout, "{}", delta?.content())?;
                stdout.flush()?;
            }
            writeln!(stdout)?;
        }
    }
    Ok(())
}

async fn serve(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(config_path)?;

    telemetry::init(&config.observability);

    tracing::info!(
        "Starting chatrelay server on {}:{}",
        config.server.host,
        config.server.port
    );
    tracing::info!(
        endpoint = %config.provider.endpoint,
        deployment = %config.provider.deployment,
        auth = ?config.provider.auth,
        attach_user_context = config.security.attach_user_context,
        "Upstream provider configured"
    );

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0])),
        config.server.port,
    ));

    let state = handlers::AppState::new(Arc::new(config))?;
    let app = handlers::router(state);

    tracing::info!("Listening on {}", addr);
    tracing::info!("Chat endpoints available at http://{}/api/chat and /api/chat/stream", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
