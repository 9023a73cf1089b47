use {
    anyhow::Result,
    clap::Parser,
    pylon_client::{ClientRegistry, GatewayConfig, SessionFilter},
};

/// Console front-end for the Pylon gateway client.
///
/// Connects to the gateway, reports the authorization outcome, prints the
/// current session inventory, then tails server-push events until Ctrl-C.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Gateway WebSocket URL (overrides PYLON_GATEWAY_URL).
    #[arg(long)]
    url: Option<String>,

    /// Bearer token (overrides PYLON_GATEWAY_TOKEN).
    #[arg(long)]
    token: Option<String>,

    /// Exit after printing the session list instead of tailing events.
    #[arg(long)]
    once: bool,
}

fn resolve_config(args: &Args) -> GatewayConfig {
    let mut config = GatewayConfig::from_env();
    if let Some(url) = &args.url {
        config.url = url.clone();
    }
    if let Some(token) = &args.token {
        config.token = Some(token.clone());
    }
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    let default_filter = if pylon_client::debug_enabled() {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let args = Args::parse();
    let registry = ClientRegistry::new(resolve_config(&args));
    let client = registry.client();

    client.connect().await?;
    println!("connected to {}", client.config().url);
    println!("authorization: {}", client.auth_state());
    if let Some(scopes) = client.scopes() {
        println!("scopes: {}", scopes.join(", "));
    }
    if let Some(pairing) = client.pairing_info() {
        println!("pairing required: {}", pairing.message);
        if let Some(id) = pairing.request_id {
            println!("pairing request: {id}");
        }
    }

    match client.list_sessions(SessionFilter::default()).await {
        Ok(sessions) if sessions.is_empty() => println!("no sessions"),
        Ok(sessions) => {
            println!("{} session(s):", sessions.len());
            for session in sessions {
                let label = session.label.unwrap_or_else(|| "-".into());
                let count = session
                    .message_count
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "?".into());
                println!("  {:<28} {:<20} {count} messages", session.key, label);
            }
        },
        Err(e) => tracing::warn!("session list unavailable: {e}"),
    }

    if args.once {
        client.disconnect().await;
        return Ok(());
    }

    let _subscription = client.on_event(|event| {
        let payload = event
            .payload
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_default();
        println!("[event] {} {payload}", event.event);
    });

    println!("tailing events (Ctrl-C to quit)");
    tokio::signal::ctrl_c().await?;
    client.disconnect().await;
    Ok(())
}
