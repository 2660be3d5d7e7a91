use clap::Parser;
use coap_lite::ResponseType;
use tracing::info;
use tracing_subscriber::EnvFilter;

use coapd::{CoapResponse, CoapServer, ServerConfig};

#[derive(Parser)]
#[command(name = "coapd")]
#[command(about = "Demo CoAP server", long_about = None)]
struct Args {
    /// Listen URI, e.g. coap://0.0.0.0:5683
    #[arg(short, long, default_value = "coap://0.0.0.0:5683")]
    listen: String,

    /// Log filter when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut server = CoapServer::new(ServerConfig::from_env());
    server.init(&args.listen)?;
    register_demo_resources(&mut server)?;
    server.start()?;
    for addr in server.local_addrs() {
        info!(%addr, "Listening");
    }

    wait_for_shutdown()?;
    server.stop();
    Ok(())
}

fn register_demo_resources(server: &mut CoapServer) -> anyhow::Result<()> {
    server.get("temperature", |_req| Ok(CoapResponse::text("22.5")))?;
    server.put("temperature", |req| {
        match req.payload_str().trim().parse::<f32>() {
            Ok(celsius) => {
                info!(celsius, "Temperature set");
                Ok(CoapResponse::new(ResponseType::Changed))
            }
            Err(_) => Ok(CoapResponse::new(ResponseType::BadRequest)),
        }
    })?;
    server.get("humidity", |_req| Ok(CoapResponse::text("41")))?;
    Ok(())
}

#[cfg(unix)]
fn wait_for_shutdown() -> anyhow::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    if let Some(signal) = signals.forever().next() {
        info!(signal, "Shutdown signal received");
    }
    Ok(())
}

#[cfg(not(unix))]
fn wait_for_shutdown() -> anyhow::Result<()> {
    // No signal story off unix; park until the process is killed.
    loop {
        std::thread::park();
    }
}
