use anyhow::Result;
use clap::Parser;

use cytos_server::{GameServer, ServerConfig, ServerEvent};

#[derive(Parser)]
#[command(name = "cytos-server")]
#[command(about = "Cytos authoritative game server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = cytos::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = cytos::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = cytos::DEFAULT_SEND_RATE)]
    send_rate: u32,

    #[arg(short, long, default_value_t = 16)]
    max_peers: usize,

    #[arg(long, default_value_t = 0.0, help = "Simulated outgoing heartbeat loss (0-100)")]
    loss_percent: f32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let config = ServerConfig {
        tick_rate: args.tick_rate,
        send_rate: args.send_rate,
        max_peers: args.max_peers,
        loss_percent: args.loss_percent,
        ..Default::default()
    };

    let mut server = GameServer::new(&bind_addr, config)?;
    log::info!("server listening on {}", server.local_addr());

    let running = server.running();
    loop {
        if !running.load(std::sync::atomic::Ordering::SeqCst) {
            break;
        }
        server.tick_once();

        for event in server.drain_events() {
            match event {
                ServerEvent::PeerRegistering { addr } => {
                    log::debug!("registration from {}", addr);
                }
                ServerEvent::PeerJoined {
                    peer_id,
                    addr,
                    entity_id,
                } => {
                    log::info!("peer {} joined from {} (entity {})", peer_id, addr, entity_id);
                }
                ServerEvent::PeerDisconnected { peer_id, reason } => {
                    log::info!("peer {} {}", peer_id, reason.as_str());
                }
                ServerEvent::RegistrationDenied { addr, reason } => {
                    log::warn!("denied {}: {}", addr, reason);
                }
                ServerEvent::Error { message } => log::error!("{}", message),
            }
        }

        std::thread::sleep(std::time::Duration::from_millis(1));
    }

    Ok(())
}
