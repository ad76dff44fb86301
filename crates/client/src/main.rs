use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use glam::Vec3;

use cytos::{InputFlags, InputVars};
use cytos_client::{ClientConfig, ClientState, NetworkClient};

#[derive(Parser)]
#[command(name = "cytos-client")]
#[command(about = "Headless cytos client: connects, swims in circles, reports netcode stats")]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1")]
    server: String,

    #[arg(short, long, default_value_t = cytos::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value = "microbe")]
    name: String,

    #[arg(short, long, default_value_t = 30, help = "Seconds to stay connected")]
    duration: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let server_addr: SocketAddr = format!("{}:{}", args.server, args.port).parse()?;

    let config = ClientConfig {
        name: args.name,
        ..Default::default()
    };
    let mut client = NetworkClient::new(config)?;
    client.connect(server_addr)?;

    let started = Instant::now();
    let mut last_frame = Instant::now();
    let mut last_report = Instant::now();

    while started.elapsed() < Duration::from_secs(args.duration) {
        let now = Instant::now();
        let delta = (now - last_frame).as_secs_f32();
        last_frame = now;

        client.update(delta, swim_input(started.elapsed().as_secs_f32()))?;

        if let ClientState::Disconnected { reason } = client.state() {
            log::warn!("session over: {}", reason);
            break;
        }

        if last_report.elapsed() >= Duration::from_secs(2) {
            last_report = Instant::now();
            report(&client);
        }

        std::thread::sleep(Duration::from_millis(4));
    }

    client.disconnect();
    Ok(())
}

/// Synthetic steering: swim a slow circle so the server sees continuous
/// movement and direction changes.
fn swim_input(elapsed: f32) -> InputVars {
    let angle = elapsed * 0.4;
    let direction = Vec3::new(angle.cos(), 0.0, angle.sin());
    let look_at = direction * 50.0;
    InputVars::new(look_at, direction, InputFlags::empty())
}

fn report(client: &NetworkClient) {
    let stats = client.stats();
    let position = client
        .predicted_state()
        .map(|s| s.position)
        .unwrap_or(Vec3::ZERO);

    log::info!(
        "tick {} | pos ({:.1}, {:.1}, {:.1}) | rtt {:.1} ms | rate x{:.4} | \
         entities {} | replays {} | resyncs {} | tx {} B rx {} B",
        client.tick(),
        position.x,
        position.y,
        position.z,
        client.rtt_ms(),
        client.clock_multiplier(),
        client.world().len(),
        client.replays(),
        client.resyncs(),
        stats.bytes_sent,
        stats.bytes_received,
    );
}
