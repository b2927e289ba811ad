//! GroundLink demonstrator CLI: list ports, stream telemetry, send commands.

use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use groundlink_models::FlightMode;
use groundlink_sdk::{LinkDescriptor, LinkEvent, LinkSession};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "groundlink")]
#[command(about = "GroundLink telemetry link demonstrator")]
#[command(author, version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct ConnArgs {
    /// Serial port device (e.g. /dev/ttyUSB0, COM3)
    #[arg(long, conflicts_with = "udp")]
    port: Option<String>,

    /// Serial baud rate
    #[arg(long, default_value_t = 57_600)]
    baud: u32,

    /// UDP listen address for MAVLink (host:port, e.g. 0.0.0.0:14550)
    #[arg(long)]
    udp: Option<String>,

    /// Speak the homebrew MicroLink protocol (serial only)
    #[arg(long)]
    microlink: bool,
}

impl ConnArgs {
    fn descriptor(&self) -> anyhow::Result<LinkDescriptor> {
        if let Some(udp) = &self.udp {
            if self.microlink {
                bail!("MicroLink runs over serial only");
            }
            let (host, port) = udp
                .rsplit_once(':')
                .context("UDP address must be host:port")?;
            return Ok(LinkDescriptor::UdpMavlink {
                bind_host: host.to_string(),
                bind_port: port.parse().context("bad UDP port")?,
            });
        }
        let port = self.port.clone().context("--port or --udp is required")?;
        Ok(if self.microlink {
            LinkDescriptor::SerialMicroLink {
                port,
                baud: self.baud,
            }
        } else {
            LinkDescriptor::SerialMavlink {
                port,
                baud: self.baud,
            }
        })
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    Ports,
    /// Connect and stream decoded telemetry to stdout as JSON lines
    Listen {
        #[command(flatten)]
        conn: ConnArgs,
        /// Stop after this many seconds (0 = run until interrupted)
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },
    /// Arm the vehicle (MAVLink only)
    Arm {
        #[command(flatten)]
        conn: ConnArgs,
    },
    /// Disarm the vehicle (MAVLink only)
    Disarm {
        #[command(flatten)]
        conn: ConnArgs,
    },
    /// Request a flight mode by name (e.g. MANUAL, POSCTL, OFFBOARD)
    Mode {
        /// Mode name
        name: String,
        #[command(flatten)]
        conn: ConnArgs,
    },
    /// Switch to the automatic takeoff profile
    Takeoff {
        /// Target altitude in metres (logged; profile-controlled climb)
        #[arg(long, default_value_t = 10.0)]
        altitude: f32,
        #[command(flatten)]
        conn: ConnArgs,
    },
    /// Switch to the automatic landing profile
    Land {
        #[command(flatten)]
        conn: ConnArgs,
    },
    /// Return to the launch point
    Rtl {
        #[command(flatten)]
        conn: ConnArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging, controlled via RUST_LOG (default: info).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Commands::Ports => {
            for port in groundlink_sdk::list_ports()? {
                println!("{}\t{}", port.device, port.description);
            }
            Ok(())
        }
        Commands::Listen { conn, duration } => listen(&conn, duration).await,
        Commands::Arm { conn } => with_session(&conn, |s| async move {
            let ack = s.arm_disarm(true).await?;
            info!(result = ack.result, "arm acknowledged");
            Ok(())
        })
        .await,
        Commands::Disarm { conn } => with_session(&conn, |s| async move {
            let ack = s.arm_disarm(false).await?;
            info!(result = ack.result, "disarm acknowledged");
            Ok(())
        })
        .await,
        Commands::Mode { name, conn } => {
            let mode = FlightMode::parse(&name)?;
            with_session(&conn, move |s| async move {
                s.set_flight_mode(mode).await?;
                Ok(())
            })
            .await
        }
        Commands::Takeoff { altitude, conn } => with_session(&conn, move |s| async move {
            s.takeoff(altitude).await?;
            Ok(())
        })
        .await,
        Commands::Land { conn } => with_session(&conn, |s| async move {
            s.land().await?;
            Ok(())
        })
        .await,
        Commands::Rtl { conn } => with_session(&conn, |s| async move {
            let ack = s.return_to_launch().await?;
            info!(result = ack.result, "return-to-launch acknowledged");
            Ok(())
        })
        .await,
    }
}

/// Connect, run `action`, always disconnect.
async fn with_session<F, Fut>(conn: &ConnArgs, action: F) -> anyhow::Result<()>
where
    F: FnOnce(LinkSession) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let session = LinkSession::new();
    session.connect(conn.descriptor()?).await?;
    let result = action(session.clone()).await;
    session.disconnect().await?;
    result
}

async fn listen(conn: &ConnArgs, duration: u64) -> anyhow::Result<()> {
    let session = LinkSession::new();
    let mut events = session.subscribe();
    session.connect(conn.descriptor()?).await?;

    let deadline = (duration > 0).then(|| tokio::time::Instant::now() + Duration::from_secs(duration));
    loop {
        let event = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, events.recv()).await {
                Err(_) => break,
                Ok(event) => event,
            },
            None => tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                event = events.recv() => event,
            },
        };
        match event {
            Ok(LinkEvent::Message(message)) => {
                let fields: serde_json::Map<String, serde_json::Value> = message
                    .fields
                    .iter()
                    .map(|(name, value)| {
                        ((*name).to_string(), serde_json::to_value(value).unwrap_or_default())
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::json!({
                        "id": message.id,
                        "rate": session.message_rate(message.id),
                        "fields": fields,
                    })
                );
            }
            Ok(LinkEvent::StateChanged(state)) => info!(%state, "link state changed"),
            Err(_) => break,
        }
    }

    // Per-message rate summary for the session that just ran.
    for entry in session.catalog() {
        info!(id = entry.id, name = %entry.name, rate = format!("{:.1}", entry.rate), "message rate");
    }
    session.disconnect().await?;
    Ok(())
}
