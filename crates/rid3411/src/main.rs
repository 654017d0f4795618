#![doc = include_str!("../readme.md")]

mod drivers;
mod io;
mod kv;

use std::path::PathBuf;
use std::rc::Rc;

use clap::Parser;
use rand::RngCore;
use rs3411::clock::MonotonicClock;
use rs3411::dronecan::{CanError, CanFrame, CanIface};
use rs3411::node::RemoteIdNode;
use tokio::time::{interval, Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

use drivers::{DevEncoder, LogBleDriver, LogWifiDriver};

#[derive(Debug, Parser)]
#[command(
    name = "rid3411",
    version,
    about = "Remote ID transponder node over MAVLink TCP/UDP"
)]
struct Options {
    /// Connect to the flight controller over TCP (host:port)
    #[arg(long)]
    tcp: Option<String>,

    /// Listen for the flight controller over UDP (bind:port)
    #[arg(long)]
    udp: Option<String>,

    /// Parameter persistence file (JSON); volatile when omitted
    #[arg(long)]
    params: Option<PathBuf>,

    /// Dump the ODID record as JSON every N seconds
    #[arg(long, default_value = "10")]
    dump_interval: u64,
}

/// No CAN controller on the host build; the port stays silent.
struct NoCan;

impl CanIface for NoCan {
    fn send(&mut self, _frame: &CanFrame) -> Result<(), CanError> {
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<CanFrame>, CanError> {
        Ok(None)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = Options::parse();

    let serial = if let Some(addr) = &options.tcp {
        Some(io::connect_tcp(addr).await?)
    } else if let Some(addr) = &options.udp {
        Some(io::bind_udp(addr).await?)
    } else {
        return Err("one of --tcp or --udp is required".into());
    };

    let mut mac = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut mac);
    mac[0] &= 0xfe;

    let encoder = Rc::new(DevEncoder);
    let mut node = RemoteIdNode::new(
        MonotonicClock::new(),
        kv::FileKv::open(options.params.clone()),
        serial,
        Some(NoCan),
        mac,
        None,
    );
    node.attach_ble(LogBleDriver, encoder.clone());
    node.attach_wifi(LogWifiDriver, encoder);

    let mut tick = interval(Duration::from_millis(1));
    let mut dump = interval(Duration::from_secs(options.dump_interval.max(1)));
    let mut last_arm = None;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                node.update();
                let state = node.arm_state();
                if last_arm.as_ref() != Some(&state) {
                    info!(status = ?state.status, reason = %state.reason, "arm status");
                    last_arm = Some(state);
                }
                if node.restart_requested() {
                    info!("restart requested, exiting");
                    return Ok(());
                }
            }
            _ = dump.tick() => {
                info!("record: {}", serde_json::to_string(node.record())?);
            }
        }
    }
}
