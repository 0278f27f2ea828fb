//! CommTest command line
//!
//! Opens one channel, waits for the device under test to request a session
//! and prints the result of every session until Ctrl-C.

mod observer;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

use commtest_core::config::{
    AppConfig, DataBits, FlowControl, LinkConfig, NetworkConfig, Parity, SerialConfig, StopBits,
};
use commtest_core::demo::{DemoConfig, DemoDevice, DemoFault};
use commtest_core::engine::Engine;
use commtest_core::session::Outcome;
use commtest_core::transport::{list_ports, open_transport, TimeoutModel, Transport};

use observer::ConsoleObserver;

#[derive(Parser, Debug)]
#[command(name = "commtest", version, about = "Serial and TCP link tester")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print session reports as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Exit after the first session; non-zero status unless it succeeded
    #[arg(long, global = true)]
    once: bool,

    /// Log filter, e.g. "debug" or "commtest_core=trace" (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Override the index at which a session completes
    #[arg(long, global = true)]
    index_ceiling: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Test over a serial port
    Serial(SerialArgs),
    /// Listen for the device on a TCP port
    Tcp(TcpArgs),
    /// Run the channel described in the configuration file
    Run,
    /// List available serial ports
    Ports,
    /// Test against a simulated device
    Demo(DemoArgs),
}

#[derive(Args, Debug)]
struct SerialArgs {
    /// Port name, e.g. /dev/ttyUSB0 or COM3
    #[arg(short, long)]
    port: Option<String>,

    #[arg(short, long)]
    baud: Option<u32>,

    /// 5, 6, 7 or 8
    #[arg(long)]
    data_bits: Option<u8>,

    #[arg(long, value_enum)]
    parity: Option<ParityArg>,

    /// 1 or 2
    #[arg(long)]
    stop_bits: Option<u8>,

    #[arg(long, value_enum)]
    flow_control: Option<FlowControlArg>,
}

#[derive(Args, Debug)]
struct TcpArgs {
    /// Address to listen on
    #[arg(long)]
    bind: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Args, Debug)]
struct DemoArgs {
    /// Echo latency in milliseconds
    #[arg(long, default_value_t = 1)]
    latency_ms: u64,

    /// Maximum random extra latency in milliseconds
    #[arg(long, default_value_t = 0)]
    jitter_ms: u64,

    /// Simulate a serial link at this baud rate instead of TCP
    #[arg(long)]
    baud: Option<u32>,

    /// Probability of a random bit flip in any echo
    #[arg(long, default_value_t = 0.0)]
    corruption_rate: f64,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Never echo the frame of this index
    #[arg(long)]
    drop: Option<u16>,

    /// Corrupt the checksum of this index's echo
    #[arg(long)]
    corrupt: Option<u16>,

    /// Echo this index one byte short
    #[arg(long)]
    truncate: Option<u16>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ParityArg {
    None,
    Odd,
    Even,
}

impl From<ParityArg> for Parity {
    fn from(arg: ParityArg) -> Self {
        match arg {
            ParityArg::None => Parity::None,
            ParityArg::Odd => Parity::Odd,
            ParityArg::Even => Parity::Even,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FlowControlArg {
    None,
    Software,
    Hardware,
}

impl From<FlowControlArg> for FlowControl {
    fn from(arg: FlowControlArg) -> Self {
        match arg {
            FlowControlArg::None => FlowControl::None,
            FlowControlArg::Software => FlowControl::Software,
            FlowControlArg::Hardware => FlowControl::Hardware,
        }
    }
}

impl SerialArgs {
    fn apply(self, mut config: SerialConfig) -> Result<SerialConfig> {
        if let Some(port) = self.port {
            config.port_name = port;
        }
        if let Some(baud) = self.baud {
            config.baud_rate = baud;
        }
        if let Some(bits) = self.data_bits {
            config.data_bits = DataBits::try_from(bits)?;
        }
        if let Some(parity) = self.parity {
            config.parity = parity.into();
        }
        if let Some(bits) = self.stop_bits {
            config.stop_bits = StopBits::try_from(bits)?;
        }
        if let Some(flow) = self.flow_control {
            config.flow_control = flow.into();
        }
        if config.port_name.is_empty() {
            bail!("No serial port given; use --port or set link.port_name in the config file");
        }
        Ok(config)
    }
}

impl TcpArgs {
    fn apply(self, mut config: NetworkConfig) -> NetworkConfig {
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        config
    }
}

impl DemoArgs {
    fn into_config(self, index_ceiling: u16) -> DemoConfig {
        let mut config = DemoConfig {
            latency: Duration::from_millis(self.latency_ms),
            jitter: Duration::from_millis(self.jitter_ms),
            index_ceiling,
            corruption_rate: self.corruption_rate,
            seed: self.seed,
            timeout: match self.baud {
                Some(baud) => TimeoutModel::serial(baud, commtest_core::config::DEFAULT_FRAME_BITS),
                None => TimeoutModel::network(),
            },
            ..DemoConfig::default()
        };
        for (index, fault) in [
            (self.drop, DemoFault::Drop),
            (self.corrupt, DemoFault::CorruptChecksum),
            (self.truncate, DemoFault::Truncate),
        ] {
            if let Some(index) = index {
                config = config.with_fault(index, fault);
            }
        }
        config
    }
}

fn init_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_ports() -> Result<()> {
    let ports = list_ports().context("Failed to list serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        match port.usb_id {
            Some((vid, pid)) => println!(
                "{}  [{:04x}:{:04x}] {}",
                port.name,
                vid,
                pid,
                port.description.unwrap_or_default()
            ),
            None => println!("{}", port.name),
        }
    }
    Ok(())
}

fn serial_base(link: Option<LinkConfig>) -> SerialConfig {
    match link {
        Some(LinkConfig::Serial(serial)) => serial,
        _ => SerialConfig::default(),
    }
}

fn network_base(link: Option<LinkConfig>) -> NetworkConfig {
    match link {
        Some(LinkConfig::Network(network)) => network,
        _ => NetworkConfig::default(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => AppConfig::default(),
    };
    if let Some(ceiling) = cli.index_ceiling {
        config.test.index_ceiling = ceiling;
    }

    let transport: Box<dyn Transport> = match cli.command {
        Command::Ports => return print_ports(),
        Command::Serial(args) => {
            let serial = args.apply(serial_base(config.link.take()))?;
            open_transport(&LinkConfig::Serial(serial)).context("Failed to open serial port")?
        }
        Command::Tcp(args) => {
            let network = args.apply(network_base(config.link.take()));
            open_transport(&LinkConfig::Network(network)).context("Failed to start TCP server")?
        }
        Command::Run => {
            let link = config
                .link
                .take()
                .context("The configuration file has no link section")?;
            open_transport(&link).context("Failed to open link")?
        }
        Command::Demo(args) => Box::new(DemoDevice::new(
            args.into_config(config.test.index_ceiling),
        )),
    };

    let finished = Arc::new(Notify::new());
    let observer = ConsoleObserver::new(cli.json, finished.clone());
    let mut engine = Engine::new(config.test, observer);
    engine.activate(transport);

    let once = cli.once;
    engine
        .run(async move {
            if once {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = finished.notified() => {}
                }
            } else if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await;

    if once {
        match engine.observer().last_outcome() {
            Some(Outcome::Success) => {}
            Some(outcome) => bail!("{}", outcome),
            None => bail!("Interrupted before a session finished"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_serial_flags_override_config() {
        let cli = Cli::try_parse_from([
            "commtest", "serial", "--port", "/dev/ttyUSB1", "--baud", "9600", "--parity", "odd",
        ])
        .expect("parse");
        let Command::Serial(args) = cli.command else {
            panic!("expected serial command");
        };

        let base = SerialConfig {
            port_name: "/dev/ttyUSB0".to_string(),
            stop_bits: StopBits::Two,
            ..SerialConfig::default()
        };
        let config = args.apply(base).expect("valid");

        assert_eq!(config.port_name, "/dev/ttyUSB1");
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.parity, Parity::Odd);
        assert_eq!(config.stop_bits, StopBits::Two);
    }

    #[test]
    fn test_serial_requires_port() {
        let cli = Cli::try_parse_from(["commtest", "serial"]).expect("parse");
        let Command::Serial(args) = cli.command else {
            panic!("expected serial command");
        };
        assert!(args.apply(SerialConfig::default()).is_err());
    }

    #[test]
    fn test_demo_faults() {
        let cli = Cli::try_parse_from([
            "commtest", "--once", "demo", "--drop", "12", "--truncate", "40", "--baud", "9600",
        ])
        .expect("parse");
        assert!(cli.once);
        let Command::Demo(args) = cli.command else {
            panic!("expected demo command");
        };

        let config = args.into_config(400);
        assert_eq!(config.faults.get(&12), Some(&DemoFault::Drop));
        assert_eq!(config.faults.get(&40), Some(&DemoFault::Truncate));
        assert_eq!(config.timeout, TimeoutModel::Serial { per_byte_ms: 5 });
    }

    #[test]
    fn test_tcp_defaults() {
        let cli = Cli::try_parse_from(["commtest", "tcp"]).expect("parse");
        let Command::Tcp(args) = cli.command else {
            panic!("expected tcp command");
        };
        assert_eq!(args.apply(NetworkConfig::default()).socket_address(), "0.0.0.0:6666");
    }
}
