//! Drive the relay against an in-process simulated home.
//!
//! The simulated transport announces two gateways shortly after the
//! discovery listener opens, so commands exercise name resolution while
//! discovery is still running.
//!
//! Run with: cargo run --example simulated_home -- --help

use clap::{Parser, Subcommand};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use lux_relay::runtime::BoxFuture;
use lux_relay::{
    Bulb, BulbRef, Color, Config, DiscoveryEvent, DiscoverySink, Gateway, GatewayRef,
    PowerState, Request, Service, Transport,
};

#[derive(Parser)]
#[command(name = "simulated-home")]
#[command(about = "Control the bulbs of a simulated home by name", long_about = None)]
struct Cli {
    /// How long announcements take to arrive, in milliseconds
    #[arg(short, long, default_value = "300", global = true)]
    delay: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the bulbs found during one discovery window
    List,

    /// Turn the named bulbs on
    On { names: Vec<String> },

    /// Turn the named bulbs off
    Off { names: Vec<String> },

    /// Toggle the named bulbs
    Toggle { names: Vec<String> },

    /// Set a color ("r,g,b" or "#RRGGBB") on the named bulbs
    Color { color: Color, names: Vec<String> },

    /// Flash a color on the named bulbs, then restore their colors
    Pulse {
        color: Color,
        names: Vec<String>,
        /// Hold duration in milliseconds
        #[arg(short = 'H', long)]
        hold: Option<u64>,
    },

    /// Turn every bulb in the home on
    AllOn,

    /// Turn every bulb in the home off
    AllOff,

    /// Run a JSON request, e.g. {"action": "Power Toggle", "bulbs": ["Desk"]}
    Execute { json: String },

    /// Print diagnostics after discovery
    Diagnostics,
}

#[derive(Debug)]
struct SimGateway {
    address: SocketAddr,
    connected: AtomicBool,
    bulbs: Mutex<Vec<Weak<SimBulb>>>,
}

impl SimGateway {
    fn new(last_octet: u8) -> Arc<Self> {
        Arc::new(SimGateway {
            address: SocketAddr::from((Ipv4Addr::new(192, 168, 1, last_octet), 56700)),
            connected: AtomicBool::new(false),
            bulbs: Mutex::new(Vec::new()),
        })
    }

    fn live_bulbs(&self) -> Vec<Arc<SimBulb>> {
        match self.bulbs.lock() {
            Ok(bulbs) => bulbs.iter().filter_map(Weak::upgrade).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn power_all(&self, power: PowerState) -> BoxFuture<'_, io::Result<()>> {
        if !self.is_connected() {
            return done(Err(io::Error::from(io::ErrorKind::NotConnected)));
        }
        for bulb in self.live_bulbs() {
            bulb.set_power(power);
        }
        println!("  [{}] all bulbs {:?}", self.address, power);
        done(Ok(()))
    }
}

impl Gateway for SimGateway {
    fn address(&self) -> SocketAddr {
        self.address
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connect(&self) -> BoxFuture<'_, io::Result<()>> {
        self.connected.store(true, Ordering::SeqCst);
        done(Ok(()))
    }

    fn turn_on(&self) -> BoxFuture<'_, io::Result<()>> {
        self.power_all(PowerState::On)
    }

    fn turn_off(&self) -> BoxFuture<'_, io::Result<()>> {
        self.power_all(PowerState::Off)
    }

    fn refresh_bulbs(&self) -> BoxFuture<'_, io::Result<()>> {
        done(Ok(()))
    }

    fn bulbs(&self) -> Vec<BulbRef> {
        self.live_bulbs()
            .into_iter()
            .map(|bulb| bulb as BulbRef)
            .collect()
    }

    fn subscribe(&self, _sink: DiscoverySink) {}
}

#[derive(Debug)]
struct SimBulb {
    label: String,
    gateway: Arc<SimGateway>,
    state: Mutex<(PowerState, Color)>,
}

impl SimBulb {
    fn attach(gateway: &Arc<SimGateway>, label: &str, color: Color) -> Arc<Self> {
        let bulb = Arc::new(SimBulb {
            label: label.to_string(),
            gateway: gateway.clone(),
            state: Mutex::new((PowerState::Off, color)),
        });
        if let Ok(mut bulbs) = gateway.bulbs.lock() {
            bulbs.push(Arc::downgrade(&bulb));
        }
        bulb
    }

    fn set_power(&self, power: PowerState) {
        if let Ok(mut state) = self.state.lock() {
            state.0 = power;
        }
    }

    fn update(&self, f: impl FnOnce(&mut (PowerState, Color))) -> BoxFuture<'_, io::Result<()>> {
        let Ok(mut state) = self.state.lock() else {
            return done(Err(io::Error::other("bulb state poisoned")));
        };
        f(&mut *state);
        println!("  [{}] {:?} {}", self.label, state.0, state.1);
        done(Ok(()))
    }
}

impl Bulb for SimBulb {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn gateway(&self) -> GatewayRef {
        self.gateway.clone()
    }

    fn power_state(&self) -> PowerState {
        self.state
            .lock()
            .map(|state| state.0)
            .unwrap_or(PowerState::Off)
    }

    fn color(&self) -> Option<Color> {
        self.state.lock().ok().map(|state| state.1)
    }

    fn turn_on(&self) -> BoxFuture<'_, io::Result<()>> {
        self.update(|state| state.0 = PowerState::On)
    }

    fn turn_off(&self) -> BoxFuture<'_, io::Result<()>> {
        self.update(|state| state.0 = PowerState::Off)
    }

    fn set_color(&self, color: &Color) -> BoxFuture<'_, io::Result<()>> {
        let color = *color;
        self.update(move |state| state.1 = color)
    }
}

fn done(result: io::Result<()>) -> BoxFuture<'static, io::Result<()>> {
    Box::pin(std::future::ready(result))
}

/// Announces the home's gateways a little while after each listener opens.
struct SimTransport {
    gateways: Vec<Arc<SimGateway>>,
    delay: Duration,
}

impl Transport for SimTransport {
    type Handle = tokio::task::JoinHandle<()>;

    async fn start_listener(&self, sink: DiscoverySink) -> io::Result<Self::Handle> {
        let gateways = self.gateways.clone();
        let delay = self.delay;
        Ok(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for gateway in gateways {
                let _ = sink.unbounded_send(DiscoveryEvent::GatewayFound(gateway));
            }
        }))
    }

    async fn stop_listener(&self, handle: Self::Handle) -> io::Result<()> {
        handle.abort();
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let living = SimGateway::new(10);
    let upstairs = SimGateway::new(11);
    let _home = [
        SimBulb::attach(&living, "Kitchen", Color::WHITE),
        SimBulb::attach(&living, "Hall", Color::rgb(255, 180, 90)),
        SimBulb::attach(&upstairs, "Desk", Color::BLUE),
        SimBulb::attach(&upstairs, "Bedroom", Color::rgb(120, 0, 200)),
    ];

    let transport = SimTransport {
        gateways: vec![living, upstairs],
        delay: Duration::from_millis(cli.delay),
    };
    let service = Service::new(transport, Config::default());
    service.start().await?;
    service.subscribe(|event| println!("  registry: {:?}", event));

    let outcome = match cli.command {
        Commands::List => {
            tokio::time::sleep(service.config().listen_window()).await;
            for bulb in service.list_known_bulbs() {
                println!(
                    "  {:10} {:?} {} via {}",
                    bulb.label,
                    bulb.power,
                    bulb.color.map(|c| c.to_string()).unwrap_or_default(),
                    bulb.gateway
                );
            }
            None
        }
        Commands::Diagnostics => {
            tokio::time::sleep(service.config().listen_window()).await;
            println!("{}", serde_json::to_string_pretty(&service.diagnostics())?);
            None
        }
        Commands::On { names } => Some(service.turn_on_many(&names[..]).await),
        Commands::Off { names } => Some(service.turn_off_many(&names[..]).await),
        Commands::Toggle { names } => Some(service.toggle_many(&names[..]).await),
        Commands::Color { color, names } => Some(service.set_color_many(&names[..], color).await),
        Commands::Pulse { color, names, hold } => Some(
            service
                .pulse(&names[..], color, hold.map(Duration::from_millis))
                .await?,
        ),
        Commands::AllOn => Some(service.turn_on_all().await),
        Commands::AllOff => Some(service.turn_off_all().await),
        Commands::Execute { json } => {
            let request = Request::from_json(&json)?;
            println!("{}", request.describe());
            Some(service.execute(&request).await?)
        }
    };

    if let Some(outcome) = outcome {
        println!("\n{}", outcome);
        for failure in &outcome.failures {
            eprintln!("  ✗ {}", failure);
        }
    }

    service.stop().await?;
    Ok(())
}
