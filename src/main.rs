use std::path::PathBuf;

use clap::Parser;
use signal_hook::consts::signal::*;
use signal_hook::iterator::Signals;

use energy_meter::config::DEFAULT_CONFIG_PATH;
use energy_meter::spi::DEFAULT_DEVICE_PREFIX;
use energy_meter::{
    AdcTransport, ChannelDescriptor, Config, LogPublisher, PowerEngine, PowerMeter, Result, SpiTransport,
    SumDescriptor, SyntheticTransport,
};

/// Energy meter daemon
#[derive(Parser, Debug)]
#[command(author, version, about = "Real power metering for ADC sampled mains circuits", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log per channel power details
    #[arg(short, long)]
    verbose: bool,

    /// Seconds between two measurements, overrides the configuration
    #[arg(short, long)]
    update_period: Option<u64>,

    /// Simulate signal samples instead of reading from hardware
    #[arg(short, long)]
    simulate: bool,

    /// Path prefix of the spidev devices, the chip number is appended
    #[arg(long, default_value = DEFAULT_DEVICE_PREFIX)]
    spi_device_prefix: String,
}

/* Channels matching the synthetic bench signals */
fn bench_config() -> Config {
    let mut config = Config::new(ChannelDescriptor::new("L1", 1, 7, -0.5, 100.0));
    config.current_channels = (0..7u8)
        .map(|index| ChannelDescriptor::new(format!("I{}", index), 0, index, -0.5, 30.0))
        .collect();
    config.sum_channels = vec![SumDescriptor {
        name: "total".into(),
        sources: config.current_channels.iter().map(|c| c.name.clone()).collect(),
    }];
    config
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = if args.simulate && !args.config.exists() {
        log::info!("{} not found, using the bench channel layout", args.config.display());
        bench_config()
    } else {
        log::info!("Loading configuration from {}", args.config.display());
        Config::load(&args.config)?
    };

    if let Some(secs) = args.update_period {
        config.update_period_secs = secs;
    }
    config.validate()?;
    Ok(config)
}

fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;

    let transport: Box<dyn AdcTransport> = if args.simulate {
        log::info!("Simulating signal samples instead of reading from hardware.");
        Box::new(SyntheticTransport::bench(config.hardware.line_frequency))
    } else {
        log::info!("Reading signal samples from {}*", args.spi_device_prefix);
        Box::new(SpiTransport::new(
            args.spi_device_prefix.clone(),
            &config.chips(),
            config.hardware.spi_speed_hz,
        ))
    };

    let engine = PowerEngine::new(&config, transport)?.with_publisher(LogPublisher);
    let mut meter = PowerMeter::from_engine(engine, config.update_period());

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    meter.start()?;
    log::info!("Measuring every {} s", config.update_period_secs);

    if let Some(signal) = signals.forever().next() {
        log::info!("Received signal {}, stopping", signal);
    }
    meter.stop();
    Ok(())
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(args) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
