use std::time::Duration;

use clap::{Parser, Subcommand};
use ping_probe::{
    AlwaysConnected, AppConfig, CachingResolver, DualSensor, InternetChecker, LogIndicator,
    LogNotifier, PingSource, Prober, SurgeEngine, SystemResolver, Watchdog,
};

/// Host reachability probing over ICMP echo
#[derive(Parser, Debug)]
#[command(name = "ping-probe", version, about, long_about = None)]
struct Cli {
    /// Log every reply and lost packet
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ping one host and print the statistics
    Probe { host: String },
    /// Check the configured internet hosts
    Internet,
    /// Block until the host answers
    Watch { host: Option<String> },
    /// Publish ping readings periodically
    Sensor {
        /// Stop after this many reads
        #[arg(long)]
        reads: Option<u32>,
    },
    /// Print the effective configuration
    Config {
        /// Also write it to the user config directory
        #[arg(long)]
        write: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let mut config = AppConfig::load();
    config.probe.verbose |= cli.verbose;

    let prober = Prober::new(CachingResolver::new(SystemResolver), SurgeEngine);

    match cli.command {
        Command::Probe { host } => {
            let request = config.probe.request(host).with_thresholds(config.thresholds);
            let result = prober.probe(&request);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Internet => {
            let checker = InternetChecker::new(
                &prober,
                config.internet_hosts.clone(),
                config.probe.request(""),
                config.thresholds,
            );
            if let Some(status) = checker.check_internet() {
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
        }
        Command::Watch { host } => {
            let host = host.unwrap_or_else(|| config.watchdog.host.clone());
            let mut watchdog = Watchdog::new(
                &prober,
                AlwaysConnected,
                LogIndicator,
                LogNotifier,
                config.watchdog.settings(),
            );
            let request = config.probe.request(host);
            watchdog.ensure_reachable(&request, true, &config.watchdog.notify);
            println!("reachable");
        }
        Command::Sensor { reads } => {
            let source = PingSource::new(&prober, config.probe.request(config.sensor.host.clone()));
            let mut sensor = DualSensor::new(
                source,
                config.sensor.duration_filter,
                config.sensor.loss_filter,
            );
            let interval = Duration::from_secs(config.sensor.interval_secs);
            sensor.run(interval, reads, |reading| match serde_json::to_string(reading) {
                Ok(line) => println!("{line}"),
                Err(e) => log::error!("Failed to serialize reading: {}", e),
            });
        }
        Command::Config { write } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if write {
                let path = config.save()?;
                log::info!("Configuration written to {}", path.display());
            }
        }
    }

    Ok(())
}
