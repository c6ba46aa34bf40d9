use std::{process, sync::OnceLock};

use eventbee::{
    config::Config,
    core::{EventRecord, Producer, Relay, RelayError, SubmitOutcome},
    logger::LoggerManager,
    print_error,
};
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    signal::unix::{signal, SignalKind},
};
use tracing::{debug, error, info, warn};

static CONFIG: OnceLock<Config> = OnceLock::new();

pub fn config() -> &'static Config {
    CONFIG.get_or_init(|| {
        Config::new().unwrap_or_else(|e| {
            print_error!("{}", e);
            process::exit(1);
        })
    })
}

/// Parses one JSON line from stdin and hands it to the relay.
fn submit_line(producer: &Producer, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let record = match serde_json::from_str::<Value>(line)
        .map_err(|e| e.to_string())
        .and_then(|value| EventRecord::try_from(value).map_err(|e| e.to_string()))
    {
        Ok(record) => record,
        Err(e) => {
            warn!("Ignoring malformed event: {e}");
            return;
        }
    };

    match producer.submit(record) {
        SubmitOutcome::Queued => {}
        SubmitOutcome::Filtered => debug!("Event filtered out"),
        SubmitOutcome::Overflow => warn!("Event queue full, event dropped"),
        SubmitOutcome::NotRunning => warn!("Relay not running, event dropped"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config();
    let logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(1);
    });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });
    info!("Starting eventbee version {}...", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", cfg.logger.level);
    debug!("{:#?}", cfg.relay);

    let relay = match Relay::init(cfg).await {
        Ok(relay) => relay,
        Err(RelayError::Disabled) => {
            info!("Nothing to do, exiting");
            return Ok(());
        }
        Err(e) => {
            error!("Failed to start event relay: {}", e);
            process::exit(1);
        }
    };

    let producer = relay.producer();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut hangup = signal(SignalKind::hangup())?;

    info!("Reading events from stdin, one JSON object per line");
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => submit_line(&producer, &line),
                Ok(None) => {
                    info!("End of input, initiating graceful shutdown...");
                    break;
                }
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
                break;
            }
            Some(()) = hangup.recv() => {
                info!("Received SIGHUP, reconnecting to MQTT broker");
                let manager = relay.manager().clone();
                tokio::spawn(async move {
                    if let Err(e) = manager.reconnect().await {
                        warn!("Reconnect failed: {}", e);
                    }
                });
            }
        }
    }

    relay.destroy().await;
    info!("Shutdown complete");
    Ok(())
}
