use std::{
    path::PathBuf,
    process::exit,
    sync::{atomic::AtomicBool, atomic::Ordering, Arc, OnceLock},
};

use clap::{App, Arg};
use hermod::{daemon::BrokerConfig, Broker};

static SHUTDOWN: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn handle_signal(_signal: i32) {
    if let Some(flag) = SHUTDOWN.get() {
        flag.store(true, Ordering::Release);
    }
}

fn main() {
    env_logger::init();

    let matches = App::new("hermodd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Hermod zero-copy pub/sub broker daemon")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Broker configuration file (pool and segment layout)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("monitoring-interval")
                .long("monitoring-interval")
                .value_name("MS")
                .help("Control-loop wakeup and sweep period in milliseconds")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("keepalive-timeout")
                .long("keepalive-timeout")
                .value_name("MS")
                .help("Keepalive deadline for monitored clients in milliseconds")
                .takes_value(true),
        )
        .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => match BrokerConfig::load(&PathBuf::from(path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("hermodd: {}", e);
                exit(1);
            }
        },
        None => BrokerConfig::default(),
    };

    if let Some(ms) = matches.value_of("monitoring-interval") {
        match ms.parse() {
            Ok(ms) => config.monitoring_interval_ms = ms,
            Err(_) => {
                eprintln!("hermodd: invalid monitoring interval {:?}", ms);
                exit(1);
            }
        }
    }
    if let Some(ms) = matches.value_of("keepalive-timeout") {
        match ms.parse() {
            Ok(ms) => config.keepalive_timeout_ms = ms,
            Err(_) => {
                eprintln!("hermodd: invalid keepalive timeout {:?}", ms);
                exit(1);
            }
        }
    }
    if let Err(e) = config.validate() {
        eprintln!("hermodd: {}", e);
        exit(1);
    }

    let mut broker = match Broker::new(config) {
        Ok(broker) => broker,
        Err(e) => {
            eprintln!("hermodd: {}", e);
            exit(2);
        }
    };

    let _ = SHUTDOWN.set(broker.shutdown_flag());
    install_signal_handlers();

    match broker.run() {
        Ok(()) => exit(0),
        Err(e) => {
            eprintln!("hermodd: {}", e);
            exit(2);
        }
    }
}

fn install_signal_handlers() {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    let action = SigAction::new(
        SigHandler::Handler(handle_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        let _ = sigaction(Signal::SIGINT, &action);
        let _ = sigaction(Signal::SIGTERM, &action);
    }
}
