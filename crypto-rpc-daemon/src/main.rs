//! Process entry point for the crypto-rpc daemon (§4.10): parses its CLI, loads and
//! validates the daemon configuration, wires the key storage provider and access
//! control, then runs the server runtime until a shutdown signal arrives.

use {
    clap::Parser,
    crypto_rpc::{
        endpoint::SharedProviders,
        keystore::{
            KeyStorageProvider,
            access_control::AccessControlConfig,
            journal::InMemoryKeyJournal,
            security_event::{IdsmSecurityEventReporter, NoopSecurityEventReporter, SecurityEventReporter},
        },
        providers::{CryptoProvider, CryptoProviderFactory},
        server::ServerRuntime,
    },
    error_reporter::Report,
    std::{path::PathBuf, process::ExitCode, rc::Rc},
};

/// No crypto providers are pluggable yet (§1 Non-goals): every handshake naming one
/// fails with an unknown-provider error rather than the daemon refusing to start.
struct NoCryptoProviders;

impl CryptoProviderFactory for NoCryptoProviders {
    fn resolve(&self, _provider_uuid: u128) -> Option<Rc<dyn CryptoProvider>> {
        None
    }
}

#[derive(Parser)]
#[command(name = "crypto-rpc-daemon", about = "Isolates secret material and crypto operations behind an RPC bridge")]
struct Args {
    /// Path to the daemon's JSON configuration file (§6).
    config: PathBuf,

    /// Increases log verbosity; repeat for more detail. Overridden by `RUST_LOG` if set.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

fn build_reporter(idsm_reporting: bool) -> Box<dyn SecurityEventReporter> {
    if idsm_reporting {
        Box::new(IdsmSecurityEventReporter::new(|ctx| {
            log::warn!(
                "key access denied: user {} slot uuid {}",
                ctx.user_id,
                ctx.slot_uuid
            );
        }))
    } else {
        Box::new(NoopSecurityEventReporter)
    }
}

fn run(args: Args) -> Result<(), String> {
    let config = crypto_rpc::config::DaemonConfig::load(&args.config)
        .map_err(|e| Report::new(e).to_string())?;

    let access_control_desc = config.load_access_control().map_err(|e| Report::new(e).to_string())?;
    let access_control = AccessControlConfig::from_description(&access_control_desc);

    let key_database_desc = config.load_key_database().map_err(|e| Report::new(e).to_string())?;
    let slots = key_database_desc.0.into_iter().map(|s| s.into_slot()).collect();

    let reporter = build_reporter(config.idsm_reporting);
    let key_storage = KeyStorageProvider::new(slots, access_control, reporter, Box::new(InMemoryKeyJournal));

    let providers = Rc::new(SharedProviders {
        key_storage,
        crypto_providers: Rc::new(NoCryptoProviders),
        x509_provider: None,
        x509_ca_connector_id: config.x509_ca_connector_id,
        x509_trustmaster_id: config.x509_trustmaster_id,
    });

    let server = ServerRuntime::new(&config.socket_path, config.max_connection_num, providers)
        .map_err(|e| Report::new(e).to_string())?;
    log::info!("listening on {}", config.socket_path);
    server.run();
    log::info!("shut down cleanly");
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
