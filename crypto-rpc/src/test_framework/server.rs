//! Spins up a [`ServerRuntime`] bound to a private `AF_UNIX` path on a background
//! thread, the way an integration test exercises a real daemon without a configuration
//! file or a separate process.

use {
    crate::{
        endpoint::SharedProviders,
        keystore::{
            KeyStorageProvider, Slot, access_control::AccessControlConfig,
            journal::InMemoryKeyJournal, security_event::NoopSecurityEventReporter,
        },
        server::ServerRuntime,
    },
    std::{
        rc::Rc,
        sync::atomic::{AtomicU32, Ordering},
        thread,
    },
};

struct NoProviders;

impl crate::providers::CryptoProviderFactory for NoProviders {
    fn resolve(&self, _provider_uuid: u128) -> Option<Rc<dyn crate::providers::CryptoProvider>> {
        None
    }
}

pub fn temp_socket_path(tag: &str) -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!(
        "{}/crypto-rpc-test-{tag}-{}-{n}.sock",
        std::env::temp_dir().display(),
        std::process::id()
    )
}

/// Starts a daemon with the given slot table and access control on its own thread and
/// returns the socket path clients should connect to. The thread is deliberately leaked
/// for the lifetime of the test process: `ServerRuntime::run` only returns on
/// `SIGTERM`/`SIGINT`, which a test has no business sending itself.
pub fn spawn_server(slots: Vec<Slot>, access_control: AccessControlConfig) -> String {
    let path = temp_socket_path("server");
    let ready_path = path.clone();
    thread::spawn(move || {
        let key_storage = KeyStorageProvider::new(
            slots,
            access_control,
            Box::new(NoopSecurityEventReporter),
            Box::new(InMemoryKeyJournal),
        );
        let providers = Rc::new(SharedProviders {
            key_storage,
            crypto_providers: Rc::new(NoProviders),
            x509_provider: None,
            x509_ca_connector_id: None,
            x509_trustmaster_id: None,
        });
        let server = ServerRuntime::new(&ready_path, 64, providers).unwrap();
        server.run();
    });
    // Give the acceptor thread a moment to bind before a client tries to connect.
    thread::sleep(std::time::Duration::from_millis(20));
    path
}
