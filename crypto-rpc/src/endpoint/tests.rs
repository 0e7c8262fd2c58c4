use {
    super::*,
    crate::{
        envelope::{BasicTask, Envelope, ProxyId},
        error::RpcError,
        keystore::{
            KeyStorageProvider, access_control::AccessControlConfig, journal::InMemoryKeyJournal,
            security_event::NoopSecurityEventReporter,
        },
        skeleton::{DecodedResponse, decode_response},
        wire::Writer,
    },
    std::os::unix::net::UnixStream,
};

struct StubFactory;

impl CryptoProviderFactory for StubFactory {
    fn resolve(&self, _provider_uuid: u128) -> Option<Rc<dyn crate::providers::CryptoProvider>> {
        None
    }
}

/// Resolves exactly the uuid the §8 "Handshake + primitive call" scenario names, and no
/// other, mirroring the literal worked example.
struct OneProviderFactory {
    uuid: u128,
    provider: Rc<dyn crate::providers::CryptoProvider>,
}

impl CryptoProviderFactory for OneProviderFactory {
    fn resolve(&self, provider_uuid: u128) -> Option<Rc<dyn crate::providers::CryptoProvider>> {
        (provider_uuid == self.uuid).then(|| self.provider.clone())
    }
}

struct StubProvider(u64);

impl crate::providers::CryptoProvider for StubProvider {
    fn uuid(&self) -> u128 {
        SCENARIO_PROVIDER_UUID
    }

    fn version(&self) -> u64 {
        self.0
    }
}

fn shared_providers() -> Rc<SharedProviders> {
    Rc::new(SharedProviders {
        key_storage: KeyStorageProvider::new(
            Vec::new(),
            AccessControlConfig::default(),
            Box::new(NoopSecurityEventReporter),
            Box::new(InMemoryKeyJournal),
        ),
        crypto_providers: Rc::new(StubFactory),
        x509_provider: None,
        x509_ca_connector_id: None,
        x509_trustmaster_id: None,
    })
}

/// `11111111-2222-3333-4444-555555555555` from §8's literal worked example, as a plain
/// 128-bit integer.
const SCENARIO_PROVIDER_UUID: u128 = 0x1111_1111_2222_3333_4444_5555_5555_5555;

fn shared_providers_with_crypto_provider() -> Rc<SharedProviders> {
    Rc::new(SharedProviders {
        key_storage: KeyStorageProvider::new(
            Vec::new(),
            AccessControlConfig::default(),
            Box::new(NoopSecurityEventReporter),
            Box::new(InMemoryKeyJournal),
        ),
        crypto_providers: Rc::new(OneProviderFactory {
            uuid: SCENARIO_PROVIDER_UUID,
            provider: Rc::new(StubProvider(0x0001_0002_C0DE_C0DE)),
        }),
        x509_provider: None,
        x509_ca_connector_id: None,
        x509_trustmaster_id: None,
    })
}

struct StubX509Provider;

impl crate::providers::X509Provider for StubX509Provider {
    fn uuid(&self) -> u128 {
        0x9999
    }

    fn register_ca_certificate(&self, _key_payload: &[u8], _der: &[u8]) -> Result<u64, CryptoRpcError> {
        Ok(1)
    }

    fn register_trust_anchor(&self, _der: &[u8]) -> Result<u64, CryptoRpcError> {
        Ok(2)
    }
}

fn shared_providers_with_x509_provider(ca_connector_id: u32, trustmaster_id: u32) -> Rc<SharedProviders> {
    Rc::new(SharedProviders {
        key_storage: KeyStorageProvider::new(
            Vec::new(),
            AccessControlConfig::default(),
            Box::new(NoopSecurityEventReporter),
            Box::new(InMemoryKeyJournal),
        ),
        crypto_providers: Rc::new(StubFactory),
        x509_provider: Some(Rc::new(StubX509Provider)),
        x509_ca_connector_id: Some(ca_connector_id),
        x509_trustmaster_id: Some(trustmaster_id),
    })
}

fn pair() -> (ClientEndpoint, UnixStream) {
    pair_with(shared_providers())
}

fn pair_with(providers: Rc<SharedProviders>) -> (ClientEndpoint, UnixStream) {
    let (server_sock, client_sock) = UnixStream::pair().unwrap();
    let endpoint = ClientEndpoint::new(server_sock.into(), providers).unwrap();
    (endpoint, client_sock)
}

fn send(client: &UnixStream, env: Envelope) {
    crate::trans::send_message(std::os::fd::AsRawFd::as_raw_fd(client), &env.encode()).unwrap();
}

fn recv_response(client: &UnixStream) -> Result<DecodedResponse, crate::error::CryptoRpcError> {
    let body = crate::trans::recv_message(std::os::fd::AsRawFd::as_raw_fd(client))
        .unwrap()
        .unwrap();
    decode_response(&body)
}

#[test]
fn starts_in_handshaking_state() {
    let (endpoint, _client) = pair();
    assert_eq!(endpoint.state(), EndpointState::Handshaking);
}

#[test]
fn handshake_with_unknown_crypto_provider_is_rejected() {
    let (endpoint, client) = pair();
    let mut body = Writer::new();
    body.write_u64(0);
    body.write_u64(7);
    send(
        &client,
        Envelope {
            basic_task: BasicTask::Handshake,
            detail_task: HANDSHAKE_CRYPTO_PROVIDER,
            target: ProxyId::HANDSHAKE,
            new_proxy_ids: vec![ProxyId(1)],
            body: body.into_bytes(),
        },
    );
    endpoint.service_one_message().unwrap();
    let err = recv_response(&client).unwrap_err();
    assert!(matches!(
        err,
        crate::error::CryptoRpcError::Rpc(RpcError::UnknownObjectIdentifier)
    ));
    assert_eq!(endpoint.state(), EndpointState::Handshaking);
}

#[test]
fn handshake_binds_key_storage_and_answers_method_calls() {
    let (endpoint, client) = pair();
    send(
        &client,
        Envelope {
            basic_task: BasicTask::Handshake,
            detail_task: HANDSHAKE_KEY_STORAGE_PROVIDER,
            target: ProxyId::HANDSHAKE,
            new_proxy_ids: vec![ProxyId(1)],
            body: Vec::new(),
        },
    );
    endpoint.service_one_message().unwrap();
    assert!(matches!(
        recv_response(&client).unwrap(),
        DecodedResponse::SkeletonCreated
    ));
    assert_eq!(endpoint.state(), EndpointState::Ready);

    let mut args = Writer::new();
    args.write_u64(0);
    args.write_u64(999);
    send(
        &client,
        Envelope {
            basic_task: BasicTask::MethodCall,
            detail_task: 0,
            target: ProxyId(1),
            new_proxy_ids: Vec::new(),
            body: args.into_bytes(),
        },
    );
    endpoint.service_one_message().unwrap();
    match recv_response(&client).unwrap() {
        DecodedResponse::Value(bytes) => assert_eq!(bytes, vec![0]),
        _ => panic!("expected a value response"),
    }
}

#[test]
fn method_call_before_handshake_is_rejected() {
    let (endpoint, client) = pair();
    send(
        &client,
        Envelope {
            basic_task: BasicTask::MethodCall,
            detail_task: 0,
            target: ProxyId(1),
            new_proxy_ids: Vec::new(),
            body: Vec::new(),
        },
    );
    endpoint.service_one_message().unwrap();
    let err = recv_response(&client).unwrap_err();
    assert!(matches!(
        err,
        crate::error::CryptoRpcError::State(crate::error::StateError::InvalidUsageOrder)
    ));
}

#[test]
fn destroy_message_removes_the_bound_object_without_a_response() {
    let (endpoint, client) = pair();
    send(
        &client,
        Envelope {
            basic_task: BasicTask::Handshake,
            detail_task: HANDSHAKE_KEY_STORAGE_PROVIDER,
            target: ProxyId::HANDSHAKE,
            new_proxy_ids: vec![ProxyId(1)],
            body: Vec::new(),
        },
    );
    endpoint.service_one_message().unwrap();
    let _ = recv_response(&client).unwrap();
    assert!(endpoint.objects.contains(ProxyId(1)));

    send(
        &client,
        Envelope {
            basic_task: BasicTask::Destroy,
            detail_task: 0,
            target: ProxyId(1),
            new_proxy_ids: Vec::new(),
            body: Vec::new(),
        },
    );
    endpoint.service_one_message().unwrap();
    assert!(!endpoint.objects.contains(ProxyId(1)));
}

#[test]
fn handshake_binds_crypto_provider_and_answers_get_provider_version() {
    // §8 "Handshake + primitive call": handshake against uuid
    // 11111111-2222-3333-4444-555555555555 under new id 0x0A, then getProviderVersion
    // against it, expecting 0x00010002_C0DEC0DE back.
    let (endpoint, client) = pair_with(shared_providers_with_crypto_provider());
    let mut body = Writer::new();
    body.write_u64((SCENARIO_PROVIDER_UUID >> 64) as u64);
    body.write_u64(SCENARIO_PROVIDER_UUID as u64);
    send(
        &client,
        Envelope {
            basic_task: BasicTask::Handshake,
            detail_task: HANDSHAKE_CRYPTO_PROVIDER,
            target: ProxyId::HANDSHAKE,
            new_proxy_ids: vec![ProxyId(0x0A)],
            body: body.into_bytes(),
        },
    );
    endpoint.service_one_message().unwrap();
    assert!(matches!(
        recv_response(&client).unwrap(),
        DecodedResponse::SkeletonCreated
    ));

    send(
        &client,
        Envelope {
            basic_task: BasicTask::MethodCall,
            detail_task: 0,
            target: ProxyId(0x0A),
            new_proxy_ids: Vec::new(),
            body: Vec::new(),
        },
    );
    endpoint.service_one_message().unwrap();
    match recv_response(&client).unwrap() {
        DecodedResponse::Value(bytes) => {
            let mut r = crate::wire::Reader::new(&bytes);
            assert_eq!(r.read_u64().unwrap(), 0x0001_0002_C0DE_C0DE);
        }
        _ => panic!("expected a value response"),
    }
}

/// SO_PEERCRED reports the real uid of this test process; there is no way to forge it
/// over a loopback `UnixStream::pair`, so these tests configure the provider's
/// restricted ids around whatever that uid actually is.
fn real_uid() -> u32 {
    // SAFETY: getuid takes no arguments and cannot fail.
    unsafe { uapi::c::getuid() }
}

#[test]
fn handshake_binds_x509_provider_and_dispatches_restricted_operation_for_the_authorized_caller() {
    let uid = real_uid();
    let (endpoint, client) = pair_with(shared_providers_with_x509_provider(uid, uid));
    send(
        &client,
        Envelope {
            basic_task: BasicTask::Handshake,
            detail_task: HANDSHAKE_X509_PROVIDER,
            target: ProxyId::HANDSHAKE,
            new_proxy_ids: vec![ProxyId(1)],
            body: Vec::new(),
        },
    );
    endpoint.service_one_message().unwrap();
    assert!(matches!(
        recv_response(&client).unwrap(),
        DecodedResponse::SkeletonCreated
    ));

    let mut args = Writer::new();
    args.write_bytes(b"trust anchor der");
    send(
        &client,
        Envelope {
            basic_task: BasicTask::MethodCall,
            detail_task: 1, // REGISTER_TRUST_ANCHOR
            target: ProxyId(1),
            new_proxy_ids: Vec::new(),
            body: args.into_bytes(),
        },
    );
    endpoint.service_one_message().unwrap();
    match recv_response(&client).unwrap() {
        DecodedResponse::Value(bytes) => {
            let mut r = crate::wire::Reader::new(&bytes);
            assert_eq!(r.read_u64().unwrap(), 2);
        }
        _ => panic!("expected a value response"),
    }
}

#[test]
fn restricted_x509_operation_rejects_a_caller_other_than_the_configured_trustmaster() {
    let other_uid = real_uid().wrapping_add(1);
    let (endpoint, client) = pair_with(shared_providers_with_x509_provider(other_uid, other_uid));
    send(
        &client,
        Envelope {
            basic_task: BasicTask::Handshake,
            detail_task: HANDSHAKE_X509_PROVIDER,
            target: ProxyId::HANDSHAKE,
            new_proxy_ids: vec![ProxyId(1)],
            body: Vec::new(),
        },
    );
    endpoint.service_one_message().unwrap();
    let _ = recv_response(&client).unwrap();

    let mut args = Writer::new();
    args.write_bytes(b"trust anchor der");
    send(
        &client,
        Envelope {
            basic_task: BasicTask::MethodCall,
            detail_task: 1, // REGISTER_TRUST_ANCHOR
            target: ProxyId(1),
            new_proxy_ids: Vec::new(),
            body: args.into_bytes(),
        },
    );
    endpoint.service_one_message().unwrap();
    let err = recv_response(&client).unwrap_err();
    assert!(matches!(err, crate::error::CryptoRpcError::Access(_)));
}

#[test]
fn clean_disconnect_transitions_to_closing() {
    let (endpoint, client) = pair();
    drop(client);
    endpoint.service_one_message().unwrap();
    assert_eq!(endpoint.state(), EndpointState::Closing);
}
