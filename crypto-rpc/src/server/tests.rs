use crate::{
    envelope::ProxyId,
    keystore::{
        ObjectType, PrototypeProps, Slot, Uuid, VersionControlPolicy,
        access_control::AccessControlConfig,
    },
    skeleton::DecodedResponse,
    test_framework::{proxy::TestClient, server::spawn_server},
    wire::Writer,
};

fn prototype() -> PrototypeProps {
    PrototypeProps {
        allowed_object_type: ObjectType::SymmetricKey,
        allowed_algorithms: Vec::new(),
        capacity: 64,
        exportable: true,
        version_control: VersionControlPolicy::None,
        owner_user_id: 100,
        allowed_user_ids: vec![100],
    }
}

#[test]
fn reactor_dispatches_a_find_slot_by_uuid_call_after_handshake() {
    let slots = vec![Slot::new(0, Uuid::from_u128(42), Uuid::from_u128(1), prototype())];
    let socket_path = spawn_server(slots, AccessControlConfig::default());
    let client = TestClient::connect(&socket_path);

    let key_storage_id = client.alloc_id();
    assert!(matches!(
        client.handshake_key_storage(key_storage_id),
        DecodedResponse::SkeletonCreated
    ));

    let mut args = Writer::new();
    args.write_u64((42u128 >> 64) as u64);
    args.write_u64(42u128 as u64);
    match client.call(key_storage_id, 0, Vec::new(), args.into_bytes()) {
        DecodedResponse::Value(bytes) => {
            assert_eq!(bytes[0], 1, "slot should be found");
            let slot_number = u32::from_le_bytes(bytes[1..5].try_into().unwrap());
            assert_eq!(slot_number, 0);
        }
        _ => panic!("expected a value response"),
    }
}

#[test]
fn rejecting_connections_beyond_capacity_does_not_wedge_the_reactor() {
    let slots = vec![Slot::new(0, Uuid::from_u128(1), Uuid::from_u128(1), prototype())];
    let socket_path = spawn_server(slots, AccessControlConfig::default());

    // Two well-behaved clients in a row must both be served regardless of ordering,
    // exercising the accept-loop's re-registration of the acceptor's oneshot interest.
    for _ in 0..2 {
        let client = TestClient::connect(&socket_path);
        let id = client.alloc_id();
        assert!(matches!(
            client.handshake_key_storage(id),
            DecodedResponse::SkeletonCreated
        ));
    }
}

#[test]
fn proxy_id_handshake_target_round_trips_through_envelope() {
    assert_eq!(ProxyId::HANDSHAKE, ProxyId(0));
}
