//! A bare client-side connection against a [`super::server::spawn_server`] instance,
//! without any generated proxy type layered on top — just enough to drive a handshake
//! and a handful of raw method calls in tests.

use {
    crate::{envelope::ProxyId, proxy::Connection, skeleton::DecodedResponse},
    std::{os::unix::net::UnixStream, rc::Rc},
};

pub struct TestClient {
    pub connection: Rc<Connection>,
}

impl TestClient {
    pub fn connect(socket_path: &str) -> Self {
        let socket = UnixStream::connect(socket_path)
            .unwrap_or_else(|e| panic!("could not connect to {socket_path}: {e}"));
        Self {
            connection: Connection::new(socket.into()),
        }
    }

    pub fn alloc_id(&self) -> ProxyId {
        self.connection.alloc_id()
    }

    pub fn handshake_crypto_provider(&self, provider_uuid: u128, bind_id: ProxyId) -> DecodedResponse {
        self.connection
            .handshake_crypto_provider(provider_uuid, bind_id)
            .expect("handshake call failed")
    }

    pub fn handshake_key_storage(&self, bind_id: ProxyId) -> DecodedResponse {
        self.connection
            .handshake_key_storage(bind_id)
            .expect("handshake call failed")
    }

    pub fn call(
        &self,
        target: ProxyId,
        detail_task: u32,
        new_proxy_ids: Vec<ProxyId>,
        args: Vec<u8>,
    ) -> DecodedResponse {
        self.connection
            .call(target, detail_task, new_proxy_ids, args)
            .expect("method call failed")
    }
}
