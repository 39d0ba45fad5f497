use crate::types::Address;
use tokio::sync::watch;

/// State reported by the natively connected wallet adapter.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NativeConnection {
    pub connected: bool,
    pub address: Option<String>,
}

/// State reported by the embedded (custodial) wallet session.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EmbeddedConnection {
    pub active: bool,
    pub address: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SourceKind {
    Embedded,
    Native,
    None,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedIdentity {
    pub is_connected: bool,
    pub address: Option<Address>,
    pub source_kind: SourceKind,
}

impl ResolvedIdentity {
    pub fn disconnected() -> Self {
        Self {
            is_connected: false,
            address: None,
            source_kind: SourceKind::None,
        }
    }

    /// Connected, but the wallet has not produced an address yet.
    pub fn is_pending(&self) -> bool {
        self.is_connected && self.address.is_none()
    }
}

/// An active embedded session always wins, even while it is still waiting for its
/// address; the native address is only used when no embedded session is active.
pub fn resolve(native: &NativeConnection, embedded: &EmbeddedConnection) -> ResolvedIdentity {
    if embedded.active {
        return ResolvedIdentity {
            is_connected: true,
            address: embedded.address.as_deref().and_then(Address::new),
            source_kind: SourceKind::Embedded,
        };
    }
    if native.connected {
        return ResolvedIdentity {
            is_connected: true,
            address: native.address.as_deref().and_then(Address::new),
            source_kind: SourceKind::Native,
        };
    }
    ResolvedIdentity::disconnected()
}

/// Read side of the two wallet backends. Resolves on every call.
#[derive(Clone, Debug)]
pub struct IdentityResolver {
    native: watch::Receiver<NativeConnection>,
    embedded: watch::Receiver<EmbeddedConnection>,
}

impl IdentityResolver {
    pub fn new(
        native: watch::Receiver<NativeConnection>,
        embedded: watch::Receiver<EmbeddedConnection>,
    ) -> Self {
        Self { native, embedded }
    }

    /// A resolver over connection states that never change.
    pub fn fixed(native: NativeConnection, embedded: EmbeddedConnection) -> Self {
        let (_, native) = watch::channel(native);
        let (_, embedded) = watch::channel(embedded);
        Self::new(native, embedded)
    }

    pub fn current(&self) -> ResolvedIdentity {
        let native = self.native.borrow();
        let embedded = self.embedded.borrow();
        resolve(&native, &embedded)
    }
}

/// Write side of the two wallet backends.
#[derive(Debug)]
pub struct WalletConnections {
    native: watch::Sender<NativeConnection>,
    embedded: watch::Sender<EmbeddedConnection>,
}

impl WalletConnections {
    pub fn channel() -> (Self, IdentityResolver) {
        let (native_tx, native_rx) = watch::channel(NativeConnection::default());
        let (embedded_tx, embedded_rx) = watch::channel(EmbeddedConnection::default());
        let connections = Self {
            native: native_tx,
            embedded: embedded_tx,
        };
        (connections, IdentityResolver::new(native_rx, embedded_rx))
    }

    pub fn set_native(&self, connection: NativeConnection) {
        self.native.send_replace(connection);
    }

    pub fn set_embedded(&self, connection: EmbeddedConnection) {
        self.embedded.send_replace(connection);
    }

    pub fn disconnect_all(&self) {
        self.set_native(NativeConnection::default());
        self.set_embedded(EmbeddedConnection::default());
    }
}
