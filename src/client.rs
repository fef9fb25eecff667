//! Client side of the secure upload protocol: key provisioning, packaging,
//! transport, and the session state machine that sequences them.

pub mod envelope;
pub mod provider;
pub mod session;
pub mod transport;

pub use self::envelope::{BearerCredential, UnverifiedIdentity, UploadEnvelope, decode_subject};
pub use self::provider::RemoteKeyProvider;
pub use self::session::{
    FailureCause, PayloadSelection, SessionFailure, SessionStatus, TransmissionMetrics,
    TransmitSession,
};
pub use self::transport::{HttpTransport, Transport};
