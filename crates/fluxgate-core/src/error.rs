use thiserror::Error;

/// Errors produced by the peeking and policy layer.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("record type 0x{0:02x} is not a TLS handshake")]
    NotHandshake(u8),

    #[error("TLS version {0}.{1} not supported")]
    TlsVersion(u8, u8),

    #[error("malformed ClientHello: {0}")]
    ClientHello(&'static str),

    #[error("invalid acl rule {rule:?}: {reason}")]
    AclRule { rule: String, reason: String },

    #[error("unknown acl {0:?}")]
    UnknownAcl(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
