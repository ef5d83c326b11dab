//! fluxgate-core: protocol peeking and admission policy for the fluxgate proxy.
//!
//! Provides the TLS ClientHello parser, the wildcard matcher, and the
//! CIDR-based access control engine. Everything here is pure and performs
//! no I/O; the server crate owns all sockets.

pub mod acl;
pub mod clienthello;
pub mod error;
pub mod glob;

// Re-export commonly used items at crate root.
pub use acl::{Access, AccessControl, Acl, AclRegistry, AclRule, AllowAll};
pub use clienthello::{record_body_len, ClientHello, RECORD_HEADER_LEN};
pub use error::{CoreError, CoreResult};
pub use glob::{glob_match, many_glob};
