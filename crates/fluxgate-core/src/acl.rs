//! Source-address admission control.
//!
//! An ACL is an ordered list of `(network, allow)` rules. The first rule
//! whose network contains the source IP decides; an IP matching no rule is
//! denied. Named ACLs live in an [`AclRegistry`] built once at startup and
//! never mutated afterwards, so lookups need no locking.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use cidr::IpCidr;

use crate::error::{CoreError, CoreResult};

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow,
    Deny,
}

impl Access {
    pub fn is_allow(self) -> bool {
        self == Access::Allow
    }

    pub fn is_deny(self) -> bool {
        self == Access::Deny
    }
}

/// Capability consumed by listeners: decide admission for a source.
///
/// Listeners hold `Arc<dyn AccessControl>` so the rule-list implementation
/// and [`AllowAll`] are interchangeable.
pub trait AccessControl: Send + Sync {
    /// Decide admission for a bare IP address.
    fn check_ip(&self, ip: IpAddr) -> Access;

    /// Decide admission for a socket address; the port is ignored.
    fn check_addr(&self, addr: SocketAddr) -> Access {
        self.check_ip(addr.ip())
    }
}

/// A single ACL entry: a network and the decision it carries.
#[derive(Debug, Clone)]
pub struct AclRule {
    pub network: IpCidr,
    pub allow: bool,
}

impl AclRule {
    /// Parse a rule from a CIDR string. A bare address without a prefix
    /// length is treated as a host route.
    pub fn parse(cidr: &str, allow: bool) -> CoreResult<Self> {
        let text = if cidr.contains('/') {
            cidr.to_string()
        } else {
            let ip: IpAddr = cidr.parse().map_err(|e| CoreError::AclRule {
                rule: cidr.to_string(),
                reason: format!("{e}"),
            })?;
            let host_bits = if ip.is_ipv4() { 32 } else { 128 };
            format!("{cidr}/{host_bits}")
        };
        let network: IpCidr = text.parse().map_err(|e| CoreError::AclRule {
            rule: cidr.to_string(),
            reason: format!("{e}"),
        })?;
        Ok(Self { network, allow })
    }
}

/// Ordered rule list with first-match-wins evaluation and default deny.
#[derive(Debug, Clone, Default)]
pub struct Acl {
    rules: Vec<AclRule>,
}

impl Acl {
    pub fn new(rules: Vec<AclRule>) -> Self {
        Self { rules }
    }

    /// Build an ACL from `(allow, cidr)` pairs in declaration order.
    pub fn parse<'a, I>(entries: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = (bool, &'a str)>,
    {
        let rules = entries
            .into_iter()
            .map(|(allow, cidr)| AclRule::parse(cidr, allow))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Self::new(rules))
    }
}

impl AccessControl for Acl {
    fn check_ip(&self, ip: IpAddr) -> Access {
        for rule in &self.rules {
            if rule.network.contains(&ip) {
                return if rule.allow { Access::Allow } else { Access::Deny };
            }
        }
        Access::Deny
    }
}

/// Admits every source. Used when a listener configures no ACL.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn check_ip(&self, _ip: IpAddr) -> Access {
        Access::Allow
    }
}

/// Named ACLs, loaded once at startup.
#[derive(Default)]
pub struct AclRegistry {
    acls: HashMap<String, Arc<Acl>>,
}

impl AclRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, acl: Acl) {
        self.acls.insert(name.into(), Arc::new(acl));
    }

    /// Resolve a listener's `acl` option. `None` yields [`AllowAll`];
    /// an unknown name is a configuration error.
    pub fn resolve(&self, name: Option<&str>) -> CoreResult<Arc<dyn AccessControl>> {
        match name {
            None => Ok(Arc::new(AllowAll)),
            Some(name) => self
                .acls
                .get(name)
                .cloned()
                .map(|acl| acl as Arc<dyn AccessControl>)
                .ok_or_else(|| CoreError::UnknownAcl(name.to_string())),
        }
    }
}
