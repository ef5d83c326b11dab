//! Server configuration: TOML file with per-listener sections.
//!
//! The file carries named ACLs plus any number of `[[http]]`, `[[tls]]`
//! and `[[dns]]` listener tables. Durations are plain seconds; `0`
//! disables the corresponding timeout. Validation resolves every ACL
//! reference, parses forwarder addresses and compiles spoof tables, so a
//! config that loads is a config that runs.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

use fluxgate_core::{Acl, AclRegistry};

use crate::dns::spoof::SpoofTable;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Named ACLs: name → ordered rule list.
    #[serde(default)]
    pub acl: HashMap<String, Vec<AclRuleEntry>>,
    #[serde(default)]
    pub http: Vec<HttpListener>,
    #[serde(default)]
    pub tls: Vec<TlsListener>,
    #[serde(default)]
    pub dns: Vec<DnsListener>,
}

/// One ACL rule as written in the file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AclRuleEntry {
    pub allow: bool,
    pub cidr: String,
}

/// A `[[http]]` listener table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpListener {
    #[serde(default)]
    pub id: String,
    pub listen: String,
    pub acl: Option<String>,
    #[serde(default)]
    pub upstreams: Vec<String>,
    /// Header-read deadline in seconds; 0 disables.
    #[serde(default)]
    pub deadline: u64,
    /// Per-direction splice inactivity timeout in seconds; 0 disables.
    #[serde(default)]
    pub idle: u64,
    /// Log the request line of each proxied request.
    #[serde(default)]
    pub log_request: bool,
}

/// A `[[tls]]` listener table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsListener {
    #[serde(default)]
    pub id: String,
    pub listen: String,
    pub acl: Option<String>,
    /// Port appended to the SNI host to form the upstream address.
    #[serde(default = "default_upstream_port")]
    pub upstream_port: u16,
    #[serde(default)]
    pub upstreams: Vec<String>,
    #[serde(default)]
    pub deadline: u64,
    #[serde(default)]
    pub idle: u64,
}

/// A `[[dns]]` listener table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnsListener {
    #[serde(default)]
    pub id: String,
    pub listen: String,
    pub acl: Option<String>,
    /// Upstream resolver, `host:port`.
    pub forwarder: String,
    /// Master-file records served locally; see [`SpoofTable`].
    #[serde(default)]
    pub spoof: String,
}

fn default_upstream_port() -> u16 {
    443
}

/// Turn a seconds field into an optional duration (`0` disables).
pub fn seconds(value: u64) -> Option<Duration> {
    (value != 0).then(|| Duration::from_secs(value))
}

impl HttpListener {
    pub fn deadline(&self) -> Option<Duration> {
        seconds(self.deadline)
    }

    pub fn idle(&self) -> Option<Duration> {
        seconds(self.idle)
    }
}

impl TlsListener {
    pub fn deadline(&self) -> Option<Duration> {
        seconds(self.deadline)
    }

    pub fn idle(&self) -> Option<Duration> {
        seconds(self.idle)
    }
}

impl ConfigFile {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let config: ConfigFile = toml::from_str(&content)
            .with_context(|| format!("cannot parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-check the parsed file: ACL references resolve, rule networks
    /// and forwarder addresses parse, spoof tables compile.
    fn validate(&self) -> anyhow::Result<()> {
        let registry = self.build_acls()?;

        for (which, id, acl) in self
            .http
            .iter()
            .map(|l| ("http", &l.id, &l.acl))
            .chain(self.tls.iter().map(|l| ("tls", &l.id, &l.acl)))
            .chain(self.dns.iter().map(|l| ("dns", &l.id, &l.acl)))
        {
            registry
                .resolve(acl.as_deref())
                .with_context(|| format!("{which} listener {id:?}"))?;
        }

        for listener in &self.dns {
            listener
                .forwarder
                .parse::<SocketAddr>()
                .with_context(|| format!("dns listener {:?}: bad forwarder address", listener.id))?;
            SpoofTable::parse(&listener.spoof)
                .with_context(|| format!("dns listener {:?}: bad spoof table", listener.id))?;
        }

        if self.http.is_empty() && self.tls.is_empty() && self.dns.is_empty() {
            bail!("config defines no listeners");
        }
        Ok(())
    }

    /// Build the ACL registry from the `[acl.<name>]` tables.
    pub fn build_acls(&self) -> anyhow::Result<AclRegistry> {
        let mut registry = AclRegistry::new();
        for (name, entries) in &self.acl {
            let acl = Acl::parse(
                entries
                    .iter()
                    .map(|entry| (entry.allow, entry.cidr.as_str())),
            )
            .with_context(|| format!("acl {name:?}"))?;
            registry.insert(name.clone(), acl);
        }
        Ok(registry)
    }
}
