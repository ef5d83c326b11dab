//! Locally served DNS records, layered in front of the forwarder.
//!
//! The table is built once from the listener's `spoof` config string and
//! never changes afterwards. Owner names are keyed lowercased; owners
//! containing `*` become wildcard patterns matched with the same glob as
//! the upstream allow-lists. Answers are cloned out of the table with the
//! owner rewritten to the question name, case preserved.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use anyhow::{bail, Context};
use hickory_proto::rr::rdata::{A, AAAA, CNAME, PTR, TXT};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};

use fluxgate_core::glob_match;

const DEFAULT_TTL: u32 = 3600;

/// One record as loaded from the spoof config.
#[derive(Debug, Clone)]
struct SpoofRecord {
    class: DNSClass,
    rtype: RecordType,
    ttl: u32,
    rdata: RData,
}

/// Immutable spoof record set: exact owners plus wildcard patterns.
#[derive(Debug, Default)]
pub struct SpoofTable {
    exact: HashMap<String, Vec<SpoofRecord>>,
    /// Wildcard owners in config order; scan order is stable but which of
    /// several matching patterns wins is not part of the contract.
    wild: Vec<(String, Vec<SpoofRecord>)>,
}

impl SpoofTable {
    /// Parse a spoof config string: one master-file record per line, blank
    /// lines and `;`/`#` comments skipped.
    pub fn parse(input: &str) -> anyhow::Result<Self> {
        let mut table = SpoofTable::default();
        for line in input.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            let (owner, record) =
                parse_record_line(line).with_context(|| format!("spoof record {line:?}"))?;
            if owner.contains('*') {
                match table.wild.iter_mut().find(|(key, _)| *key == owner) {
                    Some((_, records)) => records.push(record),
                    None => table.wild.push((owner, vec![record])),
                }
            } else {
                table.exact.entry(owner).or_default().push(record);
            }
        }
        Ok(table)
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.wild.is_empty()
    }

    /// Records answering `(qname, qclass, qtype)`, owner rewritten to the
    /// question name. Empty when nothing matches.
    pub fn answers(&self, qname: &Name, qclass: DNSClass, qtype: RecordType) -> Vec<Record> {
        let key = qname.to_lowercase().to_ascii();

        if let Some(records) = self.exact.get(&key) {
            return select(records, qname, qclass, qtype);
        }
        for (pattern, records) in &self.wild {
            if glob_match(pattern, &key) {
                return select(records, qname, qclass, qtype);
            }
        }
        Vec::new()
    }
}

/// Filter by (class, type), where a qtype of `ANY` matches on class alone,
/// and clone with the question's owner name.
fn select(
    records: &[SpoofRecord],
    qname: &Name,
    qclass: DNSClass,
    qtype: RecordType,
) -> Vec<Record> {
    records
        .iter()
        .filter(|r| r.class == qclass && (r.rtype == qtype || qtype == RecordType::ANY))
        .map(|r| {
            let mut record = Record::from_rdata(qname.clone(), r.ttl, r.rdata.clone());
            record.set_dns_class(r.class);
            record
        })
        .collect()
}

/// Parse `name [ttl] [class] type rdata`; ttl and class may come in either
/// order, defaults 3600 and IN.
fn parse_record_line(line: &str) -> anyhow::Result<(String, SpoofRecord)> {
    let (name, mut rest) = next_token(line).context("missing owner name")?;
    let owner = normalize_owner(name);

    let mut ttl = None;
    let mut class = None;
    let rtype_token = loop {
        let (token, after) = next_token(rest).context("missing record type")?;
        rest = after;
        if ttl.is_none() && token.chars().all(|c| c.is_ascii_digit()) {
            ttl = Some(token.parse::<u32>().context("bad ttl")?);
        } else if class.is_none() && parse_class(token).is_some() {
            class = parse_class(token);
        } else {
            break token;
        }
    };

    let class = class.unwrap_or(DNSClass::IN);
    let ttl = ttl.unwrap_or(DEFAULT_TTL);
    let rdata_text = rest.trim();

    let (rtype, rdata) = match rtype_token.to_ascii_uppercase().as_str() {
        "A" => {
            let ip: Ipv4Addr = rdata_text.parse().context("bad A address")?;
            (RecordType::A, RData::A(A(ip)))
        }
        "AAAA" => {
            let ip: Ipv6Addr = rdata_text.parse().context("bad AAAA address")?;
            (RecordType::AAAA, RData::AAAA(AAAA(ip)))
        }
        "CNAME" => (RecordType::CNAME, RData::CNAME(CNAME(parse_name(rdata_text)?))),
        "PTR" => (RecordType::PTR, RData::PTR(PTR(parse_name(rdata_text)?))),
        "TXT" => (RecordType::TXT, RData::TXT(TXT::new(parse_txt(rdata_text)))),
        other => bail!("unsupported record type {other:?}"),
    };

    Ok((
        owner,
        SpoofRecord {
            class,
            rtype,
            ttl,
            rdata,
        },
    ))
}

/// Split off one whitespace-delimited token.
fn next_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.find(char::is_whitespace) {
        Some(i) => Some((&s[..i], &s[i..])),
        None => Some((s, "")),
    }
}

fn parse_class(token: &str) -> Option<DNSClass> {
    match token.to_ascii_uppercase().as_str() {
        "IN" => Some(DNSClass::IN),
        "CH" => Some(DNSClass::CH),
        "HS" => Some(DNSClass::HS),
        _ => None,
    }
}

/// Lowercase and make absolute; owner keys are always fully qualified.
fn normalize_owner(name: &str) -> String {
    let mut owner = name.to_ascii_lowercase();
    if !owner.ends_with('.') {
        owner.push('.');
    }
    owner
}

fn parse_name(text: &str) -> anyhow::Result<Name> {
    let mut name = Name::from_ascii(text).with_context(|| format!("bad domain name {text:?}"))?;
    name.set_fqdn(true);
    Ok(name)
}

/// TXT rdata: quoted character-strings, or bare whitespace-split tokens.
fn parse_txt(text: &str) -> Vec<String> {
    if text.contains('"') {
        text.split('"')
            .enumerate()
            .filter(|(i, _)| i % 2 == 1)
            .map(|(_, s)| s.to_string())
            .collect()
    } else {
        text.split_whitespace().map(|s| s.to_string()).collect()
    }
}
