//! DNS responder: spoof table in front of an upstream forwarder.
//!
//! Serves the same address over UDP and TCP (TCP messages carry the usual
//! 2-byte length prefix). A request is answered locally when it is empty,
//! malformed, a `version.bind` probe, denied by the ACL, or covered by the
//! spoof table; everything else is forwarded verbatim to the configured
//! resolver over UDP and the upstream reply is relayed untouched, so
//! transaction ids never need rewriting.
//!
//! One deliberate wrinkle: an `AAAA` question whose name is spoofed only
//! with `A` records gets NXDOMAIN. Dual-stack clients then retry with `A`
//! and land on the spoofed IPv4 target instead of the real IPv6 one.

pub mod spoof;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hickory_proto::op::{Message, MessageType, Query, ResponseCode};
use hickory_proto::rr::rdata::TXT;
use hickory_proto::rr::{DNSClass, RData, Record, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, warn, Instrument};

use fluxgate_core::AccessControl;

use crate::config::DnsListener;
use spoof::SpoofTable;

/// Large enough for any reply we relay; EDNS buffer sizes above this are
/// not advertised by us.
const MAX_MESSAGE: usize = 4096;
const FORWARD_TIMEOUT: Duration = Duration::from_secs(5);
const VERSION_TTL: u32 = 3600;
const VERSION_TEXT: &str = "fluxgate";

pub struct DnsProxy {
    cfg: DnsListener,
    acl: Arc<dyn AccessControl>,
    table: SpoofTable,
    forwarder: SocketAddr,
}

impl DnsProxy {
    pub fn new(cfg: DnsListener, acl: Arc<dyn AccessControl>) -> anyhow::Result<Arc<Self>> {
        let table = SpoofTable::parse(&cfg.spoof)?;
        let forwarder = cfg.forwarder.parse().context("bad forwarder address")?;
        Ok(Arc::new(Self {
            cfg,
            acl,
            table,
            forwarder,
        }))
    }

    /// Bind UDP and TCP on the configured address and serve until dropped.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let udp = UdpSocket::bind(&self.cfg.listen)
            .await
            .with_context(|| format!("cannot bind udp {}", self.cfg.listen))?;
        let tcp = TcpListener::bind(&self.cfg.listen)
            .await
            .with_context(|| format!("cannot bind tcp {}", self.cfg.listen))?;
        info!(id = %self.cfg.id, listen = %self.cfg.listen, "dns listener started");

        let udp_server = Arc::clone(&self).serve_udp(Arc::new(udp));
        let tcp_server = Arc::clone(&self).serve_tcp(tcp);
        tokio::select! {
            () = udp_server => {}
            () = tcp_server => {}
        }
        Ok(())
    }

    async fn serve_udp(self: Arc<Self>, socket: Arc<UdpSocket>) {
        let mut buf = vec![0u8; MAX_MESSAGE];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, src)) => {
                    let packet = buf[..len].to_vec();
                    let proxy = Arc::clone(&self);
                    let socket = Arc::clone(&socket);
                    let span = info_span!("dns", id = %proxy.cfg.id, src = %src, proto = "udp");
                    tokio::spawn(
                        async move {
                            if let Some(reply) = proxy.handle_query(&packet, src).await {
                                if let Err(e) = socket.send_to(&reply, src).await {
                                    debug!(error = %e, "error sending reply");
                                }
                            }
                        }
                        .instrument(span),
                    );
                }
                Err(e) => {
                    warn!(id = %self.cfg.id, error = %e, "udp recv failed");
                }
            }
        }
    }

    async fn serve_tcp(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, src)) => {
                    let proxy = Arc::clone(&self);
                    let span = info_span!("dns", id = %proxy.cfg.id, src = %src, proto = "tcp");
                    tokio::spawn(
                        async move {
                            if let Err(e) = proxy.serve_tcp_conn(stream, src).await {
                                debug!(error = %e, "tcp stream ended");
                            }
                        }
                        .instrument(span),
                    );
                }
                Err(e) => {
                    warn!(id = %self.cfg.id, error = %e, "accept failed");
                }
            }
        }
    }

    /// One TCP stream may carry several length-prefixed messages.
    async fn serve_tcp_conn(
        self: Arc<Self>,
        mut stream: TcpStream,
        src: SocketAddr,
    ) -> std::io::Result<()> {
        loop {
            let len = match stream.read_u16().await {
                Ok(len) => usize::from(len),
                Err(_) => return Ok(()), // peer closed
            };
            if len == 0 || len > MAX_MESSAGE {
                return Ok(());
            }
            let mut packet = vec![0u8; len];
            stream.read_exact(&mut packet).await?;

            if let Some(reply) = self.handle_query(&packet, src).await {
                stream.write_u16(reply.len() as u16).await?;
                stream.write_all(&reply).await?;
            }
        }
    }

    /// Decode, answer locally or forward; `None` means drop the packet.
    async fn handle_query(&self, packet: &[u8], src: SocketAddr) -> Option<Vec<u8>> {
        let req = match Message::from_bytes(packet) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "undecodable message");
                return None;
            }
        };

        if let Some(reply) = self.local_reply(&req, src) {
            return encode(&reply);
        }

        match self.forward(packet).await {
            Ok(reply) => {
                debug!(question = %question_string(&req), "remote answer");
                Some(reply)
            }
            Err(e) => {
                error!(question = %question_string(&req), error = %e, "forwarder error");
                encode(&reply_to(&req, ResponseCode::ServFail, Vec::new()))
            }
        }
    }

    /// Steps of the pipeline that never touch the forwarder. `None` means
    /// the question needs forwarding.
    fn local_reply(&self, req: &Message, src: SocketAddr) -> Option<Message> {
        let questions = req.queries();
        if questions.is_empty() {
            debug!("empty question");
            return Some(reply_to(req, ResponseCode::NoError, Vec::new()));
        }
        if questions.len() > 1 {
            error!(n = questions.len(), "wrong number of questions");
            return Some(reply_to(req, ResponseCode::FormErr, Vec::new()));
        }
        let q = &questions[0];

        // version.bind is answered before the ACL so the software can be
        // probed locally even from denied sources.
        if let Some(version) = version_reply(req, q) {
            debug!(question = %question_string(req), "local answer");
            return Some(version);
        }

        if self.acl.check_addr(src).is_deny() {
            warn!(question = %question_string(req), "access denied");
            return Some(reply_to(req, ResponseCode::Refused, Vec::new()));
        }

        let answers = self
            .table
            .answers(q.name(), q.query_class(), q.query_type());
        if !answers.is_empty() {
            debug!(question = %question_string(req), "local answer");
            return Some(reply_to(req, ResponseCode::NoError, answers));
        }

        if q.query_type() == RecordType::AAAA {
            let a_records = self.table.answers(q.name(), q.query_class(), RecordType::A);
            if !a_records.is_empty() {
                // Steer the client towards the spoofed A record.
                debug!(question = %question_string(req), "aaaa fallback");
                return Some(reply_to(req, ResponseCode::NXDomain, Vec::new()));
            }
        }
        None
    }

    /// Exchange the raw request with the forwarder over UDP.
    async fn forward(&self, packet: &[u8]) -> std::io::Result<Vec<u8>> {
        let local = match self.forwarder {
            SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.forwarder).await?;
        socket.send(packet).await?;

        let mut buf = vec![0u8; MAX_MESSAGE];
        let len = timeout(FORWARD_TIMEOUT, socket.recv(&mut buf))
            .await
            .map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::TimedOut, "forwarder timeout")
            })??;
        buf.truncate(len);
        Ok(buf)
    }
}

/// Build a reply echoing id, opcode, question and RD. Replies that carry
/// answers also advertise recursion.
fn reply_to(req: &Message, code: ResponseCode, answers: Vec<Record>) -> Message {
    let mut reply = Message::new();
    reply.set_id(req.id());
    reply.set_message_type(MessageType::Response);
    reply.set_op_code(req.op_code());
    reply.set_recursion_desired(req.recursion_desired());
    reply.set_response_code(code);
    for q in req.queries() {
        reply.add_query(q.clone());
    }
    if !answers.is_empty() {
        reply.set_recursion_available(true);
        for answer in answers {
            reply.add_answer(answer);
        }
    }
    reply
}

/// `CHAOS TXT version.bind.` / `version.server.` probe.
fn version_reply(req: &Message, q: &Query) -> Option<Message> {
    if q.query_class() != DNSClass::CH || q.query_type() != RecordType::TXT {
        return None;
    }
    let qname = q.name().to_lowercase().to_ascii();
    if qname != "version.bind." && qname != "version.server." {
        return None;
    }

    let mut record = Record::from_rdata(
        q.name().clone(),
        VERSION_TTL,
        RData::TXT(TXT::new(vec![VERSION_TEXT.to_string()])),
    );
    record.set_dns_class(DNSClass::CH);
    Some(reply_to(req, ResponseCode::NoError, vec![record]))
}

fn encode(reply: &Message) -> Option<Vec<u8>> {
    match reply.to_bytes() {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            error!(error = %e, "cannot encode reply");
            None
        }
    }
}

/// Compact `class type name` rendering for log lines.
fn question_string(msg: &Message) -> String {
    match msg.queries().first() {
        Some(q) => format!("{} {} {}", q.query_class(), q.query_type(), q.name()),
        None => "<none>".to_string(),
    }
}
