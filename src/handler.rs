//! DHCP request handling.
//!
//! The server keeps no per-client protocol state between datagrams; each
//! request is interpreted on its own against the lease table. The handler
//! decides the reply and where it goes, and leaves the socket to the worker.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::Error;
use crate::lease::{LeaseSource, LeaseTable, Leased};
use crate::link::LinkLayer;
use crate::options::{DhcpOption, MessageType};
use crate::packet::{BOOTREQUEST, DhcpMessage, MacAddr};
use crate::server::{Shared, lock_shared};

/// Text carried in option 56 of every NAK.
pub const NAK_MESSAGE: &str = "wrong network";

/// A reply ready to be encoded and sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub message: DhcpMessage,
    pub destination: SocketAddrV4,
}

pub struct RequestHandler {
    config: Arc<ServerConfig>,
    shared: Arc<Mutex<Shared>>,
    link: Arc<dyn LinkLayer>,
}

impl RequestHandler {
    pub(crate) fn new(
        config: Arc<ServerConfig>,
        shared: Arc<Mutex<Shared>>,
        link: Arc<dyn LinkLayer>,
    ) -> Self {
        Self {
            config,
            shared,
            link,
        }
    }

    /// Interprets one decoded request. Returns the reply to send, if any.
    pub fn handle(&self, request: &DhcpMessage) -> Option<Reply> {
        if request.op != BOOTREQUEST {
            debug!("Dropping message with op {}", request.op);
            return None;
        }

        if !request.has_magic_cookie() {
            debug!("Dropping BOOTP message without magic cookie");
            return None;
        }

        let mac = request.mac();

        match request.message_type() {
            Some(message_type) => {
                info!("{} from {}", message_type, mac);

                match message_type {
                    MessageType::Discover => self.handle_discover(request, mac),
                    MessageType::Request => self.handle_request(request, mac),
                    MessageType::Release => {
                        self.handle_release(mac);
                        None
                    }
                    _ => {
                        warn!("Ignoring {} message from {}", message_type, mac);
                        None
                    }
                }
            }
            None => {
                debug!("Dropping message without DHCP message type from {}", mac);
                None
            }
        }
    }

    fn handle_discover(&self, request: &DhcpMessage, mac: MacAddr) -> Option<Reply> {
        self.link.notify_link_associated(true);

        let leased = self.lease_for(mac)?;

        let offer = DhcpMessage::create_reply(
            request,
            MessageType::Offer,
            leased.ip,
            Ipv4Addr::UNSPECIFIED,
            self.build_offer_options(),
        );

        info!("OFFER {} to {}", leased.ip, mac);

        Some(self.addressed(offer))
    }

    fn handle_request(&self, request: &DhcpMessage, mac: MacAddr) -> Option<Reply> {
        self.link.notify_link_associated(true);

        let leased = self.lease_for(mac)?;

        let requested_ip = request.requested_ip();
        let renewing = !request.has_requested_ip_option()
            && !request.ciaddr.is_unspecified()
            && leased.source == LeaseSource::Active;

        if renewing {
            debug!("{} is renewing {}", mac, leased.ip);
        } else {
            let wanted = requested_ip.unwrap_or(request.yiaddr);
            if wanted != leased.ip {
                self.reject(mac, leased);
                warn!(
                    "NAK to {}: requested {} but lease is {}",
                    mac, wanted, leased.ip
                );
                let nak = DhcpMessage::create_reply(
                    request,
                    MessageType::Nak,
                    Ipv4Addr::UNSPECIFIED,
                    Ipv4Addr::UNSPECIFIED,
                    self.build_nak_options(),
                );
                return Some(self.addressed(nak));
            }
        }

        let ack = DhcpMessage::create_reply(
            request,
            MessageType::Ack,
            leased.ip,
            request.ciaddr,
            self.build_ack_options(),
        );

        self.link.notify_ip_ready(true);

        info!(
            "ACK {} to {} (lease: {} seconds)",
            leased.ip, mac, self.config.lease_seconds
        );

        Some(self.addressed(ack))
    }

    fn handle_release(&self, mac: MacAddr) {
        match self.with_leases(|leases| leases.release(mac)) {
            Some(true) => info!("Released lease of {}", mac),
            Some(false) => debug!("RELEASE from {} with no active lease", mac),
            None => debug!("RELEASE from {} while stopped", mac),
        }
    }

    /// Undoes the binding a NAKed REQUEST just resolved.
    ///
    /// A binding revived from the reuse list goes back there; any other
    /// binding is dropped so the station's next attempt allocates anew.
    fn reject(&self, mac: MacAddr, leased: Leased) {
        self.with_leases(|leases| {
            if leased.source == LeaseSource::Reused {
                leases.release(mac)
            } else {
                leases.revoke(mac)
            }
        });
    }

    fn lease_for(&self, mac: MacAddr) -> Option<Leased> {
        let Some(result) = self.with_leases(|leases| leases.lease_for(mac)) else {
            debug!("Dropping request from {} while stopped", mac);
            return None;
        };

        match result {
            Ok(leased) => Some(leased),
            Err(Error::PoolExhausted) => {
                warn!("Pool exhausted, cannot lease an address to {}", mac);
                None
            }
            Err(error) => {
                warn!("Lease lookup for {} failed: {}", mac, error);
                None
            }
        }
    }

    fn with_leases<T>(&self, operation: impl FnOnce(&mut LeaseTable) -> T) -> Option<T> {
        let mut shared = lock_shared(&self.shared);
        shared.leases.as_mut().map(operation)
    }

    /// Replies are broadcast, except an ACK to a station that already uses
    /// the acknowledged address, which is unicast to it.
    fn addressed(&self, message: DhcpMessage) -> Reply {
        let unicast = message.message_type() == Some(MessageType::Ack)
            && !message.ciaddr.is_unspecified()
            && message.yiaddr == message.ciaddr;

        let address = if unicast {
            message.yiaddr
        } else {
            Ipv4Addr::BROADCAST
        };

        Reply {
            message,
            destination: SocketAddrV4::new(address, self.config.client_port),
        }
    }

    fn build_offer_options(&self) -> Vec<DhcpOption> {
        vec![
            DhcpOption::SubnetMask(self.config.netmask),
            DhcpOption::LeaseTime(self.config.lease_seconds),
            DhcpOption::ServerIdentifier(self.config.server_address),
        ]
    }

    fn build_ack_options(&self) -> Vec<DhcpOption> {
        vec![
            DhcpOption::RenewalTime(self.config.renewal_seconds()),
            DhcpOption::RebindingTime(self.config.rebinding_seconds()),
            DhcpOption::LeaseTime(self.config.lease_seconds),
            DhcpOption::ServerIdentifier(self.config.server_address),
            DhcpOption::SubnetMask(self.config.netmask),
            DhcpOption::BroadcastAddress(Ipv4Addr::BROADCAST),
            DhcpOption::Router(vec![self.config.gateway]),
            DhcpOption::dns_servers(self.config.dns_primary, self.config.dns_secondary),
        ]
    }

    fn build_nak_options(&self) -> Vec<DhcpOption> {
        vec![
            DhcpOption::Message(NAK_MESSAGE.to_string()),
            DhcpOption::ServerIdentifier(self.config.server_address),
        ]
    }
}
