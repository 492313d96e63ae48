use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::handler::{Reply, RequestHandler};
use crate::lease::{LeaseEntry, LeaseTable};
use crate::link::{DisconnectHook, LinkLayer};
use crate::packet::{DHCP_FIXED_HEADER_SIZE, DhcpMessage, MESSAGE_SIZE, MacAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// State shared by the receive worker and the disconnect hook.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) state: ServerState,
    pub(crate) leases: Option<LeaseTable>,
    pub(crate) local_addr: Option<SocketAddr>,
}

/// Every critical section leaves `Shared` consistent, so a poisoned lock
/// is still safe to use.
pub(crate) fn lock_shared(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Running {
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
    hook: DisconnectHook,
}

/// DHCP server for stations of a soft access point.
///
/// One value owns one listening socket and one lease table. Several
/// servers can live in the same process as long as they use different ports.
pub struct DhcpServer {
    link: Arc<dyn LinkLayer>,
    shared: Arc<Mutex<Shared>>,
    lifecycle: tokio::sync::Mutex<Option<Running>>,
}

impl DhcpServer {
    pub fn new(link: Arc<dyn LinkLayer>) -> Self {
        Self {
            link,
            shared: Arc::new(Mutex::new(Shared {
                state: ServerState::Stopped,
                leases: None,
                local_addr: None,
            })),
            lifecycle: tokio::sync::Mutex::new(None),
        }
    }

    /// Validates `config`, binds the socket and starts the receive worker.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyRunning`] if the server is not stopped
    /// - [`Error::InvalidConfig`] if the configuration does not validate
    /// - [`Error::Socket`] if the socket cannot be created or bound
    ///
    /// On error the server is left stopped.
    pub async fn start(&self, config: Config) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;

        if lock_shared(&self.shared).state != ServerState::Stopped {
            return Err(Error::AlreadyRunning);
        }

        let config = Arc::new(config.resolve()?);

        {
            let mut shared = lock_shared(&self.shared);
            shared.state = ServerState::Starting;
            shared.leases = Some(LeaseTable::new(&config));
        }

        let (socket, local_addr) = match Self::create_socket(config.server_port) {
            Ok(socket) => socket,
            Err(error) => {
                self.reset_shared();
                return Err(error);
            }
        };

        let hook = self.disconnect_hook();
        self.link.register_disconnect_hook(hook.clone());

        let handler = RequestHandler::new(
            Arc::clone(&config),
            Arc::clone(&self.shared),
            Arc::clone(&self.link),
        );
        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(receive_loop(socket, handler, shutdown_rx));

        {
            let mut shared = lock_shared(&self.shared);
            shared.state = ServerState::Running;
            shared.local_addr = Some(local_addr);
        }

        *lifecycle = Some(Running {
            shutdown,
            worker,
            hook,
        });

        info!("DHCP server listening on {}", local_addr);
        info!(
            "IP pool: {} - {} ({} addresses), gateway {}",
            config.pool_start,
            config.pool_end,
            config.pool_size(),
            config.gateway
        );

        Ok(())
    }

    /// Stops the worker, closes the socket and drops every lease.
    ///
    /// Does nothing if the server is already stopped.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;

        let Some(running) = lifecycle.take() else {
            debug!("DHCP server already stopped");
            return;
        };

        lock_shared(&self.shared).state = ServerState::Stopped;
        self.link.unregister_disconnect_hook(&running.hook);

        let _ = running.shutdown.send(true);
        if let Err(error) = running.worker.await {
            error!("DHCP worker ended abnormally: {}", error);
        }

        let dropped = {
            let mut shared = lock_shared(&self.shared);
            shared.local_addr = None;
            shared
                .leases
                .take()
                .map(|leases| leases.snapshot().len())
                .unwrap_or(0)
        };

        info!("DHCP server stopped ({} leases dropped)", dropped);
    }

    pub fn state(&self) -> ServerState {
        lock_shared(&self.shared).state
    }

    /// Address the socket is bound to, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock_shared(&self.shared).local_addr
    }

    /// Current bindings, both active and kept for reuse.
    pub fn leases(&self) -> Vec<LeaseEntry> {
        lock_shared(&self.shared)
            .leases
            .as_ref()
            .map(LeaseTable::snapshot)
            .unwrap_or_default()
    }

    /// Releases the lease of a station that left the access point.
    ///
    /// This is what the registered [`DisconnectHook`] calls.
    pub fn on_link_disconnected(&self, mac: MacAddr) -> bool {
        release_disconnected(&self.shared, self.link.as_ref(), mac)
    }

    fn disconnect_hook(&self) -> DisconnectHook {
        let shared: Weak<Mutex<Shared>> = Arc::downgrade(&self.shared);
        let link: Weak<dyn LinkLayer> = Arc::downgrade(&self.link);

        DisconnectHook::new(move |mac| match (shared.upgrade(), link.upgrade()) {
            (Some(shared), Some(link)) => release_disconnected(&shared, link.as_ref(), mac),
            _ => false,
        })
    }

    fn reset_shared(&self) {
        let mut shared = lock_shared(&self.shared);
        shared.state = ServerState::Stopped;
        shared.leases = None;
        shared.local_addr = None;
    }

    fn create_socket(port: u16) -> Result<(UdpSocket, SocketAddr)> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|error| Error::Socket(format!("Failed to create socket: {}", error)))?;

        socket
            .set_reuse_address(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_REUSEADDR: {}", error)))?;

        socket
            .set_broadcast(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_BROADCAST: {}", error)))?;

        socket
            .set_nonblocking(true)
            .map_err(|error| Error::Socket(format!("Failed to set non-blocking: {}", error)))?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        socket.bind(&bind_addr.into()).map_err(|error| {
            Error::Socket(format!("Failed to bind to {}: {}", bind_addr, error))
        })?;

        let std_socket: std::net::UdpSocket = socket.into();
        let tokio_socket = UdpSocket::from_std(std_socket).map_err(|error| {
            Error::Socket(format!("Failed to convert to tokio socket: {}", error))
        })?;

        let local_addr = tokio_socket.local_addr().map_err(|error| {
            Error::Socket(format!("Failed to read local address: {}", error))
        })?;

        Ok((tokio_socket, local_addr))
    }
}

fn release_disconnected(shared: &Mutex<Shared>, link: &dyn LinkLayer, mac: MacAddr) -> bool {
    let released = {
        let mut shared = lock_shared(shared);
        if shared.state != ServerState::Running {
            return false;
        }
        shared
            .leases
            .as_mut()
            .is_some_and(|leases| leases.release(mac))
    };

    if released {
        info!("Station {} disconnected, lease released", mac);
        link.notify_link_associated(false);
        link.notify_ip_ready(false);
    } else {
        debug!("Station {} disconnected without a lease", mac);
    }

    released
}

/// Receives, decodes and answers datagrams until shutdown is signalled.
///
/// The socket and the scratch buffer live and die with this task.
async fn receive_loop(
    socket: UdpSocket,
    handler: RequestHandler,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buffer = vec![0u8; MESSAGE_SIZE];

    info!("DHCP server ready and listening");

    loop {
        buffer.fill(0);

        let received = tokio::select! {
            _ = shutdown.changed() => break,
            result = socket.recv_from(&mut buffer) => result,
        };

        let (size, source) = match received {
            Ok(received) => received,
            Err(error) => {
                if *shutdown.borrow() {
                    break;
                }
                warn!("Error receiving datagram: {}", error);
                continue;
            }
        };

        if size < DHCP_FIXED_HEADER_SIZE {
            warn!(
                "Dropping {} byte datagram from {}: shorter than the DHCP header",
                size, source
            );
            continue;
        }

        let request = match DhcpMessage::decode(&buffer) {
            Ok(request) => request,
            Err(error) => {
                warn!("Dropping datagram from {}: {}", source, error);
                continue;
            }
        };

        if let Some(reply) = handler.handle(&request) {
            send_reply(&socket, reply).await;
        }
    }

    debug!("DHCP receive loop exited");
}

async fn send_reply(socket: &UdpSocket, reply: Reply) {
    let encoded = match reply.message.encode() {
        Ok(encoded) => encoded,
        Err(error) => {
            error!("Failed to encode reply: {}", error);
            return;
        }
    };

    if let Err(error) = socket.send_to(&encoded, reply.destination).await {
        warn!("Failed to send reply to {}: {}", reply.destination, error);
    }
}
