//! Boundary with the link-layer (Wi-Fi access point) subsystem.
//!
//! The server reports station state through [`LinkLayer`] and, while
//! running, hands the link layer a [`DisconnectHook`] to call whenever a
//! station leaves the access point.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::packet::MacAddr;

/// Callbacks the DHCP server makes toward the link layer.
///
/// Implementations are called from the receive worker and from whatever
/// context delivers disconnect events, so they must be cheap and must not
/// call back into the server.
pub trait LinkLayer: Send + Sync {
    /// A station is (or is no longer) associated and talking DHCP.
    fn notify_link_associated(&self, associated: bool);

    /// A station has (or no longer has) a usable address.
    fn notify_ip_ready(&self, ready: bool);

    /// Installs the hook to call on station disconnect. Replaces any previous hook.
    fn register_disconnect_hook(&self, hook: DisconnectHook);

    /// Removes `hook` if it is still the installed one. A hook installed
    /// later by another server is left alone.
    fn unregister_disconnect_hook(&self, hook: &DisconnectHook);
}

/// Handle the link layer calls when a station disconnects.
///
/// Cloning is cheap. Calling a hook after its server stopped is harmless and
/// returns false.
#[derive(Clone)]
pub struct DisconnectHook {
    callback: Arc<dyn Fn(MacAddr) -> bool + Send + Sync>,
}

impl DisconnectHook {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(MacAddr) -> bool + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Releases the station's lease. Returns true if one was released.
    pub fn on_link_disconnected(&self, mac: MacAddr) -> bool {
        (self.callback)(mac)
    }

    /// True when both handles were cloned from the same hook.
    pub fn same_hook(&self, other: &DisconnectHook) -> bool {
        Arc::ptr_eq(&self.callback, &other.callback)
    }
}

impl fmt::Debug for DisconnectHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisconnectHook").finish_non_exhaustive()
    }
}

/// A [`LinkLayer`] that logs notifications and remembers the last state.
///
/// Used by the binary, where no radio stack is attached, and by tests.
#[derive(Debug, Default)]
pub struct LoggingLink {
    link_associated: AtomicBool,
    ip_ready: AtomicBool,
    hook: Mutex<Option<DisconnectHook>>,
}

impl LoggingLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link_associated(&self) -> bool {
        self.link_associated.load(Ordering::SeqCst)
    }

    pub fn ip_ready(&self) -> bool {
        self.ip_ready.load(Ordering::SeqCst)
    }

    pub fn has_disconnect_hook(&self) -> bool {
        self.hook.lock().map(|hook| hook.is_some()).unwrap_or(false)
    }

    /// Delivers a station-disconnect event to the registered hook.
    ///
    /// Returns false when no hook is registered or the station had no lease.
    pub fn disconnect(&self, mac: MacAddr) -> bool {
        let hook = match self.hook.lock() {
            Ok(hook) => hook.clone(),
            Err(_) => return false,
        };
        match hook {
            Some(hook) => hook.on_link_disconnected(mac),
            None => {
                debug!("Station {} disconnected with no DHCP server attached", mac);
                false
            }
        }
    }
}

impl LinkLayer for LoggingLink {
    fn notify_link_associated(&self, associated: bool) {
        info!("Link associated: {}", associated);
        self.link_associated.store(associated, Ordering::SeqCst);
    }

    fn notify_ip_ready(&self, ready: bool) {
        info!("IP ready: {}", ready);
        self.ip_ready.store(ready, Ordering::SeqCst);
    }

    fn register_disconnect_hook(&self, hook: DisconnectHook) {
        if let Ok(mut slot) = self.hook.lock() {
            *slot = Some(hook);
        }
    }

    fn unregister_disconnect_hook(&self, hook: &DisconnectHook) {
        if let Ok(mut slot) = self.hook.lock()
            && slot.as_ref().is_some_and(|current| current.same_hook(hook))
        {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_hook_dispatch() {
        let link = LoggingLink::new();
        let mac = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
        assert!(!link.disconnect(mac));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let hook = DisconnectHook::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });
        link.register_disconnect_hook(hook.clone());
        assert!(link.has_disconnect_hook());
        assert!(link.disconnect(mac));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        link.unregister_disconnect_hook(&hook);
        assert!(!link.disconnect(mac));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister_leaves_newer_hook() {
        let link = LoggingLink::new();
        let mac = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02]);

        let first = DisconnectHook::new(|_| false);
        let second = DisconnectHook::new(|_| true);
        assert!(!first.same_hook(&second));
        assert!(first.same_hook(&first.clone()));

        link.register_disconnect_hook(first.clone());
        link.register_disconnect_hook(second.clone());

        link.unregister_disconnect_hook(&first);
        assert!(link.has_disconnect_hook());
        assert!(link.disconnect(mac));

        link.unregister_disconnect_hook(&second);
        assert!(!link.has_disconnect_hook());
    }

    #[test]
    fn test_notifications_recorded() {
        let link = LoggingLink::new();
        link.notify_link_associated(true);
        link.notify_ip_ready(true);
        assert!(link.link_associated());
        assert!(link.ip_ready());

        link.notify_ip_ready(false);
        assert!(!link.ip_ready());
    }
}
