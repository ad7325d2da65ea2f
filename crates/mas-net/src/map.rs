//! `SocketMap` — the set of live sockets for one plane of an element.
//!
//! Every element owns two maps: one external (inter-element) and one
//! internal (node↔module).  Each is built from the matching half of the
//! element's [`NetworkConfig`](mas_core::NetworkConfig).

use rustc_hash::FxHashMap;

use mas_core::{ElementRole, Message, SocketRole};

use crate::{NetResult, Socket};

/// Role → live socket for one communication plane.
///
/// Looking up a role the element does not carry is a programming error and
/// panics; protocols declare their required roles in the element's network
/// configuration up front.
#[derive(Default)]
pub struct SocketMap {
    sockets: FxHashMap<SocketRole, Socket>,
}

impl SocketMap {
    /// Build live sockets for every role in `endpoints`.
    ///
    /// Bind roles (publish, reply, pull) bind their endpoints — a conflict
    /// is a fatal startup error.  Connect roles reach out to peer-bound
    /// endpoints, except `Request`, which connects on demand.  Subscribe
    /// sockets filter on `owner` and `"ALL"`.
    ///
    /// All binds happen before any connect: two elements configuring
    /// concurrently (a node and its modules, say) each expose their own
    /// endpoints before blocking on the other's.
    pub async fn build(
        owner: &str,
        endpoints: &FxHashMap<SocketRole, Vec<String>>,
    ) -> NetResult<Self> {
        let mut ordered: Vec<(&SocketRole, &Vec<String>)> = endpoints.iter().collect();
        ordered.sort_by_key(|(role, _)| (!role.binds(), role.as_str()));

        let mut sockets = FxHashMap::default();
        for (&role, eps) in ordered {
            let socket = match role {
                SocketRole::Publish => Socket::publish(owner, eps).await?,
                SocketRole::Subscribe => {
                    let filters = vec![owner.to_string(), ElementRole::All.as_str().to_string()];
                    Socket::subscribe(owner, eps, filters).await?
                }
                SocketRole::Request => Socket::request(owner),
                SocketRole::Reply => Socket::reply(owner, eps).await?,
                SocketRole::Push => Socket::push(owner, eps).await?,
                SocketRole::Pull => Socket::pull(owner, eps).await?,
            };
            sockets.insert(role, socket);
        }
        Ok(Self { sockets })
    }

    /// The socket for `role`.
    ///
    /// # Panics
    /// Panics if the map does not carry `role` — the element's network
    /// configuration is wrong, which is a programming error.
    pub fn get(&self, role: SocketRole) -> &Socket {
        self.sockets
            .get(&role)
            .unwrap_or_else(|| panic!("no {role} socket in this element's socket map"))
    }

    /// `true` if the map carries a socket for `role`.
    pub fn has(&self, role: SocketRole) -> bool {
        self.sockets.contains_key(&role)
    }

    /// Send `msg` on the `role` socket.  See [`Socket::send`].
    pub async fn send(&self, role: SocketRole, msg: &Message) -> NetResult<()> {
        self.get(role).send(msg).await
    }

    /// Receive the next message on the `role` socket.  See [`Socket::recv`].
    pub async fn recv(&self, role: SocketRole) -> NetResult<Message> {
        self.get(role).recv().await
    }

    /// Close every socket in the map.  Idempotent.
    pub fn close_all(&self) {
        for socket in self.sockets.values() {
            socket.close();
        }
    }
}
