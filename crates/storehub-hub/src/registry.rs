use std::collections::{btree_map::Entry, BTreeMap};

use storehub_core::ConnId;

use crate::connection::Connection;

/// The live connections, keyed by identity.
///
/// Identities grow monotonically, so key order is registration order.
/// Not synchronized itself: every method is called with the hub's guard held.
#[derive(Default)]
pub(crate) struct Registry {
    members: BTreeMap<ConnId, Connection>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a connection. An identity already present is left untouched
    /// and `false` is returned; the rejected connection is dropped, which
    /// closes its queue.
    pub(crate) fn add(&mut self, conn: Connection) -> bool {
        match self.members.entry(conn.id()) {
            Entry::Vacant(slot) => {
                slot.insert(conn);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Remove by identity. `None` is expected when a disconnect races an
    /// earlier removal.
    pub(crate) fn remove(&mut self, id: ConnId) -> Option<Connection> {
        self.members.remove(&id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.members.values()
    }

    /// Identities currently registered, in registration order.
    pub(crate) fn ids(&self) -> Vec<ConnId> {
        self.members.keys().copied().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.members.len()
    }

    /// Take every connection out, leaving the registry empty.
    pub(crate) fn drain(&mut self) -> Vec<Connection> {
        std::mem::take(&mut self.members).into_values().collect()
    }
}
