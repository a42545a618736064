//! Simulated hosts

use std::collections::BTreeSet;

use ferry_core::{Coord, HostAddress, MobilityProvider};
use ferry_dtn::{LinkKey, Router};

/// A node of the simulated network
///
/// Owns its movement model, its router and the keys of its active links.
/// The links themselves live in the world's link table.
#[derive(derive_more::Debug)]
pub struct Host {
    pub address: HostAddress,
    #[debug(skip)]
    pub mobility: Box<dyn MobilityProvider>,
    #[debug(skip)]
    pub router: Box<dyn Router>,
    pub links: BTreeSet<LinkKey>,
}

impl Host {
    pub fn new(
        address: HostAddress,
        mobility: Box<dyn MobilityProvider>,
        router: Box<dyn Router>,
    ) -> Self {
        Self {
            address,
            mobility,
            router,
            links: BTreeSet::new(),
        }
    }

    pub fn location(&self) -> Coord {
        self.mobility.location()
    }

    /// Addresses of the hosts this one is linked to
    pub fn peers(&self) -> Vec<HostAddress> {
        self.links
            .iter()
            .map(|key| if key.low == self.address { key.high } else { key.low })
            .collect()
    }

    pub fn is_connected_to(&self, peer: HostAddress) -> bool {
        self.links.contains(&LinkKey::new(self.address, peer))
    }
}
