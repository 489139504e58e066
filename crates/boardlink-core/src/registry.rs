//! Multi-board registry
//!
//! Systems with more than one board keep their links here, keyed by the
//! link's board number.

use std::collections::BTreeMap;
use tracing::debug;

use crate::link::{Link, LinkStatus};

/// Links keyed by board number
#[derive(Default)]
pub struct BoardLinks {
    links: BTreeMap<u32, Link>,
}

impl BoardLinks {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a link under its board number. A link already registered under
    /// that number is returned, still running.
    pub fn insert(&mut self, link: Link) -> Option<Link> {
        let board = link.board();
        debug!(board, "Registering board link");
        self.links.insert(board, link)
    }

    /// Link of `board`, if registered
    pub fn get(&self, board: u32) -> Option<&Link> {
        self.links.get(&board)
    }

    /// Mutable link of `board`, if registered
    pub fn get_mut(&mut self, board: u32) -> Option<&mut Link> {
        self.links.get_mut(&board)
    }

    /// Take a link out of the registry without terminating it
    pub fn remove(&mut self, board: u32) -> Option<Link> {
        self.links.remove(&board)
    }

    /// Send on one board. False if the board is unknown or the send failed.
    pub fn send(&self, board: u32, payload: &str, direct: bool) -> bool {
        self.links
            .get(&board)
            .is_some_and(|link| link.send(payload, direct))
    }

    /// Terminate every link in board order and empty the registry
    pub fn terminate_all(&mut self) {
        while let Some((_, mut link)) = self.links.pop_first() {
            link.terminate();
        }
    }

    /// Number of registered links
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// True if no link is registered
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Board numbers in ascending order
    pub fn boards(&self) -> Vec<u32> {
        self.links.keys().copied().collect()
    }

    /// Status of every link in board order
    pub fn statuses(&self) -> Vec<LinkStatus> {
        self.links.values().map(Link::status).collect()
    }
}

impl Drop for BoardLinks {
    fn drop(&mut self) {
        self.terminate_all();
    }
}
