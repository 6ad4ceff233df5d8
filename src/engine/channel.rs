//! Channel tree pass-through and auto-join lookup.

use super::PeerId;

pub type ChannelId = u32;

/// A user as listed in the engine's roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterUser {
    pub session: PeerId,
    pub name: String,
    pub talking: bool,
}

/// One node of the server's channel tree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub users: Vec<RosterUser>,
    pub children: Vec<Channel>,
}

impl Channel {
    pub fn new(id: ChannelId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_child(mut self, child: Channel) -> Self {
        self.children.push(child);
        self
    }

    pub fn find_by_id(&self, id: ChannelId) -> Option<&Channel> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_by_id(id))
    }

    /// Depth-first, case-insensitive search by name (this node included).
    pub fn find_by_name(&self, name: &str) -> Option<&Channel> {
        if self.name.eq_ignore_ascii_case(name) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_by_name(name))
    }

    /// Walk a `/`-separated path from this node.
    ///
    /// The first component may name this node itself (`"Root/Nets/2m"`) or
    /// be omitted (`"Nets/2m"`).  Matching is case-insensitive.
    pub fn find_by_path(&self, path: &str) -> Option<&Channel> {
        let mut parts = path.split('/').map(str::trim).filter(|p| !p.is_empty()).peekable();
        if parts.peek().is_some_and(|first| first.eq_ignore_ascii_case(&self.name)) {
            parts.next();
        }
        parts.try_fold(self, |node, part| {
            node.children.iter().find(|c| c.name.eq_ignore_ascii_case(part))
        })
    }

    /// Resolve an auto-join setting: a path when it contains `/`, otherwise a
    /// name anywhere in the tree.
    ///
    /// ```
    /// use ham_voice::engine::Channel;
    ///
    /// let root = Channel::new(0, "Root")
    ///     .with_child(Channel::new(1, "Nets").with_child(Channel::new(2, "2m")));
    /// assert_eq!(root.resolve("root/nets/2M").map(|c| c.id), Some(2));
    /// assert_eq!(root.resolve("2m").map(|c| c.id), Some(2));
    /// assert_eq!(root.resolve("Nets/70cm"), None);
    /// ```
    pub fn resolve(&self, spec: &str) -> Option<&Channel> {
        let spec = spec.trim();
        if spec.is_empty() {
            None
        } else if spec.contains('/') {
            self.find_by_path(spec)
        } else {
            self.find_by_name(spec)
        }
    }
}
