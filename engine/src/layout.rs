//! Versioned layout of the on-device store.
//!
//! The store is a set of named collections. Each layout version only adds
//! collections; upgrading never drops or rewrites an existing one, so an
//! upgrade can be replayed against an already upgraded store.

use crate::{error::Result, CollectionName, Error, SchemaVersion};
use std::collections::HashSet;

/// Well-known collection names.
pub mod collections {
    pub const TRANSACTIONS: &str = "transactions";
    pub const TEMPLATES: &str = "templates";
    pub const SHOPPING_SESSIONS: &str = "shoppingSessions";
    pub const SYNC_QUEUE: &str = "syncQueue";
    pub const CONFLICTS: &str = "conflicts";
    pub const ID_REBINDINGS: &str = "idRebindings";
    /// Owned by the surrounding app.
    pub const USER_SETTINGS: &str = "userSettings";
    /// Owned by the surrounding app.
    pub const QUERY_CACHE: &str = "queryCache";
}

/// One additive upgrade step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upgrade {
    pub version: SchemaVersion,
    pub adds: Vec<CollectionName>,
}

impl Upgrade {
    pub fn new<I, S>(version: SchemaVersion, adds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<CollectionName>,
    {
        Self {
            version,
            adds: adds.into_iter().map(Into::into).collect(),
        }
    }
}

/// The ordered list of upgrades that make up the store layout.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Layout {
    upgrades: Vec<Upgrade>,
}

impl Layout {
    /// An empty layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// The layout shipped with this version of the engine.
    pub fn current() -> Self {
        use collections::*;
        Self::new()
            .with_upgrade(Upgrade::new(
                1,
                [TRANSACTIONS, USER_SETTINGS, TEMPLATES, QUERY_CACHE],
            ))
            .with_upgrade(Upgrade::new(2, [SHOPPING_SESSIONS, SYNC_QUEUE, CONFLICTS]))
            .with_upgrade(Upgrade::new(3, [ID_REBINDINGS]))
    }

    /// Builder-style method to append an upgrade.
    pub fn with_upgrade(mut self, upgrade: Upgrade) -> Self {
        self.upgrades.push(upgrade);
        self
    }

    /// Latest version of this layout (0 when empty).
    pub fn version(&self) -> SchemaVersion {
        self.upgrades.last().map(|u| u.version).unwrap_or(0)
    }

    /// Upgrades a store at `from` still needs, oldest first.
    pub fn upgrades_from(&self, from: SchemaVersion) -> impl Iterator<Item = &Upgrade> {
        self.upgrades.iter().filter(move |u| u.version > from)
    }

    /// Every collection the layout defines.
    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.upgrades
            .iter()
            .flat_map(|u| u.adds.iter().map(String::as_str))
    }

    /// Whether `name` is part of the layout.
    pub fn contains(&self, name: &str) -> bool {
        self.collections().any(|c| c == name)
    }

    /// Check that versions strictly increase and no collection is added twice.
    pub fn validate(&self) -> Result<()> {
        let mut last = 0;
        let mut seen = HashSet::new();
        for upgrade in &self.upgrades {
            if upgrade.version <= last {
                return Err(Error::InvalidLayout(format!(
                    "version {} does not follow {}",
                    upgrade.version, last
                )));
            }
            last = upgrade.version;
            for name in &upgrade.adds {
                if !seen.insert(name.as_str()) {
                    return Err(Error::InvalidLayout(format!(
                        "collection '{name}' added twice"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Check that a store at `found` can be opened with this layout.
    pub fn check_compatible(&self, found: SchemaVersion) -> Result<()> {
        if found > self.version() {
            return Err(Error::LayoutTooNew {
                found,
                supported: self.version(),
            });
        }
        Ok(())
    }
}
