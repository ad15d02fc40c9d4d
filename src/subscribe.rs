//! The set of bundles under consideration for one operation.

/// A tentative intent to install or consider one bundle. Lives only for
/// the duration of the operation that created it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    pub component: String,
    pub version: u32,
}

/// At most one subscription per component; iteration preserves
/// insertion order so install plans stay deterministic.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    entries: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the component was already subscribed.
    pub fn insert(&mut self, component: &str, version: u32) -> bool {
        if self.is_subscribed(component) {
            return false;
        }
        self.entries.push(Subscription {
            component: component.to_owned(),
            version,
        });
        true
    }

    pub fn is_subscribed(&self, component: &str) -> bool {
        self.entries.iter().any(|s| s.component == component)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|s| s.component.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
