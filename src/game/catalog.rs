//! Item catalog and merge-chain queries
//!
//! The catalog is pushed by the server as a whole and replaced wholesale.
//! Items link to their upgrade through `merge`, forming chains that are
//! expected to be acyclic. Every walk here is bounded by a visited set so a
//! bad catalog truncates a chain instead of looping.

use std::borrow::Borrow;
use std::fmt;

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

/// Item reference, globally unique key of an item definition (e.g. `t1.2`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemRef(String);

impl ItemRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ItemRef {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ItemRef {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Item definition as configured on the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDefinition {
    /// Unique item reference
    #[serde(rename = "ref")]
    pub id: ItemRef,
    /// Item display name
    pub name: String,
    /// Tier display name
    pub tier: String,
    /// Optional label rendered on the item
    #[serde(default)]
    pub label: Option<String>,
    /// Sell price
    #[serde(default)]
    pub sell: u64,
    /// Optional: drop an item after this many ticks
    #[serde(default)]
    pub drop_interval: Option<u64>,
    /// Optional: maximum number of drops before destruction
    #[serde(default)]
    pub drop_limit: Option<u32>,
    /// Sprite path
    #[serde(alias = "sprite_path")]
    pub sprite: String,
    /// Buy cost, absent when the item cannot be bought directly
    #[serde(default)]
    pub buy: Option<u64>,
    /// Item this merges into, absent at the top of a chain
    #[serde(default)]
    pub merge: Option<ItemRef>,
    /// Display order in the shop
    #[serde(default)]
    pub client_order: i64,
}

impl ItemDefinition {
    pub fn is_buyable(&self) -> bool {
        self.buy.is_some()
    }

    pub fn is_mergeable(&self) -> bool {
        self.merge.is_some()
    }
}

/// Catalog payload as it appears on the wire: a list or a ref-keyed object
#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogPayload {
    List(Vec<ItemDefinition>),
    Map(serde_json::Map<String, serde_json::Value>),
}

impl TryFrom<CatalogPayload> for Catalog {
    type Error = serde_json::Error;

    fn try_from(payload: CatalogPayload) -> Result<Self, Self::Error> {
        match payload {
            CatalogPayload::List(items) => Ok(Catalog::from_items(items)),
            CatalogPayload::Map(map) => {
                let items = map
                    .into_iter()
                    .map(|(_, value)| serde_json::from_value(value))
                    .collect::<Result<Vec<ItemDefinition>, _>>()?;
                Ok(Catalog::from_items(items))
            }
        }
    }
}

/// Catalog of item definitions, keyed by reference, in arrival order
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "CatalogPayload")]
pub struct Catalog {
    items: Vec<ItemDefinition>,
    index: HashMap<ItemRef, usize>,
}

impl Catalog {
    /// Build a catalog; a repeated reference replaces the earlier definition in place
    pub fn from_items(items: impl IntoIterator<Item = ItemDefinition>) -> Self {
        let mut catalog = Self::default();
        for item in items {
            match catalog.index.get(&item.id) {
                Some(&slot) => {
                    warn!("Catalog contains duplicate item '{}', keeping last", item.id);
                    catalog.items[slot] = item;
                }
                None => {
                    catalog.index.insert(item.id.clone(), catalog.items.len());
                    catalog.items.push(item);
                }
            }
        }
        catalog
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ItemDefinition> {
        self.index.get(id).map(|&slot| &self.items[slot])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Definitions in arrival order
    pub fn iter(&self) -> impl Iterator<Item = &ItemDefinition> {
        self.items.iter()
    }

    /// Buyable items sorted by `client_order`
    ///
    /// The sort is stable: items with equal order keep catalog arrival order.
    pub fn buyable_items(&self) -> Vec<&ItemDefinition> {
        let mut items: Vec<_> = self.items.iter().filter(|i| i.is_buyable()).collect();
        items.sort_by_key(|i| i.client_order);
        items
    }

    /// The item that merges into `id`, if any
    ///
    /// With several candidates the first in arrival order wins.
    pub fn downgrade_item(&self, id: &str) -> Option<&ItemDefinition> {
        self.items
            .iter()
            .find(|i| i.merge.as_ref().map(ItemRef::as_str) == Some(id))
    }

    /// Items below `id` in its chain, ordered from the base up to just below `id`
    pub fn downgrade_items(&self, id: &str) -> Vec<&ItemDefinition> {
        let mut visited: HashSet<&str> = HashSet::with_capacity(8);
        visited.insert(id);

        let mut chain = Vec::new();
        let mut current = id;
        while let Some(item) = self.downgrade_item(current) {
            if !visited.insert(item.id.as_str()) {
                warn!("Merge cycle below '{}' at '{}', truncating chain", id, item.id);
                break;
            }
            chain.push(item);
            current = item.id.as_str();
        }

        chain.reverse();
        chain
    }

    /// Items above `id` in its chain, ordered from just above `id` to the top
    ///
    /// Returns an empty list if `id` is not in the catalog.
    pub fn upgrade_items(&self, id: &str) -> Vec<&ItemDefinition> {
        let mut visited: HashSet<&str> = HashSet::with_capacity(8);
        visited.insert(id);

        let mut chain = Vec::new();
        let mut next = self.get(id).and_then(|i| i.merge.as_ref());
        while let Some(next_id) = next {
            let item = match self.get(next_id.as_str()) {
                Some(item) => item,
                None => {
                    trace!("Upgrade '{}' of chain '{}' missing from catalog", next_id, id);
                    break;
                }
            };
            if !visited.insert(item.id.as_str()) {
                warn!("Merge cycle above '{}' at '{}', truncating chain", id, item.id);
                break;
            }
            chain.push(item);
            next = item.merge.as_ref();
        }

        chain
    }

    /// Full chain containing `id`: downgrades, `id` itself, upgrades
    ///
    /// `id` is left out if it is not in the catalog. On a cycle through `id`
    /// each item is still listed once.
    pub fn chain(&self, id: &str) -> Vec<&ItemDefinition> {
        let mut chain = self.downgrade_items(id);
        if let Some(item) = self.get(id) {
            chain.push(item);
        }
        for item in self.upgrade_items(id) {
            if !chain.iter().any(|c| c.id == item.id) {
                chain.push(item);
            }
        }
        chain
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn def(id: &str, merge: Option<&str>) -> ItemDefinition {
        ItemDefinition {
            id: ItemRef::from(id),
            name: format!("Item {}", id),
            tier: "Tier".to_string(),
            label: Some(id.to_string()),
            sell: 10,
            drop_interval: None,
            drop_limit: None,
            sprite: format!("sprites/{}.png", id),
            buy: None,
            merge: merge.map(ItemRef::from),
            client_order: 0,
        }
    }

    fn ids(items: &[&ItemDefinition]) -> Vec<String> {
        items.iter().map(|i| i.id.to_string()).collect()
    }

    fn linear_chain(n: usize) -> Catalog {
        let items = (1..=n).map(|i| {
            let next = (i < n).then(|| format!("t1.{}", i + 1));
            def(&format!("t1.{}", i), next.as_deref())
        });
        Catalog::from_items(items)
    }

    #[test]
    fn test_buyable_items_sorted() {
        let mut a = def("a", None);
        a.buy = Some(5);
        a.client_order = 3;
        let b = def("b", None);
        let mut c = def("c", None);
        c.buy = Some(1);
        c.client_order = 1;
        let mut d = def("d", None);
        d.buy = Some(2);
        d.client_order = 3;

        let catalog = Catalog::from_items([a, b, c, d]);
        assert_eq!(ids(&catalog.buyable_items()), vec!["c", "a", "d"]);
    }

    #[test]
    fn test_downgrade_item() {
        let catalog = linear_chain(3);
        assert_eq!(catalog.downgrade_item("t1.2").unwrap().id.as_str(), "t1.1");
        assert!(catalog.downgrade_item("t1.1").is_none());
    }

    #[test]
    fn test_chain_walks() {
        let catalog = linear_chain(4);
        assert_eq!(ids(&catalog.downgrade_items("t1.3")), vec!["t1.1", "t1.2"]);
        assert_eq!(ids(&catalog.upgrade_items("t1.2")), vec!["t1.3", "t1.4"]);
        assert!(catalog.upgrade_items("t1.4").is_empty());
        assert!(catalog.downgrade_items("t1.1").is_empty());
    }

    #[test]
    fn test_chain_reconstructed_from_every_point() {
        let n = 6;
        let catalog = linear_chain(n);
        let expected: Vec<String> = (1..=n).map(|i| format!("t1.{}", i)).collect();

        for i in 1..=n {
            let id = format!("t1.{}", i);
            let mut full = ids(&catalog.downgrade_items(&id));
            full.push(id.clone());
            full.extend(ids(&catalog.upgrade_items(&id)));
            assert_eq!(full, expected, "chain from {}", id);
            assert_eq!(ids(&catalog.chain(&id)), expected);
        }
    }

    #[test]
    fn test_two_cycle_terminates() {
        let catalog = Catalog::from_items([def("a", Some("b")), def("b", Some("a"))]);

        assert_eq!(ids(&catalog.upgrade_items("a")), vec!["b"]);
        assert_eq!(ids(&catalog.downgrade_items("a")), vec!["b"]);
        assert_eq!(ids(&catalog.chain("a")), vec!["b", "a"]);
    }

    #[test]
    fn test_self_cycle_terminates() {
        let catalog = Catalog::from_items([def("a", Some("a"))]);
        assert!(catalog.upgrade_items("a").is_empty());
        assert!(catalog.downgrade_items("a").is_empty());
        assert_eq!(ids(&catalog.chain("a")), vec!["a"]);
    }

    #[test]
    fn test_cycle_with_tail_terminates() {
        // t -> a -> b -> c -> a
        let catalog = Catalog::from_items([
            def("t", Some("a")),
            def("a", Some("b")),
            def("b", Some("c")),
            def("c", Some("a")),
        ]);
        assert_eq!(ids(&catalog.upgrade_items("t")), vec!["a", "b", "c"]);
        assert!(catalog.downgrade_items("b").len() <= catalog.len());
    }

    #[test]
    fn test_missing_upgrade_target() {
        let catalog = Catalog::from_items([def("a", Some("ghost"))]);
        assert!(catalog.upgrade_items("a").is_empty());
        assert!(catalog.upgrade_items("unknown").is_empty());
        assert!(catalog.chain("unknown").is_empty());
    }

    #[test]
    fn test_duplicate_ref_keeps_last() {
        let mut second = def("a", None);
        second.name = "Second".to_string();
        let catalog = Catalog::from_items([def("a", None), def("b", None), second]);

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("a").unwrap().name, "Second");
        assert_eq!(ids(&catalog.iter().collect::<Vec<_>>()), vec!["a", "b"]);
    }

    #[test]
    fn test_deserialize_list_and_map() {
        let list = r#"[
            {"ref": "t1.1", "name": "Seed", "tier": "Farm", "label": "1", "sell": 1,
             "sprite_path": "seed.png", "buy": 5, "merge": "t1.2", "client_order": 1},
            {"ref": "t1.2", "name": "Sprout", "tier": "Farm", "sell": 3, "sprite": "sprout.png"}
        ]"#;
        let catalog: Catalog = serde_json::from_str(list).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("t1.1").unwrap().sprite, "seed.png");
        assert_eq!(catalog.get("t1.1").unwrap().merge, Some(ItemRef::from("t1.2")));
        assert!(catalog.get("t1.2").unwrap().merge.is_none());

        let map = r#"{
            "t1.1": {"ref": "t1.1", "name": "Seed", "tier": "Farm", "sprite": "seed.png", "merge": "t1.2"},
            "t1.2": {"ref": "t1.2", "name": "Sprout", "tier": "Farm", "sprite": "sprout.png", "merge": null}
        }"#;
        let catalog: Catalog = serde_json::from_str(map).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(ids(&catalog.chain("t1.2")), vec!["t1.1", "t1.2"]);
    }

    #[test]
    fn test_map_payload_keeps_arrival_order() {
        let map = r#"{
            "z": {"ref": "z", "name": "Zed", "tier": "Farm", "sprite": "z.png", "buy": 1, "client_order": 0},
            "a": {"ref": "a", "name": "Ay", "tier": "Farm", "sprite": "a.png", "buy": 1, "client_order": 0}
        }"#;
        let catalog: Catalog = serde_json::from_str(map).unwrap();

        assert_eq!(ids(&catalog.iter().collect::<Vec<_>>()), vec!["z", "a"]);
        assert_eq!(ids(&catalog.buyable_items()), vec!["z", "a"]);
    }
}
