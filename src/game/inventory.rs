use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

use crate::game::catalog::{ItemDefinition, ItemRef};

/// Item placed in an inventory cell
///
/// A snapshot of the definition at placement time, later catalog pushes do
/// not touch placed instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemInstance {
    #[serde(rename = "ref")]
    pub id: ItemRef,
    pub name: String,
    pub tier: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub sell: u64,
    #[serde(default)]
    pub drop_interval: Option<u64>,
    #[serde(default)]
    pub drop_limit: Option<u32>,
    pub sprite: String,
    #[serde(default)]
    pub mergeable: bool,
}

impl ItemInstance {
    /// Instantiate an item from its definition
    pub fn from_definition(def: &ItemDefinition) -> Self {
        Self {
            id: def.id.clone(),
            name: def.name.clone(),
            tier: def.tier.clone(),
            label: def.label.clone(),
            sell: def.sell,
            drop_interval: def.drop_interval,
            drop_limit: def.drop_limit,
            sprite: def.sprite.clone(),
            mergeable: def.is_mergeable(),
        }
    }
}

/// Inventory cell, `None` when empty
pub type Cell = Option<ItemInstance>;

/// Player inventory: fixed grid of cells plus balances
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    pub money: u64,
    pub energy: u64,
    pub items: Vec<Cell>,
    /// Every reference the player has ever held
    #[serde(default)]
    pub discovered: HashSet<ItemRef>,
}

impl Inventory {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn cell(&self, index: usize) -> Option<&ItemInstance> {
        self.items.get(index).and_then(Option::as_ref)
    }

    pub fn cell_mut(&mut self, index: usize) -> Option<&mut ItemInstance> {
        self.items.get_mut(index).and_then(Option::as_mut)
    }

    /// Replace a cell; returns `false` if the index is outside the grid
    pub fn set_cell(&mut self, index: usize, cell: Cell) -> bool {
        match self.items.get_mut(index) {
            Some(slot) => {
                *slot = cell;
                true
            }
            None => false,
        }
    }

    pub fn is_discovered(&self, id: &str) -> bool {
        self.discovered.contains(id)
    }
}

/// Money and energy update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    pub money: u64,
    pub energy: u64,
}

/// Single cell update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellUpdate {
    pub index: usize,
    #[serde(default)]
    pub item: Cell,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::catalog::tests::def;

    #[test]
    fn test_instance_from_definition() {
        let mut definition = def("t1.1", Some("t1.2"));
        definition.drop_interval = Some(30);
        let instance = ItemInstance::from_definition(&definition);

        assert_eq!(instance.id.as_str(), "t1.1");
        assert_eq!(instance.label.as_deref(), Some("t1.1"));
        assert_eq!(instance.drop_interval, Some(30));
        assert!(instance.mergeable);

        let top = ItemInstance::from_definition(&def("t1.2", None));
        assert!(!top.mergeable);
    }

    #[test]
    fn test_set_cell_bounds() {
        let mut inventory = Inventory {
            items: vec![None, None],
            ..Default::default()
        };
        assert!(inventory.set_cell(1, Some(ItemInstance::from_definition(&def("a", None)))));
        assert!(!inventory.set_cell(2, None));
        assert!(inventory.cell(1).is_some());
        assert!(inventory.cell(5).is_none());
    }

    #[test]
    fn test_deserialize_server_inventory() {
        let json = r#"{
            "money": 120,
            "energy": 7,
            "items": [
                null,
                {"ref": "t1.1", "name": "Seed", "tier": "Farm", "label": "1", "sell": 2,
                 "drop_interval": null, "drop_limit": null, "sprite": "seed.png", "mergeable": true}
            ],
            "discovered": ["t1.1", "t1.2"]
        }"#;
        let inventory: Inventory = serde_json::from_str(json).unwrap();

        assert_eq!(inventory.len(), 2);
        assert_eq!(inventory.money, 120);
        assert!(inventory.cell(0).is_none());
        assert_eq!(inventory.cell(1).unwrap().name, "Seed");
        assert!(inventory.is_discovered("t1.2"));
        assert!(!inventory.is_discovered("t1.3"));
    }
}
