//! Game state store
//!
//! Holds the last authoritative inventory and catalog pushed by the server.
//! Premoves mutate the local copy ahead of the server and mark the touched
//! cells tentative; any later push for those cells wins outright.

use std::time::Duration;

use hashbrown::HashSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::constants::protocol::PENDING_LABEL;
use crate::game::catalog::{Catalog, ItemDefinition, ItemRef};
use crate::game::inventory::{Balances, CellUpdate, Inventory, ItemInstance};
use crate::net::connection::Outbox;
use crate::net::protocol::{InboundMessage, MessageKind, OutboundMessage};

/// Push handling errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("No inventory received yet")]
    NoInventory,
    #[error("Cell {index} outside inventory of {len} cells")]
    CellOutOfRange { index: usize, len: usize },
    #[error("'{0}' is not a game state message")]
    NotGameMessage(MessageKind),
}

impl StoreError {
    /// Whether the local copy drifted and a full inventory should be fetched
    pub fn needs_resync(&self) -> bool {
        matches!(self, StoreError::NoInventory | StoreError::CellOutOfRange { .. })
    }
}

/// Local game state
#[derive(Debug)]
pub struct GameStore {
    initialized: bool,
    ready: bool,
    running: Option<bool>,
    inventory: Option<Inventory>,
    catalog: Option<Catalog>,
    tentative: HashSet<usize>,
    poll_interval: Duration,
    next_poll: Option<Instant>,
}

impl GameStore {
    /// Message kinds the store handles
    pub const KINDS: [MessageKind; 6] = [
        MessageKind::GameState,
        MessageKind::Inventory,
        MessageKind::InventoryBalances,
        MessageKind::InventoryCell,
        MessageKind::InventoryDiscovered,
        MessageKind::ConfigItems,
    ];

    pub fn new(poll_interval: Duration) -> Self {
        Self {
            initialized: false,
            ready: false,
            running: None,
            inventory: None,
            catalog: None,
            tentative: HashSet::new(),
            poll_interval,
            next_poll: None,
        }
    }

    /// Request the full game state and start the backstop poll
    ///
    /// Returns `false` if the store was already initialized.
    pub fn init(&mut self, outbox: &mut impl Outbox) -> bool {
        if self.initialized {
            warn!("Game store already initialized");
            return false;
        }
        self.initialized = true;
        self.poll_game_state(outbox);
        self.next_poll = Some(Instant::now() + self.poll_interval);
        info!("Game store initialized, inventory poll every {:?}", self.poll_interval);
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// True once the first full inventory arrived
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Whether the game is running, `None` until the server said so
    pub fn is_running(&self) -> Option<bool> {
        self.running
    }

    pub fn inventory(&self) -> Option<&Inventory> {
        self.inventory.as_ref()
    }

    pub fn catalog(&self) -> Option<&Catalog> {
        self.catalog.as_ref()
    }

    /// Whether a cell holds speculative content not yet confirmed by a push
    pub fn is_tentative(&self, index: usize) -> bool {
        self.tentative.contains(&index)
    }

    pub fn poll_game_state(&self, outbox: &mut impl Outbox) {
        outbox.send(OutboundMessage::GetGame);
    }

    pub fn poll_inventory_state(&self, outbox: &mut impl Outbox) {
        outbox.send(OutboundMessage::GetInventory);
    }

    pub fn next_poll(&self) -> Option<Instant> {
        self.next_poll
    }

    /// Run the backstop poll if its deadline passed; true if a request went out
    pub fn poll_if_due(&mut self, now: Instant, outbox: &mut impl Outbox) -> bool {
        match self.next_poll {
            Some(deadline) if now >= deadline => {
                debug!("Backstop inventory poll");
                self.poll_inventory_state(outbox);
                self.next_poll = Some(now + self.poll_interval);
                true
            }
            _ => false,
        }
    }

    /// Apply a server push
    pub fn apply(&mut self, message: InboundMessage) -> Result<(), StoreError> {
        match message {
            InboundMessage::GameState(running) => {
                self.apply_game_state(running);
                Ok(())
            }
            InboundMessage::Inventory(inventory) => {
                self.apply_inventory(inventory);
                Ok(())
            }
            InboundMessage::InventoryBalances(balances) => self.apply_balances(balances),
            InboundMessage::InventoryCell(update) => self.apply_cell(update),
            InboundMessage::InventoryDiscovered(discovered) => self.apply_discovered(discovered),
            InboundMessage::ConfigItems(catalog) => {
                self.apply_catalog(catalog);
                Ok(())
            }
            other => Err(StoreError::NotGameMessage(other.kind())),
        }
    }

    pub fn apply_game_state(&mut self, running: bool) {
        debug!("Game running: {}", running);
        self.running = Some(running);
    }

    /// Replace the whole inventory, dropping every premove
    pub fn apply_inventory(&mut self, inventory: Inventory) {
        debug!("Inventory replaced ({} cells)", inventory.len());
        self.inventory = Some(inventory);
        self.tentative.clear();
        self.ready = true;
    }

    pub fn apply_balances(&mut self, balances: Balances) -> Result<(), StoreError> {
        let inventory = self.inventory.as_mut().ok_or(StoreError::NoInventory)?;
        inventory.money = balances.money;
        inventory.energy = balances.energy;
        Ok(())
    }

    pub fn apply_cell(&mut self, update: CellUpdate) -> Result<(), StoreError> {
        let inventory = self.inventory.as_mut().ok_or(StoreError::NoInventory)?;
        let len = inventory.len();
        if !inventory.set_cell(update.index, update.item) {
            return Err(StoreError::CellOutOfRange {
                index: update.index,
                len,
            });
        }
        self.tentative.remove(&update.index);
        Ok(())
    }

    pub fn apply_discovered(&mut self, discovered: HashSet<ItemRef>) -> Result<(), StoreError> {
        let inventory = self.inventory.as_mut().ok_or(StoreError::NoInventory)?;
        inventory.discovered = discovered;
        Ok(())
    }

    pub fn apply_catalog(&mut self, catalog: Catalog) {
        debug!("Catalog replaced ({} items)", catalog.len());
        self.catalog = Some(catalog);
    }

    // Catalog queries

    pub fn buyable_items(&self) -> Vec<&ItemDefinition> {
        self.catalog.as_ref().map_or_else(Vec::new, Catalog::buyable_items)
    }

    pub fn downgrade_item(&self, id: &str) -> Option<&ItemDefinition> {
        self.catalog.as_ref()?.downgrade_item(id)
    }

    pub fn downgrade_items(&self, id: &str) -> Vec<&ItemDefinition> {
        self.catalog
            .as_ref()
            .map_or_else(Vec::new, |c| c.downgrade_items(id))
    }

    pub fn upgrade_items(&self, id: &str) -> Vec<&ItemDefinition> {
        self.catalog
            .as_ref()
            .map_or_else(Vec::new, |c| c.upgrade_items(id))
    }

    pub fn down_upgrade_items(&self, id: &str) -> Vec<&ItemDefinition> {
        self.catalog.as_ref().map_or_else(Vec::new, |c| c.chain(id))
    }

    pub fn is_discovered(&self, id: &str) -> bool {
        self.inventory
            .as_ref()
            .map_or(false, |inventory| inventory.is_discovered(id))
    }

    // Premoves. None of them sends anything; each returns whether it
    // changed the local copy.

    pub fn premove_remove(&mut self, index: usize) -> bool {
        let Some(inventory) = self.inventory.as_mut() else {
            return false;
        };
        if !inventory.set_cell(index, None) {
            return false;
        }
        self.tentative.insert(index);
        true
    }

    pub fn premove_place(&mut self, index: usize, id: &str) -> bool {
        let Some(definition) = self.catalog.as_ref().and_then(|c| c.get(id)) else {
            debug!("Premove place of unknown item '{}'", id);
            return false;
        };
        let instance = ItemInstance::from_definition(definition);

        let Some(inventory) = self.inventory.as_mut() else {
            return false;
        };
        if !inventory.set_cell(index, Some(instance)) {
            return false;
        }
        self.tentative.insert(index);
        true
    }

    /// Turn the item at `index` into its merge target, label pending
    pub fn premove_upgrade(&mut self, index: usize) -> bool {
        let (Some(catalog), Some(inventory)) = (self.catalog.as_ref(), self.inventory.as_mut()) else {
            return false;
        };
        let Some(instance) = inventory.cell_mut(index) else {
            return false;
        };
        let Some(target) = catalog
            .get(instance.id.as_str())
            .and_then(|def| def.merge.as_ref())
            .and_then(|merge| catalog.get(merge.as_str()))
        else {
            return false;
        };

        instance.id = target.id.clone();
        instance.name = target.name.clone();
        instance.tier = target.tier.clone();
        instance.sprite = target.sprite.clone();
        instance.label = Some(PENDING_LABEL.to_string());
        self.tentative.insert(index);
        true
    }

    /// Merge the item at `other` into the one at `index`
    pub fn premove_merge(&mut self, index: usize, other: usize) -> bool {
        let upgraded = self.premove_upgrade(index);
        let removed = self.premove_remove(other);
        upgraded || removed
    }

    pub fn premove_swap(&mut self, index: usize, other: usize) -> bool {
        let Some(inventory) = self.inventory.as_mut() else {
            return false;
        };
        if index >= inventory.len() || other >= inventory.len() {
            return false;
        }
        inventory.items.swap(index, other);
        self.tentative.insert(index);
        self.tentative.insert(other);
        true
    }
}
