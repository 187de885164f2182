//! Inventory, catalog and the store holding both

pub mod catalog;
pub mod inventory;
pub mod store;

pub use catalog::{Catalog, ItemDefinition, ItemRef};
pub use inventory::{Balances, Cell, CellUpdate, Inventory, ItemInstance};
pub use store::{GameStore, StoreError};
