//! In-memory record store for shared lists.
//!
//! The production system of record is external; this store is the working
//! fidelity the server binary runs against. Every successful mutation
//! returns the [`ChangeEvent`] the caller should hand to the hub — the
//! store itself never touches the network.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use larder_protocol::{ChangeEvent, ChangeKind, ListId};

use crate::epoch_ms;
use crate::error::LarderError;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    Checked,
    NotNeeded,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ListItem {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub state: ItemState,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ShoppingList {
    pub id: ListId,
    pub name: String,
    pub created_at_epoch_ms: u64,
    pub items: Vec<ListItem>,
}

#[derive(Debug, Clone, Default)]
pub struct NewItem {
    pub name: String,
    pub quantity: Option<String>,
    pub category: Option<String>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub quantity: Option<String>,
    pub category: Option<String>,
    pub state: Option<ItemState>,
}

#[derive(Default)]
pub struct ListStore {
    lists: HashMap<ListId, ShoppingList>,
}

impl ListStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_list(&mut self, name: &str) -> Result<(ShoppingList, ChangeEvent), LarderError> {
        if name.trim().is_empty() {
            return Err(LarderError::InvalidRequest("list name is empty".into()));
        }
        let list = ShoppingList {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            created_at_epoch_ms: epoch_ms(),
            items: Vec::new(),
        };
        self.lists.insert(list.id.clone(), list.clone());
        let event = ChangeEvent::for_list(ChangeKind::ListCreated, list.id.clone());
        Ok((list, event))
    }

    pub fn rename_list(
        &mut self,
        list_id: &str,
        name: &str,
    ) -> Result<(ShoppingList, ChangeEvent), LarderError> {
        if name.trim().is_empty() {
            return Err(LarderError::InvalidRequest("list name is empty".into()));
        }
        let list = self.get_mut(list_id)?;
        list.name = name.trim().to_string();
        let list = list.clone();
        let event = ChangeEvent::for_list(ChangeKind::ListRenamed, list_id);
        Ok((list, event))
    }

    pub fn delete_list(&mut self, list_id: &str) -> Result<ChangeEvent, LarderError> {
        self.lists
            .remove(list_id)
            .ok_or_else(|| LarderError::ListNotFound(list_id.to_string()))?;
        Ok(ChangeEvent::for_list(ChangeKind::ListDeleted, list_id))
    }

    pub fn list_lists(&self) -> Vec<ShoppingList> {
        let mut lists: Vec<ShoppingList> = self.lists.values().cloned().collect();
        lists.sort_by_key(|l| l.created_at_epoch_ms);
        lists
    }

    pub fn get_list(&self, list_id: &str) -> Result<&ShoppingList, LarderError> {
        self.lists
            .get(list_id)
            .ok_or_else(|| LarderError::ListNotFound(list_id.to_string()))
    }

    pub fn add_item(
        &mut self,
        list_id: &str,
        new: NewItem,
    ) -> Result<(ListItem, ChangeEvent), LarderError> {
        if new.name.trim().is_empty() {
            return Err(LarderError::InvalidRequest("item name is empty".into()));
        }
        let list = self.get_mut(list_id)?;
        let item = ListItem {
            id: Uuid::new_v4().to_string(),
            name: new.name.trim().to_string(),
            quantity: new.quantity,
            category: new.category,
            state: ItemState::Pending,
        };
        list.items.push(item.clone());
        let event = ChangeEvent::for_item(
            ChangeKind::ItemAdded,
            list_id,
            json!({"itemId": item.id, "name": item.name}),
        );
        Ok((item, event))
    }

    pub fn update_item(
        &mut self,
        list_id: &str,
        item_id: &str,
        patch: ItemPatch,
    ) -> Result<(ListItem, ChangeEvent), LarderError> {
        let list = self.get_mut(list_id)?;
        let item = list
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| LarderError::ItemNotFound(item_id.to_string()))?;

        if let Some(name) = patch.name {
            if name.trim().is_empty() {
                return Err(LarderError::InvalidRequest("item name is empty".into()));
            }
            item.name = name.trim().to_string();
        }
        if let Some(quantity) = patch.quantity {
            item.quantity = Some(quantity);
        }
        if let Some(category) = patch.category {
            item.category = Some(category);
        }
        if let Some(state) = patch.state {
            item.state = state;
        }

        let item = item.clone();
        let event = ChangeEvent::for_item(
            ChangeKind::ItemUpdated,
            list_id,
            json!({"itemId": item.id, "state": item.state}),
        );
        Ok((item, event))
    }

    pub fn remove_item(&mut self, list_id: &str, item_id: &str) -> Result<ChangeEvent, LarderError> {
        let list = self.get_mut(list_id)?;
        let before = list.items.len();
        list.items.retain(|i| i.id != item_id);
        if list.items.len() == before {
            return Err(LarderError::ItemNotFound(item_id.to_string()));
        }
        Ok(ChangeEvent::for_item(
            ChangeKind::ItemRemoved,
            list_id,
            json!({"itemId": item_id}),
        ))
    }

    pub fn list_count(&self) -> usize {
        self.lists.len()
    }

    fn get_mut(&mut self, list_id: &str) -> Result<&mut ShoppingList, LarderError> {
        self.lists
            .get_mut(list_id)
            .ok_or_else(|| LarderError::ListNotFound(list_id.to_string()))
    }
}
