use std::collections::HashMap;

use super::dialog::Dialog;
use super::DialogId;

/// Dialogs of one Call, keyed by dialog id.
///
/// The owning Call task is the only writer, so there is no lock here.
/// All mutations flow back through [`DialogStore::update`], which
/// stamps the record.
#[derive(Debug, Default)]
pub struct DialogStore {
    dialogs: HashMap<DialogId, Dialog>,
}

impl DialogStore {
    pub fn find(&self, id: &DialogId) -> Option<&Dialog> {
        self.dialogs.get(id)
    }

    pub fn find_mut(&mut self, id: &DialogId) -> Option<&mut Dialog> {
        self.dialogs.get_mut(id)
    }

    /// Insert or replace the record under its own id.
    pub fn update(&mut self, mut dialog: Dialog) {
        dialog.updated = std::time::SystemTime::now();
        self.dialogs.insert(dialog.id.clone(), dialog);
    }

    pub fn remove(&mut self, id: &DialogId) -> Option<Dialog> {
        self.dialogs.remove(id)
    }

    pub fn len(&self) -> usize {
        self.dialogs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dialogs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dialog> {
        self.dialogs.values()
    }
}
