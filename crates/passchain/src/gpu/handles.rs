use std::collections::HashMap;

/// Id-keyed object storage for backend resources. Ids start at 1 and are
/// never reused within one context.
pub(crate) struct HandleTable<T> {
    entries: HashMap<u32, T>,
    next: u32,
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next: 1,
        }
    }

    pub fn insert(&mut self, value: T) -> Option<u32> {
        let id = self.next;
        self.next = self.next.checked_add(1)?;
        self.entries.insert(id, value);
        Some(id)
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.entries.get_mut(&id)
    }

    pub fn remove(&mut self, id: u32) -> Option<T> {
        self.entries.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn retain(&mut self, keep: impl FnMut(&u32, &mut T) -> bool) {
        self.entries.retain(keep);
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_not_reused() {
        let mut table = HandleTable::new();
        let first = table.insert("a").expect("id");
        table.remove(first);
        let second = table.insert("b").expect("id");
        assert_ne!(first, second);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(second), Some(&"b"));
    }
}
