use crate::col::{map_new, HashMap};

/// Assigns dense indices to names in order of first insertion.
pub struct Indexer<Index, F>
where
    Index: Copy,
    F: Fn(usize) -> Index,
{
    names: Vec<Box<str>>,
    index_by_name: HashMap<Box<str>, Index>,
    to_index: F,
}

impl<Index: Copy, F: Fn(usize) -> Index> Indexer<Index, F> {
    pub fn new(to_index: F) -> Self {
        Self {
            names: Vec::new(),
            index_by_name: map_new(),
            to_index,
        }
    }

    /// Returns the index of `name`, registering it if it is new.
    pub fn index(&mut self, name: &str) -> Index {
        if let Some(&index) = self.index_by_name.get(name) {
            return index;
        }
        self.push(name)
    }

    /// Registers `name`, or returns `None` if it is already known.
    pub fn insert_new(&mut self, name: &str) -> Option<Index> {
        if self.index_by_name.contains_key(name) {
            return None;
        }
        Some(self.push(name))
    }

    fn push(&mut self, name: &str) -> Index {
        let index = (self.to_index)(self.names.len());
        self.names.push(name.into());
        self.index_by_name.insert(name.into(), index);
        index
    }

    pub fn get(&self, name: &str) -> Option<Index> {
        self.index_by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Names in index order.
    pub fn into_names(self) -> Vec<Box<str>> {
        self.names
    }
}
