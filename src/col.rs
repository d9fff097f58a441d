pub type HashMap<K, V> = rustc_hash::FxHashMap<K, V>;
pub type HashSet<K> = rustc_hash::FxHashSet<K>;

pub fn map_new<K, V>() -> HashMap<K, V> {
    rustc_hash::FxHashMap::default()
}

/// Groups `items` by `key`, keeping groups in order of the first appearance of their key.
pub fn group_stable<T, K: Eq + std::hash::Hash + Clone>(
    items: impl IntoIterator<Item = T>,
    key: impl Fn(&T) -> K,
) -> Vec<(K, Vec<T>)> {
    let mut position: HashMap<K, usize> = map_new();
    let mut groups: Vec<(K, Vec<T>)> = Vec::new();
    for item in items {
        let k = key(&item);
        let pos = *position.entry(k.clone()).or_insert_with(|| {
            groups.push((k, Vec::new()));
            groups.len() - 1
        });
        groups[pos].1.push(item);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::group_stable;

    #[test]
    fn groups_keep_first_appearance_order() {
        let groups = group_stable([3, 1, 4, 1, 5, 9, 2, 6], |x| x % 3);
        let keys: Vec<_> = groups.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![0, 1, 2]);
        assert_eq!(groups[0].1, vec![3, 9, 6]);
        assert_eq!(groups[1].1, vec![1, 4, 1]);
        assert_eq!(groups[2].1, vec![5, 2]);
    }
}
