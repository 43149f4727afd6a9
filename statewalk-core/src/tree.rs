use std::collections::BTreeMap;

/// Ordered prefix tree. Used both for concrete link trees (values are
/// links of one page) and abstract link trees (values are link ids).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTree<K: Ord, V> {
    children: BTreeMap<K, KeyTree<K, V>>,
    value: Option<V>,
}

impl<K: Ord, V> Default for KeyTree<K, V> {
    fn default() -> Self {
        Self {
            children: BTreeMap::new(),
            value: None,
        }
    }
}

impl<K: Ord + Clone, V> KeyTree<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn leaf(value: V) -> Self {
        Self {
            children: BTreeMap::new(),
            value: Some(value),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.value.is_none()
    }

    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn child(&self, key: &K) -> Option<&Self> {
        self.children.get(key)
    }

    pub fn children(&self) -> impl Iterator<Item = (&K, &Self)> {
        self.children.iter()
    }

    pub fn keys(&self) -> Vec<&K> {
        self.children.keys().collect()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn insert_child(&mut self, key: K, child: Self) {
        self.children.insert(key, child);
    }

    /// Store `value` at `path`, creating intermediate nodes.
    pub fn insert(&mut self, path: &[K], value: V) -> Option<V> {
        let mut node = self;
        for key in path {
            node = node.children.entry(key.clone()).or_default();
        }
        node.value.replace(value)
    }

    pub fn get(&self, path: &[K]) -> Option<&Self> {
        let mut node = self;
        for key in path {
            node = node.children.get(key)?;
        }
        Some(node)
    }

    /// Every value below this node, own value first, then children in key order.
    pub fn values(&self) -> Vec<&V> {
        let mut out = Vec::new();
        self.collect_values(&mut out);
        out
    }

    fn collect_values<'a>(&'a self, out: &mut Vec<&'a V>) {
        if let Some(v) = &self.value {
            out.push(v);
        }
        for child in self.children.values() {
            child.collect_values(out);
        }
    }

    /// Values with their full key paths.
    pub fn entries(&self) -> Vec<(Vec<K>, &V)> {
        let mut out = Vec::new();
        let mut prefix = Vec::new();
        self.collect_entries(&mut prefix, &mut out);
        out
    }

    fn collect_entries<'a>(&'a self, prefix: &mut Vec<K>, out: &mut Vec<(Vec<K>, &'a V)>) {
        if let Some(v) = &self.value {
            out.push((prefix.clone(), v));
        }
        for (key, child) in &self.children {
            prefix.push(key.clone());
            child.collect_entries(prefix, out);
            prefix.pop();
        }
    }
}
