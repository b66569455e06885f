use std::collections::BTreeMap;

/// Byte-keyed prefix trie holding one value per exact key. Backs the
/// per-host routing tables: keys are request paths and lookups enumerate
/// every stored prefix of a probe path.
#[derive(Debug, Default, Clone)]
pub struct Trie<T> {
	root: Node<T>,
}

#[derive(Debug, Clone)]
struct Node<T> {
	children: BTreeMap<u8, Node<T>>,
	// full key + value, set on the node the key's last byte lands on
	entry: Option<(String, T)>,
}

impl<T> Default for Node<T> {
	fn default() -> Self {
		Node {
			children: BTreeMap::new(),
			entry: None,
		}
	}
}

impl<T> Trie<T> {
	pub fn new() -> Self {
		Trie {
			root: Node::default(),
		}
	}

	/// Insert or replace the value stored under `key`.
	pub fn put(&mut self, key: &str, value: T) {
		let mut node = &mut self.root;
		for b in key.bytes() {
			node = node.children.entry(b).or_default();
		}
		node.entry = Some((key.to_string(), value));
	}

	/// Every `(stored_key, value)` pair whose key is a prefix of `probe`,
	/// ordered shortest key first. Callers scan from the end for the
	/// longest-prefix match.
	pub fn get_all_key_values(&self, probe: &str) -> Vec<(&str, &T)> {
		let mut pairs = Vec::new();
		let mut node = &self.root;
		if let Some((key, value)) = &node.entry {
			pairs.push((key.as_str(), value));
		}
		for b in probe.bytes() {
			match node.children.get(&b) {
				Some(child) => node = child,
				None => return pairs,
			}
			if let Some((key, value)) = &node.entry {
				pairs.push((key.as_str(), value));
			}
		}
		pairs
	}

	/// Exact-key lookup.
	pub fn get(&self, key: &str) -> Option<&T> {
		let mut node = &self.root;
		for b in key.bytes() {
			node = node.children.get(&b)?;
		}
		node.entry.as_ref().map(|(_, v)| v)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn put_and_get() {
		let mut t = Trie::new();
		t.put("/", 1);
		t.put("/hello", 2);
		assert_eq!(t.get("/"), Some(&1));
		assert_eq!(t.get("/hello"), Some(&2));
		assert_eq!(t.get("/hell"), None);
	}

	#[test]
	fn put_replaces() {
		let mut t = Trie::new();
		t.put("/a", 1);
		t.put("/a", 2);
		assert_eq!(t.get("/a"), Some(&2));
	}

	#[test]
	fn prefixes_come_back_shortest_first() {
		let mut t = Trie::new();
		t.put("/hello", 2);
		t.put("/", 1);
		t.put("/hello/world", 3);
		t.put("/unrelated", 9);

		let pairs = t.get_all_key_values("/hello/world/deep");
		let keys: Vec<&str> = pairs.iter().map(|(k, _)| *k).collect();
		assert_eq!(keys, vec!["/", "/hello", "/hello/world"]);
	}

	#[test]
	fn non_prefix_keys_are_skipped() {
		let mut t = Trie::new();
		t.put("/abc", 1);
		let pairs = t.get_all_key_values("/abd");
		assert!(pairs.is_empty());
	}
}
