use indexmap::IndexMap;

use crate::FormatError;

/// The in-memory key index: key → `(offset, size)` of the value's bytes in
/// the data region.
///
/// Insertion order is observable through `keys()` and `dump`, so the
/// map preserves it: a re-written key keeps its original position and a
/// removal shifts later keys up rather than swapping.
///
/// On the wire the index is a single CBOR map of text keys to 2-element
/// arrays `[offset, size]`, emitted in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    map: IndexMap<String, (u64, u64)>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `key` at `(offset, size)`, overwriting any prior entry in
    /// place (the key keeps its original position).
    pub fn insert(&mut self, key: &str, offset: u64, size: u64) {
        self.map.insert(key.to_string(), (offset, size));
    }

    /// Removes `key`, preserving the order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<(u64, u64)> {
        self.map.shift_remove(key)
    }

    pub fn get(&self, key: &str) -> Option<(u64, u64)> {
        self.map.get(key).copied()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, (u64, u64))> {
        self.map.iter().map(|(k, &slot)| (k.as_str(), slot))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Serializes the index as a CBOR map in insertion order.
    pub fn encode(&self) -> Result<Vec<u8>, FormatError> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&self.map, &mut buf)
            .map_err(|e| FormatError::IndexEncode(e.to_string()))?;
        Ok(buf)
    }

    /// Deserializes an index from CBOR bytes.
    ///
    /// Anything that is not a map of text keys to `[offset, size]` pairs is
    /// rejected.
    pub fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        let map = ciborium::de::from_reader(bytes)
            .map_err(|e| FormatError::IndexDecode(e.to_string()))?;
        Ok(Index { map })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Index {
        let mut index = Index::new();
        index.insert("a", 36, 5);
        index.insert("b", 41, 10);
        index.insert("c", 51, 1);
        index
    }

    #[test]
    fn insert_get_remove() {
        let mut index = sample();
        assert_eq!(index.get("b"), Some((41, 10)));
        assert_eq!(index.remove("b"), Some((41, 10)));
        assert_eq!(index.get("b"), None);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn keys_preserve_insertion_order() {
        let index = sample();
        let keys: Vec<_> = index.keys().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn overwrite_keeps_position() {
        let mut index = sample();
        index.insert("a", 52, 7);
        let keys: Vec<_> = index.keys().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(index.get("a"), Some((52, 7)));
    }

    #[test]
    fn remove_keeps_order_of_rest() {
        let mut index = sample();
        index.remove("b");
        let keys: Vec<_> = index.keys().collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn encode_decode_roundtrip_in_order() {
        let index = sample();
        let bytes = index.encode().unwrap();
        let decoded = Index::decode(&bytes).unwrap();
        assert_eq!(decoded, index);
        let keys: Vec<_> = decoded.keys().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn empty_index_encodes_to_empty_map() {
        let bytes = Index::new().encode().unwrap();
        // CBOR map of zero entries
        assert_eq!(bytes, vec![0xA0]);
        assert!(Index::decode(&bytes).unwrap().is_empty());
    }

    #[test]
    fn decode_rejects_non_map() {
        // a CBOR array is not an index
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&vec![1u64, 2, 3], &mut bytes).unwrap();
        assert!(matches!(
            Index::decode(&bytes),
            Err(FormatError::IndexDecode(_))
        ));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Index::decode(&[0xFF, 0x00, 0x13]).is_err());
    }
}
