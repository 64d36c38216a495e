//! Knowledge-base naming.
//!
//! A knowledge base is addressed by a human name but stored under a
//! prefixed collection name. The mapping is a pure function, so re-deriving
//! the collection name from any spelling that differs only in case or
//! separators always finds the same storage.

/// Prefix namespacing KB collections inside the vector store.
pub const KB_PREFIX: &str = "kb_";

/// The single global collection holding one description embedding per KB.
///
/// Deliberately outside the [`KB_PREFIX`] namespace so it never shows up in
/// KB listings.
pub const ROUTER_COLLECTION: &str = "semantic_router_index";

/// Lowercase the name and map spaces and hyphens to underscores.
pub fn normalize_kb_name(name: &str) -> String {
    name.trim().to_lowercase().replace([' ', '-'], "_")
}

/// Resolve the storage collection name for a KB.
///
/// ```rust
/// use multi_kb_rag_core::naming::collection_name;
///
/// assert_eq!(collection_name("My KB"), "kb_my_kb");
/// assert_eq!(collection_name("my-kb"), "kb_my_kb");
/// ```
pub fn collection_name(kb_name: &str) -> String {
    format!("{}{}", KB_PREFIX, normalize_kb_name(kb_name))
}

/// Strip the KB prefix from a collection name, or `None` if the collection
/// is not a knowledge base.
pub fn kb_name_from_collection(collection: &str) -> Option<&str> {
    collection
        .strip_prefix(KB_PREFIX)
        .filter(|rest| !rest.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equivalent_spellings_share_storage() {
        let names = ["My KB", "my-kb", "my_kb", "MY_KB", " my kb "];
        let resolved: Vec<String> = names.iter().map(|n| collection_name(n)).collect();
        assert!(resolved.iter().all(|c| c == "kb_my_kb"), "{:?}", resolved);
    }

    #[test]
    fn collection_name_is_idempotent_over_its_own_suffix() {
        let col = collection_name("Gun Law");
        let kb = kb_name_from_collection(&col).unwrap();
        assert_eq!(collection_name(kb), col);
    }

    #[test]
    fn non_kb_collections_are_rejected() {
        assert_eq!(kb_name_from_collection(ROUTER_COLLECTION), None);
        assert_eq!(kb_name_from_collection("kb_"), None);
        assert_eq!(kb_name_from_collection("kb_legal"), Some("legal"));
    }
}
