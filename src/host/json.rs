//! Document registry standing in for the host's JSON collaborator.

use std::sync::Arc;

use serde_json::Value;

use crate::error::BridgeResult;
use crate::host::{Handle, HandleKind, HandleTable};

/// Maps JSON handles to parsed documents.
pub struct JsonStore {
    documents: HandleTable<Value>,
}

impl JsonStore {
    pub fn new() -> Self {
        Self {
            documents: HandleTable::new(HandleKind::Json),
        }
    }

    /// Parse `text` and register the resulting document.
    pub fn parse(&self, text: &str) -> Result<Handle, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Ok(self.create(value))
    }

    /// Register an already-built document.
    pub fn create(&self, value: Value) -> Handle {
        self.documents.insert(Arc::new(value))
    }

    pub fn value(&self, handle: Handle) -> BridgeResult<Arc<Value>> {
        self.documents.get(handle)
    }

    /// Compact text form of a registered document.
    pub fn serialize(&self, handle: Handle) -> BridgeResult<String> {
        let value = self.documents.get(handle)?;
        Ok(serde_json::to_string(value.as_ref())?)
    }

    pub fn release(&self, handle: Handle) -> BridgeResult<()> {
        self.documents.release(handle).map(drop)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub(crate) fn clear(&self) -> usize {
        self.documents.clear().len()
    }
}

impl Default for JsonStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_and_serialize() {
        let store = JsonStore::new();
        let handle = store.parse(r#"{ "a": [1, 2], "b": "x" }"#).unwrap();
        assert_eq!(store.serialize(handle).unwrap(), r#"{"a":[1,2],"b":"x"}"#);
        assert_eq!(*store.value(handle).unwrap(), json!({"a": [1, 2], "b": "x"}));
    }

    #[test]
    fn test_parse_failure() {
        let store = JsonStore::new();
        assert!(store.parse("{not json").is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_release() {
        let store = JsonStore::new();
        let handle = store.create(json!(1));
        store.release(handle).unwrap();
        assert!(store.value(handle).is_err());
        assert!(store.release(handle).is_err());
    }
}
