//! URL-encoded form bodies.

/// Form fields in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormParams {
    fields: Vec<(String, String)>,
}

impl FormParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field. An existing key keeps its position and takes the new value.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `k1=v1&k2=v2` with both sides percent-encoded (space as `%20`).
    pub fn encode(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_insertion_order() {
        let mut form = FormParams::new();
        form.append("a", "1");
        form.append("b", "x y");
        assert_eq!(form.encode(), "a=1&b=x%20y");
    }

    #[test]
    fn test_repeated_key_replaces_in_place() {
        let mut form = FormParams::new();
        form.append("z", "1");
        form.append("a", "2");
        form.append("z", "3");
        assert_eq!(form.len(), 2);
        assert_eq!(form.encode(), "z=3&a=2");
    }

    #[test]
    fn test_reserved_characters() {
        let mut form = FormParams::new();
        form.append("q&r", "a=b/c~d");
        assert_eq!(form.encode(), "q%26r=a%3Db%2Fc~d");
        assert_eq!(FormParams::new().encode(), "");
    }
}
