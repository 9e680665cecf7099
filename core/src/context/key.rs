use std::fmt;

/// One step of a context key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
    /// Elements of a sequence
    Element,
    /// Key of a pair or grouping
    Key,
    /// Value of a dictionary entry
    Value,
}

/// Where, inside the value of a sub-expression, a set of entities lives.
///
/// The empty key (`None`) is the value itself; `Element/Key` is the key of every element, and so on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextKey(Vec<KeyPart>);

impl ContextKey {
    pub const NONE: ContextKey = ContextKey(Vec::new());

    pub fn new(parts: impl IntoIterator<Item = KeyPart>) -> Self { Self(parts.into_iter().collect()) }

    pub fn element() -> Self { Self(vec![KeyPart::Element]) }

    pub fn is_none(&self) -> bool { self.0.is_empty() }

    pub fn parts(&self) -> &[KeyPart] { &self.0 }

    /// `part` followed by this key
    pub fn prefixed(&self, part: KeyPart) -> ContextKey {
        let mut parts = Vec::with_capacity(self.0.len() + 1);
        parts.push(part);
        parts.extend_from_slice(&self.0);
        ContextKey(parts)
    }

    /// This key with a leading `part` removed, if it starts with one
    pub fn strip(&self, part: KeyPart) -> Option<ContextKey> {
        match self.0.split_first() {
            Some((first, rest)) if *first == part => Some(ContextKey(rest.to_vec())),
            _ => None,
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "None");
        }
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{:?}", part)?;
        }
        Ok(())
    }
}
