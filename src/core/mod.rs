//! Core data structures and types for the webofdata entity store

/// Compact id of a dataset, namespace or property. Ids start at 1.
pub type CompactId = u32;

/// Directed reference `(subject, property, object)` between two entities.
/// Stored twice: keyed by subject in OutRefs and by object in InRefs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    pub subject: String,
    pub property: CompactId,
    pub object: String,
}

impl Reference {
    pub fn new(subject: &str, property: CompactId, object: &str) -> Self {
        Self { subject: subject.to_string(), property, object: object.to_string() }
    }
}

/// Build the canonical resource identifier `ns<id>:<local>`.
pub fn make_rid(namespace_id: CompactId, local: &str) -> String {
    format!("ns{}:{}", namespace_id, local)
}

/// Split a canonical RID into namespace id and local part.
/// Returns `None` for strings that are not of the form `ns<digits>:<local>`.
pub fn split_rid(rid: &str) -> Option<(CompactId, &str)> {
    let rest = rid.strip_prefix("ns")?;
    let (digits, local) = rest.split_once(':')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(|id| (id, local))
}

pub mod encoding;
pub use encoding::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_and_split_rid() {
        let rid = make_rid(12, "alice");
        assert_eq!(rid, "ns12:alice");
        assert_eq!(split_rid(&rid), Some((12, "alice")));
    }

    #[test]
    fn test_split_rid_keeps_colons_in_local_part() {
        assert_eq!(split_rid("ns3:isbn:0451450523"), Some((3, "isbn:0451450523")));
    }

    #[test]
    fn test_split_rid_rejects_non_canonical() {
        assert_eq!(split_rid("foaf:name"), None);
        assert_eq!(split_rid("ns:name"), None);
        assert_eq!(split_rid("nsx1:name"), None);
        assert_eq!(split_rid("ns1"), None);
    }
}
