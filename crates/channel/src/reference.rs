use std::fmt;

use procura_core::domain::agent::PairKey;

const OPEN: &str = "[REF-";
const PREFIX_LEN: usize = 8;

/// `[REF-<negotiation prefix>-<supplier prefix>]`, carried in outbound subjects so that a reply
/// can be routed back to its pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReferenceTag {
    pub negotiation_prefix: String,
    pub supplier_prefix: String,
}

impl ReferenceTag {
    pub fn for_pair(pair: &PairKey) -> Self {
        Self {
            negotiation_prefix: pair.negotiation_id.short().to_ascii_lowercase(),
            supplier_prefix: pair.supplier_id.short().to_ascii_lowercase(),
        }
    }

    /// First well-formed tag in `subject`. Matching is case-insensitive; `Re:`/`Fwd:` noise is
    /// ignored because only the bracketed token is inspected.
    pub fn find_in(subject: &str) -> Option<Self> {
        let upper = subject.to_ascii_uppercase();
        let mut offset = 0;
        while let Some(found) = upper[offset..].find(OPEN) {
            let start = offset + found + OPEN.len();
            if let Some(tag) = parse_body(&subject[start..]) {
                return Some(tag);
            }
            offset = start;
        }
        None
    }

    pub fn matches(&self, pair: &PairKey) -> bool {
        pair.negotiation_id.0.to_ascii_lowercase().starts_with(&self.negotiation_prefix)
            && pair.supplier_id.0.to_ascii_lowercase().starts_with(&self.supplier_prefix)
    }
}

impl fmt::Display for ReferenceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REF-{}-{}]", self.negotiation_prefix, self.supplier_prefix)
    }
}

fn parse_body(rest: &str) -> Option<ReferenceTag> {
    let negotiation = rest.get(..PREFIX_LEN)?;
    let separator = rest.get(PREFIX_LEN..=PREFIX_LEN)?;
    let supplier = rest.get(PREFIX_LEN + 1..PREFIX_LEN * 2 + 1)?;
    let close = rest.get(PREFIX_LEN * 2 + 1..PREFIX_LEN * 2 + 2)?;

    let is_hex = |value: &str| value.chars().all(|ch| ch.is_ascii_hexdigit());
    if separator != "-" || close != "]" || !is_hex(negotiation) || !is_hex(supplier) {
        return None;
    }

    Some(ReferenceTag {
        negotiation_prefix: negotiation.to_ascii_lowercase(),
        supplier_prefix: supplier.to_ascii_lowercase(),
    })
}

#[cfg(test)]
mod tests {
    use procura_core::domain::agent::PairKey;
    use procura_core::domain::negotiation::NegotiationId;
    use procura_core::domain::supplier::SupplierId;

    use super::ReferenceTag;

    fn pair() -> PairKey {
        PairKey::new(
            NegotiationId("0a1b2c3d-1111-4000-8000-000000000001".to_string()),
            SupplierId("9f8e7d6c-2222-4000-8000-000000000002".to_string()),
        )
    }

    #[test]
    fn tag_renders_short_prefixes() {
        let tag = ReferenceTag::for_pair(&pair());
        assert_eq!(tag.to_string(), "[REF-0a1b2c3d-9f8e7d6c]");
        assert!(tag.matches(&pair()));
    }

    #[test]
    fn finds_tag_in_reply_subjects() {
        let tag = ReferenceTag::find_in("RE: Fwd: nRF54L15 pricing [ref-0A1B2C3D-9F8E7D6C]")
            .expect("tag present");
        assert_eq!(tag, ReferenceTag::for_pair(&pair()));
    }

    #[test]
    fn skips_malformed_tags_and_keeps_scanning() {
        let tag = ReferenceTag::find_in("[REF-nothex12-9f8e7d6c] then [REF-0a1b2c3d-9f8e7d6c]")
            .expect("second tag");
        assert_eq!(tag.negotiation_prefix, "0a1b2c3d");

        assert!(ReferenceTag::find_in("no tag here").is_none());
        assert!(ReferenceTag::find_in("[REF-0a1b2c3d-9f8e7d6c").is_none());
        assert!(ReferenceTag::find_in("[REF-0a1b").is_none());
    }
}
