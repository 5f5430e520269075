/// Deterministic identifier for a two-party message thread.
///
/// Symmetric by construction: the two identities are sorted lexically and
/// joined, so `conversation_id(a, b) == conversation_id(b, a)` and a single
/// partition key covers the thread regardless of who sent first.
pub fn conversation_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}_{b}")
    } else {
        format!("{b}_{a}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_for_any_pair() {
        assert_eq!(conversation_id("alice", "bob"), conversation_id("bob", "alice"));
        assert_eq!(conversation_id("alice", "bob"), "alice_bob");
    }

    #[test]
    fn stable_when_one_side_prefixes_the_other() {
        assert_eq!(conversation_id("ann", "anna"), "ann_anna");
        assert_eq!(conversation_id("anna", "ann"), "ann_anna");
    }

    #[test]
    fn same_identity_twice_still_deterministic() {
        assert_eq!(conversation_id("carol", "carol"), "carol_carol");
    }
}
