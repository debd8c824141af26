use serde::{Deserialize, Serialize};

/// A user's credit balance, stored MsgPack-encoded at key `<user_id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Available credit. Never observable below zero.
    pub credit: u64,
}

impl User {
    pub fn new(credit: u64) -> Self {
        Self { credit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_encoding_roundtrip() {
        let user = User::new(100);
        let bytes = common::codec::encode(&user).unwrap();
        let back: User = common::codec::decode(&bytes).unwrap();
        assert_eq!(user, back);
    }
}
