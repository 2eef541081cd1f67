//! The order placed through the HTTP producer and consumed from the orders topic.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// An order as it travels on the wire (JSON).
///
/// The producer publishes it unmodified; the pipeline treats the encoded bytes
/// as an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    #[serde(default)]
    pub id: String,
    pub product: String,
}

impl Order {
    pub fn new(id: impl Into<String>, product: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            product: product.into(),
        }
    }

    /// Validate the order and fill in a time-ordered id when the caller left it blank.
    pub fn normalized(mut self) -> DomainResult<Self> {
        if self.product.trim().is_empty() {
            return Err(DomainError::validation("product must not be empty"));
        }
        if self.id.trim().is_empty() {
            self.id = Uuid::now_v7().to_string();
        }
        Ok(self)
    }

    pub fn to_bytes(&self) -> DomainResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DomainError::malformed(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> DomainResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| DomainError::malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_id_is_generated() {
        let order = Order::new("  ", "keyboard").normalized().unwrap();
        assert!(Uuid::parse_str(&order.id).is_ok());
        assert_eq!(order.product, "keyboard");
    }

    #[test]
    fn explicit_id_is_kept() {
        let order = Order::new("o-1", "mouse").normalized().unwrap();
        assert_eq!(order.id, "o-1");
    }

    #[test]
    fn blank_product_is_rejected() {
        let err = Order::new("o-1", " ").normalized().unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn missing_id_field_deserializes_as_blank() {
        let order = Order::from_bytes(br#"{"product":"desk"}"#).unwrap();
        assert_eq!(order.id, "");
    }

    #[test]
    fn garbage_is_malformed() {
        let err = Order::from_bytes(b"not json").unwrap_err();
        assert!(matches!(err, DomainError::Malformed(_)));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: any order with a product normalizes to one with a usable id.
            #[test]
            fn normalized_orders_always_carry_an_id(
                id in "[ a-z0-9-]{0,36}",
                product in "[A-Za-z][A-Za-z0-9 ]{0,40}"
            ) {
                let order = Order::new(id, product.clone()).normalized().unwrap();
                prop_assert!(!order.id.trim().is_empty());
                prop_assert_eq!(order.product, product);
            }
        }
    }
}
