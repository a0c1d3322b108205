//! Tagged encoding for 256-bit values.
//!
//! Token tallies routinely exceed what a JSON number can carry without loss, so every
//! `U256` that crosses a serialization boundary is written as
//! `{"type":"BigNumber","hex":"0x..."}` and read back from the same shape.

use alloy::primitives::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};

pub const BIG_NUMBER_TAG: &str = "BigNumber";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedBigNumber {
    #[serde(rename = "type")]
    pub kind: String,
    pub hex: String,
}

impl From<U256> for TaggedBigNumber {
    fn from(value: U256) -> Self {
        Self {
            kind: BIG_NUMBER_TAG.to_string(),
            hex: format!("0x{value:x}"),
        }
    }
}

impl TryFrom<TaggedBigNumber> for U256 {
    type Error = String;

    fn try_from(tagged: TaggedBigNumber) -> Result<Self, Self::Error> {
        if tagged.kind != BIG_NUMBER_TAG {
            return Err(format!("unexpected big number tag '{}'", tagged.kind));
        }
        let digits = tagged
            .hex
            .strip_prefix("0x")
            .or_else(|| tagged.hex.strip_prefix("0X"))
            .unwrap_or(&tagged.hex);
        if digits.is_empty() {
            return Err("empty big number".to_string());
        }
        U256::from_str_radix(digits, 16)
            .map_err(|e| format!("invalid big number '{}': {e}", tagged.hex))
    }
}

pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    TaggedBigNumber::from(*value).serialize(serializer)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    let tagged = TaggedBigNumber::deserialize(deserializer)?;
    U256::try_from(tagged).map_err(D::Error::custom)
}

/// Same codec for optional values, `null` when absent.
pub mod optional {
    use super::*;

    pub fn serialize<S>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.map(TaggedBigNumber::from).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<U256>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<TaggedBigNumber>::deserialize(deserializer)?
            .map(|tagged| U256::try_from(tagged).map_err(D::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "super")]
        value: U256,
        #[serde(with = "super::optional", default)]
        weight: Option<U256>,
    }

    #[test]
    fn values_beyond_u64_survive() {
        let huge = U256::from(u64::MAX) * U256::from(1_000_000u64);
        let holder = Holder {
            value: huge,
            weight: Some(U256::from(7u64)),
        };

        let encoded = serde_json::to_value(&holder).unwrap();
        assert_eq!(encoded["value"]["type"], json!("BigNumber"));
        assert_eq!(encoded["weight"], json!({"type": "BigNumber", "hex": "0x7"}));

        let decoded: Holder = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, holder);
    }

    #[test]
    fn zero_is_written_with_a_digit() {
        let tagged = TaggedBigNumber::from(U256::ZERO);
        assert_eq!(tagged.hex, "0x0");
    }

    #[test]
    fn rejects_foreign_tags_and_garbage() {
        let wrong_tag = json!({"value": {"type": "Decimal", "hex": "0x1"}});
        assert!(serde_json::from_value::<Holder>(wrong_tag).is_err());

        let garbage = json!({"value": {"type": "BigNumber", "hex": "0xzz"}});
        assert!(serde_json::from_value::<Holder>(garbage).is_err());

        let empty = json!({"value": {"type": "BigNumber", "hex": "0x"}});
        assert!(serde_json::from_value::<Holder>(empty).is_err());
    }

    #[test]
    fn missing_optional_weight_is_none() {
        let decoded: Holder =
            serde_json::from_value(json!({"value": {"type": "BigNumber", "hex": "0xff"}}))
                .unwrap();
        assert_eq!(decoded.value, U256::from(255u64));
        assert_eq!(decoded.weight, None);
    }
}
