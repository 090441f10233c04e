//! Per-send loss and corruption.

use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use serde_json::{Map, Number, Value};

use crate::error::ConfigError;
use crate::message::Payload;

/// Field value requesting the type-driven random transform.
pub const RANDOM_MARKER: &str = "_RANDOM";

/// How a single record field is corrupted.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldCorruption {
    /// Flip a bit of a number, replace one character of a string, invert a boolean or shuffle a list.
    Random,
    /// Overwrite the field with a literal value.
    Replace(Value),
}

impl From<Value> for FieldCorruption {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) if s == RANDOM_MARKER => FieldCorruption::Random,
            other => FieldCorruption::Replace(other),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFaultSpec {
    loss: Option<f64>,
    corruption: Option<f64>,
    #[serde(default)]
    fields: Map<String, Value>,
    replacement: Option<Value>,
}

/// Faults applied to a single send.
///
/// Loss is evaluated first: a lost message is never corrupted. When corruption fires, a whole-message `replacement`
/// takes precedence over field transforms. Field transforms only apply to record (JSON object) payloads.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FaultSpec {
    /// Probability that the message is dropped.
    pub loss: Option<f64>,
    /// Probability that the payload is corrupted.
    pub corruption: Option<f64>,
    /// Field transforms, applied in order.
    pub fields: Vec<(String, FieldCorruption)>,
    /// Replacement for the whole payload.
    pub replacement: Option<Value>,
}

impl FaultSpec {
    /// Creates a spec without faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the loss probability.
    pub fn with_loss(mut self, probability: f64) -> Self {
        self.loss = Some(probability);
        self
    }

    /// Sets the corruption probability.
    pub fn with_corruption(mut self, probability: f64) -> Self {
        self.corruption = Some(probability);
        self
    }

    /// Adds a field transform.
    pub fn corrupt_field(mut self, name: impl Into<String>, corruption: FieldCorruption) -> Self {
        self.fields.push((name.into(), corruption));
        self
    }

    /// Sets the whole-message replacement.
    pub fn replace_with(mut self, value: impl Into<Value>) -> Self {
        self.replacement = Some(value.into());
        self
    }

    /// Parses a spec like `{"loss": 0.1, "corruption": 0.5, "fields": {"distance": "_RANDOM"}}`.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let raw: RawFaultSpec = serde_json::from_value(value).map_err(|e| ConfigError::Fault(e.to_string()))?;
        for (name, p) in [("loss", raw.loss), ("corruption", raw.corruption)] {
            if let Some(p) = p {
                if !(0. ..=1.).contains(&p) {
                    return Err(ConfigError::Fault(format!("{} probability {} is outside [0, 1]", name, p)));
                }
            }
        }
        Ok(Self {
            loss: raw.loss,
            corruption: raw.corruption,
            fields: raw.fields.into_iter().map(|(k, v)| (k, v.into())).collect(),
            replacement: raw.replacement,
        })
    }
}

/// Result of passing a payload through the loss and corruption gates.
#[derive(Clone, Debug, PartialEq)]
pub enum Transmission {
    /// The message is dropped.
    Lost,
    /// The payload was altered.
    Corrupted(Payload),
    /// The payload passes unchanged.
    Intact(Payload),
}

/// Runs the loss gate and then the corruption gate.
pub fn transmit<R: Rng + ?Sized>(spec: &FaultSpec, payload: Payload, rng: &mut R) -> Transmission {
    if let Some(p) = spec.loss {
        if rng.gen::<f64>() < p {
            return Transmission::Lost;
        }
    }
    if let Some(p) = spec.corruption {
        if rng.gen::<f64>() < p {
            return corrupt_payload(spec, payload, rng);
        }
    }
    Transmission::Intact(payload)
}

fn corrupt_payload<R: Rng + ?Sized>(spec: &FaultSpec, payload: Payload, rng: &mut R) -> Transmission {
    if let Some(replacement) = &spec.replacement {
        return Transmission::Corrupted(replacement.clone());
    }
    match payload {
        Value::Object(mut record) => {
            for (name, corruption) in &spec.fields {
                let Some(field) = record.get_mut(name) else {
                    continue;
                };
                match corruption {
                    FieldCorruption::Random => corrupt_value(field, rng),
                    FieldCorruption::Replace(value) => *field = value.clone(),
                }
            }
            Transmission::Corrupted(Value::Object(record))
        }
        other => Transmission::Intact(other),
    }
}

/// Applies the type-driven random transform to a single value.
///
/// Numbers get one bit flipped at an index drawn from `0..=d`, where `d` is the length of the number's decimal
/// representation. Floats flip a bit of their integer part. Objects and nulls are left untouched.
pub fn corrupt_value<R: Rng + ?Sized>(value: &mut Value, rng: &mut R) {
    match value {
        Value::Bool(b) => *b = !*b,
        Value::Number(n) => {
            let digits = n.to_string().len();
            let bit = rng.gen_range(0..=digits).min(62) as u32;
            let flipped = if let Some(i) = n.as_i64() {
                Some(Number::from(i ^ (1i64 << bit)))
            } else if let Some(u) = n.as_u64() {
                Some(Number::from(u ^ (1u64 << bit)))
            } else {
                n.as_f64().and_then(|f| {
                    let int = (f.trunc() as i64) ^ (1i64 << bit);
                    Number::from_f64(int as f64 + f.fract())
                })
            };
            if let Some(flipped) = flipped {
                *n = flipped;
            }
        }
        Value::String(s) => {
            let mut chars = s.chars().collect::<Vec<_>>();
            if chars.is_empty() {
                return;
            }
            let idx = rng.gen_range(0..chars.len());
            chars[idx] = rng.sample(Alphanumeric) as char;
            *s = chars.into_iter().collect();
        }
        Value::Array(items) => items.shuffle(rng),
        Value::Object(_) | Value::Null => {}
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg64;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_loss_before_corruption() {
        let mut rng = Pcg64::seed_from_u64(1);
        let spec = FaultSpec::new()
            .with_loss(1.)
            .with_corruption(1.)
            .corrupt_field("x", FieldCorruption::Replace(json!(0)));
        for _ in 0..100 {
            assert_eq!(transmit(&spec, json!({"x": 5}), &mut rng), Transmission::Lost);
        }
    }

    #[test]
    fn test_no_faults() {
        let mut rng = Pcg64::seed_from_u64(1);
        let spec = FaultSpec::new().with_loss(0.).with_corruption(0.);
        assert_eq!(transmit(&spec, json!("hi"), &mut rng), Transmission::Intact(json!("hi")));
    }

    #[test]
    fn test_field_transforms() {
        let mut rng = Pcg64::seed_from_u64(2);
        let spec = FaultSpec::new()
            .with_corruption(1.)
            .corrupt_field("flag", FieldCorruption::Random)
            .corrupt_field("name", FieldCorruption::Random)
            .corrupt_field("parent", FieldCorruption::Replace(json!(99)))
            .corrupt_field("missing", FieldCorruption::Random);
        let payload = json!({"flag": true, "name": "abcdef", "parent": 3, "keep": 1});
        let Transmission::Corrupted(out) = transmit(&spec, payload, &mut rng) else {
            panic!("expected corruption");
        };
        assert_eq!(out["flag"], json!(false));
        assert_eq!(out["parent"], json!(99));
        assert_eq!(out["keep"], json!(1));
        assert!(out.get("missing").is_none());
        let name = out["name"].as_str().unwrap();
        assert_eq!(name.len(), 6);
        let diff = name.chars().zip("abcdef".chars()).filter(|(a, b)| a != b).count();
        assert!(diff <= 1);
    }

    #[test]
    fn test_number_bit_flip_bound() {
        let mut rng = Pcg64::seed_from_u64(3);
        for _ in 0..200 {
            let mut value = json!(42);
            corrupt_value(&mut value, &mut rng);
            let flipped = value.as_i64().unwrap() ^ 42;
            assert_eq!(flipped.count_ones(), 1);
            // "42" has two digits, so bits 0..=2 may flip
            assert!(flipped <= 1 << 2);
        }
    }

    #[test]
    fn test_list_shuffle_keeps_elements() {
        let mut rng = Pcg64::seed_from_u64(4);
        let mut value = json!([1, 2, 3, 4, 5, 6]);
        corrupt_value(&mut value, &mut rng);
        let mut items = value.as_array().unwrap().iter().map(|v| v.as_i64().unwrap()).collect::<Vec<_>>();
        items.sort_unstable();
        assert_eq!(items, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_unstructured_payload() {
        let mut rng = Pcg64::seed_from_u64(5);
        let spec = FaultSpec::new().with_corruption(1.).corrupt_field("x", FieldCorruption::Random);
        assert_eq!(transmit(&spec, json!("text"), &mut rng), Transmission::Intact(json!("text")));
        let spec = spec.replace_with("garbage");
        assert_eq!(transmit(&spec, json!("text"), &mut rng), Transmission::Corrupted(json!("garbage")));
    }

    #[test]
    fn test_from_value() {
        let spec = FaultSpec::from_value(json!({
            "loss": 0.6,
            "corruption": 0.5,
            "fields": {"distance": "_RANDOM", "parent": 7}
        }))
        .unwrap();
        assert_eq!(spec.loss, Some(0.6));
        assert_eq!(spec.fields[0], ("distance".to_string(), FieldCorruption::Random));
        assert_eq!(spec.fields[1], ("parent".to_string(), FieldCorruption::Replace(json!(7))));
        assert!(FaultSpec::from_value(json!({"loss": 2.0})).is_err());
        assert!(FaultSpec::from_value(json!({"drop": 0.5})).is_err());
    }
}
