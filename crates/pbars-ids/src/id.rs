use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A 128-bit opaque external identifier, rendered as `{prefix}_{32 hex chars}`.
///
/// Two ids with the same prefix are never equal unless they were generated
/// from the same bits; the prefix is not part of the value itself, just the
/// textual rendering, so `ExternalId`s of different kinds never compare equal
/// by accident even if one were (incorrectly) parsed into the other's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExternalId(u128);

impl ExternalId {
    #[must_use]
    pub const fn from_bits(bits: u128) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn as_bits(self) -> u128 {
        self.0
    }

    #[must_use]
    pub fn render(self, prefix: &str) -> String {
        format!("{prefix}_{:032x}", self.0)
    }

    /// Parses a rendered id back out, stripping a single `{prefix}_` if present.
    #[must_use]
    pub fn parse(text: &str, prefix: &str) -> Option<Self> {
        let hex = text.strip_prefix(prefix).and_then(|s| s.strip_prefix('_')).unwrap_or(text);
        u128::from_str_radix(hex, 16).ok().map(Self)
    }
}

/// A [`TraceId`] newtype, distinct at the type level from [`BarId`] even
/// though both are rendered [`ExternalId`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(pub ExternalId);

/// A [`BarId`] newtype, distinct at the type level from [`TraceId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BarId(pub ExternalId);

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.render("trc"))
    }
}

impl fmt::Display for BarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.render("bar"))
    }
}

macro_rules! impl_prefixed_id_serde {
    ($ty:ident, $prefix:literal) => {
        impl serde::Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                use serde::de::Error;
                let text = String::deserialize(deserializer)?;
                let id = ExternalId::parse(&text, $prefix)
                    .ok_or_else(|| D::Error::custom(concat!("invalid ", $prefix, " id")))?;
                Ok($ty(id))
            }
        }
    };
}

impl_prefixed_id_serde!(TraceId, "trc");
impl_prefixed_id_serde!(BarId, "bar");

/// Generates fresh [`ExternalId`]s by hashing a monotonic counter together
/// with wall-clock nanos, so ids are unique within a process without taking
/// a dependency on `rand` or `uuid` — the crate already carries `blake3` for
/// content hashing elsewhere, so this reuses it as the entropy mixer.
#[derive(Debug, Default)]
pub struct IdGenerator {
    counter: AtomicU64,
}

impl IdGenerator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn next(&self) -> ExternalId {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();

        let mut hasher = blake3::Hasher::new();
        hasher.update(&seq.to_le_bytes());
        hasher.update(&nanos.to_le_bytes());
        let digest = hasher.finalize();
        let bytes: [u8; 16] = digest.as_bytes()[0..16].try_into().expect("16 bytes");
        ExternalId(u128::from_le_bytes(bytes))
    }

    #[must_use]
    pub fn next_trace_id(&self) -> TraceId {
        TraceId(self.next())
    }

    #[must_use]
    pub fn next_bar_id(&self) -> BarId {
        BarId(self.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_round_trips_through_parse() {
        let id = ExternalId::from_bits(0x1234_5678_9abc_def0);
        let rendered = id.render("trc");
        assert!(rendered.starts_with("trc_"));
        assert_eq!(ExternalId::parse(&rendered, "trc"), Some(id));
    }

    #[test]
    fn generator_produces_distinct_ids() {
        let r#gen = IdGenerator::new();
        let a = r#gen.next();
        let b = r#gen.next();
        assert_ne!(a, b);
    }

    proptest::proptest! {
        #[test]
        fn generator_never_collides_within_a_short_burst(n in 1u32..200) {
            let r#gen = IdGenerator::new();
            let mut seen = std::collections::HashSet::new();
            for _ in 0..n {
                proptest::prop_assert!(seen.insert(r#gen.next()));
            }
        }
    }
}
