//! Key exchange group definitions and the pure post-quantum policy.
//!
//! Every TLS context is built from a [`KeyExchangePolicy`], and the only
//! policy that can be constructed offers ML-KEM-768 on its own. Hybrid and
//! classical groups are recognized by name so they can be rejected with a
//! precise error instead of being silently ignored.

use thiserror::Error;

/// The group every context offers.
pub const REQUIRED_GROUP: KeyExchangeGroup = KeyExchangeGroup::MlKem768;

/// TLS named groups this crate knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyExchangeGroup {
    /// Pure ML-KEM-768 (FIPS 203).
    MlKem768,
    /// X25519 combined with ML-KEM-768.
    X25519MlKem768,
    /// secp256r1 combined with ML-KEM-768.
    Secp256r1MlKem768,
    X25519,
    Secp256r1,
    Secp384r1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    PostQuantum,
    Hybrid,
    Classical,
}

impl KeyExchangeGroup {
    pub const ALL: &'static [KeyExchangeGroup] = &[
        KeyExchangeGroup::MlKem768,
        KeyExchangeGroup::X25519MlKem768,
        KeyExchangeGroup::Secp256r1MlKem768,
        KeyExchangeGroup::X25519,
        KeyExchangeGroup::Secp256r1,
        KeyExchangeGroup::Secp384r1,
    ];

    /// IANA TLS Supported Groups registry value.
    #[inline]
    pub fn iana_code(&self) -> u16 {
        match self {
            KeyExchangeGroup::MlKem768 => 0x0201,
            KeyExchangeGroup::X25519MlKem768 => 0x11ec,
            KeyExchangeGroup::Secp256r1MlKem768 => 0x11eb,
            KeyExchangeGroup::X25519 => 0x001d,
            KeyExchangeGroup::Secp256r1 => 0x0017,
            KeyExchangeGroup::Secp384r1 => 0x0018,
        }
    }

    pub fn from_iana_code(code: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|g| g.iana_code() == code)
    }

    /// Name as accepted by OpenSSL group lists and used in config files.
    pub fn name(&self) -> &'static str {
        match self {
            KeyExchangeGroup::MlKem768 => "MLKEM768",
            KeyExchangeGroup::X25519MlKem768 => "X25519MLKEM768",
            KeyExchangeGroup::Secp256r1MlKem768 => "SecP256r1MLKEM768",
            KeyExchangeGroup::X25519 => "X25519",
            KeyExchangeGroup::Secp256r1 => "secp256r1",
            KeyExchangeGroup::Secp384r1 => "secp384r1",
        }
    }

    /// Case-insensitive; accepts the common aliases for the NIST curves.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().replace(['-', '_'], "").to_ascii_uppercase();
        match normalized.as_str() {
            "MLKEM768" => Some(KeyExchangeGroup::MlKem768),
            "X25519MLKEM768" => Some(KeyExchangeGroup::X25519MlKem768),
            "SECP256R1MLKEM768" => Some(KeyExchangeGroup::Secp256r1MlKem768),
            "X25519" => Some(KeyExchangeGroup::X25519),
            "SECP256R1" | "P256" | "PRIME256V1" => Some(KeyExchangeGroup::Secp256r1),
            "SECP384R1" | "P384" => Some(KeyExchangeGroup::Secp384r1),
            _ => None,
        }
    }

    pub fn kind(&self) -> GroupKind {
        match self {
            KeyExchangeGroup::MlKem768 => GroupKind::PostQuantum,
            KeyExchangeGroup::X25519MlKem768 | KeyExchangeGroup::Secp256r1MlKem768 => {
                GroupKind::Hybrid
            }
            KeyExchangeGroup::X25519 | KeyExchangeGroup::Secp256r1 | KeyExchangeGroup::Secp384r1 => {
                GroupKind::Classical
            }
        }
    }
}

impl std::fmt::Display for KeyExchangeGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("no key exchange group configured")]
    NoGroup,
    #[error("exactly one key exchange group may be offered, got {0:?}")]
    MultipleGroups(Vec<String>),
    #[error("unknown key exchange group: {0}")]
    UnknownGroup(String),
    #[error("hybrid key exchange group {0} is not allowed, only {required} may be offered", required = REQUIRED_GROUP)]
    HybridGroup(KeyExchangeGroup),
    #[error("classical key exchange group {0} is not allowed, only {required} may be offered", required = REQUIRED_GROUP)]
    ClassicalGroup(KeyExchangeGroup),
}

/// The validated set of groups a context offers. It always holds exactly
/// [`REQUIRED_GROUP`]; the type exists so that context construction cannot
/// skip the validation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExchangePolicy {
    group: KeyExchangeGroup,
}

impl Default for KeyExchangePolicy {
    fn default() -> Self {
        Self {
            group: REQUIRED_GROUP,
        }
    }
}

impl KeyExchangePolicy {
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, PolicyError> {
        let name = match names {
            [] => return Err(PolicyError::NoGroup),
            [name] => name.as_ref(),
            _ => {
                // Name the offending entry when one of them is not pure PQ.
                for name in names {
                    Self::check_group(name.as_ref())?;
                }
                return Err(PolicyError::MultipleGroups(
                    names.iter().map(|s| s.as_ref().to_string()).collect(),
                ));
            }
        };

        let group = Self::check_group(name)?;
        Ok(Self { group })
    }

    fn check_group(name: &str) -> Result<KeyExchangeGroup, PolicyError> {
        let group = KeyExchangeGroup::from_name(name)
            .ok_or_else(|| PolicyError::UnknownGroup(name.to_string()))?;
        match group.kind() {
            GroupKind::PostQuantum => Ok(group),
            GroupKind::Hybrid => Err(PolicyError::HybridGroup(group)),
            GroupKind::Classical => Err(PolicyError::ClassicalGroup(group)),
        }
    }

    #[inline]
    pub fn group(&self) -> KeyExchangeGroup {
        self.group
    }

    /// The groups to hand to the engine, in offer order.
    pub fn offered_groups(&self) -> &[KeyExchangeGroup] {
        std::slice::from_ref(&self.group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_pure_mlkem() {
        let policy = KeyExchangePolicy::default();
        assert_eq!(policy.group(), KeyExchangeGroup::MlKem768);
        assert_eq!(policy.offered_groups(), &[KeyExchangeGroup::MlKem768]);
    }

    #[test]
    fn test_from_names_accepts_mlkem_aliases() {
        for name in ["MLKEM768", "mlkem768", "ML-KEM-768", " MLKEM768 "] {
            let policy = KeyExchangePolicy::from_names(&[name]).unwrap();
            assert_eq!(policy.group(), KeyExchangeGroup::MlKem768, "{name}");
        }
    }

    #[test]
    fn test_from_names_rejects_hybrid() {
        let err = KeyExchangePolicy::from_names(&["X25519MLKEM768"]).unwrap_err();
        assert_eq!(
            err,
            PolicyError::HybridGroup(KeyExchangeGroup::X25519MlKem768)
        );
    }

    #[test]
    fn test_from_names_rejects_classical() {
        let err = KeyExchangePolicy::from_names(&["x25519"]).unwrap_err();
        assert_eq!(err, PolicyError::ClassicalGroup(KeyExchangeGroup::X25519));

        let err = KeyExchangePolicy::from_names(&["prime256v1"]).unwrap_err();
        assert_eq!(err, PolicyError::ClassicalGroup(KeyExchangeGroup::Secp256r1));
    }

    #[test]
    fn test_from_names_rejects_pq_alongside_fallback() {
        let err = KeyExchangePolicy::from_names(&["MLKEM768", "X25519"]).unwrap_err();
        assert_eq!(err, PolicyError::ClassicalGroup(KeyExchangeGroup::X25519));

        let err = KeyExchangePolicy::from_names(&["MLKEM768", "MLKEM768"]).unwrap_err();
        assert!(matches!(err, PolicyError::MultipleGroups(_)));
    }

    #[test]
    fn test_from_names_rejects_empty_and_unknown() {
        let empty: [&str; 0] = [];
        assert_eq!(
            KeyExchangePolicy::from_names(&empty).unwrap_err(),
            PolicyError::NoGroup
        );
        assert_eq!(
            KeyExchangePolicy::from_names(&["FFDHE2048"]).unwrap_err(),
            PolicyError::UnknownGroup("FFDHE2048".to_string())
        );
    }

    #[test]
    fn test_iana_codes() {
        assert_eq!(KeyExchangeGroup::MlKem768.iana_code(), 0x0201);
        for group in KeyExchangeGroup::ALL {
            assert_eq!(KeyExchangeGroup::from_iana_code(group.iana_code()), Some(*group));
            assert_eq!(KeyExchangeGroup::from_name(group.name()), Some(*group));
        }
        assert_eq!(KeyExchangeGroup::from_iana_code(0x0200), None);
    }
}
