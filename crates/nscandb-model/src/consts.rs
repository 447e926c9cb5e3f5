//! Normalized interface and switchport codes.
//!
//! Codes follow the SNMP MIB numbering where one exists; each enum converts
//! to and from its numeric code and has a display name.

use serde::{Deserialize, Serialize};

macro_rules! coded_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $code:literal => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "i64", into = "i64")]
        pub enum $name {
            $($variant = $code),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn code(self) -> i64 {
                self as i64
            }

            pub fn from_code(code: i64) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl From<$name> for i64 {
            fn from(value: $name) -> i64 {
                value.code()
            }
        }

        impl TryFrom<i64> for $name {
            type Error = String;

            fn try_from(code: i64) -> Result<Self, Self::Error> {
                $name::from_code(code)
                    .ok_or_else(|| format!("unknown {} code {}", stringify!($name), code))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

coded_enum!(
    /// `dot3StatsDuplexStatus`
    IfDuplex {
        Unknown = 1 => "unknown",
        Half = 2 => "half",
        Full = 3 => "full",
    }
);

coded_enum!(
    /// `ifAdminStatus` / `ifOperStatus`
    IfStatus {
        Up = 1 => "up",
        Down = 2 => "down",
        Testing = 3 => "testing",
        Unknown = 4 => "unknown",
        Dormant = 5 => "dormant",
        NotPresent = 6 => "notPresent",
        LowerLayerDown = 7 => "lowerLayerDown",
    }
);

coded_enum!(
    SwPortMode {
        Trunk = 1 => "trunk",
        Access = 2 => "access",
        DesirableTrunk = 3 => "desirableTrunk",
        Auto = 4 => "auto",
        TrunkNoNegotiate = 5 => "trunkNoNegociate",
        General = 6 => "general",
        Customer = 7 => "customer",
        Dot1qLikeTrunk = 8 => "dot1qLikeTrunk",
        Dot1qLikeAccess = 9 => "dot1qLikeAccess",
        Dot1qLikeGeneral = 10 => "dot1qLikeGeneral",
        Fex = 11 => "fex",
    }
);

coded_enum!(
    SwPortStatus {
        Trunking = 1 => "trunking",
        NotTrunking = 2 => "notTrunking",
    }
);

impl SwPortMode {
    /// Modes that carry tagged traffic.
    pub fn is_trunk_family(self) -> bool {
        matches!(
            self,
            SwPortMode::Trunk
                | SwPortMode::DesirableTrunk
                | SwPortMode::TrunkNoNegotiate
                | SwPortMode::Dot1qLikeTrunk
        )
    }

    /// Modes negotiated at runtime, whose effective state is the trunk status.
    pub fn is_dynamic(self) -> bool {
        matches!(self, SwPortMode::DesirableTrunk | SwPortMode::Auto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_names() {
        assert_eq!(IfStatus::from_code(7), Some(IfStatus::LowerLayerDown));
        assert_eq!(IfStatus::LowerLayerDown.name(), "lowerLayerDown");
        assert_eq!(SwPortMode::Fex.code(), 11);
        assert_eq!(SwPortMode::TrunkNoNegotiate.to_string(), "trunkNoNegociate");
        assert_eq!(IfDuplex::from_code(0), None);
        assert_eq!(SwPortStatus::ALL.len(), 2);
    }

    #[test]
    fn serialized_as_code() {
        assert_eq!(serde_json::to_string(&SwPortMode::Access).unwrap(), "2");
        let back: IfDuplex = serde_json::from_str("3").unwrap();
        assert_eq!(back, IfDuplex::Full);
        assert!(serde_json::from_str::<IfDuplex>("9").is_err());
    }
}
