use serde::{Deserialize, Serialize};

/// Error for unknown enum string values.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Invalid {field} value: {value}")]
pub struct InvalidEnum {
    pub field: String,
    pub value: String,
}

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = InvalidEnum;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(MessageRole {
    User => "user",
    Assistant => "assistant",
});

str_enum!(QueryMode {
    PatientSpecific => "patient_specific",
    General => "general",
    Auto => "auto",
});

str_enum!(ResolveReason {
    ById => "by_id",
    ByName => "by_name",
    Ambiguous => "ambiguous",
    None => "none",
});

str_enum!(RouteIntent {
    General => "general",
    PatientSpecific => "patient_specific",
    PatientSpecificNotFound => "patient_specific_not_found",
    PatientSpecificUseLocked => "patient_specific_use_locked",
    PatientSpecificNoContext => "patient_specific_no_context",
});

str_enum!(StatusLevel {
    Info => "info",
    Warning => "warning",
    Error => "error",
});

impl Default for QueryMode {
    fn default() -> Self {
        Self::General
    }
}
