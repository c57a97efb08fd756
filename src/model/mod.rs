//! Core data model.
//!
//! Intakes are the unit of work handed to reviewers. Retry entries track a
//! failed side-effect for an intake. Audit entries are the compliance record
//! of what happened to a request and who did it.

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum whose
/// storage form is a fixed snake_case string.
macro_rules! string_enum {
    ($ty:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = crate::error::Error;

            fn from_str(s: &str) -> crate::error::Result<Self> {
                match s {
                    $($s => Ok($ty::$variant),)+
                    other => Err(crate::error::Error::Other(format!(
                        concat!("unknown ", stringify!($ty), ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

pub(crate) use string_enum;

pub mod audit;
pub mod intake;
pub mod retry;

pub use audit::*;
pub use intake::*;
pub use retry::*;
