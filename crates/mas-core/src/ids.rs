//! Strongly typed identifier wrappers.
//!
//! Identifiers must be unique across OS processes (elements of one simulation
//! do not share memory), so they wrap UUIDs rather than arena indices.  All
//! IDs are `Copy + Eq + Hash` and serialize as plain UUID strings.

use std::fmt;

use uuid::Uuid;

/// Generate a typed ID wrapper around a `Uuid`.
macro_rules! typed_uuid {
    ($(#[$attr:meta])* $vis:vis struct $name:ident;) => {
        $(#[$attr])*
        #[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
        #[derive(serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        $vis struct $name(pub Uuid);

        impl $name {
            /// Mint a fresh (version-4) identifier.
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// First hex group of the UUID — compact form for logs and CSV.
            pub fn short(&self) -> String {
                let s = self.0.to_string();
                s.split('-').next().unwrap_or(&s).to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.short())
            }
        }
    };
}

typed_uuid! {
    /// Identifies one message envelope, globally unique across all elements.
    pub struct MessageId;
}

typed_uuid! {
    /// Identifies one measurement request across the whole simulation.
    pub struct RequestId;
}

typed_uuid! {
    /// Identifies one scheduled agent action.
    pub struct ActionId;
}
