//! Domain primitives: TimeMs, identifiers, and the silver unit.

use serde::{Deserialize, Serialize};

/// Silver amount. Signed because balances may go negative.
pub type Silver = i64;

const MS_PER_HOUR: i64 = 3_600_000;

/// Time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        TimeMs(chrono::Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_ms(&self) -> i64 {
        self.0
    }

    /// This time shifted forward by whole hours, saturating on overflow.
    pub fn plus_hours(&self, hours: i64) -> Self {
        TimeMs(self.0.saturating_add(hours.saturating_mul(MS_PER_HOUR)))
    }
}

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl $name {
            pub fn new(id: i64) -> Self {
                $name(id)
            }

            pub fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Guild identifier.
    GuildId
);
id_type!(
    /// A player's membership within one guild.
    MembershipId
);
id_type!(
    /// Loot tab sale identifier.
    SaleId
);
id_type!(
    /// Tagged participant row identifier.
    ParticipantId
);
id_type!(
    /// Ledger entry identifier; monotonically increasing, doubles as the pagination cursor.
    TransactionId
);
