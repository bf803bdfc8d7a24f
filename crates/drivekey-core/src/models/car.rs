use serde::{Deserialize, Serialize};

#[cfg(feature = "ts")]
use ts_rs::TS;

/// Vehicle registration payload for `/car/register`.
/// Fields stay strings because the form submits them as entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct CarRegistration {
    pub brand: String,
    pub model: String,
    pub year: String,
    pub kilometers: String,
}
