use serde::{Deserialize, Serialize};

use super::*;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PaymentState {
    Created,
    Settled(Sats),
}
