//! Wire-level message properties.
//!
//! These are the only fields `courier` reads from or writes to the broker's
//! basic properties. They keep AMQP 0-9-1 encodings: `timestamp` is whole
//! seconds since the UNIX epoch and `delivery_mode` is 2 for persistent,
//! 1 for transient.

use serde::{Deserialize, Serialize};

pub const DELIVERY_MODE_TRANSIENT: u8 = 1;
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProperties {
    pub message_id: String,
    pub timestamp: i64,
    pub delivery_mode: u8,
}

impl MessageProperties {
    pub fn is_persistent(&self) -> bool {
        self.delivery_mode == DELIVERY_MODE_PERSISTENT
    }
}

pub fn delivery_mode(persistent: bool) -> u8 {
    if persistent {
        DELIVERY_MODE_PERSISTENT
    } else {
        DELIVERY_MODE_TRANSIENT
    }
}
