//! Event names emitted by the store and the consent gate.

pub const STORE_OPENED: &str = "store.opened";
pub const STORE_BATCH_OPENED: &str = "store.batch_opened";
pub const STORE_ROTATED: &str = "store.rotated";
pub const STORE_EVICTED: &str = "store.evicted";
pub const STORE_DROPPED: &str = "store.dropped";
pub const STORE_RECOVERED: &str = "store.recovered";
pub const STORE_MISSING: &str = "store.missing";
pub const STORE_APPEND_FAILED: &str = "store.append_failed";

pub const CONSENT_LOADED: &str = "consent.loaded";
pub const CONSENT_CHANGED: &str = "consent.changed";
pub const CONSENT_PERSIST_FAILED: &str = "consent.persist_failed";
