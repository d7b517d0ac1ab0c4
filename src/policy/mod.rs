//! Pure authorization and bookkeeping rules. Nothing here touches the store.

pub mod access;
pub mod ledger;
pub mod lifecycle;
