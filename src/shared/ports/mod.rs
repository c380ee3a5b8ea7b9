pub mod call_store;
pub mod telephony;
