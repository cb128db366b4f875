pub mod catalog;
pub(crate) mod config;
pub(crate) mod dispatch;
pub(crate) mod layout;
pub(crate) mod monitor;
pub(crate) mod outputs;
pub mod partition;
pub(crate) mod stages;
pub(crate) mod variants;
pub(crate) mod worker;
