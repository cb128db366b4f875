pub(crate) mod context;
pub mod he;
pub(crate) mod pbar;
