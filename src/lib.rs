pub mod argparse;
pub mod aux;
pub mod boltpipe;
pub mod core;
mod utils;
