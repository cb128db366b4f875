use std::process::exit;

use boltpipe::{argparse::set_configs, boltpipe::boltpipe};

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

fn main() {
    let config = set_configs();

    if let Err(e) = boltpipe(config) {
        eprintln!("ERROR: {:?}", e);
        exit(1);
    }
}
