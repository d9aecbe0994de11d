pub mod bytes;
pub mod server;
pub mod status;

use esdm_core::{Esdm, EsdmConfig};

/// Build the service from an optional JSON config file, exiting on error.
pub fn make_esdm(config_path: Option<&str>) -> Esdm {
    let config = match config_path {
        Some(path) => match EsdmConfig::from_path(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading {path}: {e}");
                std::process::exit(1);
            }
        },
        None => EsdmConfig::default(),
    };

    match Esdm::new(config) {
        Ok(esdm) => esdm,
        Err(e) => {
            eprintln!("Error starting ESDM: {e}");
            std::process::exit(1);
        }
    }
}

/// Allocate and seed the DRNG, exiting on error.
pub fn initialize(esdm: &Esdm) {
    if let Err(e) = esdm.initialize() {
        eprintln!("Error initializing DRNG: {e}");
        std::process::exit(1);
    }
}
