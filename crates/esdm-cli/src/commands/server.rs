pub fn run(config_path: Option<&str>, host: &str, port: u16, allow_insert: bool) {
    let esdm = super::make_esdm(config_path);
    super::initialize(&esdm);

    let base = format!("http://{host}:{port}");
    let sources = esdm.es_manager().registry().names();

    println!("🎲 ESDM Server v{}", esdm_core::VERSION);
    println!("   {base}");
    println!("   Sources: {}", sources.join(", "));
    println!("   Stage:   {:?}", esdm.es_manager().seed_stage());
    println!();
    println!("   Endpoints:");
    println!("     GET  /                 API index (try: curl {base})");
    println!("     GET  /api/v1/random    Random bytes from the DRNG");
    println!("     POST /api/v1/entropy   Feed the auxiliary pool");
    println!("     GET  /status           Seeding state and counters");
    println!("     GET  /health           Health check");
    println!();
    println!("   Query params for /api/v1/random:");
    println!("     length=N              Bytes to return (1-65536, default: 1024)");
    println!("     type=hex16|uint8|uint16|hex  Output format (default: hex16)");
    println!("     mode=full|min         Seeding level to wait for (default: full)");
    if !allow_insert {
        println!("     (entropy insertion requires --allow-insert flag)");
    }
    println!();
    println!("   Examples:");
    println!("     curl {base}/api/v1/random?length=32&type=uint8");
    println!("     curl {base}/status");
    println!();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error starting runtime: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(esdm_server::run_server(esdm, host, port, allow_insert)) {
        log::error!("server stopped: {e}");
        std::process::exit(1);
    }
}
