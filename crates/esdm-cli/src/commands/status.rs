pub fn run(config_path: Option<&str>, json: bool) {
    let esdm = super::make_esdm(config_path);
    super::initialize(&esdm);
    let status = esdm.status();

    if json {
        match serde_json::to_string_pretty(&status) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                eprintln!("Error serializing status: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let yes_no = |b: bool| if b { "yes" } else { "no" };

    println!("ESDM v{}", status.version);
    println!("  Stage:              {:?}", status.seed_stage);
    println!("  Operational:        {}", yes_no(status.operational));
    println!("  Min seeded:         {}", yes_no(status.min_seeded));
    println!("  DRNG:               {} ({})", status.drng, status.hash);
    println!("  Security strength:  {} bits", status.security_strength_bits);
    println!("  Entropy threshold:  {} bits", status.entropy_threshold_bits);
    println!("  Available entropy:  {} bits", status.available_entropy_bits);
    println!(
        "  SP 800-90C:         {} (oversampling +{} bits)",
        yes_no(status.sp80090c_compliant),
        status.oversample_extra_bits
    );
    println!(
        "  Reseeds:            {} performed, {} skipped, {} seed operations",
        status.reseeds_performed, status.reseeds_skipped, status.seed_operations
    );
    println!(
        "  Requests since full seed: {}",
        status.requests_since_fully_seeded
    );

    println!();
    println!("  {:<12} {:>8} {:>8}  Description", "Source", "Now", "Max");
    println!("  {}", "-".repeat(60));
    for src in &status.sources {
        println!(
            "  {:<12} {:>8} {:>8}  {}",
            src.name, src.current_entropy, src.max_entropy, src.description
        );
    }
}
