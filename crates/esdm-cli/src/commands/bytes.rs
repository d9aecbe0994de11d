use std::io::Write;

pub fn run(config_path: Option<&str>, count: usize, format: &str, min: bool) {
    let esdm = super::make_esdm(config_path);

    let mut buf = vec![0u8; count];
    let result = if min {
        esdm.get_random_bytes_min(&mut buf)
    } else {
        esdm.get_random_bytes_full(&mut buf)
    };
    let n = match result {
        Ok(n) => n,
        Err(e) => {
            eprintln!("Error generating random bytes: {e}");
            std::process::exit(1);
        }
    };
    buf.truncate(n);

    match format {
        "raw" => {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = stdout.write_all(&buf).and_then(|_| stdout.flush()) {
                eprintln!("Error writing output: {e}");
                std::process::exit(1);
            }
        }
        _ => {
            let hex: String = buf.iter().map(|b| format!("{b:02x}")).collect();
            println!("{hex}");
        }
    }
}
