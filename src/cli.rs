use pico_args::Arguments;

/// Parsed command-line options
#[derive(Debug)]
pub struct Args {
    pub config: Option<String>,
    pub listen: Option<String>,
    pub log_level: String,
    pub log_format: String,
    pub verbose: bool,
}

pub fn print_help() {
    println!("dnslisten {}\n", env!("CARGO_PKG_VERSION"));
    println!("Usage: dnslisten [OPTIONS]\n");
    println!("Runs an echo DNS server on UDP and TCP.\n");
    println!("OPTIONS:");
    println!("  -c, --config <file>       Server configuration file (YAML)");
    println!("  -a, --listen <addr>       Listen address for UDP and TCP (default: 127.0.0.1:5353)");
    println!(
        "  -l, --log-level <level>   Log level (trace, debug, info, warn, error) (default: info)"
    );
    println!("      --log-format <fmt>    Log format (text, json) (default: text)");
    println!("  -v, --verbose             Enable verbose output (sets log level to debug)");
    println!("  -h, --help                Print this help message");
}

/// Parse CLI arguments from the current process.
/// Returns `None` if help was printed and the caller should exit gracefully.
pub fn parse_args() -> Option<Args> {
    let raw_args: Vec<String> = std::env::args().collect();
    parse_args_from_vec(raw_args)
}

/// Variant of [`parse_args`] taking an explicit argument vector.
pub fn parse_args_from_vec(raw_args: Vec<String>) -> Option<Args> {
    let os_args: Vec<std::ffi::OsString> = raw_args
        .into_iter()
        .skip(1)
        .map(std::ffi::OsString::from)
        .collect();
    let mut pargs = Arguments::from_vec(os_args);
    if pargs.contains(["-h", "--help"]) {
        print_help();
        return None;
    }

    let config = pargs.opt_value_from_str(["-c", "--config"]).ok().flatten();
    let listen = pargs.opt_value_from_str(["-a", "--listen"]).ok().flatten();

    let log_level = match pargs.opt_value_from_str(["-l", "--log-level"]) {
        Ok(Some(s)) => s,
        _ => "info".to_string(),
    };

    let log_format = match pargs.opt_value_from_str("--log-format") {
        Ok(Some(s)) => s,
        _ => "text".to_string(),
    };

    let verbose = pargs.contains(["-v", "--verbose"]);

    Some(Args {
        config,
        listen,
        log_level,
        log_format,
        verbose,
    })
}
