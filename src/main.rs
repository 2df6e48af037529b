//! Command-line wrapper around [`ftpcache::Proxy`].
//!
//! Usage: `ftpcache <origin-hostname> <proxy-ip>` where `<proxy-ip>` is the
//! IPv4 dotted quad the proxy advertises in rewritten negotiations. The
//! process only ever exits with status 1: argument errors, fatal socket
//! errors and the idle timeout all end it.

use std::env;
use std::net::Ipv4Addr;
use std::process;

use ftpcache::Proxy;

const FTP_CONTROL_PORT: u16 = 21;
const CACHE_ROOT: &str = "cache";

fn parse_args() -> (String, Ipv4Addr) {
    let mut args = env::args().skip(1);
    let origin_host = match args.next() {
        Some(arg) => arg,
        None => {
            eprintln!("Missing argument.");
            process::exit(1);
        }
    };
    let proxy_ip = match args.next() {
        Some(arg) => arg,
        None => {
            eprintln!("Missing argument.");
            process::exit(1);
        }
    };
    if args.next().is_some() {
        eprintln!("Too many arguments.");
        process::exit(1);
    }
    let proxy_ip = match proxy_ip.parse() {
        Ok(ip) => ip,
        Err(_) => {
            eprintln!("Proxy address must be an IPv4 dotted quad.");
            process::exit(1);
        }
    };
    (origin_host, proxy_ip)
}

fn create_cache_root() {
    let mut builder = std::fs::DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o775);
    }
    if let Err(err) = builder.create(CACHE_ROOT) {
        if err.kind() != std::io::ErrorKind::AlreadyExists {
            eprintln!("Cannot create cache directory: {}", err);
            process::exit(1);
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stdout)
        .init();

    let (origin_host, proxy_ip) = parse_args();
    create_cache_root();

    let proxy = Proxy::new(origin_host, proxy_ip);
    if let Err(err) = proxy.listen(FTP_CONTROL_PORT).await {
        eprintln!("{}", err);
    }
    process::exit(1);
}
