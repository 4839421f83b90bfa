use clap::Parser;

use vmnet_helper::cli::{Args, VERSION_STRING};
use vmnet_helper::lifecycle::Daemon;
use vmnet_helper::options::Options;
use vmnet_helper::{logging, nic};

fn main() {
    let args = Args::parse();

    if args.version {
        println!("{VERSION_STRING}");
        return;
    }

    logging::init(args.verbose);

    if args.list_shared_interfaces {
        for name in nic::shared_interface_list() {
            println!("{name}");
        }
        return;
    }

    let options = match Options::from_args(args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("ERROR {e}");
            std::process::exit(1);
        }
    };

    match Daemon::new(options).run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = %e, "daemon exited with an error");
            std::process::exit(1);
        }
    }
}
