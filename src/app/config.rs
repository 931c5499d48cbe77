use log::error;
use std::io::{self, IsTerminal, Write};

use tokio::runtime::Builder;

use crate::app::args::Args;
use crate::config::{get_config, Config};

/// Parse the configuration file on a throwaway single-threaded runtime, so
/// a parse error can be reported before the real multi-threaded runtime
/// (and its logger) is up.
pub fn init_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    {
        let runtime = Builder::new_multi_thread().worker_threads(1).build()?;
        runtime.block_on(async {
            match crate::config::parse(args.config_file.as_str()).await {
                Ok(_) => (),
                Err(err) => {
                    let stdin = io::stdin();
                    if stdin.is_terminal() {
                        eprintln!("Config parse error: {err}");
                        io::stdout().flush().unwrap();
                    } else {
                        error!("Config parse error: {err:?}");
                    }
                    std::process::exit(exitcode::CONFIG);
                }
            };
        });
    }

    Ok(get_config())
}
