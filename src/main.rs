use std::sync::Arc;

use log::{error, info, warn};

use aul::app::tls::init_tls;
use aul::app::{init_config, init_logging, parse_args};
use aul::jit::{JitManager, JitManagerConfig};
use aul::listener::{tds_conn::TdsTlsConfig, Listener, TdsListener};
use aul::registry::ProcedureRegistry;
use aul::runtime::{Runtime, RuntimeConfig};
use aul::storage::{Pragmas, StorageLayer, TenantStorageConfig};

fn main() {
    let args = match parse_args() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("argument error: {err}");
            std::process::exit(exitcode::USAGE);
        }
    };

    let config = match init_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("config error: {err}");
            std::process::exit(exitcode::CONFIG);
        }
    };

    if args.test_config {
        println!("configuration file is valid");
        std::process::exit(exitcode::OK);
    }

    if let Err(err) = init_logging(&args, &config) {
        eprintln!("logging init error: {err}");
        std::process::exit(exitcode::CONFIG);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("aul-worker")
        .build()
        .expect("building the tokio runtime");

    runtime.block_on(async_main(config));
}

async fn async_main(config: aul::config::Config) {
    let general = &config.general;

    let registry = Arc::new(ProcedureRegistry::new(general.procedure_dir.clone()));
    match registry.load_all() {
        Ok(report) => info!(
            "loaded {} procedures ({} skipped, {} schema mismatches) from {:?}",
            report.loaded, report.skipped.len(), report.schema_mismatches.len(), general.procedure_dir
        ),
        Err(err) => {
            error!("failed to load procedures from {:?}: {err}", general.procedure_dir);
            std::process::exit(exitcode::CONFIG);
        }
    }

    if general.watch {
        match aul::registry::spawn_watcher(registry.clone()) {
            Ok((mut events, watcher)) => {
                // Keep the watcher alive for the life of the process by
                // leaking it onto a background task that just drains events.
                tokio::task::spawn(async move {
                    let _watcher = watcher;
                    while let Some(event) = events.recv().await {
                        info!("procedure registry change: {event:?}");
                    }
                });
            }
            Err(err) => warn!("hot reload watcher failed to start: {err}"),
        }
    }

    let mut pragmas = Pragmas::default();
    pragmas.cache_size = -(general.sqlite_cache_size.as_kb() as i64);
    let storage = Arc::new(StorageLayer::new(TenantStorageConfig {
        base_dir: general.storage_path.clone(),
        auto_create: true,
        pragmas,
        pool_size: 4,
    }));

    let jit = if general.jit_enabled {
        let workspace_root = general.storage_path.join("jit-workspace");
        let abi_crate_path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("aul-jit-abi");
        Some(JitManager::spawn(JitManagerConfig {
            workspace_root,
            abi_crate_path,
            worker_count: num_cpus::get().clamp(1, 4),
            backoff_base: std::time::Duration::from_secs(1),
            backoff_max: std::time::Duration::from_secs(60),
        }))
    } else {
        None
    };

    let runtime_config = RuntimeConfig {
        delegation_enabled: true,
        jit_enabled: general.jit_enabled,
        default_jit_threshold: general.jit_threshold,
        default_timeout: general.default_execution_timeout.as_std(),
    };
    let runtime = Arc::new(Runtime::new(registry, storage, jit, runtime_config));

    let tls_state = init_tls(&config);
    let tls = TdsTlsConfig {
        acceptor: tls_state.acceptor,
        mode: general
            .tls_mode
            .as_deref()
            .and_then(|m| aul::config::tls::TLSMode::from_string(m).ok()),
        rate_limiter: tls_state.rate_limiter,
    };

    if general.listen_postgres != 0 || general.listen_mysql != 0 || general.listen_http != 0 || general.listen_grpc != 0 {
        warn!("only the TDS listener is implemented; ignoring configured non-TDS listen ports");
    }

    if general.listen_tds == 0 {
        error!("listen_tds is 0, nothing to serve");
        std::process::exit(exitcode::CONFIG);
    }

    let listener = Arc::new(TdsListener::new(
        general.host.clone(),
        general.listen_tds,
        general.backlog,
        runtime,
        tls,
    ));

    if let Err(err) = listener.serve().await {
        error!("tds listener exited with error: {err}");
        std::process::exit(exitcode::SOFTWARE);
    }
}
