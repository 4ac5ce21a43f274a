use std::{env, fs, path::Path, rc::Rc};

use gcbridge::{
    Bridge, BridgeConfig, BridgeError, GilGuard,
    foreign::{ForeignHeap, InMemoryHeap},
    runtime::{
        gil::Gil,
        leak_detector,
        managed::{ManagedInstance, ManagedType},
        module::ForeignModule,
        type_registry::ClassRegistry,
    },
};
use tracing_subscriber::EnvFilter;

const MAIN_MODULE: &str = "__main__";

/// Managed value exposed to the foreign heap by `--snapshot`.
#[derive(Debug)]
struct DemoWidget {
    label: String,
}

fn main() {
    let mut args: Vec<String> = env::args().collect();
    let verbose = args.iter().any(|arg| arg == "--verbose");
    let leak_detector = args.iter().any(|arg| arg == "--leak-detector");
    let snapshot = args.iter().any(|arg| arg == "--snapshot");
    if verbose {
        args.retain(|arg| arg != "--verbose");
    }
    if leak_detector {
        args.retain(|arg| arg != "--leak-detector");
    }
    if snapshot {
        args.retain(|arg| arg != "--snapshot");
    }

    init_tracing(verbose);

    let config_path = match extract_value(&mut args, "--config") {
        Some(value) => value,
        None => return,
    };
    let max_objects = match extract_max_objects(&mut args) {
        Some(value) => value,
        None => return,
    };
    let module_paths = match extract_module_paths(&mut args) {
        Some(value) => value,
        None => return,
    };

    if args.len() < 2 {
        print_help();
        return;
    }

    match args[1].as_str() {
        "-h" | "--help" | "help" => print_help(),
        file => {
            let mut config = match config_path {
                Some(path) => match BridgeConfig::load(Path::new(&path)) {
                    Ok(config) => config,
                    Err(err) => {
                        eprintln!("Error: {}", render_error(&err));
                        return;
                    }
                },
                None => BridgeConfig::default(),
            };
            if max_objects.is_some() {
                config.heap.max_objects = max_objects;
            }
            if let Err(err) = run_file(file, config, &module_paths, snapshot) {
                eprintln!("Error: {}", render_error(&err));
            }
            if leak_detector {
                print_leak_stats();
            }
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();
}

fn run_file(
    path: &str,
    config: BridgeConfig,
    module_paths: &[(String, String)],
    snapshot: bool,
) -> Result<(), BridgeError> {
    let code = fs::read_to_string(path).map_err(|source| BridgeError::Config {
        path: path.into(),
        source,
    })?;

    let heap = Rc::new(InMemoryHeap::with_config(&config.heap));
    for (name, file) in module_paths {
        let text = fs::read_to_string(file).map_err(|source| BridgeError::Config {
            path: file.into(),
            source,
        })?;
        heap.add_source(name.clone(), text);
    }

    let mut registry = ClassRegistry::new();
    registry.register_plain(ManagedType::of::<DemoWidget>());
    let bridge = Bridge::new(heap.clone(), registry).with_config(config);

    let guard = GilGuard::acquire();
    let gil = guard.token();
    let module = ForeignModule::from_string(gil, &bridge, MAIN_MODULE, &code)?;

    if snapshot {
        snapshot_round_trip(gil, &bridge, &heap, &module)?;
    }

    print_globals(gil, &bridge, &module)
}

/// Exposes a demo wrapper as `demo` in the module globals, then carries it
/// across a heap save/restore boundary.
fn snapshot_round_trip(
    gil: Gil<'_>,
    bridge: &Bridge,
    heap: &InMemoryHeap,
    module: &ForeignModule,
) -> Result<(), BridgeError> {
    let wrapper = bridge.wrap(
        gil,
        ManagedInstance::new(DemoWidget {
            label: "demo".to_string(),
        }),
    )?;
    let globals = module.globals(gil)?;
    heap.dict_set_item(gil, globals, "demo", wrapper.object())
        .map_err(|source| BridgeError::RegistryWrite {
            key: "demo".to_string(),
            source,
        })?;

    wrapper.on_save(gil, bridge)?;
    let saved = heap.snapshot(gil)?;
    println!("snapshot: {} bytes sha256={}", saved.image().len(), saved.digest_hex());
    heap.restore(gil, &saved)?;
    let dropped = bridge.reset_tracking(gil);
    wrapper.on_load(gil, bridge)?;

    let resolved = bridge.instance_of(gil, wrapper.object())?;
    if let Some(widget) = resolved.downcast_ref::<DemoWidget>() {
        println!("restored wrapper: {} (stale handles dropped: {dropped})", widget.label);
    }
    wrapper.release(gil, bridge)
}

fn print_globals(gil: Gil<'_>, bridge: &Bridge, module: &ForeignModule) -> Result<(), BridgeError> {
    println!("module {}", module.name(gil)?);
    for key in module.keys(gil)? {
        if key == "__builtins__" {
            continue;
        }
        if let Some(value) = module.get(gil, &key)? {
            println!("  {key} = {}", bridge.heap().repr(gil, value));
        }
    }
    Ok(())
}

fn render_error(err: &BridgeError) -> String {
    match err.foreign() {
        Some(foreign) => format!("{err}: {foreign}"),
        None => err.to_string(),
    }
}

fn print_help() {
    println!(
        "\
gcbridge CLI

Usage:
  gcbridge <file>
  gcbridge <file> --module-path <name>=<file> [--module-path ...]

Flags:
  --verbose                    Log wrapper and handle transitions
  --leak-detector              Print wrapper and handle counters after run
  --snapshot                   Carry a demo wrapper across a heap save/restore
  --config <path>              Load bridge settings from a JSON file
  --max-objects <n>            Cap the number of live foreign objects
  --module-path <name>=<file>  Make <file> importable as <name> (can be repeated)
"
    );
}

fn print_leak_stats() {
    let stats = leak_detector::snapshot();
    println!(
        "\nLeak stats (approx):\n  wrappers: {}\n  handles_allocated: {}\n  handles_revoked: {}\n  outstanding_handles: {}\n  saves: {}\n  loads: {}\n  pending_loads: {}",
        stats.wrappers,
        stats.handles_allocated,
        stats.handles_revoked,
        stats.outstanding_handles(),
        stats.saves,
        stats.loads,
        stats.pending_loads()
    );
}

/// `None` means a usage error was already reported.
fn extract_value(args: &mut Vec<String>, flag: &str) -> Option<Option<String>> {
    let mut value = None;
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag {
            if i + 1 >= args.len() {
                eprintln!("Usage: gcbridge <file> {flag} <value>");
                return None;
            }
            value = Some(args.remove(i + 1));
            args.remove(i);
            continue;
        }
        i += 1;
    }
    Some(value)
}

fn extract_max_objects(args: &mut Vec<String>) -> Option<Option<usize>> {
    match extract_value(args, "--max-objects")? {
        Some(value) => match value.parse::<usize>() {
            Ok(parsed) => Some(Some(parsed)),
            Err(_) => {
                eprintln!("Error: --max-objects expects a non-negative integer.");
                None
            }
        },
        None => Some(None),
    }
}

fn extract_module_paths(args: &mut Vec<String>) -> Option<Vec<(String, String)>> {
    let mut paths = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--module-path" {
            if i + 1 >= args.len() {
                eprintln!("Usage: gcbridge <file> --module-path <name>=<file>");
                return None;
            }
            let value = args.remove(i + 1);
            args.remove(i);
            match value.split_once('=') {
                Some((name, file)) if !name.is_empty() && !file.is_empty() => {
                    paths.push((name.to_string(), file.to_string()));
                }
                _ => {
                    eprintln!("Error: --module-path expects <name>=<file>, got `{value}`.");
                    return None;
                }
            }
            continue;
        }
        i += 1;
    }
    Some(paths)
}
