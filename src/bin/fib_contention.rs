//! Contention driver: a deliberately bad recursive fib run on many threads.
//!
//! Every call increments and decrements the refcount of one shared function
//! object and looks itself up in a globals table behind a recursive lock,
//! which is exactly the traffic an interpreter without a global lock
//! generates. `--serial` runs the same work on one thread for comparison.

use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{error, info};
use typthon_sync::{DefaultStats, RecursiveLock, RefCount};

#[derive(Debug)]
struct Config {
    workers: usize,
    depth: u32,
    serial: bool,
}

impl Config {
    fn from_args() -> Result<Self, String> {
        let args: Vec<String> = std::env::args().collect();
        let prog = args.first().map(String::as_str).unwrap_or("fib_contention");

        let mut workers = 7;
        let mut depth = 30;
        let mut serial = false;

        let mut iter = args.iter().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--help" | "-h" => return Err(Self::usage(prog)),
                "--serial" => serial = true,
                "--depth" => {
                    depth = iter
                        .next()
                        .and_then(|v| v.parse().ok())
                        .ok_or_else(|| format!("--depth needs a number\n\n{}", Self::usage(prog)))?;
                }
                n if !n.starts_with("--") => {
                    workers = n.parse().map_err(|_| {
                        format!("Invalid worker count: {}\n\n{}", n, Self::usage(prog))
                    })?;
                }
                opt => return Err(format!("Unknown option: {}\n\n{}", opt, Self::usage(prog))),
            }
        }

        Ok(Self { workers, depth, serial })
    }

    fn usage(prog: &str) -> String {
        format!(
            "fib_contention - refcount and lock contention driver\n\n\
            USAGE:\n    {} [OPTIONS] [WORKERS]\n\n\
            OPTIONS:\n    \
            -h, --help      Print help information\n    \
            --serial        Run WORKERS fib computations one after another\n    \
            --depth N       fib argument (default 30)\n\n\
            EXAMPLES:\n    \
            {} 7\n    \
            {} --serial 7",
            prog, prog, prog
        )
    }
}

/// Interpreter-wide state every call touches
struct Interp {
    globals: RecursiveLock<DefaultStats>,
    fib_object: RefCount,
}

static INTERP: Interp = Interp {
    globals: RecursiveLock::new("globals dict"),
    fib_object: RefCount::new(1),
};

fn fib(n: u32) -> u64 {
    // LOAD_GLOBAL: lookup under the dict lock, nested the way dict
    // operations re-enter it
    {
        let _outer = INTERP.globals.lock();
        let _inner = INTERP.globals.lock();
    }
    typthon_sync::increment(&INTERP.fib_object);

    let result = if n < 2 { 1 } else { fib(n - 1) + fib(n - 2) };

    // The module holds its own reference, so this never reaches zero
    typthon_sync::decrement(&INTERP.fib_object, || unreachable!("fib object freed"));
    result
}

fn run(config: &Config) {
    let start = Instant::now();

    if config.serial {
        for _ in 0..config.workers {
            println!("{}", fib(config.depth));
        }
    } else {
        let depth = config.depth;
        let barrier = Arc::new(std::sync::Barrier::new(config.workers));
        let handles: Vec<_> = (0..config.workers)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    println!("{}", fib(depth));
                    typthon_sync::stats::flush_current_thread();
                })
            })
            .collect();

        for handle in handles {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }

    info!(
        workers = config.workers,
        serial = config.serial,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "fib run complete"
    );
}

fn main() {
    let config = match Config::from_args() {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("{}", msg);
            std::process::exit(2);
        }
    };

    if let Err(err) = typthon_sync::init() {
        eprintln!("warning: {}", err);
    }
    typthon_sync::registry::register(&INTERP.globals);

    run(&config);
    typthon_sync::shutdown();
}
