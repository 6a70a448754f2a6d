//! Simple CLI for inspecting and exercising an object store volume.
//!
//! Usage:
//!   om_cli <db_path> create-file [fill_factor]
//!   om_cli <db_path> insert <file> <text> [near_oid]
//!   om_cli <db_path> get <file> <oid>
//!   om_cli <db_path> delete <file> <oid>
//!   om_cli <db_path> scan <file> [--reverse]
//!   om_cli <db_path> dump <file>
//!   om_cli <db_path> verify <file>
//!   om_cli <db_path> bulk-insert <file> <count> [size]
//!   om_cli <db_path> stats
//!
//! Object ids are written as `volume:page:slot:unique`. Log output goes to
//! stderr and is controlled with `RUST_LOG`.

use object_storage::{
    Config, DeallocList, FileId, ObjectId, ObjectStore, Result, ScanDirection,
};
use std::env;
use std::process::exit;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

fn usage() -> ! {
    eprintln!("Usage: om_cli <db_path> <command> [args...]");
    eprintln!("Commands:");
    eprintln!("  create-file [fill]              - Create a file (fill factor 1-100)");
    eprintln!("  insert <file> <text> [near]     - Store text as a new object");
    eprintln!("  get <file> <oid>                - Print an object");
    eprintln!("  delete <file> <oid>             - Destroy an object");
    eprintln!("  scan <file> [--reverse]         - List a file's objects in order");
    eprintln!("  dump <file>                     - Print the file's page layout as JSON");
    eprintln!("  verify <file>                   - Check the file's pages and lists");
    eprintln!("  bulk-insert <file> <count> [sz] - Insert count test objects");
    eprintln!("  stats                           - Show volume statistics");
    exit(1);
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("ERROR: {}", message);
    exit(1);
}

fn or_fail<T>(result: Result<T>) -> T {
    result.unwrap_or_else(|e| fail(e))
}

fn arg<'a>(args: &'a [String], index: usize) -> &'a str {
    match args.get(index) {
        Some(value) => value,
        None => usage(),
    }
}

fn parse_file(value: &str) -> FileId {
    match value.parse() {
        Ok(id) => FileId::new(id),
        Err(_) => fail(format!("invalid file id {:?}", value)),
    }
}

fn parse_oid(value: &str) -> ObjectId {
    value.parse().unwrap_or_else(|e: String| fail(e))
}

fn main() {
    init_tracing();
    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        usage();
    }

    let db_path = &args[1];
    let command = &args[2];

    let store = match ObjectStore::open(Config::new(db_path)) {
        Ok(store) => store,
        Err(e) => fail(format!("Failed to open volume: {}", e)),
    };

    match command.as_str() {
        "create-file" => {
            let fill = args.get(3).map(|value| match value.parse::<u8>() {
                Ok(fill) => fill,
                Err(_) => fail("Invalid fill factor"),
            });
            let file = or_fail(store.create_file(fill));
            println!("FILE: {}", file);
        }

        "insert" => {
            let file = parse_file(arg(&args, 3));
            let text = arg(&args, 4);
            let near = args.get(5).map(|value| parse_oid(value));

            let oid = or_fail(store.create_object(
                file,
                near.as_ref(),
                None,
                text.len(),
                Some(text.as_bytes()),
            ));
            println!("{}", oid);
        }

        "get" => {
            let file = parse_file(arg(&args, 3));
            let oid = parse_oid(arg(&args, 4));

            let (header, data) = or_fail(store.read_object(file, &oid));
            println!("tag: {} properties: {:#06x} length: {}", header.tag, header.properties, header.length);
            match String::from_utf8(data) {
                Ok(s) => println!("{}", s),
                Err(_) => println!("<binary data>"),
            }
        }

        "delete" => {
            let file = parse_file(arg(&args, 3));
            let oid = parse_oid(arg(&args, 4));

            let mut dealloc = DeallocList::new();
            or_fail(store.destroy_object(file, &oid, &mut dealloc));
            let freed = or_fail(store.commit_deallocs(&mut dealloc));
            if freed > 0 {
                println!("DELETED (freed {} page(s))", freed);
            } else {
                println!("DELETED");
            }
        }

        "scan" => {
            let file = parse_file(arg(&args, 3));
            let direction = match args.get(4).map(String::as_str) {
                Some("--reverse") => ScanDirection::Backward,
                Some(other) => fail(format!("unknown scan option {:?}", other)),
                None => ScanDirection::Forward,
            };

            let objects = or_fail(store.scan(file, direction));
            println!("COUNT: {}", objects.len());
            for (oid, header) in objects {
                let (_, data) = or_fail(store.read_object(file, &oid));
                println!("{} [tag {}] -> {}", oid, header.tag, String::from_utf8_lossy(&data));
            }
        }

        "dump" => {
            let file = parse_file(arg(&args, 3));
            let layout = or_fail(store.export_file(file));
            match serde_json::to_string_pretty(&layout) {
                Ok(json) => println!("{}", json),
                Err(e) => fail(e),
            }
        }

        "verify" => {
            let file = parse_file(arg(&args, 3));
            or_fail(store.verify_file(file));
            println!("OK");
        }

        "bulk-insert" => {
            let file = parse_file(arg(&args, 3));
            let count: usize = match arg(&args, 4).parse() {
                Ok(n) => n,
                Err(_) => fail("Invalid count"),
            };
            let size: usize = match args.get(5).map(|s| s.parse()) {
                Some(Ok(n)) => n,
                Some(Err(_)) => fail("Invalid size"),
                None => 64,
            };

            let start = std::time::Instant::now();
            for i in 0..count {
                let mut data = format!("object_{:08}_", i).into_bytes();
                data.resize(size.max(data.len()), b'.');
                if let Err(e) = store.create_object(file, None, None, data.len(), Some(&data)) {
                    fail(format!("at {}: {}", i, e));
                }
            }
            let elapsed = start.elapsed();

            println!("INSERTED: {}", count);
            println!("TIME_MS: {}", elapsed.as_millis());
        }

        "stats" => {
            let stats = store.stats();
            println!("volume_id: {}", stats.volume_id);
            println!("page_count: {}", stats.page_count);
            println!("free_page_count: {}", stats.free_page_count);
            println!("file_count: {}", stats.file_count);
            println!("buffer_pool_size: {}", stats.buffer_pool_size);
        }

        _ => {
            eprintln!("Unknown command: {}", command);
            usage();
        }
    }

    or_fail(store.flush());
}
