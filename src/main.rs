use std::env;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use pbf_reader::{Config, Decoder, ElementSink, Node, Relation, Way};

/// Thread-safe element counter; worker threads bump it concurrently.
#[derive(Default)]
struct Counter {
    nodes: AtomicU64,
    ways: AtomicU64,
    relations: AtomicU64,
}

impl ElementSink for Counter {
    fn on_node(&self, _: Node) {
        self.nodes.fetch_add(1, Ordering::Relaxed);
    }

    fn on_way(&self, _: Way) {
        self.ways.fetch_add(1, Ordering::Relaxed);
    }

    fn on_relation(&self, _: Relation) {
        self.relations.fetch_add(1, Ordering::Relaxed);
    }
}

fn main() {
    env_logger::init();

    let Some(path) = env::args().nth(1) else {
        eprintln!("usage: pbf-reader [--index] <file.osm.pbf>");
        process::exit(2);
    };
    let (indexing, path) = if path == "--index" {
        match env::args().nth(2) {
            Some(path) => (true, path),
            None => {
                eprintln!("usage: pbf-reader [--index] <file.osm.pbf>");
                process::exit(2);
            }
        }
    } else {
        (false, path)
    };

    let mut decoder = match Decoder::from_path(&path) {
        Ok(decoder) => decoder,
        Err(err) => {
            eprintln!("{}: {}", path, err);
            process::exit(1);
        }
    };
    decoder.set_config(Config {
        indexing,
        ..Config::default()
    });

    let counter = Counter::default();
    let started = Instant::now();
    if let Err(err) = decoder.parse(&counter, false) {
        eprintln!("{}: {}", path, err);
        process::exit(1);
    }
    let elapsed = started.elapsed().as_secs_f64();

    let megabytes = decoder.bytes_read() as f64 / 1024.0 / 1024.0;
    println!(
        "{}: {} nodes, {} ways, {} relations",
        path,
        counter.nodes.load(Ordering::Relaxed),
        counter.ways.load(Ordering::Relaxed),
        counter.relations.load(Ordering::Relaxed),
    );
    println!(
        "processed {:.1} MB in {:.2}s ({:.1} MB/s)",
        megabytes,
        elapsed,
        megabytes / elapsed.max(f64::EPSILON)
    );
}
