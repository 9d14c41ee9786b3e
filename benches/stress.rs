use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ulid::Ulid;

use desky::config::Config;
use desky::engine::{table_schemas, Engine};
use desky::model::{Booking, Ms, Role};
use desky::ports::{ObjectStore, PortError};
use desky::store::MemoryStore;

const SLOT: Ms = 900_000; // 15 minutes in ms

struct NoObjects;

#[async_trait]
impl ObjectStore for NoObjects {
    async fn put_object_if_absent(
        &self,
        _bucket: &str,
        _key: &str,
        _body: Vec<u8>,
        _content_type: &str,
    ) -> Result<bool, PortError> {
        Ok(true)
    }
}

fn engine(wal: Option<&std::path::Path>) -> Arc<Engine> {
    let config = Config::default();
    let schemas = table_schemas(&config.tables);
    let store = match wal {
        Some(path) => MemoryStore::open(path, schemas).expect("open WAL"),
        None => MemoryStore::new(schemas),
    };
    Arc::new(Engine::new(Arc::new(store), Arc::new(NoObjects), config))
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn slot_booking(element: Ulid, slot: i64) -> Booking {
    let start = slot * SLOT;
    Booking::new(Ulid::new(), element, Ulid::new(), "bench", start, start + SLOT)
}

async fn phase1_sequential(engine: Arc<Engine>) {
    let element = Ulid::new();
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        engine.create_booking(slot_booking(element, i as i64)).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("create latency", &mut latencies);
}

async fn phase2_contended(engine: Arc<Engine>) {
    // Every task races for the same slots on one element.
    let element = Ulid::new();
    let n_tasks = 10;
    let n_slots = 200;
    let accepted = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let engine = engine.clone();
        let accepted = accepted.clone();
        handles.push(tokio::spawn(async move {
            for slot in 0..n_slots {
                if engine.create_booking(slot_booking(element, slot)).await.is_ok() {
                    accepted.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_slots as usize;
    println!(
        "  {n_tasks} tasks x {n_slots} slots = {total} attempts in {:.2}s, {} accepted",
        elapsed.as_secs_f64(),
        accepted.load(Ordering::Relaxed)
    );
}

async fn phase3_read_under_load(engine: Arc<Engine>) {
    let element = Ulid::new();
    for slot in 0..200 {
        engine.create_booking(slot_booking(element, slot * 2)).await.unwrap();
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut writers = Vec::new();
    for _ in 0..5 {
        let engine = engine.clone();
        let stop = stop.clone();
        writers.push(tokio::spawn(async move {
            let own = Ulid::new();
            let mut slot = 0;
            while !stop.load(Ordering::Relaxed) {
                let _ = engine.create_booking(slot_booking(own, slot)).await;
                slot += 1;
            }
        }));
    }

    let mut readers = Vec::new();
    for r in 0..10 {
        let engine = engine.clone();
        readers.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(500);
            for i in 0..500i64 {
                let start = ((r * 500 + i) % 400) * SLOT;
                let t = Instant::now();
                engine.is_resource_available(element, start, start + SLOT).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        all.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }
    print_latency("availability check", &mut all);
}

async fn phase4_membership_storm(engine: Arc<Engine>) {
    let office = Ulid::new();
    let n = 1000;
    let start = Instant::now();
    let handles: Vec<_> = (0..n)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.create_membership(office, Ulid::new(), Role::Member).await })
        })
        .collect();
    let mut ok = 0;
    for h in handles {
        if matches!(h.await, Ok(Ok(_))) {
            ok += 1;
        }
    }
    println!(
        "  {n} concurrent memberships: {ok}/{n} written in {:.2}s",
        start.elapsed().as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let durable = std::env::var("DESKY_BENCH_WAL").is_ok();
    let dir = std::env::temp_dir().join(format!("desky_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let wal = durable.then(|| dir.join("bench.wal"));

    println!("=== desky stress benchmark ===");
    println!("store: {}\n", if durable { "memory + WAL" } else { "memory" });

    println!("[phase 1] sequential bookings");
    phase1_sequential(engine(wal.as_deref())).await;

    println!("\n[phase 2] contended bookings on one element");
    phase2_contended(engine(None)).await;

    println!("\n[phase 3] availability reads under write load");
    phase3_read_under_load(engine(None)).await;

    println!("\n[phase 4] membership dual-write storm");
    phase4_membership_storm(engine(None)).await;

    let _ = std::fs::remove_dir_all(&dir);
}
