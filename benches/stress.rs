use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const HOUR: i64 = 3_600_000; // 1 hour in ms

async fn connect_db(host: &str, port: u16, db: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(db)
        .user("bench")
        .password("motorpool");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

/// Fresh fleet per call so phases don't interfere.
async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    connect_db(host, port, &format!("bench_{}", Ulid::new())).await
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
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

/// Far enough ahead that the scheduler never activates anything mid-run.
fn base_time() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as i64;
    now + 24 * HOUR
}

async fn register(client: &tokio_postgres::Client) -> (Ulid, Ulid) {
    let vid = Ulid::new();
    let did = Ulid::new();
    client
        .batch_execute(&format!("INSERT INTO vehicles (id) VALUES ('{vid}')"))
        .await
        .unwrap();
    client
        .batch_execute(&format!("INSERT INTO drivers (id) VALUES ('{did}')"))
        .await
        .unwrap();
    (vid, did)
}

fn booking(vid: Ulid, did: Ulid, start: i64) -> String {
    let id = Ulid::new();
    let end = start + HOUR;
    format!(
        r#"INSERT INTO reservations (id, vehicle_id, driver_id, start, "end", purpose) VALUES ('{id}', '{vid}', '{did}', {start}, {end}, 'bench')"#
    )
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let (vid, did) = register(&client).await;
    let base = base_time();

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        client
            .batch_execute(&booking(vid, did, base + i as i64 * HOUR))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} reservations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Every task races for the same slots on one vehicle; exactly one booking
/// per slot may win.
async fn phase2_contended(host: &str, port: u16) {
    let db = format!("bench_{}", Ulid::new());
    let setup = connect_db(host, port, &db).await;
    let (vid, did) = register(&setup).await;
    let base = base_time();

    let n_tasks = 10;
    let n_slots = 200;
    let won = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let host = host.to_string();
        let db = db.clone();
        let won = won.clone();
        let lost = lost.clone();
        handles.push(tokio::spawn(async move {
            let client = connect_db(&host, port, &db).await;
            for slot in 0..n_slots {
                match client.batch_execute(&booking(vid, did, base + slot * HOUR)).await {
                    Ok(()) => won.fetch_add(1, Ordering::Relaxed),
                    Err(_) => lost.fetch_add(1, Ordering::Relaxed),
                };
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_slots as usize;
    println!(
        "  {n_tasks} tasks x {n_slots} slots = {total} attempts in {:.2}s: {} booked, {} conflicts",
        elapsed.as_secs_f64(),
        won.load(Ordering::Relaxed),
        lost.load(Ordering::Relaxed),
    );
    assert_eq!(won.load(Ordering::Relaxed), n_slots as usize, "double booking detected");
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let db = format!("bench_{}", Ulid::new());
    let setup = connect_db(host, port, &db).await;
    let base = base_time();
    let mut vehicles = Vec::new();
    for _ in 0..20 {
        let (vid, did) = register(&setup).await;
        for i in 0..20 {
            setup.batch_execute(&booking(vid, did, base + i * 2 * HOUR)).await.unwrap();
        }
        vehicles.push(vid);
    }

    // Writers keep booking new vehicles in the same fleet.
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let host = host.to_string();
        let db = db.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect_db(&host, port, &db).await;
            let (vid, did) = register(&client).await;
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let _ = client.batch_execute(&booking(vid, did, base + i * HOUR)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let host = host.to_string();
        let db = db.clone();
        let vid = vehicles[r % vehicles.len()];
        reader_handles.push(tokio::spawn(async move {
            let client = connect_db(&host, port, &db).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let s = base + (i as i64 % 40) * HOUR;
                let e = s + HOUR;
                let sql = if i % 2 == 0 {
                    format!(r#"SELECT * FROM conflicts WHERE vehicle_id = '{vid}' AND start >= {s} AND "end" <= {e}"#)
                } else {
                    format!(r#"SELECT * FROM available_vehicles WHERE start >= {s} AND "end" <= {e}"#)
                };
                let t = Instant::now();
                client.simple_query(&sql).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("conflict / availability query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;
    let base = base_time();

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let (vid, did) = register(&client).await;
            for i in 0..ops_per_conn {
                client.batch_execute(&booking(vid, did, base + i * HOUR)).await.unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("MOTORPOOL_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("MOTORPOOL_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid MOTORPOOL_PORT");

    println!("=== motorpool stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential reservation throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended booking on one vehicle");
    phase2_contended(&host, port).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
