use std::env;

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use transactional_outbox::{OutboxStore, SqlxOutboxStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage:");
        eprintln!("  outbox-cli stats <DATABASE_URL>");
        eprintln!("  outbox-cli replay-since <rfc3339_ts> <DATABASE_URL>");
        eprintln!("  outbox-cli replay-range <from_sequence> <to_sequence> <DATABASE_URL>");
        eprintln!("  outbox-cli purge-sent <older_than_hours> <DATABASE_URL>");
        std::process::exit(1);
    }

    let cmd = args[1].as_str();

    match cmd {
        "stats" if args.len() == 3 => {
            let store = SqlxOutboxStore::new(PgPool::connect(&args[2]).await?);
            let stats = store.pending_stats().await?;
            println!(
                "pending={} oldest_age_seconds={}",
                stats.pending, stats.oldest_age_seconds
            );
        }
        "replay-since" if args.len() == 4 => {
            let ts: DateTime<Utc> = DateTime::parse_from_rfc3339(&args[2])?.with_timezone(&Utc);
            let store = SqlxOutboxStore::new(PgPool::connect(&args[3]).await?);
            let count = store.replay_since(ts).await?;
            println!("Replayed {} records enqueued since {}", count, ts);
        }
        "replay-range" if args.len() == 5 => {
            let from: i64 = args[2].parse()?;
            let to: i64 = args[3].parse()?;
            let store = SqlxOutboxStore::new(PgPool::connect(&args[4]).await?);
            let count = store.replay_range(from, to).await?;
            println!("Replayed {} records between sequence {} and {}", count, from, to);
        }
        "purge-sent" if args.len() == 4 => {
            let hours: i64 = args[2].parse()?;
            let cutoff = Utc::now() - Duration::hours(hours);
            let store = SqlxOutboxStore::new(PgPool::connect(&args[3]).await?);
            let count = store.purge_sent(cutoff).await?;
            println!("Purged {} sent records older than {}", count, cutoff);
        }
        _ => {
            eprintln!("Invalid arguments");
            std::process::exit(1);
        }
    }

    Ok(())
}
