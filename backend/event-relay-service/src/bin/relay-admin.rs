use std::env;

use sqlx::PgPool;
use subscriber_host::{AuditStore, SqlxAuditStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage:");
        eprintln!("  relay-admin quarantined <limit> <DATABASE_URL>");
        eprintln!("  relay-admin show <event_id> <DATABASE_URL>");
        eprintln!("  relay-admin release <event_id> <DATABASE_URL>");
        std::process::exit(1);
    }

    match args[1].as_str() {
        "quarantined" if args.len() == 4 => {
            let limit: usize = args[2].parse()?;
            let store = SqlxAuditStore::new(PgPool::connect(&args[3]).await?);
            let records = store.list_quarantined(limit).await?;
            for record in &records {
                println!(
                    "{} attempts={} status={} reason={} skipped_at={}",
                    record.event_id,
                    record.attempts,
                    record.status.as_str(),
                    record.reason,
                    record
                        .skipped_time_utc
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
            println!("{} quarantined record(s)", records.len());
        }
        "show" if args.len() == 4 => {
            let store = SqlxAuditStore::new(PgPool::connect(&args[3]).await?);
            match store.get(&args[2]).await? {
                Some(record) => {
                    println!("event_id={}", record.event_id);
                    println!("attempts={}", record.attempts);
                    println!("status={} reason={}", record.status.as_str(), record.reason);
                    println!(
                        "originating_status={} originating_reason={}",
                        record.originating_status.as_str(),
                        record.originating_reason
                    );
                    println!("skip_processing={}", record.skip_processing);
                    if let Some(exception) = &record.exception {
                        println!("exception={}", exception);
                    }
                    println!("body={}", String::from_utf8_lossy(&record.body));
                }
                None => println!("No audit record for {}", args[2]),
            }
        }
        "release" if args.len() == 4 => {
            let store = SqlxAuditStore::new(PgPool::connect(&args[3]).await?);
            if store.release(&args[2]).await? {
                println!("Released {}; the next delivery is handled again", args[2]);
            } else {
                println!("{} is not quarantined", args[2]);
            }
        }
        _ => {
            eprintln!("Unknown command or wrong arguments: {}", args[1]);
            std::process::exit(1);
        }
    }

    Ok(())
}
