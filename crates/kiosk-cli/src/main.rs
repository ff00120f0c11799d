use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kiosk_core::Emotion;
use kiosk_hw::{Camera, SensorFeed};
use kiosk_store::{CustomerDocument, CustomerStore, QueryField, SqliteStore};
use std::path::{Path, PathBuf};
use std::time::Duration;

// D-Bus proxy for the daemon's status interface.
#[zbus::proxy(
    interface = "org.smartkiosk.Greeter1",
    default_service = "org.smartkiosk.Greeter1",
    default_path = "/org/smartkiosk/Greeter1"
)]
trait Greeter1 {
    async fn status(&self) -> zbus::Result<String>;
    async fn visit_record(&self, customer_id: &str) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "kiosk", about = "Smart kiosk operator CLI")]
struct Cli {
    /// Customer database (default: $KIOSK_DB_PATH or the daemon's default)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import customer documents from a registration JSON file
    Import {
        /// JSON file holding one document or an array of documents
        file: PathBuf,
    },
    /// List known customers
    List {
        /// Only customers whose last emotion matches
        #[arg(short, long)]
        emotion: Option<String>,
    },
    /// Clear a customer's last visit so the next visit notifies again
    Reset {
        customer_id: String,
    },
    /// Show daemon status
    Status,
    /// Show a customer's visit record as the daemon sees it
    Visit {
        customer_id: String,
    },
    /// List V4L2 capture devices
    Devices,
    /// Print distance readings from the proximity sensor
    Sensor {
        /// Serial device (default: $KIOSK_SENSOR_DEVICE or /dev/ttyACM0)
        #[arg(short, long)]
        device: Option<String>,
        #[arg(short, long, default_value_t = 9600)]
        baud: u32,
        /// Number of polls before exiting
        #[arg(short, long, default_value_t = 10)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let db_path = cli
        .db
        .or_else(|| std::env::var("KIOSK_DB_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(kiosk_store::default_db_path);
    tracing::debug!(db = %db_path.display(), "customer database");

    match cli.command {
        Commands::Import { file } => {
            let docs = read_documents(&file)?;
            let store = SqliteStore::open(&db_path).await?;
            for doc in &docs {
                store
                    .upsert(doc)
                    .await
                    .with_context(|| format!("import {}", doc.id))?;
            }
            println!("Imported {} customer(s) into {}", docs.len(), db_path.display());
        }
        Commands::List { emotion } => {
            let store = SqliteStore::open(&db_path).await?;
            let docs = match emotion {
                Some(e) => {
                    store
                        .find_by(QueryField::LastEmotion, Emotion::parse(&e).as_str())
                        .await?
                }
                None => store.list().await?,
            };
            if docs.is_empty() {
                println!("No customers");
            }
            for doc in docs {
                println!(
                    "{:<16} {:<24} {:<16} {:<26} {}",
                    doc.id,
                    doc.name,
                    doc.phone_number.as_deref().unwrap_or("-"),
                    doc.last_visit
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "never".into()),
                    doc.last_emotion.map(|e| e.as_str()).unwrap_or("-"),
                );
            }
        }
        Commands::Reset { customer_id } => {
            let store = SqliteStore::open(&db_path).await?;
            store.clear_visit(&customer_id).await?;
            println!("Visit state cleared for {customer_id}");
        }
        Commands::Status => {
            let proxy = connect().await?;
            println!("{}", pretty(&proxy.status().await?));
        }
        Commands::Visit { customer_id } => {
            let proxy = connect().await?;
            println!("{}", pretty(&proxy.visit_record(&customer_id).await?));
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::Sensor {
            device,
            baud,
            count,
        } => {
            let device = device
                .or_else(|| std::env::var("KIOSK_SENSOR_DEVICE").ok())
                .unwrap_or_else(|| "/dev/ttyACM0".to_string());
            tokio::task::spawn_blocking(move || read_sensor(&device, baud, count)).await??;
        }
    }

    Ok(())
}

async fn connect() -> Result<Greeter1Proxy<'static>> {
    let conn = zbus::connection::Builder::session()?
        .method_timeout(Duration::from_secs(3))
        .build()
        .await
        .context("connect to session bus")?;
    Greeter1Proxy::new(&conn)
        .await
        .context("kioskd not reachable")
}

fn pretty(json: &str) -> String {
    serde_json::from_str::<serde_json::Value>(json)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| json.to_string())
}

/// Parse a registration export: one document or an array of them.
fn read_documents(path: &Path) -> Result<Vec<CustomerDocument>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read {}", path.display()))?;
    parse_documents(&text)
}

fn parse_documents(text: &str) -> Result<Vec<CustomerDocument>> {
    let value: serde_json::Value = serde_json::from_str(text).context("invalid JSON")?;
    let docs: Vec<CustomerDocument> = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value)?,
        other => vec![serde_json::from_value(other)?],
    };

    for doc in &docs {
        if doc.id.trim().is_empty() || doc.name.trim().is_empty() {
            bail!("customer documents need a non-empty id and name");
        }
        if doc.encodings.is_empty() {
            bail!("customer {} has no face encodings", doc.id);
        }
    }
    Ok(docs)
}

fn read_sensor(device: &str, baud: u32, count: usize) -> Result<()> {
    let mut feed = SensorFeed::open(device, baud, Duration::from_secs(1))?;
    for _ in 0..count {
        match feed.poll() {
            Some(distance) => println!("distance: {distance:.1} cm"),
            None => println!("no reading"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_and_array() {
        let one = parse_documents(r#"{"id":"c1","name":"Alice","encodings":[[0.1]]}"#).unwrap();
        assert_eq!(one.len(), 1);

        let many = parse_documents(
            r#"[{"id":"c1","name":"Alice","encodings":[[0.1]]},
                {"id":"c2","name":"Bob","encodings":[[0.2]],"phone_number":"+1",
                 "purchase_history":[{"item":"Milk","price":2.5,"time":"2025-01-01"}]}]"#,
        )
        .unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(many[1].purchase_history[0].item, "Milk");
    }

    #[test]
    fn test_parse_rejects_incomplete_documents() {
        assert!(parse_documents(r#"{"id":"c1","name":"Alice"}"#).is_err());
        assert!(parse_documents(r#"{"id":"","name":"Alice","encodings":[[0.1]]}"#).is_err());
        assert!(parse_documents("not json").is_err());
    }

    #[test]
    fn test_pretty_falls_back_to_raw() {
        assert_eq!(pretty("oops"), "oops");
        assert!(pretty(r#"{"a":1}"#).contains("\"a\": 1"));
    }
}
