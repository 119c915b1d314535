//! # Seed Data Generator
//!
//! Populates a kiosk database with the makerspace tool catalog and a few
//! test users for development.
//!
//! ## Usage
//! ```bash
//! cargo run -p toole-db --bin seed
//!
//! # Specify database path
//! cargo run -p toole-db --bin seed -- --db ./data/kiosk.db
//! ```
//!
//! ## Generated Data
//! - One catalog row per tool class the classifier was trained on
//! - Three users: waiver current, waiver expired, no waiver on record

use chrono::{Duration, Utc};
use std::env;
use toole_db::{Database, DbConfig, NewTool, UserRecord};

/// (name, type, quantity on the shelf)
const TOOLS: &[(&str, &str, i64)] = &[
    ("Hammer", "Hand Tool", 4),
    ("Wrench", "Hand Tool", 6),
    ("Screwdriver", "Hand Tool", 10),
    ("Pliers", "Hand Tool", 5),
    ("Tape Measure", "Measuring", 4),
    ("Utility Knife", "Cutting", 3),
    ("Hex Key Set", "Hand Tool", 3),
    ("Soldering Iron", "Electronics", 2),
    ("Multimeter", "Electronics", 2),
    ("Cordless Drill", "Power Tool", 2),
    ("Hot Glue Gun", "Adhesive", 3),
    ("Caliper", "Measuring", 2),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./kiosk_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("TOOL-E Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./kiosk_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 TOOL-E Seed Data Generator");
    println!("=============================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.tools().count().await?;
    if existing > 0 {
        println!("⚠ Database already has {} tools", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    for (name, kind, quantity) in TOOLS {
        if let Err(e) = db.tools().insert(&NewTool::new(*name, *kind, *quantity)).await {
            eprintln!("Failed to insert {}: {}", name, e);
        }
    }
    println!("✓ Inserted {} tools", TOOLS.len());

    let today = Utc::now().date_naive();
    let users = [
        ("30000001", "Casey", "Current", Some(today - Duration::days(30))),
        ("30000002", "Eli", "Expired", Some(today - Duration::days(400))),
        ("30000003", "Nova", "Missing", None),
    ];
    for (ucid, first, last, renewed) in users {
        let user = UserRecord {
            user_id: ucid.to_string(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            email: None,
            card_barcode: Some(format!("CARD{}", &ucid[4..])),
            last_renewed: renewed,
        };
        db.users().upsert(&user).await?;
    }
    println!("✓ Inserted {} users", users.len());

    let available = db.tools().list_available().await?;
    println!();
    println!("Manual selection list:");
    for tool in available {
        println!("  {:<16} {} available", tool.tool_name, tool.available_quantity);
    }

    db.close().await;
    println!();
    println!("Done.");
    Ok(())
}
