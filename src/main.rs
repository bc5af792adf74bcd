use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use std::env;
use std::fs;
use std::path::Path;

use bankability_engine::{
    insert_invite_code, normalize, recommend, score, setup_database, InviteCode,
};

const DEFAULT_DB_PATH: &str = "bankability.db";

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("analyze") => {
            let path = args.get(2).context("Usage: bankability analyze <bureau.json>")?;
            run_analyze(Path::new(path))
        }
        Some("init-db") => {
            let path = args.get(2).map(String::as_str).unwrap_or(DEFAULT_DB_PATH);
            run_init_db(Path::new(path))
        }
        Some("seed-invites") => {
            let codes = args
                .get(2)
                .context("Usage: bankability seed-invites <codes.json> [db]")?;
            let db = args.get(3).map(String::as_str).unwrap_or(DEFAULT_DB_PATH);
            run_seed_invites(Path::new(codes), Path::new(db))
        }
        _ => {
            eprintln!("Usage:");
            eprintln!("  bankability analyze <bureau.json>       score a raw bureau report");
            eprintln!("  bankability init-db [path]              create the database schema");
            eprintln!("  bankability seed-invites <file> [db]    load invite codes from JSON");
            std::process::exit(1);
        }
    }
}

/// Run the full credit-pull pipeline on a saved bureau response:
/// normalize -> score -> recommend, printed as a readout.
fn run_analyze(path: &Path) -> Result<()> {
    println!("📋 Bankability Analysis");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let raw_text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read bureau file: {:?}", path))?;
    let raw: serde_json::Value =
        serde_json::from_str(&raw_text).context("Bureau file is not valid JSON")?;

    let report = normalize(&raw)?;
    println!("✓ Normalized report: bureau score {}", report.score);
    println!("  Accounts: {}", report.accounts.len());
    println!("  Inquiries: {}", report.inquiries.len());

    let result = score(&report);
    println!("\n📊 Bankability Score: {:.1} / 10.0", result.value);
    println!("  Utilization: {:.1}%", result.utilization * 100.0);

    println!("\n  Category breakdown:");
    for category in &result.breakdown {
        println!(
            "    {:<28} {:>3}%  {}",
            category.label, category.percentage_weight, category.status
        );
    }

    let recommendations = recommend(&report, result.utilization, report.score);
    if recommendations.is_empty() {
        println!("\n✅ No improvement actions triggered");
    } else {
        println!("\n💡 Recommendations:");
        for (i, rec) in recommendations.iter().enumerate() {
            println!("  {}. {}", i + 1, rec.text);
        }
    }

    Ok(())
}

fn run_init_db(path: &Path) -> Result<()> {
    println!("🔧 Initializing database at {:?}...", path);

    let conn = Connection::open(path)?;
    setup_database(&conn)?;

    println!("✓ Schema created (entitlements, payment_ledger, invite_codes, processed_events)");
    Ok(())
}

/// Seed invite codes from a JSON array of InviteCode records.
/// Codes are canonicalized before insert; re-seeding an existing code
/// updates its cap/active/expiry but never resets its use count.
fn run_seed_invites(codes_path: &Path, db_path: &Path) -> Result<()> {
    println!("🎟️  Seeding invite codes from {:?}...", codes_path);

    let content = fs::read_to_string(codes_path)
        .with_context(|| format!("Failed to read invite codes file: {:?}", codes_path))?;
    let codes: Vec<InviteCode> =
        serde_json::from_str(&content).context("Failed to parse invite codes JSON")?;

    if codes.is_empty() {
        bail!("No invite codes found in {:?}", codes_path);
    }

    let conn = Connection::open(db_path)?;
    setup_database(&conn)?;

    let mut seeded = 0;
    for mut code in codes {
        code.code = code.code.trim().to_uppercase();
        if code.code.is_empty() {
            continue;
        }
        insert_invite_code(&conn, &code)?;
        seeded += 1;
    }

    println!("✓ Seeded {} invite codes into {:?}", seeded, db_path);
    Ok(())
}
