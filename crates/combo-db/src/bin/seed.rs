//! # Seed Data Generator
//!
//! Populates the database with demo bundles, stock and a promotion policy
//! for development.
//!
//! ## Usage
//! ```bash
//! cargo run -p combo-db --bin seed
//!
//! # Specify database path
//! cargo run -p combo-db --bin seed -- --db ./data/combo.db
//! ```
//!
//! ## Generated Data
//! - Stock levels for a small outdoor catalog
//! - One fixed-price bundle, one percent bundle, one weighted bundle with
//!   a marketing cap, one draft bundle
//! - A promotion policy that excludes bundles by default but whitelists
//!   a single code

use chrono::{Duration, Utc};
use combo_core::guard::{BundleOverride, GlobalPromotionPolicy};
use combo_core::{
    BundleDefinition, BundleStatus, Component, DiscountMode, Money, Percent, PromotionPolicy,
};
use combo_db::{Database, DbConfig};
use std::env;

/// `(variant_id, name, price_cents, on_hand)`
const CATALOG: &[(&str, &str, i64, i64)] = &[
    ("tent-2p", "Two-Person Tent", 18900, 40),
    ("tent-4p", "Four-Person Tent", 27900, 12),
    ("bag-3s", "Three-Season Sleeping Bag", 8900, 60),
    ("pad-foam", "Foam Sleeping Pad", 2900, 120),
    ("lamp-led", "LED Camp Lamp", 2400, 75),
    ("stove-1b", "Single-Burner Stove", 4500, 30),
    ("pot-set", "Cook Pot Set", 3500, 25),
    ("mug-ti", "Titanium Mug", 1900, 200),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./combo_dev.db");

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
                println!("Combo Bundles Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./combo_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Combo Bundles Seed Data Generator");
    println!("====================================");
    println!("Database: {}", db_path);
    println!();

    let config = DbConfig::new(&db_path);
    let db = Database::new(config).await?;

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.bundles().count().await?;
    if existing > 0 {
        println!("⚠ Database already has {} bundles", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    println!();
    println!("Stocking catalog...");
    for (variant_id, name, _, on_hand) in CATALOG {
        db.stock().set_level(variant_id, name, *on_hand, 0).await?;
    }
    println!("  {} variants", CATALOG.len());

    println!();
    println!("Creating bundles...");
    for definition in demo_bundles() {
        if let Err(e) = definition.discount() {
            eprintln!("Skipping {}: {}", definition.id, e);
            continue;
        }
        db.bundles().insert(&definition).await?;
        println!("  {} ({:?}, {})", definition.name, definition.discount_mode, definition.status);
    }

    let policy = PromotionPolicy {
        default: GlobalPromotionPolicy::Exclude,
        whitelist: vec!["camp10".to_string()],
        exclusion_patterns: vec!["^SITEWIDE".to_string()],
        bundle_overrides: [("kitchen-kit".to_string(), BundleOverride::No)].into_iter().collect(),
        max_cumulative_discount: Some(0.4),
        ..PromotionPolicy::default()
    };
    db.policy().save(&policy).await?;
    println!("✓ Promotion policy saved");

    println!();
    println!("✓ Seed complete!");

    Ok(())
}

fn component(variant_id: &str, qty: i64, weight: Option<u32>) -> Component {
    let (name, price) = CATALOG
        .iter()
        .find(|(id, ..)| *id == variant_id)
        .map(|(_, name, price, _)| (name.to_string(), *price))
        .unwrap_or_else(|| (variant_id.to_string(), 0));

    Component {
        variant_id: variant_id.to_string(),
        name,
        quantity_per_bundle: qty,
        weight,
        unit_price_snapshot: Money::from_cents(price),
    }
}

fn demo_bundles() -> Vec<BundleDefinition> {
    let now = Utc::now();
    let base = |id: &str, name: &str, components: Vec<Component>| BundleDefinition {
        id: id.to_string(),
        name: name.to_string(),
        status: BundleStatus::Active,
        discount_mode: DiscountMode::Percent,
        fixed_price_cents: None,
        percent_off: None,
        valid_from: None,
        valid_to: None,
        bundle_cap: None,
        bundle_reserved_open: 0,
        components,
        created_at: now,
        updated_at: now,
    };

    let mut weekend = base(
        "weekend-kit",
        "Weekend Camping Kit",
        vec![
            component("tent-2p", 1, None),
            component("bag-3s", 2, None),
            component("pad-foam", 2, None),
        ],
    );
    weekend.discount_mode = DiscountMode::Fixed;
    weekend.fixed_price_cents = Some(29900);

    let mut kitchen = base(
        "kitchen-kit",
        "Camp Kitchen",
        vec![
            component("stove-1b", 1, None),
            component("pot-set", 1, None),
            component("mug-ti", 2, None),
        ],
    );
    kitchen.percent_off = Some(Percent::from_bps(1500));

    // Tents carry most of the discount.
    let mut family = base(
        "family-kit",
        "Family Basecamp",
        vec![
            component("tent-4p", 1, Some(3)),
            component("lamp-led", 2, Some(1)),
            component("bag-3s", 4, Some(1)),
        ],
    );
    family.discount_mode = DiscountMode::Fixed;
    family.fixed_price_cents = Some(59900);
    family.bundle_cap = Some(10);
    family.valid_to = Some(now + Duration::days(60));

    let mut draft = base(
        "night-light",
        "Night Light Pack",
        vec![component("lamp-led", 3, None)],
    );
    draft.status = BundleStatus::Draft;
    draft.percent_off = Some(Percent::from_bps(2000));

    vec![weekend, kitchen, family, draft]
}
