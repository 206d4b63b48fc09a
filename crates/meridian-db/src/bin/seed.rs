//! # Seed Data Generator
//!
//! Populates the database with a test catalog for development.
//!
//! ## Usage
//! ```bash
//! # Generate 400 products (default)
//! cargo run -p meridian-db --bin seed
//!
//! # Generate custom amount
//! cargo run -p meridian-db --bin seed -- --count 1000
//!
//! # Specify database path
//! cargo run -p meridian-db --bin seed -- --db ./data/meridian.db
//! ```
//!
//! ## Generated Data
//! - Products across electronics, apparel, home, sports, and books, with
//!   deterministic prices ($4.99 - $99.99) and an occasional sale price
//! - An inventory record per product at the default store, stocked 0-149
//!   units so some rows start below their reorder point
//! - Three coupons: WELCOME10 (10%), SAVE5 ($5 off $25), BULK20 (20%
//!   capped at $20, orders over $100)

use chrono::{Duration, Utc};
use meridian_core::{DiscountType, DEFAULT_STORE_ID};
use meridian_db::{Database, DbConfig, NewCoupon};
use std::env;

/// Product names by category for realistic test data
const CATALOG: &[(&str, &[&str])] = &[
    (
        "electronics",
        &[
            "Wireless Earbuds",
            "Bluetooth Speaker",
            "USB-C Charger",
            "Phone Stand",
            "Laptop Sleeve",
            "Mechanical Keyboard",
            "Optical Mouse",
            "Webcam HD",
            "Power Bank",
            "HDMI Cable",
            "Smart Bulb",
            "Fitness Tracker",
            "Portable SSD",
            "Microphone",
            "Desk Lamp LED",
            "Wireless Charger",
        ],
    ),
    (
        "apparel",
        &[
            "Cotton T-Shirt",
            "Hooded Sweatshirt",
            "Denim Jacket",
            "Running Shorts",
            "Wool Socks",
            "Baseball Cap",
            "Rain Jacket",
            "Canvas Belt",
            "Flannel Shirt",
            "Beanie",
            "Training Tights",
            "Crew Sweater",
            "Work Gloves",
            "Puffer Vest",
            "Swim Trunks",
            "Scarf",
        ],
    ),
    (
        "home",
        &[
            "Ceramic Mug",
            "Throw Blanket",
            "Scented Candle",
            "Cutting Board",
            "French Press",
            "Mixing Bowls",
            "Bath Towel Set",
            "Picture Frame",
            "Plant Pot",
            "Storage Bins",
            "Oven Mitts",
            "Table Runner",
            "Wall Clock",
            "Coaster Set",
            "Laundry Hamper",
            "Spice Rack",
        ],
    ),
    (
        "sports",
        &[
            "Yoga Mat",
            "Resistance Bands",
            "Jump Rope",
            "Water Bottle",
            "Foam Roller",
            "Tennis Balls",
            "Kettlebell 10kg",
            "Cycling Gloves",
            "Swim Goggles",
            "Hiking Poles",
            "Frisbee",
            "Climbing Chalk",
            "Bike Light",
            "Gym Bag",
            "Sweat Towel",
            "Hand Grips",
        ],
    ),
    (
        "books",
        &[
            "Mystery Novel",
            "Cookbook Basics",
            "Travel Guide",
            "Sci-Fi Anthology",
            "History Atlas",
            "Poetry Collection",
            "Graphic Novel",
            "Biography",
            "Puzzle Book",
            "Field Guide Birds",
            "Art Techniques",
            "Chess Openings",
            "Gardening Manual",
            "Short Stories",
            "Language Primer",
            "Photography Intro",
        ],
    ),
];

/// Size/variant suffixes cycled across the catalog
const VARIANTS: &[(&str, i64)] = &[
    ("", 0),
    ("Black", 0),
    ("White", 0),
    ("Blue", 50),
    ("Red", 50),
    ("Small", -100),
    ("Medium", 0),
    ("Large", 150),
    ("Deluxe", 500),
    ("Bundle", 900),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut count: usize = 400;
    let mut db_path = String::from("./meridian_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(400);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Meridian Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of products to generate (default: 400)");
                println!("  -d, --db <PATH>    Database file path (default: ./meridian_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Meridian Seed Data Generator");
    println!("===============================");
    println!("Database: {}", db_path);
    println!("Products: {}", count);
    println!();

    // Connect to database
    let config = DbConfig::new(&db_path);
    let db = Database::new(config).await?;

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    // Check existing products
    let existing = db.products().count().await?;
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    println!();
    println!("Generating catalog...");

    let mut generated = 0;
    let start = std::time::Instant::now();

    'outer: for (category_idx, (category, names)) in CATALOG.iter().enumerate() {
        for (name_idx, name) in names.iter().enumerate() {
            for (variant_idx, (variant, price_addon)) in VARIANTS.iter().enumerate() {
                if generated >= count {
                    break 'outer;
                }

                let seed = category_idx * 1000 + name_idx * 10 + variant_idx;
                let full_name = if variant.is_empty() {
                    (*name).to_string()
                } else {
                    format!("{} {}", name, variant)
                };

                // Deterministic price: $4.99 - $99.99 plus the variant addon.
                let price_cents = 499 + ((seed * 37) % 9_500) as i64 + price_addon;
                // Every fourth product is on sale at 20% off.
                let discount_price_cents = if seed % 4 == 0 {
                    price_cents * 80 / 100
                } else {
                    0
                };

                let product = db
                    .products()
                    .create(&full_name, category, price_cents, discount_price_cents)
                    .await?;

                db.inventory()
                    .create(&product.id, DEFAULT_STORE_ID, 10, 500, 25, 100)
                    .await?;

                // 0-149 units; roughly one in six starts below the reorder
                // point and some start empty.
                let stock = ((seed * 13) % 150) as i64;
                if stock > 0 {
                    db.inventory()
                        .add_stock(
                            &product.id,
                            DEFAULT_STORE_ID,
                            stock,
                            Some("Initial stock"),
                            None,
                            None,
                        )
                        .await?;
                }

                generated += 1;
                if generated % 100 == 0 {
                    println!("  Generated {} products...", generated);
                }
            }
        }
    }

    let elapsed = start.elapsed();
    println!();
    println!("✓ Generated {} products in {:?}", generated, elapsed);

    // Coupons
    println!();
    println!("Creating coupons...");
    let now = Utc::now();

    let coupons = [
        NewCoupon {
            code: "WELCOME10".to_string(),
            discount_type: DiscountType::Percentage,
            discount_value: 10,
            min_order_amount_cents: 0,
            max_discount_amount_cents: None,
            usage_limit: None,
            usage_per_user: Some(1),
            applicable_categories: vec![],
            applicable_products: vec![],
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(365),
        },
        NewCoupon {
            code: "SAVE5".to_string(),
            discount_type: DiscountType::Fixed,
            discount_value: 500,
            min_order_amount_cents: 2_500,
            max_discount_amount_cents: None,
            usage_limit: Some(1_000),
            usage_per_user: None,
            applicable_categories: vec![],
            applicable_products: vec![],
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(90),
        },
        NewCoupon {
            code: "BULK20".to_string(),
            discount_type: DiscountType::Percentage,
            discount_value: 20,
            min_order_amount_cents: 10_000,
            max_discount_amount_cents: Some(2_000),
            usage_limit: Some(200),
            usage_per_user: Some(2),
            applicable_categories: vec![],
            applicable_products: vec![],
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(30),
        },
    ];

    for coupon in coupons {
        let code = coupon.code.clone();
        db.coupons().create(coupon).await?;
        println!("  {} created", code);
    }

    // Summary
    let needing_reorder = db
        .inventory()
        .list_needing_reorder(DEFAULT_STORE_ID)
        .await?;
    println!();
    println!("✓ {} products below their reorder point", needing_reorder.len());
    println!("✓ Seed complete!");

    Ok(())
}
