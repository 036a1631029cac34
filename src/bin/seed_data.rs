//! Seed data script - populates the database with a small grocery catalog
//!
//! Run with: cargo run --bin seed-data -- --migrate
//!
//! This creates:
//! - 10 grocery products, two of them on sale and one out of stock
//! - 1 demo customer with a delivery address and a saved card

use clap::Parser;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use std::time::Duration as StdDuration;
use tracing::info;
use uuid::Uuid;

use pantry_api::entities::{address, payment_method, product, user};

#[derive(Debug, Parser)]
#[command(name = "seed-data", about = "Populate a pantry-api database with demo data")]
struct Args {
    /// Database to seed
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://pantry.db?mode=rwc")]
    database_url: String,

    /// Run migrations before inserting
    #[arg(long)]
    migrate: bool,

    /// Email of the demo customer
    #[arg(long, default_value = "demo@pantry.test")]
    email: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();
    let args = Args::parse();

    let mut options = ConnectOptions::new(args.database_url.clone());
    options
        .max_connections(5)
        .min_connections(1)
        .connect_timeout(StdDuration::from_secs(10))
        .acquire_timeout(StdDuration::from_secs(10));

    info!("Connecting to database: {}", args.database_url);
    let db = Database::connect(options).await?;

    if args.migrate {
        pantry_api::db::run_migrations(&db).await?;
        info!("Migrations applied");
    }

    let products = create_products(&db).await?;
    info!("Created {} products", products.len());

    let customer = create_customer(&db, &args.email).await?;
    info!(
        user_id = %customer.user.id,
        address_id = %customer.address.id,
        payment_method_id = %customer.payment_method.id,
        "Created demo customer"
    );

    info!("Seed complete. Mint a token for user {} to try the API.", customer.user.id);
    Ok(())
}

async fn create_products(db: &DatabaseConnection) -> anyhow::Result<Vec<product::Model>> {
    let products_data: Vec<(&str, &str, Decimal, Option<Decimal>, i32)> = vec![
        ("Whole milk 1L", "Fresh pasteurised whole milk.", dec!(1.25), None, 40),
        ("Free-range eggs x12", "Large free-range eggs.", dec!(3.00), None, 25),
        ("Sourdough loaf", "Baked this morning.", dec!(4.50), Some(dec!(3.50)), 12),
        ("Vine tomatoes 500g", "Ripened on the vine.", dec!(2.25), None, 30),
        ("Basil", "Potted sweet basil.", dec!(2.00), None, 0),
        ("Greek yoghurt 500g", "Thick strained yoghurt.", dec!(2.75), Some(dec!(2.25)), 18),
        ("Bananas x6", "Fairtrade bananas.", dec!(1.50), None, 50),
        ("Cheddar 250g", "Mature cheddar.", dec!(3.75), None, 20),
        ("Olive oil 500ml", "Extra virgin.", dec!(6.50), None, 15),
        ("Spaghetti 500g", "Durum wheat pasta.", dec!(1.10), None, 60),
    ];

    let mut created = Vec::with_capacity(products_data.len());
    for (name, description, price, sale_price, stock) in products_data {
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(Some(description.to_string())),
            price: Set(price),
            discount_price: Set(sale_price),
            is_on_sale: Set(sale_price.is_some()),
            stock_quantity: Set(stock),
            ..Default::default()
        }
        .insert(db)
        .await?;
        created.push(model);
    }
    Ok(created)
}

struct DemoCustomer {
    user: user::Model,
    address: address::Model,
    payment_method: payment_method::Model,
}

async fn create_customer(db: &DatabaseConnection, email: &str) -> anyhow::Result<DemoCustomer> {
    let now = chrono::Utc::now();
    let user = user::ActiveModel {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        first_name: Set("Demo".to_string()),
        last_name: Set("Shopper".to_string()),
        phone: Set(None),
        processor_customer_id: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await?;

    let address = address::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.id),
        street: Set("12 Market Street".to_string()),
        city: Set("Springfield".to_string()),
        postal_code: Set("12345".to_string()),
        country: Set("US".to_string()),
        created_at: Set(now),
    }
    .insert(db)
    .await?;

    let payment_method = payment_method::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.id),
        processor_payment_method_id: Set("pm_card_visa".to_string()),
        brand: Set(Some("visa".to_string())),
        last4: Set(Some("4242".to_string())),
        is_default: Set(true),
        created_at: Set(now),
    }
    .insert(db)
    .await?;

    Ok(DemoCustomer {
        user,
        address,
        payment_method,
    })
}
