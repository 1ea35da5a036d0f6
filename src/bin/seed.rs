use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use std::str::FromStr;
use uuid::Uuid;

use patisserie_api::{
    config::AppConfig,
    db::{create_orm_conn, run_migrations},
    entity::products::{ActiveModel as ProductActive, Column, Entity as Products, ProductCategory},
    services::product_service::slugify,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let orm = create_orm_conn(&config.database_url).await?;
    run_migrations(&orm).await?;

    let catalog = [
        ("Tarte aux Fraises", "Tarte sablée, crème légère et fraises fraîches", "24.50", 12, ProductCategory::Patisseries),
        ("Gateau Chocolat Intense", "Gâteau tout chocolat, ganache noire 70%", "32.00", 8, ProductCategory::Gateaux),
        ("Croissant au Beurre", "Croissant pur beurre AOP", "1.80", 60, ProductCategory::Viennoiseries),
        ("Macaron Pistache", "Coque croquante, ganache pistache", "2.20", 45, ProductCategory::Macarons),
        ("Ballotin Pralines", "Assortiment de pralines maison, 250g", "18.90", 20, ProductCategory::Chocolats),
    ];

    for (name, description, price, stock, category) in catalog {
        let exists = Products::find()
            .filter(Column::Slug.eq(slugify(name)))
            .count(&orm)
            .await?;
        if exists > 0 {
            continue;
        }

        ProductActive {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            slug: Set(slugify(name)),
            description: Set(Some(description.to_string())),
            price: Set(Decimal::from_str(price)?),
            stock: Set(stock),
            available: Set(true),
            category: Set(category),
            created_at: NotSet,
            updated_at: NotSet,
        }
        .insert(&orm)
        .await?;
        println!("Seeded product {name}");
    }

    println!("Seed completed");
    Ok(())
}
