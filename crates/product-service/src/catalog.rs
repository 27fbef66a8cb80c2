use crate::validate::NewProduct;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub id: String,
    pub title: String,
    pub description: String,
    pub price: f64,
}

/// A product joined with its stock count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailableProduct {
    #[serde(flatten)]
    pub product: Product,
    pub count: i64,
}

/// Products and stock counts kept as two tables, joined on read.
#[derive(Default)]
pub struct Catalog {
    products: RwLock<Vec<Product>>,
    stocks: RwLock<HashMap<String, i64>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog preloaded with the demo goods.
    pub fn seeded() -> Self {
        let catalog = Self::new();
        for (id, title, description, price, count) in SEED {
            catalog.insert(
                Product {
                    id: id.to_string(),
                    title: title.to_string(),
                    description: description.to_string(),
                    price: *price,
                },
                *count,
            );
        }
        catalog
    }

    fn insert(&self, product: Product, count: i64) {
        self.stocks.write().insert(product.id.clone(), count);
        self.products.write().push(product);
    }

    /// All products, with a missing stock row read as zero.
    pub fn list(&self) -> Vec<AvailableProduct> {
        let stocks = self.stocks.read();
        self.products
            .read()
            .iter()
            .map(|p| AvailableProduct {
                product: p.clone(),
                count: stocks.get(&p.id).copied().unwrap_or(0),
            })
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<AvailableProduct> {
        let product = self.products.read().iter().find(|p| p.id == id).cloned()?;
        let count = self.stocks.read().get(id).copied().unwrap_or(0);
        Some(AvailableProduct { product, count })
    }

    /// Store a new product under a fresh id.
    pub fn create(&self, new: NewProduct) -> AvailableProduct {
        let product = Product {
            id: uuid::Uuid::new_v4().to_string(),
            title: new.title,
            description: new.description,
            price: new.price,
        };
        self.insert(product.clone(), new.count);
        AvailableProduct {
            product,
            count: new.count,
        }
    }

    pub fn len(&self) -> usize {
        self.products.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.read().is_empty()
    }
}

const SEED: &[(&str, &str, &str, f64, i64)] = &[
    (
        "7567ec4b-b10c-48c5-9345-fc73c48a80aa",
        "Goose figurine",
        "Little clay goose figurine",
        25.0,
        7,
    ),
    (
        "7567ec4b-b10c-48c5-9345-fc73c48a80a1",
        "Plush Goose toy",
        "Big plush goose toy",
        15.0,
        10,
    ),
    (
        "7567ec4b-b10c-48c5-9345-fc73c48a80a3",
        "T-shirt with goose",
        "M-size T-shirt with goose print",
        20.0,
        15,
    ),
    (
        "7567ec4b-b10c-48c5-9345-fc73348a80a1",
        "Goose cup",
        "Cup with a goose, 300ml",
        25.0,
        14,
    ),
    (
        "7567ec4b-b10c-48c5-9445-fc73c48a80a2",
        "Goose plate",
        "Plate with a goose print",
        30.0,
        21,
    ),
];
