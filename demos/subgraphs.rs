//! Three subgraphs (users, products, reviews) resolving the entity references a federation
//! gateway would send them while executing
//!
//! ```graphql
//! { reviews { body author { name reviews { body } purchases { name } } product { name reviews { id } } } }
//! ```
//!
//! Every request builds fresh loaders and hands them to the resolvers through an explicit
//! per-request context. Run with `RUST_LOG=debug` to watch batches being dispatched.

use std::convert::Infallible;

use async_trait::async_trait;
use batchload_rs::{BatchFunction, LoadResult, Loader};
use futures::future;
use tracing_subscriber::EnvFilter;

/// Partial `User` as sent by the gateway: `@key(fields: "id")` only.
#[derive(Debug, Clone)]
struct UserRepresentation {
    id: &'static str,
}

/// Partial `Product` as sent by the gateway: `@key(fields: "id")` only.
#[derive(Debug, Clone)]
struct ProductRepresentation {
    id: &'static str,
}

mod users {
    use super::UserRepresentation;

    #[derive(Debug, Clone)]
    pub struct User {
        pub id: &'static str,
        pub name: &'static str,
    }

    const USERS: [User; 5] = [
        User { id: "1", name: "Johnnie" },
        User { id: "2", name: "Annie" },
        User { id: "3", name: "Gerald" },
        User { id: "4", name: "Bobby" },
        User { id: "5", name: "Agnes" },
    ];

    /// Single-field service: a direct lookup, no batching.
    fn fetch_user_by_id(id: &str) -> Option<User> {
        USERS.iter().find(|user| user.id == id).cloned()
    }

    pub fn me() -> Option<User> {
        fetch_user_by_id("1")
    }

    pub fn resolve_reference(user: &UserRepresentation) -> Option<User> {
        tracing::info!(id = user.id, "[users] resolving reference for user");
        fetch_user_by_id(user.id)
    }
}

mod products {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct Product {
        pub id: &'static str,
        pub name: &'static str,
        pub price: &'static str,
    }

    const PRODUCTS: [Product; 4] = [
        Product { id: "1234", name: "Lunchpack", price: "$10" },
        Product { id: "5678", name: "Nappies", price: "$10" },
        Product { id: "9012", name: "Blanket", price: "$10" },
        Product { id: "3456", name: "Frog", price: "$10" },
    ];

    const PURCHASES: [(&str, &[&str]); 4] = [
        ("1", &["1234", "5678"]),
        ("2", &["9012", "3456"]),
        ("3", &["9012"]),
        ("4", &["3456"]),
    ];

    pub struct ProductsById;

    #[async_trait]
    impl BatchFunction<&'static str, Product> for ProductsById {
        type Context = ();
        type Error = String;

        async fn load(
            keys: &[&'static str],
            _context: &(),
        ) -> Result<Vec<Result<Product, String>>, String> {
            Ok(keys
                .iter()
                .map(|id| {
                    PRODUCTS
                        .iter()
                        .find(|product| product.id == *id)
                        .cloned()
                        .ok_or_else(|| format!("product {} not found", id))
                })
                .collect())
        }
    }

    /// The fields the products subgraph contributes to `User`.
    #[derive(Debug)]
    pub struct UserPurchases {
        pub purchases: Vec<Product>,
    }

    /// Per-request loaders of the products subgraph.
    pub struct ProductsRequest {
        products_by_id: Loader<&'static str, Product>,
    }

    impl Default for ProductsRequest {
        fn default() -> Self {
            Self { products_by_id: Loader::new(ProductsById, ()) }
        }
    }

    impl ProductsRequest {

        pub fn products(&self) -> Vec<Product> {
            PRODUCTS.to_vec()
        }

        pub async fn resolve_product_reference(
            &self,
            product: &ProductRepresentation,
        ) -> LoadResult<Product> {
            tracing::info!(id = product.id, "[products] resolving reference for product");
            self.products_by_id.load(product.id).await
        }

        pub async fn resolve_user_reference(
            &self,
            user: &UserRepresentation,
        ) -> LoadResult<UserPurchases> {
            tracing::info!(id = user.id, "[products] resolving reference for user");
            let ids = PURCHASES
                .iter()
                .find(|(user_id, _)| *user_id == user.id)
                .map(|(_, ids)| ids.to_vec())
                .unwrap_or_default();
            let purchases = self
                .products_by_id
                .load_many(ids)
                .await?
                .into_iter()
                .collect::<LoadResult<Vec<_>>>()?;
            Ok(UserPurchases { purchases })
        }
    }
}

mod reviews {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct Review {
        pub id: &'static str,
        pub body: &'static str,
        pub author: UserRepresentation,
        pub product: ProductRepresentation,
    }

    const fn review(
        id: &'static str,
        body: &'static str,
        author: &'static str,
        product: &'static str,
    ) -> Review {
        Review {
            id,
            body,
            author: UserRepresentation { id: author },
            product: ProductRepresentation { id: product },
        }
    }

    const REVIEWS: [Review; 4] = [
        review("abs32", "Good", "1", "1234"),
        review("kjj23", "I like it!", "3", "5678"),
        review("ll245", "Not sure", "4", "9012"),
        review("o2jk1", "It's okay", "2", "3456"),
    ];

    fn reviews_where(matches: impl Fn(&Review) -> bool) -> Vec<Review> {
        REVIEWS.iter().filter(|review| matches(review)).cloned().collect()
    }

    pub struct ReviewsByUserId;

    #[async_trait]
    impl BatchFunction<&'static str, Vec<Review>> for ReviewsByUserId {
        type Context = ();
        type Error = Infallible;

        async fn load(
            keys: &[&'static str],
            _context: &(),
        ) -> Result<Vec<Result<Vec<Review>, Infallible>>, Infallible> {
            tracing::info!(?keys, "[reviews] fetching reviews by user");
            Ok(keys.iter().map(|id| Ok(reviews_where(|review| review.author.id == *id))).collect())
        }
    }

    pub struct ReviewsByProductId;

    #[async_trait]
    impl BatchFunction<&'static str, Vec<Review>> for ReviewsByProductId {
        type Context = ();
        type Error = Infallible;

        async fn load(
            keys: &[&'static str],
            _context: &(),
        ) -> Result<Vec<Result<Vec<Review>, Infallible>>, Infallible> {
            tracing::info!(?keys, "[reviews] fetching reviews by product");
            Ok(keys.iter().map(|id| Ok(reviews_where(|review| review.product.id == *id))).collect())
        }
    }

    /// The fields the reviews subgraph contributes to `User` and `Product`.
    #[derive(Debug)]
    pub struct EntityReviews {
        pub reviews: Vec<Review>,
    }

    /// Per-request loaders of the reviews subgraph.
    pub struct ReviewsRequest {
        by_user: Loader<&'static str, Vec<Review>>,
        by_product: Loader<&'static str, Vec<Review>>,
    }

    impl Default for ReviewsRequest {
        fn default() -> Self {
            Self {
                by_user: Loader::new(ReviewsByUserId, ()),
                by_product: Loader::new(ReviewsByProductId, ()),
            }
        }
    }

    impl ReviewsRequest {

        pub fn reviews(&self) -> Vec<Review> {
            REVIEWS.to_vec()
        }

        pub fn review(&self, id: &str) -> Option<Review> {
            reviews_where(|review| review.id == id).pop()
        }

        pub async fn resolve_user_reference(
            &self,
            user: &UserRepresentation,
        ) -> LoadResult<EntityReviews> {
            tracing::info!(id = user.id, "[reviews] resolving reference for user");
            Ok(EntityReviews { reviews: self.by_user.load(user.id).await? })
        }

        pub async fn resolve_product_reference(
            &self,
            product: &ProductRepresentation,
        ) -> LoadResult<EntityReviews> {
            tracing::info!(id = product.id, "[reviews] resolving reference for product");
            Ok(EntityReviews { reviews: self.by_product.load(product.id).await? })
        }
    }
}

/// Plays the gateway's part for one incoming operation.
async fn execute_operation() {
    let reviews_subgraph = reviews::ReviewsRequest::default();
    let products_subgraph = products::ProductsRequest::default();

    let reviews = reviews_subgraph.reviews();

    let (authors, products, author_reviews, author_purchases, product_reviews) = future::join5(
        async {
            reviews.iter().map(|review| users::resolve_reference(&review.author)).collect::<Vec<_>>()
        },
        future::join_all(
            reviews.iter().map(|review| products_subgraph.resolve_product_reference(&review.product)),
        ),
        future::join_all(
            reviews.iter().map(|review| reviews_subgraph.resolve_user_reference(&review.author)),
        ),
        future::join_all(
            reviews.iter().map(|review| products_subgraph.resolve_user_reference(&review.author)),
        ),
        future::join_all(
            reviews.iter().map(|review| reviews_subgraph.resolve_product_reference(&review.product)),
        ),
    )
    .await;

    for (i, review) in reviews.iter().enumerate() {
        let author = authors[i].as_ref().map(|user| user.name);
        let product = products[i].as_ref().map(|product| product.name).ok();
        let written = author_reviews[i].as_ref().map(|r| r.reviews.len()).ok();
        let purchased = author_purchases[i]
            .as_ref()
            .map(|p| p.purchases.iter().map(|product| product.name).collect::<Vec<_>>())
            .ok();
        let product_review_ids = product_reviews[i]
            .as_ref()
            .map(|r| r.reviews.iter().map(|review| review.id).collect::<Vec<_>>())
            .ok();
        tracing::info!(
            review = review.id,
            body = review.body,
            ?author,
            ?written,
            ?purchased,
            ?product,
            ?product_review_ids,
            "resolved review"
        );
    }

    if let Some(me) = users::me() {
        tracing::info!(id = me.id, name = me.name, "me");
    }
    if let Some(review) = reviews_subgraph.review("kjj23") {
        tracing::info!(id = review.id, body = review.body, "review by id");
    }
    tracing::info!(count = products_subgraph.products().len(), "catalog size");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Two operations, two sets of loaders: nothing cached by the first is visible to the second.
    execute_operation().await;
    execute_operation().await;
}
