use std::collections::HashMap;

use async_trait::async_trait;
use batchload_rs::{BatchFunction, LoadError, Loader};

// Empty functor that implements the BatchFunction trait. For this example, it
// trivially loads values from some HashMap.
struct MyBatchFn;

#[async_trait]
impl BatchFunction<i64, String> for MyBatchFn {
    type Context = HashMap<i64, String>;
    type Error = String;

    async fn load(
        keys: &[i64],
        context: &Self::Context,
    ) -> Result<Vec<Result<String, String>>, String> {
        Ok(keys
            .iter()
            .map(|k| context.get(k).cloned().ok_or_else(|| format!("no movie numbered {}", k)))
            .collect())
    }
}

#[tokio::main]
async fn main() {
    let mut context = HashMap::new();
    context.insert(2001, "a space odyssey".to_owned());
    context.insert(7, "samurai".to_owned());
    context.insert(12, "angry men".to_owned());

    let loader = Loader::new(MyBatchFn {}, context);

    assert_eq!(loader.load(7).await.as_deref(), Ok("samurai"));
    assert_eq!(
        loader.load(15).await,
        Err(LoadError::Key { message: "no movie numbered 15".to_owned() })
    );

    let titles = loader.load_many(vec![12, 2010, 2001]).await.unwrap_or_default();
    assert_eq!(
        titles.iter().map(|title| title.as_deref().ok()).collect::<Vec<_>>(),
        vec![Some("angry men"), None, Some("a space odyssey")]
    );
}
